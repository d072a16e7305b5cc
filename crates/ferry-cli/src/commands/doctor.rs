use std::fmt;
use std::path::Path;
use std::time::Duration;

use ferry_build::TemplateSources;
use ferry_core::FerryConfig;
use ferry_engine::{DockerConfigStore, DockerEngine};

const ENGINE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone)]
struct CheckResult {
    passed: bool,
    detail: String,
}

impl CheckResult {
    fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

#[derive(Debug, Default)]
struct DoctorReport {
    engine: CheckResult,
    config_file: CheckResult,
    functions: CheckResult,
    credentials: CheckResult,
    /// Template name → cached or not. Informational only.
    templates: Vec<(String, bool)>,
}

impl DoctorReport {
    fn all_passed(&self) -> bool {
        self.engine.passed && self.config_file.passed && self.functions.passed
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Container engine", &self.engine),
            ("ferry.toml", &self.config_file),
            ("Functions", &self.functions),
            ("Registry credentials", &self.credentials),
        ];
        for (label, check) in rows {
            writeln!(f, "  [{}] {label:<22} {}", check.icon(), check.detail)?;
        }

        if !self.templates.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Templates:")?;
            for (name, cached) in &self.templates {
                let state = if *cached { "cached" } else { "not fetched" };
                writeln!(f, "    {name:<24} {state}")?;
            }
        }
        Ok(())
    }
}

pub async fn doctor(project_dir: &Path) -> anyhow::Result<()> {
    let mut report = DoctorReport {
        engine: engine_check().await,
        ..Default::default()
    };

    let config_path = project_dir.join("ferry.toml");
    let config = match FerryConfig::load(project_dir) {
        Ok(config) => {
            report.config_file = if config_path.exists() {
                CheckResult::ok("Found")
            } else {
                CheckResult::fail("Not found")
            };
            Some(config)
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&format!("Invalid: {e}"));
            None
        }
    };

    if let Some(config) = &config {
        report.functions = match config.functions.len() {
            0 => CheckResult::fail("none defined"),
            n => CheckResult::ok(&format!("{n} defined")),
        };

        let sources = TemplateSources::from_config(&config.templates, project_dir);
        report.templates = sources
            .plan(
                config
                    .functions
                    .values()
                    .filter_map(|f| f.template.as_deref()),
            )
            .into_iter()
            .map(|t| {
                let cached = t.is_cached();
                (t.name, cached)
            })
            .collect();
    } else {
        report.functions = CheckResult::fail("config not loaded");
    }

    let store = DockerConfigStore::new();
    report.credentials = match store.path() {
        Some(path) if path.is_file() => CheckResult::ok(&path.display().to_string()),
        _ => CheckResult::ok("no docker config, pushes are unauthenticated"),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed, see above for details");
    }
    Ok(())
}

async fn engine_check() -> CheckResult {
    let engine = match DockerEngine::connect() {
        Ok(engine) => engine,
        Err(e) => return CheckResult::fail(&e.to_string()),
    };
    match tokio::time::timeout(ENGINE_TIMEOUT, engine.version()).await {
        Ok(Ok(version)) => CheckResult::ok(&format!("Docker {version}")),
        Ok(Err(e)) => CheckResult::fail(&format!("{e}")),
        Err(_) => CheckResult::fail("no answer from the engine"),
    }
}
