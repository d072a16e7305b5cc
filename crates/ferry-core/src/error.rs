use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    // ── Build arguments ──
    #[error("{kind} format is not correct, needs key=value: [{entry}]")]
    ArgFormat { kind: &'static str, entry: String },

    #[error("empty {kind} name: [{entry}]")]
    ArgEmptyName { kind: &'static str, entry: String },

    #[error("empty {kind} value: [{entry}]")]
    ArgEmptyValue { kind: &'static str, entry: String },

    // ── Function selection ──
    #[error(
        "unknown function '{name}'; defined functions: {}",
        format_names(defined)
    )]
    UnknownFunction { name: String, defined: Vec<String> },
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "(none)".to_owned()
    } else {
        names.join(", ")
    }
}
