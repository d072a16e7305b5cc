use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use mockall::mock;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ferry_build::{ContentFetcher, FetchError, Stage, TemplateSources};
use ferry_core::{BuildArgs, TracingLog};
use ferry_engine::{
    AuthError, AuxResult, BuildError, BuildOptions, CredentialStore, ImageEngine, RecordStream,
    RegistryCredentials, StreamRecord,
};
use ferry_pipeline::{Error, FunctionState, Scheduler, SchedulerOptions};

// ── Fakes ──

mock! {
    Fetcher {}
    impl ContentFetcher for Fetcher {
        fn fetch(&self, source: &str, destination: &Path) -> Result<(), FetchError>;
    }
}

mock! {
    Store {}
    impl CredentialStore for Store {
        fn lookup(&self, host: &str) -> Result<Option<RegistryCredentials>, AuthError>;
    }
}

/// Engine that names images after the function being built. Files-stage
/// images are `sha256:files-<fn>`; tagged images are `sha256:final-<fn>`.
#[derive(Default)]
struct FakeEngine {
    fail_for: Option<String>,
    builds: Mutex<Vec<BuildOptions>>,
    pushes: Mutex<Vec<(String, Option<RegistryCredentials>)>>,
}

impl FakeEngine {
    fn failing_for(function: &str) -> Self {
        Self {
            fail_for: Some(function.to_owned()),
            ..Default::default()
        }
    }

    fn builds(&self) -> Vec<BuildOptions> {
        self.builds.lock().unwrap().clone()
    }

    fn pushed(&self) -> Vec<String> {
        let mut refs: Vec<_> = self
            .pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect();
        refs.sort();
        refs
    }
}

/// Function a build is for: the tag's repository or the FILES argument.
fn function_of(options: &BuildOptions) -> String {
    match options.tags.first() {
        Some(tag) => {
            let repository = tag.rsplit_once(':').map_or(tag.as_str(), |(r, _)| r);
            repository.rsplit('/').next().unwrap_or(repository).to_owned()
        }
        None => options
            .build_args
            .get("FILES")
            .cloned()
            .flatten()
            .unwrap_or_default(),
    }
}

impl ImageEngine for FakeEngine {
    fn build_image(&self, _context: Vec<u8>, options: BuildOptions) -> RecordStream<'_> {
        let function = function_of(&options);
        let tagged = !options.tags.is_empty();
        self.builds.lock().unwrap().push(options);

        let records = if self.fail_for.as_deref() == Some(function.as_str()) {
            vec![
                StreamRecord::Progress("Step 1/1".to_owned()),
                StreamRecord::Error(format!("build of {function} failed")),
            ]
        } else {
            let id = if tagged {
                format!("sha256:final-{function}")
            } else {
                format!("sha256:files-{function}")
            };
            vec![
                StreamRecord::Progress("Step 1/1".to_owned()),
                StreamRecord::Aux(AuxResult::Image { id }),
            ]
        };
        futures_util::stream::iter(records.into_iter().map(Ok)).boxed()
    }

    fn push_image(
        &self,
        reference: &str,
        credentials: Option<RegistryCredentials>,
    ) -> RecordStream<'_> {
        self.pushes
            .lock()
            .unwrap()
            .push((reference.to_owned(), credentials));
        let records = vec![
            StreamRecord::Progress("Pushing".to_owned()),
            StreamRecord::Aux(AuxResult::Push {
                tag: "latest".to_owned(),
                digest: "sha256:digest".to_owned(),
                size: 1,
            }),
        ];
        futures_util::stream::iter(records.into_iter().map(Ok)).boxed()
    }
}

// ── Fixtures ──

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        self.dir.path().join("functions")
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn function(&self, name: &str) -> &Self {
        let dir = self.working_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.go"), "package main").unwrap();
        self
    }

    fn direct_function(&self, name: &str) -> &Self {
        self.function(name);
        std::fs::write(
            self.working_dir().join(name).join("Dockerfile"),
            "FROM scratch\nCOPY . /\n",
        )
        .unwrap();
        self
    }

    fn scheduler(
        &self,
        options: SchedulerOptions,
        engine: Arc<FakeEngine>,
        fetcher: MockFetcher,
    ) -> Scheduler<FakeEngine, MockFetcher> {
        let options = SchedulerOptions {
            working_dir: self.working_dir(),
            ..options
        };
        let templates = TemplateSources::new("github.com/acme/templates", self.cache_dir());
        Scheduler::new(
            options,
            templates,
            engine,
            Arc::new(fetcher),
            Arc::new(TracingLog),
        )
        .with_credential_store(Arc::new(empty_store()))
    }
}

fn pool(size: usize) -> SchedulerOptions {
    SchedulerOptions {
        pool_size: size,
        ..Default::default()
    }
}

fn empty_store() -> MockStore {
    let mut store = MockStore::new();
    store.expect_lookup().returning(|_| Ok(None));
    store
}

/// What a successful fetch leaves behind: the template with its recipe.
fn write_template(destination: &Path) {
    std::fs::create_dir_all(destination).unwrap();
    std::fs::write(
        destination.join("Dockerfile"),
        "ARG FUNCTION_IMG\nFROM ${FUNCTION_IMG}\n",
    )
    .unwrap();
}

fn fetcher_writing_templates() -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(|_, destination| {
        write_template(destination);
        Ok(())
    });
    fetcher
}

// ── Registration ──

#[test]
fn missing_source_fails_at_registration() {
    let project = Project::new();
    let engine = Arc::new(FakeEngine::default());
    // No expectations: any fetch would panic.
    let mut scheduler = project.scheduler(pool(1), engine, MockFetcher::new());

    let err = scheduler
        .add_service("ghost", Some("golang"), BuildArgs::new())
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { ref function, .. } if function == "ghost"));
    assert!(scheduler.functions().is_empty());
    assert_eq!(scheduler.state("ghost"), None);
}

#[tokio::test]
async fn missing_source_never_reaches_the_pool() {
    let project = Project::new();
    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine.clone(), MockFetcher::new());

    assert!(
        scheduler
            .add_service("ghost", Some("golang"), BuildArgs::new())
            .is_err()
    );

    let ctx = CancellationToken::new();
    assert!(scheduler.download(&ctx).await.unwrap().is_empty());
    assert!(scheduler.build(&ctx).await.unwrap().is_empty());
    assert!(engine.builds().is_empty());
}

#[test]
fn direct_function_without_dockerfile_fails_at_registration() {
    let project = Project::new();
    project.function("hello");
    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine, MockFetcher::new());

    let err = scheduler
        .add_service("hello", None, BuildArgs::new())
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn duplicate_registration_is_rejected() {
    let project = Project::new();
    project.function("hello");
    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine, MockFetcher::new());

    scheduler
        .add_service("hello", Some("golang"), BuildArgs::new())
        .unwrap();
    let err = scheduler
        .add_service("hello", Some("golang"), BuildArgs::new())
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateFunction { .. }));
    assert_eq!(scheduler.state("hello"), Some(FunctionState::Registered));
}

// ── Download ──

#[tokio::test]
async fn shared_template_is_fetched_once() {
    let project = Project::new();
    project
        .function("a")
        .function("b")
        .function("c")
        .function("d");

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .withf(|source: &str, _: &Path| source == "github.com/acme/templates//golang")
        .times(1)
        .returning(|_, destination| {
            write_template(destination);
            Ok(())
        });
    fetcher
        .expect_fetch()
        .withf(|source: &str, _: &Path| source == "github.com/acme/templates//python")
        .times(1)
        .returning(|_, destination| {
            write_template(destination);
            Ok(())
        });

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(3), engine, fetcher);
    for name in ["a", "b", "c"] {
        scheduler
            .add_service(name, Some("golang"), BuildArgs::new())
            .unwrap();
    }
    scheduler
        .add_service("d", Some("python"), BuildArgs::new())
        .unwrap();

    let names = scheduler.download(&CancellationToken::new()).await.unwrap();

    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert!(project.cache_dir().join("golang/Dockerfile").is_file());
    assert_eq!(scheduler.state("a"), Some(FunctionState::TemplateFetched));
}

#[tokio::test]
async fn download_skips_direct_functions() {
    let project = Project::new();
    project.direct_function("plain").function("templated");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine, fetcher_writing_templates());
    scheduler
        .add_service("plain", None, BuildArgs::new())
        .unwrap();
    scheduler
        .add_service("templated", Some("golang"), BuildArgs::new())
        .unwrap();

    let names = scheduler.download(&CancellationToken::new()).await.unwrap();

    assert_eq!(names, vec!["templated"]);
    assert_eq!(scheduler.state("plain"), Some(FunctionState::Registered));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fetches_never_exceed_pool_size() {
    let project = Project::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut fetcher = MockFetcher::new();
    {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        fetcher
            .expect_fetch()
            .times(5)
            .returning(move |_, destination| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                write_template(destination);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
    }

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(2), engine, fetcher);
    for i in 0..5 {
        let name = format!("fn{i}");
        project.function(&name);
        scheduler
            .add_service(&name, Some(format!("tpl{i}").as_str()), BuildArgs::new())
            .unwrap();
    }

    scheduler.download(&CancellationToken::new()).await.unwrap();

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "observed {peak} concurrent fetches");
}

#[tokio::test]
async fn fetch_failure_fails_the_phase() {
    let project = Project::new();
    project.function("a").function("b");

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(|_, destination| {
        Err(FetchError::MissingContent {
            path: destination.to_path_buf(),
        })
    });

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine, fetcher);
    scheduler
        .add_service("a", Some("golang"), BuildArgs::new())
        .unwrap();
    scheduler
        .add_service("b", Some("golang"), BuildArgs::new())
        .unwrap();

    let err = scheduler
        .download(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Fetch { ref template, .. } if template == "golang"));
    assert_eq!(scheduler.state("a"), Some(FunctionState::Failed));
    assert_eq!(scheduler.state("b"), Some(FunctionState::Failed));
}

// ── Build ──

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_stage_uses_its_own_files_image() {
    let project = Project::new();
    project.function("alpha").function("beta");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(2), engine.clone(), fetcher_writing_templates());
    scheduler
        .add_service("alpha", Some("golang"), BuildArgs::new())
        .unwrap();
    scheduler
        .add_service("beta", Some("golang"), BuildArgs::new())
        .unwrap();

    let ctx = CancellationToken::new();
    scheduler.download(&ctx).await.unwrap();
    let built = scheduler.build(&ctx).await.unwrap();

    assert_eq!(built, vec!["alpha", "beta"]);

    let handler_builds: Vec<_> = engine
        .builds()
        .into_iter()
        .filter(|b| !b.tags.is_empty())
        .collect();
    assert_eq!(handler_builds.len(), 2);
    for build in handler_builds {
        let function = function_of(&build);
        assert_eq!(build.dockerfile, "golang/Dockerfile");
        assert_eq!(
            build.build_args.get("FUNCTION_IMG"),
            Some(&Some(format!("sha256:files-{function}")))
        );
    }

    let result = scheduler.build_result("alpha").unwrap();
    assert_eq!(result.stage, Stage::Handler);
    assert_eq!(result.image_id, "sha256:final-alpha");
    assert_eq!(result.image_reference, "alpha:latest");
    assert_eq!(scheduler.state("alpha"), Some(FunctionState::HandlerBuilt));
}

#[tokio::test]
async fn declared_args_reach_the_handler_stage() {
    let project = Project::new();
    project.function("hello");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine.clone(), fetcher_writing_templates());
    let mut args = BuildArgs::new();
    args.insert("GO_VERSION".to_owned(), Some("1.22".to_owned()));
    args.insert("FUNCTION_IMG".to_owned(), Some("user-supplied".to_owned()));
    scheduler
        .add_service("hello", Some("golang"), args)
        .unwrap();

    let ctx = CancellationToken::new();
    scheduler.download(&ctx).await.unwrap();
    scheduler.build(&ctx).await.unwrap();

    let builds = engine.builds();
    assert_eq!(builds.len(), 2);
    assert!(builds[0].tags.is_empty());
    assert_eq!(
        builds[0].build_args.get("FILES"),
        Some(&Some("hello".to_owned()))
    );
    assert_eq!(
        builds[1].build_args.get("GO_VERSION"),
        Some(&Some("1.22".to_owned()))
    );
    assert_eq!(
        builds[1].build_args.get("FUNCTION_IMG"),
        Some(&Some("sha256:files-hello".to_owned()))
    );
}

#[tokio::test]
async fn direct_function_builds_one_tagged_stage() {
    let project = Project::new();
    project.direct_function("hello");

    let engine = Arc::new(FakeEngine::default());
    let options = SchedulerOptions {
        registry: "reg.io/".to_owned(),
        prefix: "fn-".to_owned(),
        tag: "v1".to_owned(),
        network: "host".to_owned(),
        ..pool(1)
    };
    let mut scheduler = project.scheduler(options, engine.clone(), MockFetcher::new());
    scheduler
        .add_service("hello", None, BuildArgs::new())
        .unwrap();

    let ctx = CancellationToken::new();
    assert!(scheduler.download(&ctx).await.unwrap().is_empty());
    scheduler.build(&ctx).await.unwrap();

    let builds = engine.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].tags, vec!["reg.io/fn-hello:v1".to_owned()]);
    assert_eq!(builds[0].dockerfile, "Dockerfile");
    assert_eq!(builds[0].network, "host");

    let result = scheduler.build_result("hello").unwrap();
    assert_eq!(result.stage, Stage::Direct);
    assert_eq!(result.image_reference, "reg.io/fn-hello:v1");
}

#[tokio::test]
async fn build_without_fetched_template_schedules_nothing() {
    let project = Project::new();
    project.direct_function("plain").function("templated");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(2), engine.clone(), MockFetcher::new());
    scheduler
        .add_service("plain", None, BuildArgs::new())
        .unwrap();
    scheduler
        .add_service("templated", Some("golang"), BuildArgs::new())
        .unwrap();

    let err = scheduler
        .build(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { ref function, .. } if function == "templated"));
    assert!(engine.builds().is_empty());
}

#[tokio::test]
async fn first_failure_stops_remaining_builds() {
    let project = Project::new();
    project
        .direct_function("a")
        .direct_function("b")
        .direct_function("c");

    let engine = Arc::new(FakeEngine::failing_for("a"));
    let mut scheduler = project.scheduler(pool(1), engine.clone(), MockFetcher::new());
    for name in ["a", "b", "c"] {
        scheduler
            .add_service(name, None, BuildArgs::new())
            .unwrap();
    }

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        scheduler.build(&CancellationToken::new()),
    )
    .await
    .expect("build phase should return promptly")
    .unwrap_err();

    match err {
        Error::Build { function, source } => {
            assert_eq!(function, "a");
            assert!(matches!(source, BuildError::Reported { .. }));
        }
        other => panic!("expected Build error, got {other:?}"),
    }
    assert_eq!(engine.builds().len(), 1);
    assert_eq!(scheduler.state("a"), Some(FunctionState::Failed));
    assert_eq!(scheduler.state("b"), Some(FunctionState::Registered));
    assert_eq!(scheduler.state("c"), Some(FunctionState::Registered));
    assert!(scheduler.build_result("b").is_none());
}

#[tokio::test]
async fn cancelled_context_starts_nothing() {
    let project = Project::new();
    project.direct_function("a");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine.clone(), MockFetcher::new());
    scheduler.add_service("a", None, BuildArgs::new()).unwrap();

    let ctx = CancellationToken::new();
    ctx.cancel();
    let err = scheduler.build(&ctx).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(engine.builds().is_empty());
}

// ── Push ──

#[tokio::test]
async fn push_requires_a_build() {
    let project = Project::new();
    project.direct_function("hello");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine.clone(), MockFetcher::new());
    scheduler
        .add_service("hello", None, BuildArgs::new())
        .unwrap();

    let err = scheduler
        .push(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotBuilt { .. }));
    assert!(engine.pushed().is_empty());
}

#[tokio::test]
async fn push_sends_final_images_with_credentials() {
    let project = Project::new();
    project.direct_function("a").direct_function("b");

    let mut store = MockStore::new();
    store
        .expect_lookup()
        .withf(|host: &str| host == "reg.io")
        .times(1)
        .returning(|_| {
            Ok(Some(RegistryCredentials {
                username: Some("ci".to_owned()),
                password: Some("token".to_owned()),
                identity_token: None,
                server_address: "reg.io".to_owned(),
            }))
        });

    let engine = Arc::new(FakeEngine::default());
    let options = SchedulerOptions {
        registry: "reg.io".to_owned(),
        ..pool(2)
    };
    let mut scheduler = project
        .scheduler(options, engine.clone(), MockFetcher::new())
        .with_credential_store(Arc::new(store));
    scheduler.add_service("a", None, BuildArgs::new()).unwrap();
    scheduler.add_service("b", None, BuildArgs::new()).unwrap();

    let ctx = CancellationToken::new();
    scheduler.build(&ctx).await.unwrap();
    let pushed = scheduler.push(&ctx).await.unwrap();

    assert_eq!(pushed, vec!["a", "b"]);
    assert_eq!(engine.pushed(), vec!["reg.io/a:latest", "reg.io/b:latest"]);
    for (_, credentials) in engine.pushes.lock().unwrap().iter() {
        assert_eq!(
            credentials.as_ref().and_then(|c| c.username.as_deref()),
            Some("ci")
        );
    }
    assert_eq!(scheduler.state("a"), Some(FunctionState::Pushed));

    let done = scheduler.finish();
    assert_eq!(done, vec!["a", "b"]);
    assert_eq!(scheduler.state("b"), Some(FunctionState::Done));
}

#[tokio::test]
async fn finish_without_push_marks_built_functions_done() {
    let project = Project::new();
    project.direct_function("a");

    let engine = Arc::new(FakeEngine::default());
    let mut scheduler = project.scheduler(pool(1), engine, MockFetcher::new());
    scheduler.add_service("a", None, BuildArgs::new()).unwrap();
    scheduler.build(&CancellationToken::new()).await.unwrap();

    assert_eq!(scheduler.finish(), vec!["a"]);
    assert_eq!(scheduler.state("a"), Some(FunctionState::Done));
}
