use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ferry_build::{
    ContentFetcher, FilesRecipe, FunctionBuildSpec, TemplateRef, TemplateSources, check_sources,
    check_template, direct_stage, files_stage, handler_stage,
};
use ferry_core::{BuildArgs, DEFAULT_TAG, FerryConfig, ProgressLog, image_name};
use ferry_engine::{
    BuildResult, CredentialStore, DockerConfigStore, ImageBuilder, ImageEngine, Publisher,
    PushReceipt, resolve_credentials,
};

use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use crate::state::{FunctionState, StateTable};

/// Knobs for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Directory holding one source folder per function.
    pub working_dir: PathBuf,
    pub pool_size: usize,
    pub network: String,
    pub registry: String,
    pub prefix: String,
    pub tag: String,
    pub files_base_image: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            pool_size: 1,
            network: String::new(),
            registry: String::new(),
            prefix: String::new(),
            tag: DEFAULT_TAG.to_owned(),
            files_base_image: "scratch".to_owned(),
            username: None,
            password: None,
        }
    }
}

impl SchedulerOptions {
    /// Options from `ferry.toml`, with the working directory resolved
    /// against `project_dir`.
    pub fn from_config(config: &FerryConfig, project_dir: &Path) -> Self {
        Self {
            working_dir: project_dir.join(&config.build.working_dir),
            pool_size: config.build.pool_size,
            network: config.build.network.clone(),
            registry: config.image.registry.clone(),
            prefix: config.image.prefix.clone(),
            tag: config.image.tag.clone(),
            files_base_image: config.build.files_base_image.clone(),
            username: config.registry.username.clone(),
            password: config.registry.password.clone(),
        }
    }
}

/// Runs the fetch, build, and push phases for a set of functions.
///
/// Functions are registered with [`add_service`](Self::add_service); each
/// phase then runs one job per template or function through a
/// [`WorkerPool`] bounded by `pool_size`, and returns once every job is
/// done or the first one has failed.
pub struct Scheduler<E, F> {
    options: SchedulerOptions,
    templates: TemplateSources,
    engine: Arc<E>,
    fetcher: Arc<F>,
    credentials: Arc<dyn CredentialStore>,
    log: Arc<dyn ProgressLog>,
    functions: Vec<FunctionBuildSpec>,
    states: StateTable,
    built: BTreeMap<String, BuildResult>,
}

impl<E, F> Scheduler<E, F>
where
    E: ImageEngine + 'static,
    F: ContentFetcher + 'static,
{
    pub fn new(
        options: SchedulerOptions,
        templates: TemplateSources,
        engine: Arc<E>,
        fetcher: Arc<F>,
        log: Arc<dyn ProgressLog>,
    ) -> Self {
        Self {
            options,
            templates,
            engine,
            fetcher,
            credentials: Arc::new(DockerConfigStore::new()),
            log,
            functions: Vec::new(),
            states: StateTable::default(),
            built: BTreeMap::new(),
        }
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    /// Registered function names, in registration order.
    pub fn functions(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }

    pub fn state(&self, name: &str) -> Option<FunctionState> {
        self.states.get(name)
    }

    /// Final image of a function, once its build phase succeeded.
    pub fn build_result(&self, name: &str) -> Option<&BuildResult> {
        self.built.get(name)
    }

    /// Registers a function whose sources live in `<working_dir>/<name>`.
    ///
    /// Missing sources fail here, before anything is scheduled. A template
    /// that is not cached yet is accepted and checked again by
    /// [`build`](Self::build).
    pub fn add_service(
        &mut self,
        name: &str,
        template: Option<&str>,
        build_args: BuildArgs,
    ) -> Result<()> {
        if self.states.get(name).is_some() {
            return Err(Error::DuplicateFunction {
                name: name.to_owned(),
            });
        }

        let spec = FunctionBuildSpec {
            name: name.to_owned(),
            template: template.map(str::to_owned),
            files_path: self.options.working_dir.join(name),
            template_path: template.map(|t| self.templates.cache_path(t)),
            build_args,
            network: self.options.network.clone(),
            image: image_name(
                &self.options.registry,
                &self.options.prefix,
                name,
                &self.options.tag,
            ),
        };
        check_sources(&spec).map_err(|source| Error::NotFound {
            function: name.to_owned(),
            source,
        })?;

        debug!(function = name, ?template, image = %spec.image, "registered");
        self.states.register(name);
        self.functions.push(spec);
        Ok(())
    }

    /// Fetches every distinct template once. Returns the names of the
    /// functions that use a template.
    pub async fn download(&mut self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let users: Vec<String> = self
            .functions
            .iter()
            .filter(|f| f.template.is_some())
            .map(|f| f.name.clone())
            .collect();
        let plan = self
            .templates
            .plan(self.functions.iter().filter_map(|f| f.template.as_deref()));
        info!(
            templates = plan.len(),
            functions = users.len(),
            "downloading templates"
        );

        let mut pool = WorkerPool::new(self.options.pool_size, ctx);
        for template in plan {
            let fetcher = Arc::clone(&self.fetcher);
            let log = Arc::clone(&self.log);
            pool.submit(template.name.clone(), move |cancel| {
                fetch_template(fetcher, log, template, cancel)
            });
        }

        if let Err(e) = pool.wait().await {
            if let Error::Fetch { template, .. } = &e {
                self.functions
                    .iter()
                    .filter(|f| f.template.as_deref() == Some(template.as_str()))
                    .for_each(|f| {
                        self.states.advance(&f.name, FunctionState::Failed);
                    });
            }
            return Err(e);
        }

        for name in &users {
            self.states.advance(name, FunctionState::TemplateFetched);
        }
        Ok(users)
    }

    /// Builds every function: files stage then handler stage inside one job
    /// (or the single direct stage). Returns function names in registration
    /// order.
    pub async fn build(&mut self, ctx: &CancellationToken) -> Result<Vec<String>> {
        for spec in &self.functions {
            check_template(spec).map_err(|source| Error::NotFound {
                function: spec.name.clone(),
                source,
            })?;
        }
        info!(functions = self.functions.len(), "building functions");

        let builder = ImageBuilder::new(Arc::clone(&self.engine), Arc::clone(&self.log));
        let mut pool = WorkerPool::new(self.options.pool_size, ctx);
        for spec in self.functions.iter().cloned() {
            let builder = builder.clone();
            let states = self.states.clone();
            let base_image = self.options.files_base_image.clone();
            pool.submit(spec.name.clone(), move |cancel| {
                build_function(builder, states, spec, base_image, cancel)
            });
        }

        for (name, result) in pool.wait().await? {
            self.built.insert(name, result);
        }
        Ok(self.functions())
    }

    /// Pushes every function's final image. Fails before scheduling
    /// anything if a function has not been built.
    pub async fn push(&mut self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let mut targets = Vec::with_capacity(self.functions.len());
        for spec in &self.functions {
            let built = self.built.get(&spec.name).ok_or_else(|| Error::NotBuilt {
                function: spec.name.clone(),
            })?;
            targets.push((spec.name.clone(), built.image_reference.clone()));
        }

        let credentials = resolve_credentials(
            self.credentials.as_ref(),
            &self.options.registry,
            self.options.username.as_deref(),
            self.options.password.as_deref(),
        )
        .map_err(|source| Error::Credentials { source })?;
        info!(
            functions = targets.len(),
            authenticated = credentials.is_some(),
            "pushing images"
        );

        let publisher = Publisher::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.log),
            credentials,
        );
        let mut pool = WorkerPool::new(self.options.pool_size, ctx);
        for (name, reference) in targets {
            let publisher = publisher.clone();
            let states = self.states.clone();
            pool.submit(name.clone(), move |cancel| {
                push_function(publisher, states, name, reference, cancel)
            });
        }

        pool.wait().await?;
        Ok(self.functions())
    }

    /// Marks every function that reached its final image as done. Returns
    /// the names that changed.
    pub fn finish(&mut self) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| {
                matches!(
                    self.states.get(&f.name),
                    Some(FunctionState::HandlerBuilt | FunctionState::Pushed)
                )
            })
            .filter(|f| self.states.advance(&f.name, FunctionState::Done))
            .map(|f| f.name.clone())
            .collect()
    }
}

async fn fetch_template<F: ContentFetcher + 'static>(
    fetcher: Arc<F>,
    log: Arc<dyn ProgressLog>,
    template: TemplateRef,
    cancel: CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    log.print(&format!(
        "Fetching template {} from {}",
        template.name, template.source
    ));
    let TemplateRef {
        name,
        source,
        local_cache_path,
    } = template;

    let fetched = tokio::task::spawn_blocking(move || fetcher.fetch(&source, &local_cache_path))
        .await
        .map_err(|e| Error::Worker { source: e })?;
    fetched.map_err(|source| Error::Fetch {
        template: name.clone(),
        source,
    })?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    debug!(template = %name, "template fetched");
    Ok(())
}

async fn build_function<E: ImageEngine>(
    builder: ImageBuilder<E>,
    states: StateTable,
    spec: FunctionBuildSpec,
    files_base_image: String,
    cancel: CancellationToken,
) -> Result<BuildResult> {
    let outcome = build_stages(&builder, &states, &spec, &files_base_image, &cancel).await;
    match &outcome {
        Err(e) if !e.is_cancelled() => {
            states.advance(&spec.name, FunctionState::Failed);
        }
        _ => {}
    }
    outcome
}

async fn build_stages<E: ImageEngine>(
    builder: &ImageBuilder<E>,
    states: &StateTable,
    spec: &FunctionBuildSpec,
    files_base_image: &str,
    cancel: &CancellationToken,
) -> Result<BuildResult> {
    let not_found = |source| Error::NotFound {
        function: spec.name.clone(),
        source,
    };
    let failed = |source| Error::Build {
        function: spec.name.clone(),
        source,
    };

    if spec.template.is_none() {
        let context = direct_stage(spec).map_err(not_found)?;
        let result = builder.build(context, cancel).await.map_err(failed)?;
        states.advance(&spec.name, FunctionState::HandlerBuilt);
        return Ok(result);
    }

    let recipe = FilesRecipe::new(files_base_image);
    let context = files_stage(spec, &recipe).map_err(not_found)?;
    let files = builder.build(context, cancel).await.map_err(failed)?;
    states.advance(&spec.name, FunctionState::FilesBuilt);

    let context = handler_stage(spec, &files.image_reference).map_err(not_found)?;
    let handler = builder.build(context, cancel).await.map_err(failed)?;
    states.advance(&spec.name, FunctionState::HandlerBuilt);
    Ok(handler)
}

async fn push_function<E: ImageEngine>(
    publisher: Publisher<E>,
    states: StateTable,
    name: String,
    reference: String,
    cancel: CancellationToken,
) -> Result<PushReceipt> {
    match publisher.push(&reference, &cancel).await {
        Ok(receipt) => {
            states.advance(&name, FunctionState::Pushed);
            Ok(receipt)
        }
        Err(source) => {
            let e = Error::Push {
                function: name.clone(),
                source,
            };
            if !e.is_cancelled() {
                states.advance(&name, FunctionState::Failed);
            }
            Err(e)
        }
    }
}
