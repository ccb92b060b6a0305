//! The spec runner: loads configuration and files, wires reporters and drives the engine.
use path_absolutize::Absolutize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    assets::DEFAULT_CONFIG_FILE,
    completion::{
        CompletionCallback, CompletionController, CompletionReporter, ExitHandler,
        OutputStream, process_exit, standard_streams,
    },
    config::{ConfigError, RunConfig, read_config_file},
    engine::{EngineConfiguration, Matcher, Reporter, SuiteEngine, SuiteExecutionError},
    files::{FileSet, GlobError, GlobMatcher, normalize_pattern},
    loader::{ModuleLoadError, ModuleLoader, load_all},
    reporter::{ConsoleReporter, ConsoleSpecFilter, DefaultReporterOptions, ReporterRegistry},
};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Glob(#[from] GlobError),
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),
    #[error(transparent)]
    SuiteExecution(#[from] SuiteExecutionError),
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Directory config files and patterns are resolved against.
    pub project_base_dir: PathBuf,
    /// Directory name whose contents are never collected as specs.
    pub dependency_dir: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            project_base_dir: PathBuf::from("."),
            dependency_dir: "vendor".to_string(),
        }
    }
}

/// Orchestrates one run. Create one per process.
pub struct SpecRunner {
    engine: Arc<dyn SuiteEngine>,
    loader: Arc<dyn ModuleLoader>,
    matcher: Arc<dyn GlobMatcher>,
    project_base_dir: PathBuf,
    spec_dir: String,
    files: FileSet,
    reporters: ReporterRegistry,
    console_reporter: Arc<ConsoleReporter>,
    completion_reporter: Arc<CompletionReporter>,
    completion: Arc<CompletionController>,
    default_reporter_configured: bool,
    showing_colors: bool,
}

impl SpecRunner {
    /// Creates a runner with the console reporter attached. The process exits through
    /// [`std::process::exit`] after stdout and stderr flush, see
    /// [`SpecRunner::with_completion`] to change that.
    pub fn new(
        engine: Arc<dyn SuiteEngine>,
        loader: Arc<dyn ModuleLoader>,
        matcher: Arc<dyn GlobMatcher>,
        options: RunnerOptions,
    ) -> Self {
        let project_base_dir = match options.project_base_dir.absolutize() {
            Ok(path) => path.into_owned(),
            Err(_) => options.project_base_dir.clone(),
        };

        let mut runner = Self {
            engine,
            loader,
            matcher,
            project_base_dir,
            spec_dir: String::new(),
            files: FileSet::new(&options.dependency_dir),
            reporters: ReporterRegistry::default(),
            console_reporter: Arc::new(ConsoleReporter::new()),
            completion_reporter: Arc::new(CompletionReporter::new()),
            completion: Arc::new(CompletionController::new(
                standard_streams(),
                process_exit(),
            )),
            default_reporter_configured: false,
            showing_colors: true,
        };
        let console_reporter = runner.console_reporter.clone();
        runner.add_reporter(console_reporter);
        runner
    }

    /// Replaces the monitored output streams and the exit function.
    pub fn with_completion(
        mut self,
        streams: Vec<Arc<dyn OutputStream>>,
        exit: ExitHandler,
    ) -> Self {
        self.completion = Arc::new(CompletionController::new(streams, exit));
        self
    }

    pub fn project_base_dir(&self) -> &Path {
        &self.project_base_dir
    }

    pub fn spec_dir(&self) -> &str {
        &self.spec_dir
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn completion(&self) -> Arc<CompletionController> {
        self.completion.clone()
    }

    pub fn console_reporter(&self) -> Arc<ConsoleReporter> {
        self.console_reporter.clone()
    }

    /// Loads a config file relative to the project base dir.
    ///
    /// Without an explicit path, `spec/support/specrun.yml` is tried and a missing file is
    /// not an error.
    #[instrument(skip(self))]
    pub async fn load_config_file(&mut self, config_path: Option<&Path>) -> Result<(), RunError> {
        let relative = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let absolute = self.project_base_dir.join(relative);
        match read_config_file(&absolute).await {
            Ok(config) => {
                info!(path = %absolute.display(), "Loaded config file");
                self.load_config(&config)
            }
            Err(ConfigError::NotFound(path)) if config_path.is_none() => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merges the options present in `config`; absent options change nothing.
    pub fn load_config(&mut self, config: &RunConfig) -> Result<(), RunError> {
        // Validated before any runtime state changes.
        let configuration = config.engine_configuration()?;

        if let Some(spec_dir) = &config.spec_dir
            && !spec_dir.is_empty()
        {
            self.spec_dir = spec_dir.clone();
        }

        if !configuration.is_empty() {
            self.engine.configure(configuration);
        }

        if let Some(helpers) = &config.helpers {
            self.add_helper_files(helpers)?;
        }
        if let Some(requires) = &config.requires {
            self.add_requires(requires);
        }
        if let Some(spec_files) = &config.spec_files {
            self.add_spec_files(spec_files)?;
        }
        Ok(())
    }

    pub fn add_requires(&mut self, requires: &[String]) {
        self.files.add_requires(requires);
    }

    pub fn add_helper_files(&mut self, patterns: &[String]) -> Result<(), GlobError> {
        let patterns = self.normalize(patterns);
        self.files.add_helper_files(self.matcher.as_ref(), &patterns)
    }

    pub fn add_spec_files(&mut self, patterns: &[String]) -> Result<(), GlobError> {
        let patterns = self.normalize(patterns);
        self.files.add_spec_files(self.matcher.as_ref(), &patterns)
    }

    pub fn add_spec_file(&mut self, path: &str) {
        self.files.add_spec_file(path);
    }

    fn normalize(&self, patterns: &[String]) -> Vec<String> {
        patterns
            .iter()
            .map(|pattern| normalize_pattern(pattern, &self.spec_dir))
            .collect()
    }

    pub fn randomize_tests(&self, random: bool) {
        self.engine.configure(EngineConfiguration {
            random: Some(random),
            ..Default::default()
        });
    }

    pub fn seed(&self, seed: u64) {
        self.engine.configure(EngineConfiguration {
            seed: Some(seed),
            ..Default::default()
        });
    }

    pub fn stop_spec_on_expectation_failure(&self, stop: bool) {
        self.engine.configure(EngineConfiguration {
            one_failure_per_spec: Some(stop),
            ..Default::default()
        });
    }

    pub fn stop_on_spec_failure(&self, stop: bool) {
        self.engine.configure(EngineConfiguration {
            fail_fast: Some(stop),
            ..Default::default()
        });
    }

    /// Colors used when the default reporter is configured automatically.
    pub fn show_colors(&mut self, show_colors: bool) {
        self.showing_colors = show_colors;
    }

    pub fn add_reporter(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.add(self.engine.as_ref(), reporter);
    }

    pub fn clear_reporters(&mut self) {
        self.reporters.clear(self.engine.as_ref());
    }

    pub fn reporters_count(&self) -> usize {
        self.reporters.count()
    }

    pub fn provide_fallback_reporter(&self, reporter: Arc<dyn Reporter>) {
        self.engine.provide_fallback_reporter(reporter);
    }

    pub fn add_matchers(&self, matchers: Vec<Arc<dyn Matcher>>) {
        self.engine.add_matchers(matchers);
    }

    /// Configures the console reporter, filling unset options with defaults.
    pub fn configure_default_reporter(&mut self, options: DefaultReporterOptions) {
        let options = options.resolve(self.engine.as_ref());
        self.console_reporter.set_options(options);
        self.default_reporter_configured = true;
    }

    pub fn on_complete(&self, callback: CompletionCallback) {
        self.completion.on_complete(callback);
    }

    pub fn set_exit_on_completion(&self, exit: bool) {
        self.completion.set_exit_on_completion(exit);
    }

    pub async fn load_requires(&self) -> Result<(), ModuleLoadError> {
        info!(count = self.files.requires().len(), "Loading requires");
        load_all(self.loader.as_ref(), self.files.requires()).await
    }

    pub async fn load_helpers(&self) -> Result<(), ModuleLoadError> {
        info!(count = self.files.helpers().len(), "Loading helpers");
        load_all(self.loader.as_ref(), self.files.helpers()).await
    }

    pub async fn load_specs(&self) -> Result<(), ModuleLoadError> {
        info!(count = self.files.specs().len(), "Loading specs");
        load_all(self.loader.as_ref(), self.files.specs()).await
    }

    /// Runs the suite.
    ///
    /// `files`, when not empty, replaces the configured spec files and is resolved against
    /// the project base dir. `filter_string` restricts the run to specs whose full name
    /// contains it. Nothing is executed if any load fails. After the engine reports
    /// completion the process exits once output is flushed.
    #[instrument(skip(self))]
    pub async fn execute(
        &mut self,
        files: &[String],
        filter_string: Option<&str>,
    ) -> Result<(), RunError> {
        self.completion.start();

        self.load_requires().await?;
        self.load_helpers().await?;

        if !self.default_reporter_configured {
            self.configure_default_reporter(
                DefaultReporterOptions::default().with_show_colors(self.showing_colors),
            );
        }

        if !files.is_empty() {
            self.spec_dir = String::new();
            self.files.clear_specs();
            self.add_spec_files(files)?;
        }

        self.load_specs().await?;

        if let Some(filter_string) = filter_string.filter(|f| !f.is_empty()) {
            debug!(filter_string, "Filtering specs");
            self.engine.configure(EngineConfiguration {
                spec_filter: Some(ConsoleSpecFilter::new(filter_string).into_spec_filter()),
                ..Default::default()
            });
        }

        let completion_reporter = self.completion_reporter.clone();
        self.add_reporter(completion_reporter);
        self.engine.execute().await?;

        let result = self.completion_reporter.wait().await;
        info!(status = ?result.overall_status, "Suite completed");
        self.completion.finish(result.passed()).await;
        Ok(())
    }
}
