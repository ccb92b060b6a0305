//! Suite engine contract.
//!
//! The runner never evaluates specs itself. It talks to a [`SuiteEngine`], which owns the
//! spec tree, runs it, and emits lifecycle events to the registered [`Reporter`]s.
//! [`ShellSuiteEngine`] is the engine shipped with specrun: its specs are shell commands
//! declared in YAML spec documents loaded by [`DocumentLoader`].
mod document;
mod shell;

pub use document::{DocumentLoader, Expectation, SpecDef, SpecDocument, SpecNode, SuiteNode};
pub use shell::{ShellSuiteEngine, builtin_matchers};

use async_trait::async_trait;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuiteExecutionError {
    #[error("Suite execution failed: {0}")]
    Execution(String),
    #[error("Failed to run command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Identity of a spec: the descriptions of its enclosing suites plus its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecInfo {
    pub suite_path: Vec<String>,
    pub description: String,
}

impl SpecInfo {
    pub fn new(suite_path: Vec<String>, description: &str) -> Self {
        Self {
            suite_path,
            description: description.to_string(),
        }
    }

    /// Suite path and description joined with single spaces.
    pub fn full_name(&self) -> String {
        self.suite_path
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.description.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Predicate deciding whether a spec runs.
#[derive(Clone)]
pub struct SpecFilter(Arc<dyn Fn(&SpecInfo) -> bool + Send + Sync>);

impl SpecFilter {
    pub fn new(predicate: impl Fn(&SpecInfo) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn matches(&self, spec: &SpecInfo) -> bool {
        (self.0)(spec)
    }
}

impl fmt::Debug for SpecFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpecFilter(..)")
    }
}

/// A partial update of engine settings. Unset fields leave the engine untouched.
#[derive(Debug, Clone, Default)]
pub struct EngineConfiguration {
    pub fail_spec_with_no_expectations: Option<bool>,
    pub one_failure_per_spec: Option<bool>,
    pub fail_fast: Option<bool>,
    pub random: Option<bool>,
    pub seed: Option<u64>,
    pub spec_filter: Option<SpecFilter>,
}

impl EngineConfiguration {
    pub fn is_empty(&self) -> bool {
        self.fail_spec_with_no_expectations.is_none()
            && self.one_failure_per_spec.is_none()
            && self.fail_fast.is_none()
            && self.random.is_none()
            && self.seed.is_none()
            && self.spec_filter.is_none()
    }
}

/// Settings an engine runs with.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub fail_spec_with_no_expectations: bool,
    pub one_failure_per_spec: bool,
    pub fail_fast: bool,
    pub random: bool,
    pub seed: Option<u64>,
    pub spec_filter: Option<SpecFilter>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fail_spec_with_no_expectations: false,
            one_failure_per_spec: false,
            fail_fast: false,
            random: true,
            seed: None,
            spec_filter: None,
        }
    }
}

impl EngineSettings {
    /// Overwrites only the fields present in `configuration`.
    pub fn apply(&mut self, configuration: EngineConfiguration) {
        if let Some(v) = configuration.fail_spec_with_no_expectations {
            self.fail_spec_with_no_expectations = v;
        }
        if let Some(v) = configuration.one_failure_per_spec {
            self.one_failure_per_spec = v;
        }
        if let Some(v) = configuration.fail_fast {
            self.fail_fast = v;
        }
        if let Some(v) = configuration.random {
            self.random = v;
        }
        if let Some(v) = configuration.seed {
            self.seed = Some(v);
        }
        if let Some(filter) = configuration.spec_filter {
            self.spec_filter = Some(filter);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecStatus {
    Passed,
    Failed,
    Excluded,
}

#[derive(Debug, Clone)]
pub struct SpecResult {
    pub spec: SpecInfo,
    pub status: SpecStatus,
    pub failed_expectations: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Passed,
    Failed,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOrder {
    pub random: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunStarted {
    pub total_specs_defined: usize,
    pub order: RunOrder,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub overall_status: OverallStatus,
    pub incomplete_reason: Option<String>,
    pub total_specs_defined: usize,
    pub executed: usize,
    pub failed: usize,
    pub order: RunOrder,
    pub duration: Duration,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.overall_status == OverallStatus::Passed
    }
}

/// Receives run and spec lifecycle events from an engine.
pub trait Reporter: Send + Sync {
    fn run_started(&self, _event: &RunStarted) {}
    fn spec_started(&self, _spec: &SpecInfo) {}
    fn spec_done(&self, _result: &SpecResult) {}
    fn run_done(&self, _result: &RunResult) {}
}

/// Captured result of one expectation's command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub pass: bool,
    pub message: String,
}

impl MatchResult {
    pub fn pass() -> Self {
        Self {
            pass: true,
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: message.into(),
        }
    }
}

/// A named comparison between a command's output and an optional expected value.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;
    fn compare(&self, actual: &CommandOutput, expected: Option<&str>) -> MatchResult;
}

/// A time source used by reporters to measure a run.
pub trait Timer: Send + Sync {
    fn start(&self);
    fn elapsed(&self) -> Duration;
}

/// Wall clock [`Timer`].
#[derive(Debug, Default)]
pub struct MonotonicTimer {
    started: Mutex<Option<Instant>>,
}

impl Timer for MonotonicTimer {
    fn start(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }
}

/// The spec-execution system the runner drives.
#[async_trait]
pub trait SuiteEngine: Send + Sync {
    /// Applies a partial settings update.
    fn configure(&self, configuration: EngineConfiguration);

    /// Runs every loaded spec. Completion is reported through [`Reporter::run_done`].
    async fn execute(&self) -> Result<(), SuiteExecutionError>;

    fn add_reporter(&self, reporter: Arc<dyn Reporter>);

    fn clear_reporters(&self);

    /// Reporter used only when no other reporter is registered at execution time.
    fn provide_fallback_reporter(&self, reporter: Arc<dyn Reporter>);

    fn add_matchers(&self, matchers: Vec<Arc<dyn Matcher>>);

    /// Creates a fresh time source.
    fn timer(&self) -> Box<dyn Timer>;

    /// Where the engine lives, used by reporters to trim engine noise from messages.
    fn location(&self) -> String;
}
