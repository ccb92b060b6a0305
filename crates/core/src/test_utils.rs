//! Test utilities for specrun-core crate
//!
//! Fakes for the injected capabilities of the runner plus temp file helpers.

use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tempfile::Builder;

use crate::completion::ExitHandler;
use crate::engine::{
    EngineConfiguration, Matcher, MonotonicTimer, OverallStatus, Reporter, RunOrder, RunResult,
    RunStarted, SuiteEngine, SuiteExecutionError, Timer,
};
use crate::files::{GlobError, GlobMatcher, NEGATION_MARKER};
use crate::loader::{ModuleLoadError, ModuleLoader};

/// Creates a file named `name` with the given content inside a fresh temp directory.
///
/// # Panics
/// Panics if temp directory creation or file writing fails.
pub fn create_temp_file(name: &str, content: &str) -> PathBuf {
    let temp_dir = Builder::new()
        .prefix("specrun-test")
        .rand_bytes(8)
        .tempdir()
        .unwrap();
    let path = temp_dir.path().join(name);
    File::create(&path)
        .unwrap()
        .write_all(content.as_bytes())
        .unwrap();
    // Keep the temp directory alive by leaking it (this is just for tests)
    let _ = Box::leak(Box::new(temp_dir));
    path
}

/// Engine that records what the runner asks of it and reports a fixed outcome.
#[derive(Default)]
pub struct RecordingEngine {
    fail: bool,
    configurations: Mutex<Vec<EngineConfiguration>>,
    reporters: Mutex<Vec<Arc<dyn Reporter>>>,
    fallback: Mutex<Option<Arc<dyn Reporter>>>,
    matchers: Mutex<Vec<Arc<dyn Matcher>>>,
    executions: AtomicUsize,
    filter_seen: Mutex<Option<bool>>,
}

impl RecordingEngine {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn configurations(&self) -> Vec<EngineConfiguration> {
        self.configurations.lock().unwrap().clone()
    }

    pub fn reporter_count(&self) -> usize {
        self.reporters.lock().unwrap().len()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.lock().unwrap().is_some()
    }

    pub fn matcher_names(&self) -> Vec<String> {
        self.matchers
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Whether a spec filter had been configured when `execute` ran.
    pub fn filter_seen_at_execution(&self) -> Option<bool> {
        *self.filter_seen.lock().unwrap()
    }
}

#[async_trait]
impl SuiteEngine for RecordingEngine {
    fn configure(&self, configuration: EngineConfiguration) {
        self.configurations.lock().unwrap().push(configuration);
    }

    async fn execute(&self) -> Result<(), SuiteExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let has_filter = self
            .configurations()
            .iter()
            .any(|c| c.spec_filter.is_some());
        *self.filter_seen.lock().unwrap() = Some(has_filter);

        let reporters = self.reporters.lock().unwrap().clone();
        let order = RunOrder::default();
        let result = RunResult {
            overall_status: if self.fail {
                OverallStatus::Failed
            } else {
                OverallStatus::Passed
            },
            incomplete_reason: None,
            total_specs_defined: 1,
            executed: 1,
            failed: usize::from(self.fail),
            order,
            duration: Duration::ZERO,
        };
        for reporter in &reporters {
            reporter.run_started(&RunStarted {
                total_specs_defined: 1,
                order,
            });
        }
        for reporter in &reporters {
            reporter.run_done(&result);
        }
        Ok(())
    }

    fn add_reporter(&self, reporter: Arc<dyn Reporter>) {
        self.reporters.lock().unwrap().push(reporter);
    }

    fn clear_reporters(&self) {
        self.reporters.lock().unwrap().clear();
    }

    fn provide_fallback_reporter(&self, reporter: Arc<dyn Reporter>) {
        *self.fallback.lock().unwrap() = Some(reporter);
    }

    fn add_matchers(&self, matchers: Vec<Arc<dyn Matcher>>) {
        self.matchers.lock().unwrap().extend(matchers);
    }

    fn timer(&self) -> Box<dyn Timer> {
        Box::new(MonotonicTimer::default())
    }

    fn location(&self) -> String {
        "recording-engine".to_string()
    }
}

/// Loader recording `start:<path>` and `end:<path>` events, yielding in between.
#[derive(Default)]
pub struct RecordingLoader {
    fail_on: Option<String>,
    events: Mutex<Vec<String>>,
}

impl RecordingLoader {
    pub fn failing_on(path: &str) -> Self {
        Self {
            fail_on: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModuleLoader for RecordingLoader {
    async fn load(&self, path: &str) -> Result<(), ModuleLoadError> {
        self.events.lock().unwrap().push(format!("start:{path}"));
        tokio::task::yield_now().await;
        if self.fail_on.as_deref() == Some(path) {
            return Err(ModuleLoadError::new(
                path,
                std::io::Error::other("module blew up"),
            ));
        }
        self.events.lock().unwrap().push(format!("end:{path}"));
        Ok(())
    }
}

/// Treats every pattern as a literal path that exists.
pub struct StaticGlobMatcher;

impl GlobMatcher for StaticGlobMatcher {
    fn glob(&self, patterns: &[String]) -> Result<Vec<String>, GlobError> {
        let excluded: Vec<&str> = patterns
            .iter()
            .filter_map(|p| p.strip_prefix(NEGATION_MARKER))
            .collect();
        let mut paths: Vec<String> = Vec::new();
        for pattern in patterns {
            if pattern.starts_with(NEGATION_MARKER)
                || excluded.contains(&pattern.as_str())
                || paths.contains(pattern)
            {
                continue;
            }
            paths.push(pattern.clone());
        }
        Ok(paths)
    }
}

/// Records exit codes instead of terminating the test process.
#[derive(Default, Clone)]
pub struct ExitRecorder {
    codes: Arc<Mutex<Vec<i32>>>,
}

impl ExitRecorder {
    pub fn handler(&self) -> ExitHandler {
        let codes = self.codes.clone();
        Arc::new(move |code| codes.lock().unwrap().push(code))
    }

    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}
