use async_trait::async_trait;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{
    CommandOutput, EngineConfiguration, EngineSettings, Expectation, MatchResult, Matcher,
    MonotonicTimer, OverallStatus, Reporter, RunOrder, RunResult, RunStarted, SpecDocument,
    SpecInfo, SpecNode, SpecResult, SpecStatus, SuiteEngine, SuiteExecutionError, SuiteNode,
    Timer,
};

struct LoadedDocument {
    source: String,
    document: SpecDocument,
}

#[derive(Default)]
struct EngineState {
    settings: EngineSettings,
    documents: Vec<LoadedDocument>,
    reporters: Vec<Arc<dyn Reporter>>,
    fallback_reporter: Option<Arc<dyn Reporter>>,
    matchers: HashMap<String, Arc<dyn Matcher>>,
}

#[derive(Debug, Clone)]
struct PlannedSpec {
    info: SpecInfo,
    expectations: Vec<Expectation>,
}

/// Everything a run needs, copied out of the engine state so no lock is held while
/// commands execute.
struct RunPlan {
    settings: EngineSettings,
    specs: Vec<PlannedSpec>,
    env: HashMap<String, String>,
    before_each: Vec<String>,
    matchers: HashMap<String, Arc<dyn Matcher>>,
    reporters: Vec<Arc<dyn Reporter>>,
}

/// Suite engine whose expectations are shell commands.
///
/// Documents are registered by [`super::DocumentLoader`]. Specs run one after another in
/// source order (documents sorted by path), or shuffled with a seeded RNG when random
/// ordering is enabled.
pub struct ShellSuiteEngine {
    base_dir: PathBuf,
    shell: String,
    state: Mutex<EngineState>,
}

impl ShellSuiteEngine {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let engine = Self {
            base_dir: base_dir.into(),
            shell: "sh".to_string(),
            state: Mutex::new(EngineState::default()),
        };
        engine.add_matchers(builtin_matchers());
        engine
    }

    /// Uses `shell` (invoked as `<shell> -c <command>`) instead of `sh`.
    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, source: &str, document: SpecDocument) {
        self.state().documents.push(LoadedDocument {
            source: source.to_string(),
            document,
        });
    }

    pub fn specs_defined(&self) -> usize {
        let state = self.state();
        let mut specs = Vec::new();
        for loaded in &state.documents {
            collect_specs(&loaded.document.suites, &mut Vec::new(), &mut specs);
        }
        specs.len()
    }

    /// Current settings, mostly useful for inspecting configuration.
    pub fn settings(&self) -> EngineSettings {
        self.state().settings.clone()
    }

    fn plan(&self) -> RunPlan {
        let state = self.state();
        let mut documents: Vec<&LoadedDocument> = state.documents.iter().collect();
        documents.sort_by(|a, b| a.source.cmp(&b.source));

        let mut specs = Vec::new();
        let mut env = HashMap::new();
        let mut before_each = Vec::new();
        for loaded in documents {
            env.extend(loaded.document.env.clone());
            before_each.extend(loaded.document.before_each.iter().cloned());
            collect_specs(&loaded.document.suites, &mut Vec::new(), &mut specs);
        }

        let reporters = if state.reporters.is_empty() {
            state.fallback_reporter.iter().cloned().collect()
        } else {
            state.reporters.clone()
        };

        RunPlan {
            settings: state.settings.clone(),
            specs,
            env,
            before_each,
            matchers: state.matchers.clone(),
            reporters,
        }
    }

    async fn run_command(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, SuiteExecutionError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.base_dir)
            .envs(env)
            .output()
            .await
            .map_err(|source| SuiteExecutionError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            command: command.to_string(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_spec(&self, spec: &PlannedSpec, plan: &RunPlan) -> SpecResult {
        let started = Instant::now();
        let mut failures = Vec::new();

        for command in &plan.before_each {
            match self.run_command(command, &plan.env).await {
                Ok(output) if output.status == Some(0) => {}
                Ok(output) => failures.push(format!(
                    "before_each `{command}` exited with {}: {}",
                    status_text(output.status),
                    output.stderr.trim()
                )),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            for expectation in &spec.expectations {
                let result = match plan.matchers.get(&expectation.to) {
                    None => MatchResult::fail(format!("Unknown matcher '{}'", expectation.to)),
                    Some(matcher) => match self.run_command(&expectation.run, &plan.env).await {
                        Ok(output) => matcher.compare(&output, expectation.expected.as_deref()),
                        Err(e) => MatchResult::fail(e.to_string()),
                    },
                };
                if !result.pass {
                    failures.push(result.message);
                    if plan.settings.one_failure_per_spec {
                        break;
                    }
                }
            }

            if spec.expectations.is_empty() && plan.settings.fail_spec_with_no_expectations {
                failures.push("Spec has no expectations".to_string());
            }
        }

        SpecResult {
            spec: spec.info.clone(),
            status: if failures.is_empty() {
                SpecStatus::Passed
            } else {
                SpecStatus::Failed
            },
            failed_expectations: failures,
            duration: started.elapsed(),
        }
    }
}

fn collect_specs(nodes: &[SuiteNode], path: &mut Vec<String>, out: &mut Vec<PlannedSpec>) {
    for suite in nodes {
        path.push(suite.describe.clone());
        for node in &suite.specs {
            match node {
                SpecNode::Suite(nested) => {
                    collect_specs(std::slice::from_ref(nested), path, out);
                }
                SpecNode::Spec(spec) => out.push(PlannedSpec {
                    info: SpecInfo::new(path.clone(), &spec.it),
                    expectations: spec.expect.clone(),
                }),
            }
        }
        path.pop();
    }
}

fn status_text(status: Option<i32>) -> String {
    status.map_or_else(|| "a signal".to_string(), |code| format!("status {code}"))
}

#[async_trait]
impl SuiteEngine for ShellSuiteEngine {
    fn configure(&self, configuration: EngineConfiguration) {
        debug!(?configuration, "Configuring engine");
        self.state().settings.apply(configuration);
    }

    #[instrument(skip(self))]
    async fn execute(&self) -> Result<(), SuiteExecutionError> {
        let mut plan = self.plan();
        let total_specs_defined = plan.specs.len();

        let order = RunOrder {
            random: plan.settings.random,
            seed: plan
                .settings
                .random
                .then(|| plan.settings.seed.unwrap_or_else(rand::random)),
        };
        if let Some(seed) = order.seed {
            plan.specs.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        let started = Instant::now();
        for reporter in &plan.reporters {
            reporter.run_started(&RunStarted {
                total_specs_defined,
                order,
            });
        }

        let mut executed = 0;
        let mut failed = 0;
        for spec in &plan.specs {
            if let Some(filter) = &plan.settings.spec_filter
                && !filter.matches(&spec.info)
            {
                let result = SpecResult {
                    spec: spec.info.clone(),
                    status: SpecStatus::Excluded,
                    failed_expectations: Vec::new(),
                    duration: Default::default(),
                };
                for reporter in &plan.reporters {
                    reporter.spec_done(&result);
                }
                continue;
            }

            for reporter in &plan.reporters {
                reporter.spec_started(&spec.info);
            }
            let result = self.run_spec(spec, &plan).await;
            for reporter in &plan.reporters {
                reporter.spec_done(&result);
            }

            executed += 1;
            if result.status == SpecStatus::Failed {
                failed += 1;
                if plan.settings.fail_fast {
                    info!(spec = %spec.info.full_name(), "Stopping after first spec failure");
                    break;
                }
            }
        }

        let (overall_status, incomplete_reason) = if failed > 0 {
            (OverallStatus::Failed, None)
        } else if total_specs_defined == 0 {
            (OverallStatus::Incomplete, Some("No specs found".to_string()))
        } else {
            (OverallStatus::Passed, None)
        };

        let result = RunResult {
            overall_status,
            incomplete_reason,
            total_specs_defined,
            executed,
            failed,
            order,
            duration: started.elapsed(),
        };
        info!(executed, failed, "Run finished");
        for reporter in &plan.reporters {
            reporter.run_done(&result);
        }
        Ok(())
    }

    fn add_reporter(&self, reporter: Arc<dyn Reporter>) {
        self.state().reporters.push(reporter);
    }

    fn clear_reporters(&self) {
        self.state().reporters.clear();
    }

    fn provide_fallback_reporter(&self, reporter: Arc<dyn Reporter>) {
        self.state().fallback_reporter = Some(reporter);
    }

    fn add_matchers(&self, matchers: Vec<Arc<dyn Matcher>>) {
        let mut state = self.state();
        for matcher in matchers {
            state.matchers.insert(matcher.name().to_string(), matcher);
        }
    }

    fn timer(&self) -> Box<dyn Timer> {
        Box::new(MonotonicTimer::default())
    }

    fn location(&self) -> String {
        self.shell.clone()
    }
}

struct Succeed;

impl Matcher for Succeed {
    fn name(&self) -> &str {
        "succeed"
    }

    fn compare(&self, actual: &CommandOutput, _expected: Option<&str>) -> MatchResult {
        if actual.status == Some(0) {
            MatchResult::pass()
        } else {
            MatchResult::fail(format!(
                "Expected `{}` to succeed, but it exited with {}. {}",
                actual.command,
                status_text(actual.status),
                actual.stderr.trim()
            ))
        }
    }
}

struct Fail;

impl Matcher for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    fn compare(&self, actual: &CommandOutput, _expected: Option<&str>) -> MatchResult {
        if actual.status == Some(0) {
            MatchResult::fail(format!("Expected `{}` to fail.", actual.command))
        } else {
            MatchResult::pass()
        }
    }
}

/// Trimmed stdout equals the expected value.
struct Output;

impl Matcher for Output {
    fn name(&self) -> &str {
        "output"
    }

    fn compare(&self, actual: &CommandOutput, expected: Option<&str>) -> MatchResult {
        let expected = expected.unwrap_or_default();
        let stdout = actual.stdout.trim();
        if stdout == expected.trim() {
            MatchResult::pass()
        } else {
            MatchResult::fail(format!(
                "Expected `{}` to output '{expected}', got '{stdout}'.",
                actual.command
            ))
        }
    }
}

struct Contain;

impl Matcher for Contain {
    fn name(&self) -> &str {
        "contain"
    }

    fn compare(&self, actual: &CommandOutput, expected: Option<&str>) -> MatchResult {
        let expected = expected.unwrap_or_default();
        if actual.stdout.contains(expected) {
            MatchResult::pass()
        } else {
            MatchResult::fail(format!(
                "Expected output of `{}` to contain '{expected}', got '{}'.",
                actual.command,
                actual.stdout.trim()
            ))
        }
    }
}

/// Matchers every [`ShellSuiteEngine`] starts with.
pub fn builtin_matchers() -> Vec<Arc<dyn Matcher>> {
    vec![
        Arc::new(Succeed),
        Arc::new(Fail),
        Arc::new(Output),
        Arc::new(Contain),
    ]
}
