//! Run completion tracking and the flush-gated process exit.
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io::Write;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::engine::{Reporter, RunResult};

/// Exit code used when the process terminates before the run completed.
pub const INCOMPLETE_EXIT_CODE: i32 = 4;

/// Terminates the process with the given code.
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

pub type CompletionCallback = Box<dyn Fn(bool) + Send + Sync>;

pub fn process_exit() -> ExitHandler {
    Arc::new(|code| std::process::exit(code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionState {
    #[default]
    Idle,
    Running,
    Completed {
        passed: bool,
    },
}

/// An output stream that can confirm its buffered data has been written.
#[async_trait]
pub trait OutputStream: Send + Sync {
    fn name(&self) -> &str;
    async fn flush(&self) -> std::io::Result<()>;
}

/// Flushes a process-wide std handle, the same one [`crate::reporter::stdout_print`] writes
/// through, off the async thread.
async fn flush_blocking(
    flush: impl FnOnce() -> std::io::Result<()> + Send + 'static,
) -> std::io::Result<()> {
    tokio::task::spawn_blocking(flush)
        .await
        .map_err(std::io::Error::other)?
}

pub struct StdoutStream;

#[async_trait]
impl OutputStream for StdoutStream {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn flush(&self) -> std::io::Result<()> {
        flush_blocking(|| std::io::stdout().flush()).await
    }
}

pub struct StderrStream;

#[async_trait]
impl OutputStream for StderrStream {
    fn name(&self) -> &str {
        "stderr"
    }

    async fn flush(&self) -> std::io::Result<()> {
        flush_blocking(|| std::io::stderr().flush()).await
    }
}

pub fn standard_streams() -> Vec<Arc<dyn OutputStream>> {
    vec![Arc::new(StdoutStream), Arc::new(StderrStream)]
}

/// Counts flush acknowledgments down to zero and releases exactly once.
#[derive(Debug)]
pub struct FlushBarrier {
    remaining: usize,
    released: bool,
}

impl FlushBarrier {
    pub fn new(streams: usize) -> Self {
        Self {
            remaining: streams,
            released: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Records one acknowledgment. Returns `true` for the one that releases the barrier.
    pub fn acknowledge(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.released = true;
            return true;
        }
        false
    }
}

/// Owns the run's [`CompletionState`] and decides the exit code.
pub struct CompletionController {
    state: Mutex<CompletionState>,
    streams: Vec<Arc<dyn OutputStream>>,
    exit: ExitHandler,
    exit_on_completion: AtomicBool,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl CompletionController {
    pub fn new(streams: Vec<Arc<dyn OutputStream>>, exit: ExitHandler) -> Self {
        Self {
            state: Mutex::new(CompletionState::Idle),
            streams,
            exit,
            exit_on_completion: AtomicBool::new(true),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CompletionState {
        *self.lock_state()
    }

    /// `Idle → Running`. Returns `false` if the run already started.
    pub fn start(&self) -> bool {
        let mut state = self.lock_state();
        if *state != CompletionState::Idle {
            return false;
        }
        *state = CompletionState::Running;
        true
    }

    /// `Running → Completed`. Returns `false` from any other state.
    pub fn complete(&self, passed: bool) -> bool {
        let mut state = self.lock_state();
        if *state != CompletionState::Running {
            return false;
        }
        *state = CompletionState::Completed { passed };
        true
    }

    pub fn on_complete(&self, callback: CompletionCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn set_exit_on_completion(&self, exit: bool) {
        self.exit_on_completion.store(exit, Ordering::SeqCst);
    }

    pub fn exit_code(passed: bool) -> i32 {
        if passed { 0 } else { 1 }
    }

    /// The sentinel exit code while the run has not completed.
    pub fn check_exit(&self) -> Option<i32> {
        match self.state() {
            CompletionState::Completed { .. } => None,
            _ => Some(INCOMPLETE_EXIT_CODE),
        }
    }

    /// Exit code for a process terminated right now: the outcome once completed, the
    /// sentinel before that.
    pub fn termination_code(&self) -> i32 {
        match self.state() {
            CompletionState::Completed { passed } => Self::exit_code(passed),
            _ => INCOMPLETE_EXIT_CODE,
        }
    }

    /// Completes the run, then exits once every monitored stream has flushed.
    pub async fn finish(&self, passed: bool) {
        if !self.complete(passed) {
            warn!(state = ?self.state(), "Run is not running, ignoring completion");
            return;
        }

        for callback in self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            callback(passed);
        }

        if !self.exit_on_completion.load(Ordering::SeqCst) {
            return;
        }
        self.exit_after_flush(Self::exit_code(passed)).await;
    }

    async fn exit_after_flush(&self, code: i32) {
        if self.streams.is_empty() {
            (self.exit)(code);
            return;
        }

        let mut barrier = FlushBarrier::new(self.streams.len());
        let mut flushes: FuturesUnordered<_> = self
            .streams
            .iter()
            .map(|stream| async move { (stream.name(), stream.flush().await) })
            .collect();

        while let Some((name, result)) = flushes.next().await {
            if let Err(e) = result {
                warn!(stream = name, error = %e, "Failed to flush output stream");
            }
            let released = barrier.acknowledge();
            debug!(stream = name, remaining = barrier.remaining(), "Stream flushed");
            if released {
                (self.exit)(code);
            }
        }
    }
}

/// Reporter recording the run outcome so the runner can wait for it.
#[derive(Default)]
pub struct CompletionReporter {
    result: Mutex<Option<RunResult>>,
    done: Notify,
}

impl CompletionReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.result().is_some()
    }

    pub fn result(&self) -> Option<RunResult> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves with the run outcome once the engine reports it.
    pub async fn wait(&self) -> RunResult {
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            self.done.notified().await;
        }
    }
}

impl Reporter for CompletionReporter {
    fn run_done(&self, result: &RunResult) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.done.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OverallStatus, RunOrder};
    use crate::test_utils::ExitRecorder;
    use std::time::Duration;

    struct GatedStream {
        name: &'static str,
        gate: Notify,
        fail: bool,
    }

    impl GatedStream {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                gate: Notify::new(),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl OutputStream for GatedStream {
        fn name(&self) -> &str {
            self.name
        }

        async fn flush(&self) -> std::io::Result<()> {
            self.gate.notified().await;
            if self.fail {
                return Err(std::io::Error::other("broken pipe"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_flush_barrier_releases_once() {
        let mut barrier = FlushBarrier::new(2);
        assert!(!barrier.acknowledge());
        assert_eq!(barrier.remaining(), 1);
        assert!(barrier.acknowledge());
        assert!(!barrier.acknowledge());
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn test_state_moves_forward_only() {
        let controller = CompletionController::new(vec![], ExitRecorder::default().handler());
        assert_eq!(controller.state(), CompletionState::Idle);
        assert!(controller.start());
        assert!(!controller.start());
        assert_eq!(controller.state(), CompletionState::Running);
        assert!(controller.complete(false));
        assert!(!controller.complete(true));
        assert_eq!(controller.state(), CompletionState::Completed { passed: false });
        assert!(!controller.start());
    }

    #[tokio::test]
    async fn test_completion_requires_running_state() {
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(vec![], exits.handler());

        assert!(!controller.complete(true));
        controller.finish(true).await;

        assert_eq!(controller.state(), CompletionState::Idle);
        assert!(exits.codes().is_empty());
        assert_eq!(controller.check_exit(), Some(INCOMPLETE_EXIT_CODE));
    }

    #[test]
    fn test_termination_code_follows_state() {
        let controller = CompletionController::new(vec![], ExitRecorder::default().handler());
        assert_eq!(controller.termination_code(), INCOMPLETE_EXIT_CODE);
        controller.start();
        assert_eq!(controller.termination_code(), INCOMPLETE_EXIT_CODE);
        controller.complete(false);
        assert_eq!(controller.termination_code(), 1);
        assert_eq!(controller.check_exit(), None);
    }

    #[tokio::test]
    async fn test_standard_streams_flush_written_output() {
        let print = crate::reporter::stdout_print();
        print("flushed before exit\n");
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(standard_streams(), exits.handler());
        controller.start();

        controller.finish(true).await;

        assert_eq!(exits.codes(), vec![0]);
    }

    #[test]
    fn test_check_exit_sentinel_until_completed() {
        let controller = CompletionController::new(vec![], ExitRecorder::default().handler());
        assert_eq!(controller.check_exit(), Some(INCOMPLETE_EXIT_CODE));
        controller.start();
        assert_eq!(controller.check_exit(), Some(INCOMPLETE_EXIT_CODE));
        controller.complete(true);
        assert_eq!(controller.check_exit(), None);
    }

    async fn exit_waits_for_both_streams(release_first: usize) {
        let streams = [GatedStream::new("out"), GatedStream::new("err")];
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(
            streams
                .iter()
                .map(|s| s.clone() as Arc<dyn OutputStream>)
                .collect(),
            exits.handler(),
        );
        controller.start();

        let driver = async {
            tokio::task::yield_now().await;
            assert!(exits.codes().is_empty());
            streams[release_first].gate.notify_one();
            tokio::task::yield_now().await;
            assert!(exits.codes().is_empty());
            streams[1 - release_first].gate.notify_one();
        };
        tokio::join!(controller.finish(true), driver);

        assert_eq!(exits.codes(), vec![0]);
    }

    #[tokio::test]
    async fn test_exit_after_all_streams_flush_in_order() {
        exit_waits_for_both_streams(0).await;
    }

    #[tokio::test]
    async fn test_exit_after_all_streams_flush_reversed() {
        exit_waits_for_both_streams(1).await;
    }

    #[tokio::test]
    async fn test_failed_flush_still_acknowledges() {
        let stream = Arc::new(GatedStream {
            name: "broken",
            gate: Notify::new(),
            fail: true,
        });
        stream.gate.notify_one();
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(vec![stream], exits.handler());
        controller.start();

        controller.finish(false).await;

        assert_eq!(exits.codes(), vec![1]);
    }

    #[tokio::test]
    async fn test_exit_without_streams_is_immediate() {
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(vec![], exits.handler());
        controller.start();

        controller.finish(false).await;
        controller.finish(true).await;

        assert_eq!(exits.codes(), vec![1]);
    }

    #[tokio::test]
    async fn test_callbacks_run_without_exit_when_disabled() {
        let exits = ExitRecorder::default();
        let controller = CompletionController::new(vec![], exits.handler());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.on_complete(Box::new(move |passed| sink.lock().unwrap().push(passed)));
        controller.set_exit_on_completion(false);
        controller.start();

        controller.finish(true).await;

        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert!(exits.codes().is_empty());
    }

    #[tokio::test]
    async fn test_completion_reporter_wait() {
        let reporter = Arc::new(CompletionReporter::new());
        assert!(!reporter.is_complete());

        let waiter = {
            let reporter = reporter.clone();
            tokio::spawn(async move { reporter.wait().await })
        };
        reporter.run_done(&RunResult {
            overall_status: OverallStatus::Passed,
            incomplete_reason: None,
            total_specs_defined: 1,
            executed: 1,
            failed: 0,
            order: RunOrder::default(),
            duration: Duration::ZERO,
        });

        let result = waiter.await.unwrap();
        assert!(result.passed());
        assert!(reporter.is_complete());
    }
}
