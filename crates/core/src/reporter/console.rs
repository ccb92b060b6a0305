use console::Style;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::PrintFn;
use crate::engine::{
    OverallStatus, Reporter, RunResult, RunStarted, SpecResult, SpecStatus, Timer,
};

/// Resolved console reporter settings.
#[derive(Clone)]
pub struct ConsoleReporterOptions {
    pub timer: Arc<dyn Timer>,
    pub print: PrintFn,
    pub show_colors: bool,
    pub engine_path: String,
}

/// Prints progress dots, a failure list and a summary.
#[derive(Default)]
pub struct ConsoleReporter {
    options: Mutex<Option<ConsoleReporterOptions>>,
    failures: Mutex<Vec<SpecResult>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_options(&self, options: ConsoleReporterOptions) {
        *self.options.lock().unwrap_or_else(PoisonError::into_inner) = Some(options);
    }

    /// Whether colors are enabled, `None` until options are set.
    pub fn show_colors(&self) -> Option<bool> {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|o| o.show_colors)
    }

    fn options(&self) -> Option<ConsoleReporterOptions> {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn failures(&self) -> MutexGuard<'_, Vec<SpecResult>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn paint(options: &ConsoleReporterOptions, text: &str, style: Style) -> String {
    if options.show_colors {
        style.force_styling(true).apply_to(text).to_string()
    } else {
        text.to_string()
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Drops the `"<engine path>: "` prefix engines put on their own diagnostics.
fn trim_engine_noise(message: &str, engine_path: &str) -> String {
    if engine_path.is_empty() {
        return message.to_string();
    }
    message.replace(&format!("{engine_path}: "), "")
}

impl Reporter for ConsoleReporter {
    fn run_started(&self, event: &RunStarted) {
        self.failures().clear();
        let Some(options) = self.options() else {
            return;
        };
        options.timer.start();
        if let Some(seed) = event.order.seed {
            (options.print)(&format!("Randomized with seed {seed}\n"));
        }
        (options.print)("Started\n");
    }

    fn spec_done(&self, result: &SpecResult) {
        let Some(options) = self.options() else {
            return;
        };
        match result.status {
            SpecStatus::Passed => (options.print)(&paint(&options, ".", Style::new().green())),
            SpecStatus::Failed => {
                (options.print)(&paint(&options, "F", Style::new().red()));
                self.failures().push(result.clone());
            }
            SpecStatus::Excluded => {}
        }
    }

    fn run_done(&self, result: &RunResult) {
        let Some(options) = self.options() else {
            return;
        };
        let print = &options.print;
        print("\n\n");

        let failures = self.failures().clone();
        if !failures.is_empty() {
            print("Failures:\n");
            for (i, failure) in failures.iter().enumerate() {
                print(&format!("{}) {}\n", i + 1, failure.spec.full_name()));
                print("  Message:\n");
                for message in &failure.failed_expectations {
                    let message = trim_engine_noise(message, &options.engine_path);
                    print(&format!(
                        "    {}\n",
                        paint(&options, message.trim(), Style::new().red())
                    ));
                }
                print("\n");
            }
        }

        let summary = format!(
            "{}, {}",
            plural(result.executed, "spec"),
            plural(result.failed, "failure")
        );
        let style = if result.failed > 0 {
            Style::new().red()
        } else {
            Style::new().green()
        };
        print(&format!("{}\n", paint(&options, &summary, style)));

        if result.overall_status == OverallStatus::Incomplete {
            let reason = result.incomplete_reason.as_deref().unwrap_or("Incomplete");
            print(&format!(
                "{}\n",
                paint(&options, &format!("Incomplete: {reason}"), Style::new().yellow())
            ));
        }

        print(&format!(
            "Finished in {:.3} seconds\n",
            options.timer.elapsed().as_secs_f64()
        ));
        if let Some(seed) = result.order.seed {
            print(&format!(
                "Randomized with seed {seed} (specrun --random=true --seed={seed})\n"
            ));
        }
    }
}
