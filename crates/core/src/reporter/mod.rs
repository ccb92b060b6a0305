//! Reporter registration, default reporter configuration and spec filtering.
mod console;

pub use console::{ConsoleReporter, ConsoleReporterOptions};

use std::{
    fmt,
    io::Write,
    sync::Arc,
};

use crate::engine::{Reporter, SpecFilter, SuiteEngine, Timer};

/// Output sink used by the console reporter.
pub type PrintFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Writes to standard output, flushing after every chunk.
pub fn stdout_print() -> PrintFn {
    Arc::new(|text: &str| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    })
}

/// Reporters attached to an engine, in registration order.
#[derive(Default)]
pub struct ReporterRegistry {
    reporters: Vec<Arc<dyn Reporter>>,
    count: usize,
}

impl ReporterRegistry {
    pub fn add(&mut self, engine: &dyn SuiteEngine, reporter: Arc<dyn Reporter>) {
        engine.add_reporter(reporter.clone());
        self.reporters.push(reporter);
        self.count += 1;
    }

    pub fn clear(&mut self, engine: &dyn SuiteEngine) {
        engine.clear_reporters();
        self.reporters.clear();
        self.count = 0;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reporters(&self) -> &[Arc<dyn Reporter>] {
        &self.reporters
    }
}

/// Options for the default console reporter. Unset options get a default when resolved;
/// a value set by the caller is never replaced.
#[derive(Clone, Default)]
pub struct DefaultReporterOptions {
    pub timer: Option<Arc<dyn Timer>>,
    pub print: Option<PrintFn>,
    pub show_colors: Option<bool>,
    pub engine_path: Option<String>,
}

impl fmt::Debug for DefaultReporterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultReporterOptions")
            .field("timer", &self.timer.is_some())
            .field("print", &self.print.is_some())
            .field("show_colors", &self.show_colors)
            .field("engine_path", &self.engine_path)
            .finish()
    }
}

impl DefaultReporterOptions {
    pub fn with_show_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = Some(show_colors);
        self
    }

    pub fn with_print(mut self, print: PrintFn) -> Self {
        self.print = Some(print);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn resolve(self, engine: &dyn SuiteEngine) -> ConsoleReporterOptions {
        ConsoleReporterOptions {
            timer: self.timer.unwrap_or_else(|| Arc::from(engine.timer())),
            print: self.print.unwrap_or_else(stdout_print),
            show_colors: self.show_colors.unwrap_or(true),
            engine_path: self.engine_path.unwrap_or_else(|| engine.location()),
        }
    }
}

/// Selects specs whose full name contains the filter string.
#[derive(Debug, Clone)]
pub struct ConsoleSpecFilter {
    filter_string: String,
}

impl ConsoleSpecFilter {
    pub fn new(filter_string: &str) -> Self {
        Self {
            filter_string: filter_string.to_string(),
        }
    }

    pub fn matches(&self, full_name: &str) -> bool {
        full_name.contains(&self.filter_string)
    }

    /// Engine predicate testing each spec's full name.
    pub fn into_spec_filter(self) -> SpecFilter {
        SpecFilter::new(move |spec| self.matches(&spec.full_name()))
    }
}
