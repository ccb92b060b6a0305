mod assets;

pub mod completion;
pub mod config;
pub mod engine;
pub mod files;
pub mod loader;
pub mod reporter;
pub mod runner;

#[cfg(test)]
mod test_utils;

pub use crate::assets::{DEFAULT_CONFIG_FILE, get_data_dir};
pub use crate::runner::{RunError, RunnerOptions, SpecRunner};
