use anyhow::{Context, Result};
use specrun_core::{DEFAULT_CONFIG_FILE, config::create_or_get_config_file};
use std::path::{Path, PathBuf};

use crate::ux::present_notice;

/// Writes the default config file unless one exists. Returns its path.
fn write_default_config(project_dir: &Path) -> Result<(bool, PathBuf)> {
    let config_path = project_dir.join(DEFAULT_CONFIG_FILE);
    create_or_get_config_file(&config_path)
        .with_context(|| format!("Failed to create {}", config_path.display()))
}

pub fn execute(project_dir: &Path) -> Result<()> {
    let (existed, path) = write_default_config(project_dir)?;
    if existed {
        present_notice(&format!("Config already exists at {}", path.display()));
    } else {
        println!("Created {}", path.display());
    }
    Ok(())
}
