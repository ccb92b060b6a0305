use once_cell::sync::Lazy;
use std::path::PathBuf;

/// Config file looked up under the project base dir when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "spec/support/specrun.yml";

static DEFAULT_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::data_local_dir()
        .map(|p| p.join("specrun"))
        .unwrap_or_else(|| PathBuf::from("~/.local/share/specrun"))
});

pub fn get_data_dir() -> std::io::Result<PathBuf> {
    // Check XDG_DATA_HOME first, then fall back to default
    let path = if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data_home).join("specrun")
    } else {
        DEFAULT_DATA_DIR.clone()
    };
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn get_default_config() -> String {
    include_str!("../data/specrun.yml").to_string()
}
