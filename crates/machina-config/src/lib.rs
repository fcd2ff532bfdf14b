pub mod error;
pub mod settings;

pub use error::*;
pub use settings::*;

use std::path::PathBuf;

/// Environment variable naming a config file directly.
pub const CONFIG_PATH_ENV: &str = "MACHINA_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "machina.local.yaml",
    ".machina.local.yaml",
    "machina.yaml",
    ".machina.yaml",
];

/// Returns `<config_dir>/machina`, creating it if needed.
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("machina");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locates the controller config file.
///
/// Search order:
/// 1. `MACHINA_CONFIG_PATH` (must exist when set)
/// 2. current directory: machina.local.yaml, .machina.local.yaml, machina.yaml, .machina.yaml
/// 3. `~/.config/machina/controller.yaml`
///
/// `Ok(None)` means no file was found and defaults apply.
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(config_path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("machina").join("controller.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
