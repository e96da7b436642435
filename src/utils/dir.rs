use std::{env, path::PathBuf};

use anyhow::{anyhow, Result};

const APPLICATION_DIR: &str = "dwell";

fn platform_state_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        env::var("APPDATA")
            .map(PathBuf::from)
            .map_err(|_| anyhow!("APPDATA is not set"))
    }
    #[cfg(not(windows))]
    {
        env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".local/state")))
            .map_err(|_| anyhow!("Neither XDG_STATE_HOME nor HOME is set"))
    }
}

/// Data directory holding the store, the logs and the optional `config.toml`. Created if
/// missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let path = platform_state_dir()?.join(APPLICATION_DIR);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}
