//! `chattermill onboard` — write a default configuration file.

use chattermill_config::AppConfig;
use std::path::PathBuf;

pub async fn run(path: &Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let target = match path {
        Some(path) => path.clone(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    if target.exists() {
        println!("Config already exists at {}", target.display());
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, AppConfig::default_toml())?;
    println!("Wrote default config to {}", target.display());
    println!("Add your API keys under [credentials] before running `chattermill chat`.");
    Ok(())
}
