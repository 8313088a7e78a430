#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = find_config_file()?;
    let config_content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let inbound: inbound::Inbound = ron::from_str(&config_content)
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    inbound.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `INBOUND_CONFIG` environment variable
/// 2. ./inbound.config.ron (current working directory)
/// 3. /etc/inbound/inbound.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("INBOUND_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "INBOUND_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./inbound.config.ron"),
        PathBuf::from("/etc/inbound/inbound.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - INBOUND_CONFIG environment variable\n{paths_tried}"
    )
}
