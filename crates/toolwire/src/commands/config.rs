//! Config discovery and server selection.

use anyhow::{anyhow, bail, Context};
use std::path::{Path, PathBuf};
use toolwire_mcp::{ServerConfig, ToolwireConfig};
use tracing::debug;

/// Environment variable holding inline JSONC config.
pub const CONFIG_CONTENT_ENV: &str = "TOOLWIRE_CONFIG_CONTENT";

/// Project config file names, checked in order.
pub const PROJECT_CONFIG_FILES: [&str; 2] = ["toolwire.jsonc", "toolwire.json"];

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
    None,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Environment => write!(f, "${CONFIG_CONTENT_ENV}"),
            Self::None => write!(f, "(none)"),
        }
    }
}

/// Global config path: `<config_dir>/toolwire/config.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolwire").join("config.json"))
}

/// Load configuration for the CLI.
///
/// Search order: explicit path, `TOOLWIRE_CONFIG_CONTENT`, project files in
/// `cwd`, then the global config file.
pub async fn load_config(
    explicit: Option<&Path>,
    cwd: &Path,
) -> anyhow::Result<(ToolwireConfig, ConfigSource)> {
    let inline = std::env::var(CONFIG_CONTENT_ENV).ok();
    resolve_config(explicit, inline.as_deref(), cwd, global_config_path()).await
}

/// [`load_config`] with the environment passed in.
pub async fn resolve_config(
    explicit: Option<&Path>,
    inline: Option<&str>,
    cwd: &Path,
    global: Option<PathBuf>,
) -> anyhow::Result<(ToolwireConfig, ConfigSource)> {
    if let Some(path) = explicit {
        let config = ToolwireConfig::load_file(path).await?;
        return Ok((config, ConfigSource::File(path.to_path_buf())));
    }

    if let Some(content) = inline.filter(|c| !c.trim().is_empty()) {
        let config = ToolwireConfig::parse(content, CONFIG_CONTENT_ENV)?;
        return Ok((config, ConfigSource::Environment));
    }

    let candidates = PROJECT_CONFIG_FILES
        .iter()
        .map(|name| cwd.join(name))
        .chain(global);

    for path in candidates {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Loading config");
            let config = ToolwireConfig::load_file(&path).await?;
            return Ok((config, ConfigSource::File(path)));
        }
    }

    Ok((ToolwireConfig::default(), ConfigSource::None))
}

/// How the user picked a server on the command line.
#[derive(Debug, Clone, Default)]
pub struct ServerSelection {
    pub server: Option<String>,
    pub exec: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Resolve the selection against the loaded config.
pub fn select_server(
    selection: &ServerSelection,
    config: &ToolwireConfig,
) -> anyhow::Result<ServerConfig> {
    if let Some(exec) = &selection.exec {
        let name = Path::new(exec)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| exec.clone());
        let mut server = ServerConfig::stdio(name, exec.clone(), selection.args.clone());
        if let Some(cwd) = &selection.cwd {
            server = server.with_cwd(cwd);
        }
        return Ok(server);
    }

    let mut server = match &selection.server {
        Some(name) => {
            let server = config
                .server(name)
                .with_context(|| format!("Unknown server '{name}'. {}", known_servers(config)))?;
            if !server.enabled {
                bail!("Server '{name}' is disabled");
            }
            server.clone()
        }
        None => config.sole_enabled_server().cloned().ok_or_else(|| {
            anyhow!(
                "No server selected. Use --server <NAME> or --exec <PROGRAM>. {}",
                known_servers(config)
            )
        })?,
    };

    if let Some(cwd) = &selection.cwd {
        server.cwd = Some(cwd.clone());
    }
    Ok(server)
}

fn known_servers(config: &ToolwireConfig) -> String {
    if config.servers.is_empty() {
        return "No servers are configured.".to_string();
    }
    let names: Vec<&str> = config.servers.keys().map(String::as_str).collect();
    format!("Configured servers: {}", names.join(", "))
}

/// Print the configured servers.
pub fn list_servers(config: &ToolwireConfig, source: &ConfigSource) {
    if config.servers.is_empty() {
        println!("No servers configured ({source}).");
        return;
    }

    println!("Servers ({source}):");
    println!();
    println!("{:<20} {:<8} {}", "NAME", "ENABLED", "COMMAND");
    println!("{}", "-".repeat(60));

    for (name, server) in &config.servers {
        let enabled = if server.enabled { "yes" } else { "no" };
        println!("{:<20} {:<8} {}", name, enabled, server.display_command());
    }
}
