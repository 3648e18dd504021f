//! Server configuration.
//!
//! A config file maps server names to [`ServerConfig`] entries:
//!
//! ```jsonc
//! {
//!   // spendcast SPARQL bridge
//!   "servers": {
//!     "spendcast": {
//!       "command": ".venv/bin/python",
//!       "args": ["src/spendcast_mcp/server.py"],
//!       "cwd": "/srv/spendcast-mcp",
//!       "initializedMethod": "notifications/initialized"
//!     }
//!   }
//! }
//! ```

use crate::error::{McpError, McpResult};
use crate::protocol::{METHOD_INITIALIZED, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one stdio MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server name. Filled from the map key when loaded from a file.
    #[serde(default)]
    pub name: String,

    /// Executable to launch.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory for the server process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Whether the server is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long `stop` waits for a graceful exit before killing.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Pause after the handshake before discovery starts.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Method name of the post-initialize notification.
    #[serde(default = "default_initialized_method")]
    pub initialized_method: String,

    /// Protocol version offered in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Retry settings for discovery calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_initialized_method() -> String {
    METHOD_INITIALIZED.to_string()
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl ServerConfig {
    /// Create a stdio server configuration.
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: HashMap::new(),
            enabled: true,
            request_timeout_ms: default_request_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            initialized_method: default_initialized_method(),
            protocol_version: default_protocol_version(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the graceful stop window.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the post-handshake pause.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the name of the post-initialize notification.
    pub fn with_initialized_method(mut self, method: impl Into<String>) -> Self {
        self.initialized_method = method.into();
        self
    }

    /// Replace the discovery retry settings.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Disable the server.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Command line for logs and listings.
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Backoff shape for [`RetryConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Linear,
    Exponential,
}

/// Discovery retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Growth factor for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff: BackoffKind::default(),
            multiplier: default_multiplier(),
        }
    }
}

/// Top-level config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolwireConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl ToolwireConfig {
    /// Load configuration from a JSON or JSONC file.
    pub async fn load_file(path: &Path) -> McpResult<Self> {
        let source = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| McpError::Config {
                path: source.clone(),
                message: e.to_string(),
            })?;
        Self::parse(&content, &source)
    }

    /// Parse JSONC content. `source` is only used in error messages.
    pub fn parse(content: &str, source: &str) -> McpResult<Self> {
        let stripped = strip_comments(content);
        let mut config: Self = serde_json::from_str(&stripped).map_err(|e| McpError::Config {
            path: source.to_string(),
            message: e.to_string(),
        })?;

        for (name, server) in config.servers.iter_mut() {
            if server.name.is_empty() {
                server.name = name.clone();
            }
            if server.command.trim().is_empty() {
                return Err(McpError::Config {
                    path: source.to_string(),
                    message: format!("server '{name}' has an empty command"),
                });
            }
        }

        Ok(config)
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// The only enabled server, if exactly one is configured.
    pub fn sole_enabled_server(&self) -> Option<&ServerConfig> {
        let mut enabled = self.servers.values().filter(|s| s.enabled);
        match (enabled.next(), enabled.next()) {
            (Some(server), None) => Some(server),
            _ => None,
        }
    }
}

/// Strip `//` and `/* */` comments outside of string literals.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stdio_config() {
        let config = ServerConfig::stdio("spendcast", "python", ["server.py"])
            .with_cwd("/srv/spendcast")
            .with_env("PYTHONUNBUFFERED", "1")
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.name, "spendcast");
        assert_eq!(config.args, vec!["server.py".to_string()]);
        assert_eq!(config.cwd, Some(PathBuf::from("/srv/spendcast")));
        assert_eq!(config.env.get("PYTHONUNBUFFERED"), Some(&"1".to_string()));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.display_command(), "python server.py");
        assert!(config.enabled);
        assert!(!config.disabled().enabled);
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = ToolwireConfig::parse(
            r#"{"servers": {"local": {"command": "mcp-server"}}}"#,
            "test",
        )
        .unwrap();

        let server = config.server("local").unwrap();
        assert_eq!(server.name, "local");
        assert_eq!(server.request_timeout(), Duration::from_secs(30));
        assert_eq!(server.stop_grace(), Duration::from_secs(2));
        assert_eq!(server.settle_delay(), Duration::from_millis(300));
        assert_eq!(server.initialized_method, "initialized");
        assert_eq!(server.protocol_version, PROTOCOL_VERSION);
        assert_eq!(server.retry, RetryConfig::default());
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // line comment
            "servers": {
                /* block
                   comment */
                "spendcast": {
                    "command": "python",
                    "args": ["src/server.py", "--url=http://host//path"],
                    "initializedMethod": "notifications/initialized",
                    "retry": {"maxAttempts": 3, "backoff": "exponential"}
                }
            }
        }"#;

        let config = ToolwireConfig::parse(input, "test").unwrap();
        let server = config.server("spendcast").unwrap();
        assert_eq!(server.args[1], "--url=http://host//path");
        assert_eq!(server.initialized_method, "notifications/initialized");
        assert_eq!(server.retry.max_attempts, 3);
        assert_eq!(server.retry.backoff, BackoffKind::Exponential);
        assert_eq!(server.retry.base_delay_ms, 200);
    }

    #[test]
    fn test_empty_command_rejected() {
        let result = ToolwireConfig::parse(r#"{"servers": {"x": {"command": " "}}}"#, "test");
        assert!(matches!(result, Err(McpError::Config { .. })));
    }

    #[test]
    fn test_invalid_json_reports_source() {
        let result = ToolwireConfig::parse("{ nope", "toolwire.json");
        match result {
            Err(McpError::Config { path, .. }) => assert_eq!(path, "toolwire.json"),
            other => panic!("Expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_sole_enabled_server() {
        let config = ToolwireConfig::parse(
            r#"{"servers": {
                "a": {"command": "a"},
                "b": {"command": "b", "enabled": false}
            }}"#,
            "test",
        )
        .unwrap();
        assert_eq!(config.sole_enabled_server().map(|s| s.name.as_str()), Some("a"));

        let config = ToolwireConfig::parse(
            r#"{"servers": {"a": {"command": "a"}, "b": {"command": "b"}}}"#,
            "test",
        )
        .unwrap();
        assert!(config.sole_enabled_server().is_none());
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let stripped = strip_comments(r#"{"a": "x // y", "b": "/* z */"} // tail"#);
        assert_eq!(stripped.trim_end(), r#"{"a": "x // y", "b": "/* z */"}"#);
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("toolwire.json");
        std::fs::write(
            &path,
            r#"{"servers": {"spendcast": {"command": "python", "cwd": "/tmp"}}}"#,
        )
        .expect("Failed to write config");

        let config = ToolwireConfig::load_file(&path).await.unwrap();
        assert_eq!(
            config.server("spendcast").and_then(|s| s.cwd.clone()),
            Some(PathBuf::from("/tmp"))
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let result = ToolwireConfig::load_file(&temp.path().join("absent.json")).await;
        assert!(matches!(result, Err(McpError::Config { .. })));
    }
}
