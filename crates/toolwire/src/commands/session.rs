//! Commands that talk to a live server.

use anyhow::{bail, Context};
use serde_json::Value;
use toolwire_mcp::{McpSession, McpTool, ServerConfig};
use tracing::{info, warn};

/// A request to run against a connected server.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Tools { json: bool },
    Call {
        tool: String,
        arguments: Value,
        json_payload: bool,
    },
    Sparql { query: String },
    Raw { method: String, params: Value },
}

/// Parse a JSON argument given on the command line.
pub fn parse_json_arg(flag: &str, raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

/// Parse tool arguments; they must be a JSON object.
pub fn parse_tool_arguments(raw: Option<&str>) -> anyhow::Result<Value> {
    let value = parse_json_arg("--args", raw)?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

/// Connect, run `command`, and stop the server whatever the outcome.
pub async fn run_session_command(
    server: ServerConfig,
    command: SessionCommand,
) -> anyhow::Result<()> {
    let name = server.name.clone();
    let session = McpSession::connect(server)
        .await
        .with_context(|| format!("Failed to connect to server '{name}'"))?;
    info!(server = %name, "Connected");

    let result = execute(&session, command).await;

    if let Err(e) = session.stop().await {
        warn!(server = %name, error = %e, "Failed to stop server cleanly");
    }
    result
}

async fn execute(session: &McpSession, command: SessionCommand) -> anyhow::Result<()> {
    match command {
        SessionCommand::Tools { json } => {
            let tools = session.list_tools().await?;
            if json {
                print_json(&serde_json::to_value(&tools)?)?;
            } else {
                print_tools(&tools);
            }
        }
        SessionCommand::Call {
            tool,
            arguments,
            json_payload,
        } => {
            let result = session.call_tool(&tool, arguments).await?;
            if json_payload {
                print_json(&result.json_payload())?;
            } else {
                print_json(&serde_json::to_value(&result)?)?;
            }
            if result.is_error {
                bail!("Tool '{tool}' reported an error");
            }
        }
        SessionCommand::Sparql { query } => {
            let result = session.execute_sparql(&query).await?;
            print_json(&result)?;
        }
        SessionCommand::Raw { method, params } => {
            let result = session.call(&method, params).await?;
            print_json(&result)?;
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tools(tools: &[McpTool]) {
    if tools.is_empty() {
        println!("No tools available.");
        return;
    }

    println!("{:<24} {}", "TOOL", "DESCRIPTION");
    println!("{}", "-".repeat(60));
    for tool in tools {
        println!(
            "{:<24} {}",
            tool.name,
            first_line(tool.description.as_deref().unwrap_or(""))
        );
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg("--params", None).unwrap(), json!({}));
        assert_eq!(
            parse_json_arg("--params", Some("[1, 2]")).unwrap(),
            json!([1, 2])
        );
        let err = parse_json_arg("--params", Some("{oops")).unwrap_err();
        assert!(err.to_string().contains("--params"));
    }

    #[test]
    fn test_tool_arguments_must_be_object() {
        assert_eq!(
            parse_tool_arguments(Some(r#"{"limit": 5}"#)).unwrap(),
            json!({"limit": 5})
        );
        assert!(parse_tool_arguments(Some("5")).is_err());
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("Run a query.\n\nLong text"), "Run a query.");
        assert_eq!(first_line(""), "");
    }

    #[tokio::test]
    async fn test_connect_failure_reports_server() {
        let server =
            ServerConfig::stdio("ghost", "/nonexistent/toolwire-server", Vec::<String>::new());
        let err = run_session_command(server, SessionCommand::Tools { json: true })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
