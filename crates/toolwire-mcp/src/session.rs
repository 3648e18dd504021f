//! Client session for one stdio MCP server.

use crate::config::ServerConfig;
use crate::correlator::Correlator;
use crate::error::{McpError, McpResult};
use crate::handshake::{Handshake, HandshakeState};
use crate::process::ServerProcess;
use crate::protocol::{
    CallToolParams, ClientInfo, InitializeParams, InitializeResult, ListToolsResult, McpTool,
    ToolCallResult, METHOD_EXECUTE_SPARQL, METHOD_INITIALIZE, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST,
};
use crate::retry::RetryPolicy;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A session with one MCP server.
///
/// Owns the server process (when it was started by [`McpSession::start`]),
/// the request correlator and the handshake state. Nothing but `initialize`
/// goes out until the handshake is complete.
pub struct McpSession {
    config: ServerConfig,
    correlator: Arc<Correlator>,
    handshake: Handshake,
    /// Serializes handshake steps.
    handshake_lock: Mutex<()>,
    server_info: RwLock<Option<InitializeResult>>,
    retry: RetryPolicy,
    process: Option<ServerProcess>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl McpSession {
    /// Spawn the server and start reading its output.
    ///
    /// The handshake has not happened yet; see [`McpSession::connect`].
    pub async fn start(config: ServerConfig) -> McpResult<Self> {
        let (process, streams) = ServerProcess::spawn(&config)?;
        Ok(Self::assemble(config, streams.stdout, streams.stdin, Some(process)))
    }

    /// Build a session over an existing reader/writer pair.
    pub fn from_streams<R, W>(config: ServerConfig, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::assemble(config, reader, writer, None)
    }

    fn assemble<R, W>(
        config: ServerConfig,
        reader: R,
        writer: W,
        process: Option<ServerProcess>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let correlator = Arc::new(Correlator::new(config.name.clone(), writer));
        let reader = correlator.spawn_reader(reader);
        let retry = RetryPolicy::from(&config.retry);

        Self {
            config,
            correlator,
            handshake: Handshake::new(),
            handshake_lock: Mutex::new(()),
            server_info: RwLock::new(None),
            retry,
            process,
            reader: std::sync::Mutex::new(Some(reader)),
        }
    }

    /// Spawn the server and perform the full handshake.
    pub async fn connect(config: ServerConfig) -> McpResult<Self> {
        let name = config.name.clone();
        info!(server = %name, "Connecting to MCP server");

        let session = Self::start(config).await?;
        if let Err(e) = session.perform_handshake().await {
            warn!(server = %name, error = %e, "Handshake failed, stopping server");
            if let Err(stop_err) = session.stop().await {
                debug!(server = %name, error = %stop_err, "Error stopping server");
            }
            return Err(e);
        }
        Ok(session)
    }

    /// `initialize` with default client info, the initialized notification,
    /// then the configured settle delay.
    pub async fn perform_handshake(&self) -> McpResult<InitializeResult> {
        let result = self
            .initialize(ClientInfo::default(), Value::Object(Default::default()))
            .await?;
        self.complete_handshake().await?;

        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(result)
    }

    /// Send `initialize` and return the server's answer.
    ///
    /// Only valid before any handshake step has succeeded.
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
        capabilities: Value,
    ) -> McpResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities,
            client_info,
        };
        let value = self
            .run_initialize(
                Some(serde_json::to_value(&params)?),
                self.config.request_timeout(),
            )
            .await?;

        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::Handshake(format!("invalid initialize result: {e}")))?;

        debug!(
            server = %self.config.name,
            protocol_version = ?result.protocol_version,
            server_name = ?result.server_info.as_ref().map(|s| s.name.as_str()),
            "MCP server initialized"
        );

        *self
            .server_info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        Ok(result)
    }

    async fn run_initialize(&self, params: Option<Value>, timeout: Duration) -> McpResult<Value> {
        let _lock = self.handshake_lock.lock().await;
        self.handshake.check_initialize()?;

        let result = self
            .correlator
            .call(METHOD_INITIALIZE, params, timeout)
            .await
            .map_err(|e| match e.remote_payload() {
                Some(error) => McpError::Handshake(format!(
                    "server rejected initialize ({}): {}",
                    error.code, error.message
                )),
                None => e,
            })?;

        self.handshake.mark_initialize_sent()?;
        Ok(result)
    }

    /// Send the initialized notification; the session is ready afterwards.
    pub async fn complete_handshake(&self) -> McpResult<()> {
        let _lock = self.handshake_lock.lock().await;
        let method = self.config.initialized_method.as_str();

        self.handshake.check_complete(method)?;
        self.correlator
            .notify(method, Some(json!({})), self.config.request_timeout())
            .await?;
        self.handshake.mark_initialized(method)?;

        info!(server = %self.config.name, "MCP handshake complete");
        Ok(())
    }

    /// Call `method` with the configured timeout.
    ///
    /// A null `params` is omitted from the request.
    pub async fn call(&self, method: &str, params: Value) -> McpResult<Value> {
        self.call_with_timeout(method, params, self.config.request_timeout())
            .await
    }

    /// Call `method`, waiting at most `timeout` for the response.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> McpResult<Value> {
        let params = (!params.is_null()).then_some(params);
        if method == METHOD_INITIALIZE {
            return self.run_initialize(params, timeout).await;
        }

        self.handshake.check_call(method)?;
        self.correlator.call(method, params, timeout).await
    }

    /// Call `method` and decode the result into `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> McpResult<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol_error(format!("unexpected '{method}' result: {e}")))
    }

    /// Send a notification once the handshake is complete.
    pub async fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        self.handshake.check_notify(method)?;
        let params = (!params.is_null()).then_some(params);
        self.correlator
            .notify(method, params, self.config.request_timeout())
            .await
    }

    /// Discover the server's tools, retrying while the server warms up.
    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        let result: ListToolsResult = self
            .retry
            .run(METHOD_TOOLS_LIST, move |attempt| {
                debug!(server = %self.config.name, attempt, "Listing tools");
                self.call_typed::<ListToolsResult>(METHOD_TOOLS_LIST, json!({}))
            })
            .await?;

        info!(
            server = %self.config.name,
            tool_count = result.tools.len(),
            "Discovered MCP tools"
        );
        Ok(result.tools)
    }

    /// Invoke a tool through `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        debug!(server = %self.config.name, tool = name, "Calling MCP tool");
        let params = CallToolParams {
            name: name.to_string(),
            arguments: (!arguments.is_null()).then_some(arguments),
        };
        self.call_typed(METHOD_TOOLS_CALL, serde_json::to_value(&params)?)
            .await
    }

    /// Run a SPARQL query through the server's `execute_sparql` method.
    pub async fn execute_sparql(&self, query: &str) -> McpResult<Value> {
        self.call(METHOD_EXECUTE_SPARQL, json!({ "query": query }))
            .await
    }

    /// Close stdin, let the server exit (or kill it after the grace period)
    /// and fail whatever is still pending. Safe to call more than once.
    pub async fn stop(&self) -> McpResult<()> {
        let grace = self.config.stop_grace();

        // A server that stopped reading would keep the final flush waiting.
        if tokio::time::timeout(grace, self.correlator.close_writer())
            .await
            .is_err()
        {
            warn!(
                server = %self.config.name,
                grace_ms = grace.as_millis() as u64,
                "Server stdin did not drain, stopping anyway"
            );
        }

        let result = match &self.process {
            Some(process) => process.stop(grace).await.map(|_| ()),
            None => Ok(()),
        };

        if let Some(reader) = self.take_reader() {
            reader.abort();
        }
        self.correlator.close("session stopped");
        result
    }

    fn take_reader(&self) -> Option<JoinHandle<()>> {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Server name from the configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// What the server answered to `initialize`, once it has.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of calls still waiting for a response.
    pub fn pending_calls(&self) -> Vec<u64> {
        self.correlator.pending_ids()
    }

    /// Whether the server can still answer.
    pub async fn is_running(&self) -> bool {
        if self.correlator.is_closed() {
            return false;
        }
        match &self.process {
            Some(process) => process.is_running().await,
            None => true,
        }
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        // The child is killed on drop; the reader would otherwise linger
        // until it sees EOF.
        if let Some(reader) = self.take_reader() {
            reader.abort();
        }
    }
}
