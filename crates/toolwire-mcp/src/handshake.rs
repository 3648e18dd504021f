//! Initialization handshake state machine.
//!
//! ```text
//! NotStarted ──initialize ok──▶ InitializeSent ──initialized──▶ Initialized
//! ```
//!
//! Transitions only move forward. Until `Initialized` is reached the only
//! request that may go out is `initialize`.

use crate::error::{McpError, McpResult};
use crate::protocol::METHOD_INITIALIZE;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Where a session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HandshakeState {
    #[default]
    NotStarted,
    InitializeSent,
    Initialized,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::NotStarted => "not started",
            HandshakeState::InitializeSent => "initialize sent",
            HandshakeState::Initialized => "initialized",
        };
        f.write_str(s)
    }
}

/// Per-session handshake tracker.
#[derive(Debug, Default)]
pub struct Handshake {
    state: RwLock<HandshakeState>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check that `initialize` may be sent.
    pub fn check_initialize(&self) -> McpResult<()> {
        match self.state() {
            HandshakeState::NotStarted => Ok(()),
            state => Err(McpError::Handshake(format!(
                "initialize already performed (handshake is {state})"
            ))),
        }
    }

    /// Check that `method` may be sent as a request right now.
    pub fn check_call(&self, method: &str) -> McpResult<()> {
        if method == METHOD_INITIALIZE {
            return self.check_initialize();
        }
        self.require_ready(method)
    }

    /// Check that an ordinary notification may be sent right now.
    pub fn check_notify(&self, method: &str) -> McpResult<()> {
        self.require_ready(method)
    }

    fn require_ready(&self, method: &str) -> McpResult<()> {
        match self.state() {
            HandshakeState::Initialized => Ok(()),
            state => Err(McpError::ProtocolSequence {
                method: method.to_string(),
                state,
            }),
        }
    }

    /// Record a successful `initialize` response.
    pub fn mark_initialize_sent(&self) -> McpResult<()> {
        self.advance(
            HandshakeState::NotStarted,
            HandshakeState::InitializeSent,
            METHOD_INITIALIZE,
        )
        .map_err(|_| McpError::Handshake("initialize completed twice".to_string()))
    }

    /// Move to `Initialized`; only valid from `InitializeSent`.
    pub fn mark_initialized(&self, notification: &str) -> McpResult<()> {
        self.advance(
            HandshakeState::InitializeSent,
            HandshakeState::Initialized,
            notification,
        )
    }

    /// Check, without transitioning, that the initialized notification is due.
    pub fn check_complete(&self, notification: &str) -> McpResult<()> {
        match self.state() {
            HandshakeState::InitializeSent => Ok(()),
            state => Err(McpError::ProtocolSequence {
                method: notification.to_string(),
                state,
            }),
        }
    }

    fn advance(&self, from: HandshakeState, to: HandshakeState, method: &str) -> McpResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(McpError::ProtocolSequence {
                method: method.to_string(),
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }
}
