//! Gateway connection: state machine, session record, heartbeating and the
//! wire codec.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use chatwire_shared::{CapabilityFlags, ClientProperties, ProtocolError};

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod session;

pub(crate) use connection::Connection;
pub use session::SessionState;

/// Lifecycle of the gateway connection.
///
/// Everything except `Closed` transitions automatically; `Closed` is reached
/// only through an explicit shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Connected,
    Resuming,
    Reconnecting { attempt: u32 },
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Initial delay in milliseconds.
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt number, with jitter so reconnecting
    /// clients don't stampede the endpoint in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        let base = (base as u64).min(self.max_delay_ms as u64);
        let jitter = rand::thread_rng().gen_range(0..=base / 4);
        Duration::from_millis(base + jitter)
    }
}

/// Configuration for one gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Event categories to opt into when identifying.
    pub capabilities: CapabilityFlags,
    /// Static client metadata sent with Identify.
    pub properties: ClientProperties,
    pub reconnect: ReconnectConfig,
    /// Skips the bootstrap endpoint lookup. Mostly useful for tests.
    pub gateway_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilityFlags::standard(),
            properties: ClientProperties::default(),
            reconnect: ReconnectConfig::default(),
            gateway_url: None,
        }
    }
}

/// Failures surfaced by the gateway connection. Everything routed through
/// the reconnect loop stays internal; only conditions the caller must act on
/// appear here.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gateway handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Http(#[from] chatwire_shared::HttpError),
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}
