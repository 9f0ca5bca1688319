//! chatwire client: a push-based gateway session with an in-memory entity
//! cache kept consistent by incremental update events.
//!
//! The [`Client`] owns one logical session. It connects through a bootstrap
//! endpoint lookup, completes the Hello/Identify handshake, heartbeats on
//! the advertised interval, and resumes or re-identifies across reconnects.
//! Dispatch events mutate the [`EntityStore`] and fan out to listeners as
//! typed [`Event`] notifications.

pub mod client;
pub mod dispatcher;
pub mod events;
pub mod gateway;
pub mod http;
pub mod snapshot;
pub mod store;

pub use chatwire_shared as shared;

pub use client::Client;
pub use dispatcher::Dispatcher;
pub use events::Event;
pub use gateway::{ConnectionState, GatewayConfig, GatewayError, ReconnectConfig};
pub use http::HttpClient;
pub use snapshot::{AccountSnapshot, MemberSnapshot, RoleSnapshot, ServerSnapshot};
pub use store::EntityStore;
