//! The top-level client tying the gateway, cache and dispatcher together.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use chatwire_shared::{Account, CapabilityFlags, OwnAccount, Server, Snowflake};

use crate::dispatcher::Dispatcher;
use crate::events::{Event, EventRouter};
use crate::gateway::session::SessionState;
use crate::gateway::{Connection, ConnectionState, GatewayConfig, GatewayError};
use crate::http::HttpClient;
use crate::store::EntityStore;

/// A gateway client: one logical session against one endpoint, feeding one
/// set of listeners and one entity cache.
///
/// ```no_run
/// use chatwire_client::{Client, Event};
/// use chatwire_shared::CapabilityFlags;
///
/// # async fn run() -> Result<(), chatwire_client::GatewayError> {
/// let client = Client::new("token", CapabilityFlags::standard());
/// client.add_listener(|event| async move {
///     if let Event::Ready { account, .. } = event {
///         println!("connected as {}", account.account.username);
///     }
/// });
/// client.connect().await
/// # }
/// ```
pub struct Client {
    token: String,
    config: GatewayConfig,
    http: Arc<HttpClient>,
    store: Arc<EntityStore>,
    dispatcher: Arc<Dispatcher>,
    session: Arc<SessionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Client {
    /// Creates a client with default configuration and the given capability
    /// flags.
    pub fn new(token: impl Into<String>, capabilities: CapabilityFlags) -> Self {
        let config = GatewayConfig {
            capabilities,
            ..GatewayConfig::default()
        };
        Self::with_config(token, config)
    }

    pub fn with_config(token: impl Into<String>, config: GatewayConfig) -> Self {
        let token = token.into();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            http: Arc::new(HttpClient::new(token.clone())),
            token,
            config,
            store: Arc::new(EntityStore::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            session: Arc::new(SessionState::new()),
            shutdown_tx,
        }
    }

    /// The entity cache. Reads are cheap clones and safe from any task.
    pub fn store(&self) -> Arc<EntityStore> {
        self.store.clone()
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Registers an async listener for gateway notifications.
    pub fn add_listener<F, Fut>(&self, listener: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.add_listener(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe()
    }

    /// Connects and runs the session until [`Client::shutdown`] is called.
    /// Transport failures reconnect internally; this only returns early if
    /// a reconnect attempt ceiling is configured and exhausted.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let router = EventRouter::new(self.store.clone(), self.dispatcher.clone());
        let connection = Connection::new(
            self.token.clone(),
            self.config.clone(),
            self.http.clone(),
            self.session.clone(),
            self.store.clone(),
            router,
            self.shutdown_tx.subscribe(),
        );
        connection.run().await
    }

    /// Requests a permanent shutdown: the socket closes, the heartbeat
    /// stops and [`Client::connect`] returns. The cache keeps its last
    /// consistent contents.
    pub fn shutdown(&self) {
        info!("client shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    // cache conveniences

    pub async fn own_account(&self) -> Option<OwnAccount> {
        self.store.own_account().await
    }

    pub async fn account(&self, id: Snowflake) -> Option<Account> {
        self.store.account(id).await
    }

    pub async fn server(&self, id: Snowflake) -> Option<Server> {
        self.store.server(id).await
    }
}
