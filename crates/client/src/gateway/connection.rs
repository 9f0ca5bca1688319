//! The connection state machine.
//!
//! Owns the socket for the lifetime of the client: opens it from the
//! bootstrap lookup, drives the Hello/Identify/Resume handshake, routes
//! inbound opcodes, and reconnects with backoff on every failure short of
//! an explicit shutdown. All socket writes funnel through one writer task,
//! so the heartbeat and the handshake never interleave mid-frame.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use chatwire_shared::{protocol, Frame, Hello, Opcode};

use super::codec::FrameCodec;
use super::heartbeat;
use super::session::SessionState;
use super::{ConnectionState, GatewayConfig, GatewayError};
use crate::events::EventRouter;
use crate::http::HttpClient;
use crate::store::EntityStore;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_BUFFER: usize = 16;

/// Why a session stopped. Everything except an explicit shutdown feeds back
/// into the reconnect loop.
enum SessionEnd {
    Shutdown,
    Reconnect,
}

pub(crate) struct Connection {
    token: String,
    config: GatewayConfig,
    http: Arc<HttpClient>,
    session: Arc<SessionState>,
    store: Arc<EntityStore>,
    router: EventRouter,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    pub(crate) fn new(
        token: String,
        config: GatewayConfig,
        http: Arc<HttpClient>,
        session: Arc<SessionState>,
        store: Arc<EntityStore>,
        router: EventRouter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            token,
            config,
            http,
            session,
            store,
            router,
            shutdown,
        }
    }

    /// Runs until shutdown (Ok) or, with a configured attempt ceiling,
    /// until reconnecting stops making progress.
    pub(crate) async fn run(mut self) -> Result<(), GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                self.finish();
                return Ok(());
            }

            self.session.set_state(if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });

            match self.establish().await {
                Ok(socket) => {
                    attempt = 0;
                    match self.run_session(socket).await {
                        SessionEnd::Shutdown => {
                            self.finish();
                            return Ok(());
                        }
                        SessionEnd::Reconnect => info!("gateway session ended, reconnecting"),
                    }
                }
                Err(err) => warn!(%err, "failed to establish gateway connection"),
            }

            attempt += 1;
            let max_attempts = self.config.reconnect.max_attempts;
            if max_attempts > 0 && attempt > max_attempts {
                self.session.set_state(ConnectionState::Closed);
                self.session.clear();
                return Err(GatewayError::ReconnectExhausted {
                    attempts: max_attempts,
                });
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt - 1);
            debug!(delay_ms = delay.as_millis() as u64, attempt, "backing off before reconnect");
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {}
            }
        }
    }

    fn finish(&self) {
        self.session.set_state(ConnectionState::Closed);
        self.session.clear();
        info!("gateway connection closed");
    }

    async fn establish(&self) -> Result<WsStream, GatewayError> {
        let raw = match &self.config.gateway_url {
            Some(url) => url.clone(),
            None => self.http.gateway_url().await?,
        };
        let mut url = Url::parse(&raw)
            .map_err(|err| GatewayError::Handshake(format!("invalid gateway url {raw:?}: {err}")))?;
        url.query_pairs_mut()
            .append_pair("v", "1")
            .append_pair("encoding", "json");
        debug!(%url, "opening gateway socket");
        let (socket, _response) = connect_async(url.as_str()).await?;
        Ok(socket)
    }

    async fn run_session(&mut self, socket: WsStream) -> SessionEnd {
        self.session.set_state(ConnectionState::AwaitingHello);

        let (sink, mut stream) = socket.split();
        let mut codec = FrameCodec::new();
        let (out_tx, out_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);
        let writer = tokio::spawn(write_pump(sink, out_rx));
        let (liveness_tx, mut liveness_rx) = mpsc::channel::<()>(1);
        let mut heartbeat_task: Option<JoinHandle<()>> = None;
        let mut shutdown = self.shutdown.clone();

        let end = loop {
            tokio::select! {
                // wait_for also returns on a dropped sender, which only
                // happens when the client itself is gone.
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    break SessionEnd::Shutdown;
                }
                Some(()) = liveness_rx.recv() => {
                    warn!("heartbeat liveness failure, reconnecting");
                    break SessionEnd::Reconnect;
                }
                message = stream.next() => {
                    match message {
                        None => {
                            debug!("gateway socket closed by peer");
                            break SessionEnd::Reconnect;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "gateway socket error");
                            break SessionEnd::Reconnect;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "gateway sent close frame");
                            break SessionEnd::Reconnect;
                        }
                        Some(Ok(message)) => {
                            let frame = match codec.decode(message) {
                                Ok(Some(frame)) => frame,
                                Ok(None) => continue,
                                Err(err) => {
                                    warn!(%err, "dropping undecodable gateway frame");
                                    continue;
                                }
                            };
                            if let Some(end) = self
                                .handle_frame(frame, &out_tx, &liveness_tx, &mut heartbeat_task)
                                .await
                            {
                                break end;
                            }
                        }
                    }
                }
            }
        };

        // Teardown: no heartbeat may outlive the socket, and aborting the
        // writer drops the sink, closing the transport.
        if let Some(task) = heartbeat_task.take() {
            task.abort();
        }
        writer.abort();
        end
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        out_tx: &mpsc::Sender<Frame>,
        liveness_tx: &mpsc::Sender<()>,
        heartbeat_task: &mut Option<JoinHandle<()>>,
    ) -> Option<SessionEnd> {
        match frame.op {
            Opcode::Hello => {
                let hello: Hello = match serde_json::from_value(frame.d.unwrap_or(Value::Null)) {
                    Ok(hello) => hello,
                    Err(err) => {
                        warn!(%err, "malformed hello payload");
                        return Some(SessionEnd::Reconnect);
                    }
                };
                let interval = Duration::from_millis(hello.heartbeat_interval);
                self.session.set_heartbeat_interval(interval);

                // One immediate heartbeat goes out before the first
                // scheduled one, with whatever sequence is currently known.
                self.send_heartbeat(out_tx).await;
                let task = heartbeat::spawn(
                    self.session.clone(),
                    interval,
                    out_tx.clone(),
                    liveness_tx.clone(),
                );
                if let Some(old) = heartbeat_task.replace(task) {
                    old.abort();
                }

                match self.session.resume_info() {
                    Some((session_id, sequence)) => {
                        info!(%session_id, sequence, "resuming gateway session");
                        self.send(out_tx, protocol::resume(&self.token, &session_id, sequence))
                            .await;
                        self.session.set_state(ConnectionState::Resuming);
                    }
                    None => {
                        self.send(
                            out_tx,
                            protocol::identify(
                                &self.token,
                                self.config.capabilities,
                                &self.config.properties,
                            ),
                        )
                        .await;
                        self.session.set_state(ConnectionState::Identifying);
                    }
                }
            }
            Opcode::HeartbeatAck => self.session.mark_ack_received(),
            // The server may demand an immediate beat.
            Opcode::Heartbeat => self.send_heartbeat(out_tx).await,
            Opcode::Dispatch => {
                if let Some(sequence) = frame.s {
                    self.session.observe_sequence(sequence);
                }
                // The first dispatch confirms a successful identify/resume.
                if matches!(
                    self.session.state(),
                    ConnectionState::Identifying | ConnectionState::Resuming
                ) {
                    self.session.set_state(ConnectionState::Connected);
                }
                if let Some(name) = frame.t {
                    let data = frame.d.unwrap_or(Value::Null);
                    self.router.process(&self.session, &name, data).await;
                }
            }
            Opcode::Reconnect => {
                info!("server requested a fresh connection");
                return Some(SessionEnd::Reconnect);
            }
            Opcode::InvalidSession => {
                let resumable = frame.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                if resumable {
                    info!("session invalidated but resumable, reconnecting");
                    return Some(SessionEnd::Reconnect);
                }
                // The server guarantees no continuity: drop everything and
                // start a fresh session on this socket.
                warn!("session invalidated and non-resumable, clearing cache");
                self.store.clear().await;
                self.router.reset();
                self.session.clear();
                self.send(
                    out_tx,
                    protocol::identify(&self.token, self.config.capabilities, &self.config.properties),
                )
                .await;
                self.session.set_state(ConnectionState::Identifying);
            }
            Opcode::Identify | Opcode::Resume => {
                debug!(op = ?frame.op, "ignoring client-only opcode from server");
            }
        }
        None
    }

    async fn send(&self, out_tx: &mpsc::Sender<Frame>, frame: Frame) {
        // A send after the writer stopped is a silent no-op; the read loop
        // observes the closed socket and drives the reconnect.
        if out_tx.send(frame).await.is_err() {
            debug!("outbound channel closed, dropping frame");
        }
    }

    async fn send_heartbeat(&self, out_tx: &mpsc::Sender<Frame>) {
        self.send(out_tx, protocol::heartbeat(self.session.sequence()))
            .await;
        self.session.mark_heartbeat_sent();
    }
}

async fn write_pump(mut sink: SplitSink<WsStream, Message>, mut out_rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = out_rx.recv().await {
        let message = match FrameCodec::encode(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "failed to encode outbound frame");
                continue;
            }
        };
        if let Err(err) = sink.send(message).await {
            debug!(%err, "gateway write failed, stopping writer");
            break;
        }
    }
}
