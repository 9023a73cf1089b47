//! The gateway connection state machine.
//!
//! One client owns at most one physical socket. A single reader task
//! dispatches every inbound frame, so frame handling is serialized; the
//! shared tables live behind narrow locks that are never held across frame
//! boundaries.

use std::{
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    serde_json::Value,
    tokio::{
        net::TcpStream,
        sync::{Mutex, oneshot},
        task::AbortHandle,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Error as WsError, protocol::Message},
    },
    tracing::{debug, info, warn},
};

use {
    pylon_identity::{AssertionInputs, DeviceIdentityStore},
    pylon_protocol::{
        CHALLENGE_EVENT, CLOSE_NORMAL, ChallengePayload, ClientInfo, ConnectAuth, ConnectParams,
        DeviceInfo, EventBody, GatewayFrame, HelloOk, PROTOCOL_VERSION, ResponseBody,
    },
};

use crate::{
    auth::{self, AuthState, PairingInfo},
    config::GatewayConfig,
    error::ClientError,
    events::{self, EventBus, Subscription},
    pending::PendingTable,
    sessions::{SessionFilter, SessionSummary, parse_session_list},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of [`GatewayClient::connect`].
#[derive(Debug)]
pub enum Handshake {
    /// A new session was established.
    Established(HelloOk),
    /// A connect attempt was already in flight (or a session is live); no
    /// second socket is opened.
    AlreadyActive,
}

// ── Shared state ─────────────────────────────────────────────────────────────

/// Connection-owning state; the tokio mutex serializes every operation that
/// touches the socket.
#[derive(Default)]
struct Conn {
    writer: Option<WsSink>,
    connecting: bool,
    /// Request id of the in-flight `connect` call, so a correlated response
    /// carrying the hello payload can be told apart from ordinary traffic.
    handshake_req_id: Option<String>,
    /// Resolves the pending `connect()` future. Taking the sender is what
    /// makes resolution at-most-once.
    hello_tx: Option<oneshot::Sender<Result<HelloOk, ClientError>>>,
    reader: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
}

/// State observable through the read-only getters.
#[derive(Default)]
struct Observed {
    connected: bool,
    auth_state: AuthState,
    scopes: Option<Vec<String>>,
    pairing: Option<PairingInfo>,
}

pub(crate) struct Shared {
    config: GatewayConfig,
    identity: DeviceIdentityStore,
    next_request_id: AtomicU64,
    conn: Mutex<Conn>,
    pending: StdMutex<PendingTable>,
    listeners: Arc<StdMutex<EventBus>>,
    observed: StdMutex<Observed>,
}

/// Handle to the single gateway connection. Clones share one connection.
#[derive(Clone)]
pub struct GatewayClient {
    pub(crate) shared: Arc<Shared>,
}

impl GatewayClient {
    /// Client backed by the default on-disk device identity.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_identity(config, DeviceIdentityStore::open_default())
    }

    pub fn with_identity(config: GatewayConfig, identity: DeviceIdentityStore) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                identity,
                next_request_id: AtomicU64::new(1),
                conn: Mutex::default(),
                pending: StdMutex::default(),
                listeners: Arc::new(StdMutex::default()),
                observed: StdMutex::default(),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    // ── Read-only state ──────────────────────────────────────────────────

    pub fn connected(&self) -> bool {
        lock(&self.shared.observed).connected
    }

    pub fn auth_state(&self) -> AuthState {
        lock(&self.shared.observed).auth_state
    }

    pub fn scopes(&self) -> Option<Vec<String>> {
        lock(&self.shared.observed).scopes.clone()
    }

    pub fn pairing_info(&self) -> Option<PairingInfo> {
        lock(&self.shared.observed).pairing.clone()
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    // ── Connect / disconnect ─────────────────────────────────────────────

    /// Open the socket and run the challenge-response handshake.
    ///
    /// Resolves when `hello-ok` arrives, the socket fails, or the connect
    /// timeout fires — whichever happens first, exactly once. Calling while
    /// an attempt is in flight (or a session is live) opens nothing and
    /// returns [`Handshake::AlreadyActive`].
    pub async fn connect(&self) -> Result<Handshake, ClientError> {
        let hello_rx = {
            let mut conn = self.shared.conn.lock().await;
            if conn.connecting || self.connected() {
                debug!("connect requested while a connection is active");
                return Ok(Handshake::AlreadyActive);
            }
            conn.connecting = true;
            let (tx, rx) = oneshot::channel();
            conn.hello_tx = Some(tx);
            rx
        };

        info!(url = %self.shared.config.url, "connecting to gateway");
        let stream = match connect_async(self.shared.config.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.abort_attempt().await;
                return Err(ClientError::Transport(e));
            },
        };

        let (writer, reader) = stream.split();
        {
            let mut conn = self.shared.conn.lock().await;
            conn.writer = Some(writer);
            let client = self.clone();
            let handle = tokio::spawn(async move { client.read_loop(reader).await });
            conn.reader = Some(handle.abort_handle());
        }

        match tokio::time::timeout(self.shared.config.connect_timeout, hello_rx).await {
            Ok(Ok(Ok(hello))) => Ok(Handshake::Established(hello)),
            Ok(Ok(Err(e))) => {
                self.abort_attempt().await;
                Err(e)
            },
            // Sender dropped without a verdict: the reader tore down first.
            Ok(Err(_)) => Err(ClientError::Closed { code: None }),
            Err(_) => {
                warn!("gateway handshake timed out");
                self.abort_attempt().await;
                Err(ClientError::ConnectTimeout(self.shared.config.connect_timeout))
            },
        }
    }

    /// Tear everything down and reset derived state. Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut conn = self.shared.conn.lock().await;
            if let Some(timer) = conn.reconnect.take() {
                timer.abort();
            }
            if let Some(reader) = conn.reader.take() {
                reader.abort();
            }
            conn.connecting = false;
            conn.handshake_req_id = None;
            if let Some(tx) = conn.hello_tx.take() {
                let _ = tx.send(Err(ClientError::Closed {
                    code: Some(CLOSE_NORMAL),
                }));
            }
            if let Some(mut writer) = conn.writer.take() {
                let _ = writer.send(Message::Close(None)).await;
            }
        }

        let mut observed = lock(&self.shared.observed);
        observed.connected = false;
        observed.auth_state = AuthState::Unknown;
        observed.scopes = None;
        observed.pairing = None;
        info!("gateway client disconnected");
    }

    /// Undo a failed or timed-out connect attempt.
    async fn abort_attempt(&self) {
        let mut conn = self.shared.conn.lock().await;
        conn.connecting = false;
        conn.handshake_req_id = None;
        conn.hello_tx = None;
        if let Some(reader) = conn.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = conn.writer.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Send a correlated RPC request and await its response.
    ///
    /// Fails immediately when not connected. The response and the per-entry
    /// timeout race; whichever removes the table entry first completes this
    /// future, and the loser is dropped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        if !self.connected() {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id.clone(), tx);

        let frame = GatewayFrame::request(id.clone(), method, params);
        match self.send_frame(&frame).await {
            Ok(()) => {
                let timeout = self.shared.config.request_timeout;
                let shared = Arc::clone(&self.shared);
                let timer_id = id.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let expired = lock(&shared.pending).complete(
                        &timer_id,
                        Err(ClientError::RequestTimeout {
                            id: timer_id.clone(),
                            timeout,
                        }),
                    );
                    if expired {
                        debug!(id = %timer_id, "request timed out");
                    }
                });
                lock(&self.shared.pending).arm(&id, timer.abort_handle());
            },
            Err(e) => {
                // Deliver the send failure through the pending entry so the
                // completion path stays single.
                let _ = lock(&self.shared.pending).complete(&id, Err(e));
            },
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Closed { code: None }),
        }
    }

    /// Typed wrapper over `sessions.list`.
    pub async fn list_sessions(
        &self,
        filter: SessionFilter,
    ) -> Result<Vec<SessionSummary>, ClientError> {
        let params = serde_json::to_value(&filter)?;
        let payload = self.request("sessions.list", Some(params)).await?;
        parse_session_list(payload).map_err(ClientError::Protocol)
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Register a listener for unsolicited gateway events.
    ///
    /// Listeners run synchronously on the reader task, in registration
    /// order. The returned subscription removes the listener on `cancel()`.
    pub fn on_event(
        &self,
        listener: impl Fn(&EventBody) + Send + Sync + 'static,
    ) -> Subscription {
        let id = lock(&self.shared.listeners).subscribe(Arc::new(listener));
        Subscription::new(id, Arc::downgrade(&self.shared.listeners))
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn next_id(&self) -> String {
        self.shared
            .next_request_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    async fn send_frame(&self, frame: &GatewayFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame)?;
        let mut conn = self.shared.conn.lock().await;
        let Some(writer) = conn.writer.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        writer.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn read_loop(self, mut reader: WsSource) {
        let mut close_code: Option<u16> = None;
        let mut transport_error: Option<WsError> = None;

        while let Some(item) = reader.next().await {
            match item {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()).await,
                Ok(Message::Close(frame)) => {
                    close_code = frame.map(|f| u16::from(f.code));
                },
                Ok(_) => {},
                Err(e) => {
                    transport_error = Some(e);
                    break;
                },
            }
        }

        self.teardown(close_code, transport_error).await;
    }

    async fn handle_text(&self, raw: &str) {
        let frame: GatewayFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping unparseable frame: {e}");
                return;
            },
        };

        match frame {
            GatewayFrame::Event(event) if event.event == CHALLENGE_EVENT => {
                self.handle_challenge(event).await;
            },
            GatewayFrame::Event(event) => self.fan_out(event),
            GatewayFrame::Hello(hello) => self.finish_handshake(Ok(hello)).await,
            GatewayFrame::Response(res) => self.handle_response(res).await,
            GatewayFrame::Request(req) => {
                debug!(method = %req.method, "ignoring server-initiated request");
            },
        }
    }

    /// Answer the handshake challenge with a signed connect request.
    async fn handle_challenge(&self, event: EventBody) {
        let nonce = event
            .payload
            .and_then(|p| serde_json::from_value::<ChallengePayload>(p).ok())
            .and_then(|p| p.nonce);

        let config = &self.shared.config;
        let inputs = AssertionInputs {
            client_id: &config.client_id,
            client_mode: &config.client_mode,
            role: &config.role,
            scopes: &config.scopes,
            signed_at_ms: now_ms(),
            token: config.token.as_deref(),
            nonce: nonce.as_deref(),
        };
        let device = match self.shared.identity.sign(&inputs) {
            Ok(assertion) => Some(DeviceInfo {
                id: assertion.device_id,
                public_key: assertion.public_key,
                signature: assertion.signature,
                signed_at: assertion.signed_at,
                nonce: assertion.nonce,
            }),
            Err(e) => {
                // Degrade to token-only auth rather than blocking the
                // handshake.
                warn!("device signing failed, sending unsigned connect: {e}");
                None
            },
        };

        let params = ConnectParams {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: config.client_id.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
                platform: std::env::consts::OS.into(),
                mode: config.client_mode.clone(),
            },
            role: Some(config.role.clone()),
            scopes: Some(config.scopes.clone()),
            device,
            auth: config
                .token
                .clone()
                .map(|token| ConnectAuth { token: Some(token) }),
        };

        let id = self.next_id();
        {
            let mut conn = self.shared.conn.lock().await;
            conn.handshake_req_id = Some(id.clone());
        }

        let params = match serde_json::to_value(&params) {
            Ok(value) => value,
            Err(e) => {
                self.finish_handshake(Err(ClientError::Protocol(e))).await;
                return;
            },
        };
        let frame = GatewayFrame::request(id, "connect", Some(params));
        if let Err(e) = self.send_frame(&frame).await {
            self.finish_handshake(Err(e)).await;
        }
    }

    /// Resolve the pending `connect()` exactly once and derive the
    /// authorization state from the granted scopes.
    async fn finish_handshake(&self, result: Result<HelloOk, ClientError>) {
        let tx = {
            let mut conn = self.shared.conn.lock().await;
            conn.connecting = false;
            conn.handshake_req_id = None;
            conn.hello_tx.take()
        };
        let Some(tx) = tx else {
            debug!("handshake already settled");
            return;
        };

        if let Ok(hello) = &result {
            let granted = hello.auth.as_ref().and_then(|a| a.scopes.clone());
            let mut observed = lock(&self.shared.observed);
            observed.connected = true;
            observed.auth_state = auth::from_scopes(granted.as_deref());
            if observed.auth_state == AuthState::Authorized {
                observed.pairing = None;
            }
            observed.scopes = granted;
            info!(
                protocol = hello.protocol,
                state = %observed.auth_state,
                "gateway session established"
            );
        }

        let _ = tx.send(result);
    }

    async fn handle_response(&self, res: ResponseBody) {
        let is_handshake = {
            let conn = self.shared.conn.lock().await;
            conn.handshake_req_id.as_deref() == Some(res.id.as_str())
        };

        if is_handshake {
            let outcome = if res.ok {
                match res.payload {
                    Some(payload) => {
                        serde_json::from_value::<HelloOk>(payload).map_err(ClientError::Protocol)
                    },
                    None => Err(ClientError::Rejected {
                        code: None,
                        message: "connect response carried no hello payload".into(),
                    }),
                }
            } else {
                let (code, message) = split_error(res.error, "connect rejected");
                self.note_rejection(&message);
                Err(ClientError::Rejected { code, message })
            };
            self.finish_handshake(outcome).await;
            return;
        }

        let result = if res.ok {
            Ok(res.payload.unwrap_or(Value::Null))
        } else {
            let (code, message) = split_error(res.error, "request failed");
            self.note_rejection(&message);
            Err(ClientError::Rejected { code, message })
        };

        if !lock(&self.shared.pending).complete(&res.id, result) {
            debug!(id = %res.id, "dropping response for unknown or expired request");
        }
    }

    /// Feed a rejection's error text through the authorization classifier.
    fn note_rejection(&self, message: &str) {
        let mut observed = lock(&self.shared.observed);
        if let Some((state, pairing)) = auth::classify_rejection(message, observed.pairing.as_ref())
        {
            warn!(state = %state, "authorization rejection from gateway");
            observed.auth_state = state;
            observed.pairing = Some(pairing);
        }
    }

    fn fan_out(&self, event: EventBody) {
        let snapshot = lock(&self.shared.listeners).snapshot();
        events::deliver(&snapshot, &event);
    }

    /// Runs when the reader loop ends: settle the handshake if still
    /// pending, flip observed state, and gate reconnection.
    async fn teardown(&self, close_code: Option<u16>, error: Option<WsError>) {
        if let Some(e) = &error {
            warn!("gateway socket error: {e}");
        }

        {
            let mut conn = self.shared.conn.lock().await;
            conn.writer = None;
            conn.reader = None;
            conn.handshake_req_id = None;
            conn.connecting = false;
            if let Some(tx) = conn.hello_tx.take() {
                let err = match error {
                    Some(e) => ClientError::Transport(e),
                    None => ClientError::Closed { code: close_code },
                };
                let _ = tx.send(Err(err));
            }
        }

        let was_connected = {
            let mut observed = lock(&self.shared.observed);
            std::mem::replace(&mut observed.connected, false)
        };

        if !was_connected {
            debug!("connection attempt ended before a session was established");
            return;
        }

        match close_code {
            Some(CLOSE_NORMAL) => info!("gateway connection closed cleanly"),
            code => {
                warn!(?code, "gateway connection lost");
                self.schedule_reconnect().await;
            },
        }
    }

    /// Arm the single reconnect timer; a second schedule while one is
    /// pending is ignored.
    async fn schedule_reconnect(&self) {
        let mut conn = self.shared.conn.lock().await;
        if conn
            .reconnect
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
        {
            debug!("reconnect already scheduled");
            return;
        }

        let delay = self.shared.config.reconnect_delay;
        let client = self.clone();
        info!(?delay, "scheduling gateway reconnect");
        let handle = reconnect::spawn_reconnect(client, delay);
        conn.reconnect = Some(handle);
    }
}

/// Spawns the reconnect task from outside [`GatewayClient::connect`]'s
/// defining scope so the compiler can resolve the recursive future's
/// auto-traits (it cannot check `Send` of an opaque type inside its own
/// defining module).
mod reconnect {
    use std::time::Duration;

    use tokio::task::AbortHandle;
    use tracing::{info, warn};

    use super::GatewayClient;

    pub(super) fn spawn_reconnect(client: GatewayClient, delay: Duration) -> AbortHandle {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match client.connect().await {
                Ok(_) => info!("gateway reconnect succeeded"),
                Err(e) => warn!("gateway reconnect failed: {e}"),
            }
        })
        .abort_handle()
    }
}

fn split_error(
    error: Option<pylon_protocol::ErrorShape>,
    fallback: &str,
) -> (Option<String>, String) {
    match error {
        Some(shape) => (shape.code, shape.message),
        None => (None, fallback.to_string()),
    }
}
