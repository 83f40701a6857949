//! Client for the native voice-chat IPC socket.
//!
//! Lifecycle: `Disconnected -> Connecting -> HandshakeSent -> Ready -> Authorizing -> Authenticated`.
//! Any broken send/receive drops the socket and returns to `Disconnected`; the next call
//! reconnects. One command is in flight at a time: write a frame, read the next one.

use crate::error::ControlError;
use crate::token_store::{StoredToken, TokenStore};
use crate::worker::{CallBudget, NETWORK_CALL_TIMEOUT};
use hushmic_protocol::ipc::{
    commands, AuthorizeData, Frame, Handshake, IpcCommand, IpcResponse, Opcode, PeerError,
    PROTOCOL_VERSION, READY_EVENT,
};
use hushmic_protocol::MuteTriState;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const SOCKET_PREFIX: &str = "discord-ipc-";
pub const CANDIDATE_COUNT: usize = 10;
pub const DEFAULT_TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";
pub const DEFAULT_SCOPES: &[&str] = &["rpc", "rpc.voice.read", "rpc.voice.write"];
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeSent,
    Ready,
    Authorizing,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub token_url: String,
    pub socket_dirs: Vec<PathBuf>,
    pub io_timeout: Duration,
    /// The peer may show a consent prompt before answering `AUTHORIZE`.
    pub authorize_timeout: Duration,
}

impl IpcConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            socket_dirs: default_socket_dirs(),
            io_timeout: Duration::from_secs(1),
            authorize_timeout: Duration::from_secs(9),
        }
    }
}

pub fn default_socket_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .map(PathBuf::from)
        .collect();
    dirs.push(std::env::temp_dir());
    dirs.push(PathBuf::from("/tmp"));

    let mut seen = Vec::new();
    dirs.retain(|d| {
        if seen.contains(d) {
            false
        } else {
            seen.push(d.clone());
            true
        }
    });
    dirs
}

#[cfg(not(windows))]
pub fn candidate_endpoints(socket_dirs: &[PathBuf]) -> Vec<PathBuf> {
    socket_dirs
        .iter()
        .flat_map(|dir| (0..CANDIDATE_COUNT).map(move |i| dir.join(format!("{SOCKET_PREFIX}{i}"))))
        .collect()
}

#[cfg(windows)]
pub fn candidate_endpoints(_socket_dirs: &[PathBuf]) -> Vec<PathBuf> {
    (0..CANDIDATE_COUNT)
        .map(|i| PathBuf::from(format!(r"\\?\pipe\{SOCKET_PREFIX}{i}")))
        .collect()
}

pub trait IpcStream: Read + Write + Send {
    fn set_timeout(&self, timeout: Duration) -> io::Result<()>;
}

#[cfg(unix)]
impl IpcStream for std::os::unix::net::UnixStream {
    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }
}

// Named pipes opened as files have no per-read timeout; the bounded worker caps the call.
#[cfg(windows)]
impl IpcStream for std::fs::File {
    fn set_timeout(&self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn open_endpoint(path: &Path) -> io::Result<Box<dyn IpcStream>> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
fn open_endpoint(path: &Path) -> io::Result<Box<dyn IpcStream>> {
    let pipe = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Box::new(pipe))
}

/// Trades an authorization code for an access token.
pub trait TokenExchange: Send + Sync {
    /// Whether `exchange` can succeed at all. `AUTHORIZE` is not sent otherwise, since it
    /// prompts the user for consent.
    fn is_configured(&self) -> bool {
        true
    }

    /// Must return within `timeout`.
    fn exchange(&self, code: &str, timeout: Duration) -> Result<StoredToken, ControlError>;
}

pub struct HttpTokenExchange {
    http: reqwest::blocking::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<Zeroizing<String>>,
    redirect_uri: String,
}

impl HttpTokenExchange {
    pub fn new(config: &IpcConfig) -> Result<Self, ControlError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone().map(Zeroizing::new),
            redirect_uri: config.redirect_uri.clone(),
        })
    }
}

impl TokenExchange for HttpTokenExchange {
    fn is_configured(&self) -> bool {
        self.client_secret.is_some()
    }

    fn exchange(&self, code: &str, timeout: Duration) -> Result<StoredToken, ControlError> {
        let Some(secret) = self.client_secret.as_ref() else {
            return Err(ControlError::AuthorizationDenied(
                "client secret not configured".to_string(),
            ));
        };

        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .timeout(timeout)
            .form(&form)
            .send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<StoredToken>()?);
        }

        let body = resp.text().unwrap_or_default();
        if status.is_client_error() {
            Err(ControlError::AuthorizationDenied(format!(
                "token exchange rejected: status={status} body={body}"
            )))
        } else {
            Err(ControlError::ConnectionFailed(format!(
                "token exchange failed: status={status} body={body}"
            )))
        }
    }
}

struct IpcConnection {
    stream: Box<dyn IpcStream>,
    endpoint: PathBuf,
    authenticated: bool,
    access_token: Option<Zeroizing<String>>,
}

pub struct IpcClient {
    config: IpcConfig,
    tokens: TokenStore,
    exchange: Box<dyn TokenExchange>,
    conn: Option<IpcConnection>,
    state: ConnectionState,
}

impl IpcClient {
    pub fn new(config: IpcConfig, tokens: TokenStore, exchange: Box<dyn TokenExchange>) -> Self {
        Self {
            config,
            tokens,
            exchange,
            conn: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
            && self.conn.as_ref().is_some_and(|c| c.authenticated)
    }

    pub fn endpoint(&self) -> Option<&Path> {
        self.conn.as_ref().map(|c| c.endpoint.as_path())
    }

    pub fn set_mute(&mut self, muted: bool) -> bool {
        match self.request_set_mute(muted) {
            Ok(()) => true,
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, muted, "ipc set_mute failed");
                false
            }
        }
    }

    pub fn get_mute_state(&mut self) -> MuteTriState {
        match self.request_mute_state() {
            Ok(muted) => MuteTriState::from_observed(Some(muted)),
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "ipc get_mute_state failed");
                MuteTriState::Unknown
            }
        }
    }

    pub fn request_set_mute(&mut self, muted: bool) -> Result<(), ControlError> {
        self.request_set_mute_within(muted, &CallBudget::new(NETWORK_CALL_TIMEOUT))
    }

    /// Every step, including connecting and authorizing, fits inside `budget`.
    pub fn request_set_mute_within(&mut self, muted: bool, budget: &CallBudget) -> Result<(), ControlError> {
        self.ensure_authenticated_within(budget)?;
        let data = self.command(
            commands::SET_VOICE_SETTINGS,
            json!({ "mute": muted }),
            self.config.io_timeout,
            budget,
        )?;
        // The peer echoes the settings it applied.
        match data.get("mute").and_then(Value::as_bool) {
            Some(applied) if applied != muted => Err(ControlError::ActionFailed(format!(
                "peer left mute={applied} after requesting mute={muted}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn request_mute_state(&mut self) -> Result<bool, ControlError> {
        self.request_mute_state_within(&CallBudget::new(NETWORK_CALL_TIMEOUT))
    }

    pub fn request_mute_state_within(&mut self, budget: &CallBudget) -> Result<bool, ControlError> {
        self.ensure_authenticated_within(budget)?;
        let data = self.command(
            commands::GET_VOICE_SETTINGS,
            json!({}),
            self.config.io_timeout,
            budget,
        )?;
        data.get("mute")
            .and_then(Value::as_bool)
            .ok_or_else(|| ControlError::Protocol("voice settings reply has no mute field".to_string()))
    }

    pub fn ensure_authenticated(&mut self) -> Result<(), ControlError> {
        self.ensure_authenticated_within(&CallBudget::new(NETWORK_CALL_TIMEOUT))
    }

    fn ensure_authenticated_within(&mut self, budget: &CallBudget) -> Result<(), ControlError> {
        if self.is_authenticated() {
            return Ok(());
        }
        if self.conn.is_none() {
            self.connect_within(budget)?;
        }

        if let Some(token) = self.tokens.load() {
            match self.authenticate(&token, budget) {
                Ok(()) => return Ok(()),
                Err(ControlError::AuthenticationFailed(reason)) => {
                    warn!(%reason, "cached access token rejected, re-authorizing");
                    self.forget_token();
                }
                Err(e) => return Err(e),
            }
        }

        self.authorize(budget)
    }

    pub fn connect(&mut self) -> Result<(), ControlError> {
        self.connect_within(&CallBudget::new(NETWORK_CALL_TIMEOUT))
    }

    fn connect_within(&mut self, budget: &CallBudget) -> Result<(), ControlError> {
        self.disconnect();
        budget.check()?;
        self.state = ConnectionState::Connecting;

        let mut opened = None;
        for endpoint in candidate_endpoints(&self.config.socket_dirs) {
            match open_endpoint(&endpoint) {
                Ok(stream) => {
                    opened = Some((stream, endpoint));
                    break;
                }
                Err(e) => debug!(endpoint = %endpoint.display(), error = %e, "ipc endpoint unavailable"),
            }
        }
        let Some((stream, endpoint)) = opened else {
            self.state = ConnectionState::Disconnected;
            return Err(ControlError::ConnectionFailed(
                "no ipc endpoint accepted a connection".to_string(),
            ));
        };

        self.conn = Some(IpcConnection {
            stream,
            endpoint,
            authenticated: false,
            access_token: None,
        });

        if let Err(e) = self.handshake(budget) {
            self.drop_connection();
            return Err(e);
        }
        self.state = ConnectionState::Ready;
        if let Some(endpoint) = self.endpoint() {
            info!(endpoint = %endpoint.display(), "ipc handshake complete");
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = Frame::new(Opcode::Close, b"{}".to_vec()).write_to(&mut conn.stream);
        }
        self.state = ConnectionState::Disconnected;
    }

    pub fn forget_token(&mut self) {
        if let Err(e) = self.tokens.delete() {
            warn!(path = %self.tokens.path().display(), error = %e, "could not delete access token");
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.access_token = None;
        }
    }

    fn handshake(&mut self, budget: &CallBudget) -> Result<(), ControlError> {
        let timeout = budget.cap(self.config.io_timeout)?;
        let hello = Handshake {
            v: PROTOCOL_VERSION,
            client_id: self.config.client_id.clone(),
        };
        let deadline = Instant::now() + timeout;
        self.write_frame(&Frame::json(Opcode::Handshake, &hello)?, timeout)?;
        self.state = ConnectionState::HandshakeSent;

        let reply = self.read_reply(deadline)?;
        if !reply.is_ready() {
            return Err(ControlError::Protocol(format!(
                "handshake reply did not carry {READY_EVENT}"
            )));
        }
        Ok(())
    }

    fn authenticate(&mut self, token: &str, budget: &CallBudget) -> Result<(), ControlError> {
        self.command(
            commands::AUTHENTICATE,
            json!({ "access_token": token }),
            self.config.io_timeout,
            budget,
        )?;
        if let Some(conn) = self.conn.as_mut() {
            conn.authenticated = true;
            conn.access_token = Some(Zeroizing::new(token.to_string()));
        }
        self.state = ConnectionState::Authenticated;
        Ok(())
    }

    fn authorize(&mut self, budget: &CallBudget) -> Result<(), ControlError> {
        if !self.exchange.is_configured() {
            return Err(ControlError::AuthorizationDenied(
                "token exchange not configured, not asking for consent".to_string(),
            ));
        }
        self.state = ConnectionState::Authorizing;
        info!("requesting ipc authorization");

        let result = self.authorize_steps(budget);
        if let Err(e) = &result {
            if matches!(e, ControlError::AuthenticationFailed(_)) {
                self.forget_token();
            }
            self.settle_state();
        }
        result
    }

    fn authorize_steps(&mut self, budget: &CallBudget) -> Result<(), ControlError> {
        let args = json!({
            "client_id": self.config.client_id,
            "scopes": self.config.scopes,
        });
        let data = self.command(commands::AUTHORIZE, args, self.config.authorize_timeout, budget)?;
        let AuthorizeData { code } = serde_json::from_value(data)
            .map_err(|e| ControlError::Protocol(format!("authorize reply has no code: {e}")))?;

        let token = self.exchange.exchange(&code, budget.cap(EXCHANGE_TIMEOUT)?)?;
        if let Err(e) = self.tokens.save(&token) {
            warn!(path = %self.tokens.path().display(), error = %e, "could not persist access token");
        }
        self.authenticate(&token.access_token, budget)
    }

    /// Sends one command and reads its reply. Peer-reported errors map by command.
    fn command(
        &mut self,
        cmd: &str,
        args: Value,
        timeout: Duration,
        budget: &CallBudget,
    ) -> Result<Value, ControlError> {
        // Nothing is written once the budget is gone.
        let timeout = budget.cap(timeout)?;
        let deadline = Instant::now() + timeout;
        let nonce = new_nonce();
        let request = IpcCommand {
            cmd: cmd.to_string(),
            args,
            nonce: nonce.clone(),
        };

        let reply = match self.round_trip(&request, timeout, deadline) {
            Ok(reply) => reply,
            Err(e) => {
                if e.breaks_connection() {
                    self.drop_connection();
                }
                return Err(e);
            }
        };

        if reply.nonce.as_deref() != Some(nonce.as_str()) {
            self.drop_connection();
            return Err(ControlError::Protocol(format!(
                "reply nonce does not match {cmd} command"
            )));
        }

        if let Some(PeerError { code, message }) = reply.peer_error() {
            let detail = format!("{cmd} rejected ({code}): {message}");
            return Err(match cmd {
                commands::AUTHENTICATE => ControlError::AuthenticationFailed(detail),
                commands::AUTHORIZE => ControlError::AuthorizationDenied(detail),
                _ => ControlError::ActionFailed(detail),
            });
        }

        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// Unsolicited events carry no nonce and are skipped.
    fn round_trip(
        &mut self,
        request: &IpcCommand,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<IpcResponse, ControlError> {
        self.write_frame(&Frame::json(Opcode::Message, request)?, timeout)?;
        loop {
            let reply = self.read_reply(deadline)?;
            if reply.nonce.is_none() && reply.cmd.as_deref() == Some(commands::DISPATCH) {
                debug!(evt = ?reply.evt, "skipping ipc event while awaiting {}", request.cmd);
                continue;
            }
            return Ok(reply);
        }
    }

    fn write_frame(&mut self, frame: &Frame, timeout: Duration) -> Result<(), ControlError> {
        let timeout = timeout.min(self.config.io_timeout);
        let conn = self.connection()?;
        conn.stream.set_timeout(timeout)?;
        frame.write_to(&mut conn.stream)?;
        Ok(())
    }

    /// Each frame read gets only the time left until `deadline`.
    fn read_reply(&mut self, deadline: Instant) -> Result<IpcResponse, ControlError> {
        let span = deadline.saturating_duration_since(Instant::now());
        let conn = self.connection()?;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(ControlError::Timeout(span));
            }
            conn.stream.set_timeout(left)?;

            let frame = Frame::read_from(&mut conn.stream)?;
            match frame.opcode {
                Opcode::Message | Opcode::Handshake => return Ok(frame.parse::<IpcResponse>()?),
                Opcode::Ping => Frame::new(Opcode::Pong, frame.payload).write_to(&mut conn.stream)?,
                Opcode::Pong => {}
                Opcode::Close => {
                    let reason: PeerError = frame.parse().unwrap_or_default();
                    return Err(ControlError::ConnectionFailed(format!(
                        "peer closed the connection ({}): {}",
                        reason.code, reason.message
                    )));
                }
            }
        }
    }

    fn connection(&mut self) -> Result<&mut IpcConnection, ControlError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ControlError::ConnectionFailed("not connected".to_string()))
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        self.state = ConnectionState::Disconnected;
    }

    fn settle_state(&mut self) {
        self.state = match self.conn.as_ref() {
            None => ConnectionState::Disconnected,
            Some(c) if c.authenticated => ConnectionState::Authenticated,
            Some(_) => ConnectionState::Ready,
        };
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn new_nonce() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
