use crate::error::ControlError;
use hushmic_protocol::cdp::{CdpRequest, CdpResponse, DebugTarget, EvaluateOutcome, TARGETS_PATH, VERSION_PATH};
use hushmic_protocol::MuteTriState;
use serde_json::Value;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tungstenite::handshake::HandshakeError;
use tungstenite::Message;
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(3);

pub const MEET_URL_FRAGMENT: &str = "meet.google.com";
pub const MEET_MUTE_LABEL: &str = "Turn off microphone";
pub const MEET_UNMUTE_LABEL: &str = "Turn on microphone";

pub struct CdpClient {
    http: reqwest::blocking::Client,
    base: Url,
    next_id: AtomicU64,
    timeout: Duration,
}

impl CdpClient {
    pub fn new(port: u16) -> Result<Self, ControlError> {
        Self::with_base(&format!("http://127.0.0.1:{port}"), CALL_TIMEOUT)
    }

    pub fn with_base(base: &str, timeout: Duration) -> Result<Self, ControlError> {
        let base = Url::parse(base).map_err(|e| ControlError::Protocol(format!("bad debug url {base}: {e}")))?;
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn is_available(&self) -> bool {
        let Ok(url) = self.endpoint(VERSION_PATH) else {
            return false;
        };
        match self.http.get(url).timeout(PROBE_TIMEOUT).send() {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(base = %self.base, error = %e, "debug port not answering");
                false
            }
        }
    }

    /// Fresh snapshot on every call; targets are never cached.
    pub fn list_targets(&self) -> Result<Vec<DebugTarget>, ControlError> {
        let url = self.endpoint(TARGETS_PATH)?;
        let targets = self
            .http
            .get(url)
            .send()?
            .error_for_status()?
            .json::<Vec<DebugTarget>>()?;
        Ok(targets)
    }

    pub fn find_target(&self, matches: impl Fn(&DebugTarget) -> bool) -> Result<DebugTarget, ControlError> {
        self.list_targets()?
            .into_iter()
            .find(|t| t.is_page() && matches(t))
            .ok_or(ControlError::TargetNotFound)
    }

    pub fn find_page(&self, url_fragment: &str) -> Result<DebugTarget, ControlError> {
        self.find_target(|t| t.url.contains(url_fragment))
    }

    /// Runs `script` in the target over a socket opened for this call only.
    pub fn evaluate(&self, target: &DebugTarget, script: &str) -> Result<Value, ControlError> {
        let Some(endpoint) = target.control_endpoint.as_deref() else {
            return Err(ControlError::TargetNotFound);
        };
        let url = Url::parse(endpoint)
            .map_err(|e| ControlError::Protocol(format!("bad control endpoint {endpoint}: {e}")))?;
        if url.scheme() != "ws" {
            return Err(ControlError::Protocol(format!(
                "unsupported control endpoint scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ControlError::Protocol(format!("control endpoint has no host: {endpoint}")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ControlError::ConnectionFailed(format!("cannot resolve {host}:{port}")))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        let _ = stream.set_nodelay(true);

        let (mut ws, _) = tungstenite::client(endpoint, stream).map_err(|e| match e {
            HandshakeError::Failure(e) => ControlError::WebSocket(e),
            HandshakeError::Interrupted(_) => ControlError::Timeout(self.timeout),
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = CdpRequest::evaluate(id, script);
        let result = send_and_await(&mut ws, &request, self.timeout);
        let _ = ws.close(None);
        let resp = result?;

        if let Some(err) = resp.error {
            return Err(ControlError::ActionFailed(format!(
                "evaluate rejected ({}): {}",
                err.code, err.message
            )));
        }
        match resp.evaluate_outcome() {
            EvaluateOutcome::Value(v) => Ok(v),
            EvaluateOutcome::Threw(msg) => Err(ControlError::ActionFailed(format!("script threw: {msg}"))),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ControlError> {
        self.base
            .join(path)
            .map_err(|e| ControlError::Protocol(format!("bad debug path {path}: {e}")))
    }
}

fn send_and_await(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    request: &CdpRequest<'_>,
    timeout: Duration,
) -> Result<CdpResponse, ControlError> {
    ws.send(Message::Text(serde_json::to_string(request)?.into()))?;

    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(ControlError::Timeout(timeout));
        }
        match ws.read()? {
            Message::Text(text) => {
                let resp: CdpResponse = serde_json::from_str(&text)?;
                // Unsolicited events carry no id.
                if resp.id == Some(request.id) {
                    return Ok(resp);
                }
            }
            Message::Close(_) => {
                return Err(ControlError::ConnectionFailed(
                    "target closed the control socket".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// Mute control for a page whose microphone button carries an `aria-label`
/// that flips between `mute_label` (mic live) and `unmute_label` (mic muted).
pub struct PageMuteControl {
    client: CdpClient,
    url_fragment: String,
    mute_label: String,
    unmute_label: String,
}

impl PageMuteControl {
    pub fn new(
        client: CdpClient,
        url_fragment: impl Into<String>,
        mute_label: impl Into<String>,
        unmute_label: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url_fragment: url_fragment.into(),
            mute_label: mute_label.into(),
            unmute_label: unmute_label.into(),
        }
    }

    pub fn google_meet(client: CdpClient) -> Self {
        Self::new(client, MEET_URL_FRAGMENT, MEET_MUTE_LABEL, MEET_UNMUTE_LABEL)
    }

    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    pub fn is_target_muted(&self) -> MuteTriState {
        self.probe().unwrap_or_else(|e| {
            warn!(page = %self.url_fragment, kind = ?e.kind(), error = %e, "page mute probe failed");
            MuteTriState::Unknown
        })
    }

    pub fn mute_target(&self) -> bool {
        self.logged_press(true)
    }

    pub fn unmute_target(&self) -> bool {
        self.logged_press(false)
    }

    pub fn probe(&self) -> Result<MuteTriState, ControlError> {
        let target = self.client.find_page(&self.url_fragment)?;
        let value = self.client.evaluate(&target, &self.probe_script())?;
        Ok(parse_probe_value(&value))
    }

    /// Clicks the control that moves the page to `muted`; already being there counts as success.
    pub fn press(&self, muted: bool) -> Result<(), ControlError> {
        let target = self.client.find_page(&self.url_fragment)?;
        let value = self.client.evaluate(&target, &self.press_script(muted))?;
        match value.as_str() {
            Some("clicked") | Some("already") => Ok(()),
            Some("missing") => Err(ControlError::ActionFailed(format!(
                "no microphone control on {}",
                self.url_fragment
            ))),
            _ => Err(ControlError::Protocol(format!("unexpected press result: {value}"))),
        }
    }

    fn logged_press(&self, muted: bool) -> bool {
        match self.press(muted) {
            Ok(()) => true,
            Err(e) => {
                warn!(page = %self.url_fragment, muted, kind = ?e.kind(), error = %e, "page mute press failed");
                false
            }
        }
    }

    fn probe_script(&self) -> String {
        format!(
            "(() => {{ {finder} if (find({unmute})) return 'muted'; if (find({mute})) return 'unmuted'; return 'unknown'; }})()",
            finder = FINDER,
            mute = js_string(&self.mute_label),
            unmute = js_string(&self.unmute_label),
        )
    }

    fn press_script(&self, muted: bool) -> String {
        let (press, done) = if muted {
            (&self.mute_label, &self.unmute_label)
        } else {
            (&self.unmute_label, &self.mute_label)
        };
        format!(
            "(() => {{ {finder} if (find({done})) return 'already'; const b = find({press}); if (!b) return 'missing'; b.click(); return 'clicked'; }})()",
            finder = FINDER,
            done = js_string(done),
            press = js_string(press),
        )
    }
}

const FINDER: &str = "const find = (label) => Array.from(document.querySelectorAll('[aria-label]')).find((e) => (e.getAttribute('aria-label') || '').includes(label));";

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub fn parse_probe_value(value: &Value) -> MuteTriState {
    match value.as_str() {
        Some("muted") => MuteTriState::Muted,
        Some("unmuted") => MuteTriState::Unmuted,
        _ => MuteTriState::Unknown,
    }
}
