use hushmic_agent::cdp_client::{MEET_MUTE_LABEL, MEET_UNMUTE_LABEL};
use hushmic_agent::{CdpClient, ControlError, PageMuteControl};
use hushmic_protocol::{FailureKind, MuteTriState};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tungstenite::Message;

type Responder = Arc<dyn Fn(u64, &str) -> Vec<Value> + Send + Sync>;

struct MockBrowser {
    http: SocketAddr,
    expressions: Arc<Mutex<Vec<String>>>,
}

impl MockBrowser {
    fn start(responder: Responder) -> Self {
        let ws_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        let expressions = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&expressions);
        thread::spawn(move || {
            for stream in ws_listener.incoming() {
                let Ok(stream) = stream else { break };
                serve_control_socket(stream, &responder, &seen);
            }
        });

        let targets = json!([
            {
                "id": "sw",
                "title": "Service Worker",
                "url": "https://meet.google.com/sw.js",
                "type": "service_worker",
                "webSocketDebuggerUrl": format!("ws://{ws_addr}/devtools/page/sw")
            },
            {
                "id": "meet",
                "title": "Meet - abc-defg-hij",
                "url": "https://meet.google.com/abc-defg-hij",
                "type": "page",
                "webSocketDebuggerUrl": format!("ws://{ws_addr}/devtools/page/meet")
            },
            {
                "id": "other",
                "title": "Example",
                "url": "https://example.com/",
                "type": "page"
            }
        ]);

        let http_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let http = http_listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in http_listener.incoming() {
                let Ok(stream) = stream else { break };
                serve_http(stream, &targets);
            }
        });

        Self { http, expressions }
    }

    fn client(&self) -> CdpClient {
        CdpClient::with_base(&format!("http://{}", self.http), Duration::from_secs(2)).unwrap()
    }

    fn meet(&self) -> PageMuteControl {
        PageMuteControl::google_meet(self.client())
    }

    fn expressions(&self) -> Vec<String> {
        self.expressions.lock().unwrap().clone()
    }
}

fn serve_http(stream: TcpStream, targets: &Value) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header == "\r\n" => break,
            Ok(_) => {}
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("");
    let (status, body) = match path {
        "/json/version" => ("200 OK", json!({ "Browser": "Chrome/124.0" }).to_string()),
        "/json" | "/json/list" => ("200 OK", targets.to_string()),
        _ => ("404 Not Found", String::new()),
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn serve_control_socket(stream: TcpStream, responder: &Responder, seen: &Arc<Mutex<Vec<String>>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let Ok(mut ws) = tungstenite::accept(stream) else {
        return;
    };
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => {
                let req: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(req["method"], "Runtime.evaluate");
                assert_eq!(req["params"]["returnByValue"], true);
                let id = req["id"].as_u64().unwrap();
                let expression = req["params"]["expression"].as_str().unwrap().to_string();
                seen.lock().unwrap().push(expression.clone());
                for reply in responder(id, &expression) {
                    let _ = ws.send(Message::Text(reply.to_string().into()));
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn value_reply(id: u64, value: Value) -> Value {
    json!({ "id": id, "result": { "result": { "type": "string", "value": value } } })
}

#[test]
fn lists_targets_and_finds_the_meeting_page() {
    let browser = MockBrowser::start(Arc::new(|id: u64, _: &str| vec![value_reply(id, json!(1))]));
    let client = browser.client();

    assert!(client.is_available());
    let targets = client.list_targets().unwrap();
    assert_eq!(targets.len(), 3);
    assert!(targets[2].control_endpoint.is_none());

    // The service worker shares the URL but is not a page.
    let page = client.find_page("meet.google.com").unwrap();
    assert_eq!(page.id, "meet");

    let err = client.find_page("zoom.us").unwrap_err();
    assert_eq!(err.kind(), FailureKind::TargetNotFound);
}

#[test]
fn evaluate_skips_events_and_returns_the_matching_value() {
    let browser = MockBrowser::start(Arc::new(|id: u64, _: &str| {
        vec![
            json!({ "method": "Runtime.consoleAPICalled", "params": {} }),
            json!({ "id": id + 1000, "result": {} }),
            value_reply(id, json!("muted")),
        ]
    }));
    let meet = browser.meet();

    assert_eq!(meet.is_target_muted(), MuteTriState::Muted);
    let expressions = browser.expressions();
    assert_eq!(expressions.len(), 1);
    assert!(expressions[0].contains(MEET_UNMUTE_LABEL));
    assert!(expressions[0].contains(MEET_MUTE_LABEL));
}

#[test]
fn each_call_uses_a_fresh_socket_and_id() {
    let ids = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&ids);
    let browser = MockBrowser::start(Arc::new(move |id: u64, _: &str| {
        recorded.lock().unwrap().push(id);
        vec![value_reply(id, json!("clicked"))]
    }));
    let meet = browser.meet();

    assert!(meet.mute_target());
    assert!(meet.unmute_target());
    let ids = ids.lock().unwrap().clone();
    assert_eq!(ids.len(), 2);
    assert!(ids[1] > ids[0]);
}

#[test]
fn already_in_desired_state_counts_as_success() {
    let browser = MockBrowser::start(Arc::new(|id: u64, _: &str| vec![value_reply(id, json!("already"))]));
    assert!(browser.meet().mute_target());
}

#[test]
fn missing_control_or_thrown_script_fails_closed() {
    let browser = MockBrowser::start(Arc::new(|id: u64, expression: &str| {
        if expression.contains("return 'muted'") {
            vec![json!({
                "id": id,
                "result": {
                    "result": { "type": "object" },
                    "exceptionDetails": { "text": "Uncaught", "exception": { "description": "TypeError: boom" } }
                }
            })]
        } else {
            vec![value_reply(id, json!("missing"))]
        }
    }));
    let meet = browser.meet();

    assert_eq!(meet.is_target_muted(), MuteTriState::Unknown);
    assert!(!meet.mute_target());
    let err = meet.press(true).unwrap_err();
    assert!(matches!(err, ControlError::ActionFailed(_)));
}

#[test]
fn undefined_result_is_unknown() {
    let browser = MockBrowser::start(Arc::new(|id: u64, _: &str| {
        vec![json!({ "id": id, "result": { "result": { "type": "undefined" } } })]
    }));
    assert_eq!(browser.meet().is_target_muted(), MuteTriState::Unknown);
}

#[test]
fn no_matching_page_fails_closed() {
    let browser = MockBrowser::start(Arc::new(|id: u64, _: &str| vec![value_reply(id, json!("muted"))]));
    let page = PageMuteControl::new(browser.client(), "teams.microsoft.com", "Mute", "Unmute");

    assert_eq!(page.is_target_muted(), MuteTriState::Unknown);
    assert!(!page.mute_target());
    assert!(browser.expressions().is_empty());
}

#[test]
fn closed_port_is_unavailable() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let client = CdpClient::with_base(&format!("http://127.0.0.1:{port}"), Duration::from_millis(500)).unwrap();
    assert!(!client.is_available());
    assert_eq!(client.list_targets().unwrap_err().kind(), FailureKind::ConnectionFailed);
}
