//! Mock ledger and scraper HTTP server for testing
//!
//! Serves the same endpoints as the real services from an in-memory state:
//! - GET/POST /transactions, PUT/DELETE /transactions/{id} (paginated `{data, next}`)
//! - GET/POST /accounts
//! - GET/PUT /config/{key}
//! - POST /scrape (canned response)

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value as JsonValue};

/// How the mock advertises the next page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextLink {
    /// `next` is an opaque cursor
    Cursor,
    /// `next` is a full URL
    Absolute,
}

/// Configuration for the mock server
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub page_size: usize,
    pub next_link: NextLink,
    /// Bearer token required on every request; `None` disables the check
    pub token: Option<String>,
    /// Answer every list request with 404
    pub missing_lists: bool,
    /// Body returned by POST /scrape
    pub scrape_response: JsonValue,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            page_size: 2,
            next_link: NextLink::Cursor,
            token: Some("test_token".to_string()),
            missing_lists: false,
            scrape_response: json!({ "success": true, "accounts": [] }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub transactions: Vec<JsonValue>,
    pub accounts: Vec<JsonValue>,
    pub blobs: HashMap<String, String>,
    /// Request lines seen so far, e.g. "GET /transactions?dateAfter=2024-01-01"
    pub requests: Vec<String>,
    /// Bodies received by POST /scrape
    pub scrape_requests: Vec<JsonValue>,
    /// Last id handed out by a POST
    pub next_id: u64,
}

/// Mock server on a random local port
pub struct MockLedgerServer {
    port: u16,
    state: Arc<Mutex<MockState>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MockLedgerServer {
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        Self::start_with_state(config, MockState::default())
    }

    pub fn start_with_state(config: MockConfig, state: MockState) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(state));

        listener.set_nonblocking(true)?;

        let running_clone = running.clone();
        let state_clone = state.clone();
        let base_url = format!("http://127.0.0.1:{}", port);
        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let state = state_clone.clone();
                        let base_url = base_url.clone();
                        thread::spawn(move || handle_connection(stream, &cfg, &state, &base_url));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            state,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockLedgerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: String,
    body: String,
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    stream.set_nonblocking(false).ok()?;
    let mut data = Vec::new();
    let mut buffer = [0; 4096];

    let header_end = loop {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buffer[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&data[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..n]);
    }

    let first_line = headers.lines().next()?.to_string();
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let (path, query_string) = target.split_once('?').unwrap_or((target.as_str(), ""));

    let query = query_string
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.replace("%2F", "/")))
        .collect();

    Some(Request {
        method,
        path: path.to_string(),
        query,
        headers: headers.to_lowercase(),
        body: String::from_utf8_lossy(&data[header_end..]).to_string(),
    })
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig, state: &Mutex<MockState>, base_url: &str) {
    let Some(request) = read_request(&mut stream) else {
        return;
    };

    let mut state = state.lock().unwrap();
    let target = if request.query.is_empty() {
        request.path.clone()
    } else {
        let mut pairs: Vec<_> = request.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();
        format!("{}?{}", request.path, pairs.join("&"))
    };
    state.requests.push(format!("{} {}", request.method, target));

    if let Some(token) = &config.token {
        let expected = format!("authorization: bearer {}", token.to_lowercase());
        if !request.headers.contains(&expected) {
            send_response(&mut stream, 401, "Unauthorized", r#"{"error": "Invalid token"}"#);
            return;
        }
    }

    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
    let body: JsonValue = serde_json::from_str(&request.body).unwrap_or(JsonValue::Null);

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["transactions"]) | ("GET", ["accounts"]) if config.missing_lists => {
            send_response(&mut stream, 404, "Not Found", r#"{"error": "not found"}"#);
        }
        ("GET", ["transactions"]) => {
            let date_after = request.query.get("dateAfter").cloned().unwrap_or_default();
            let tag = request.query.get("tag").cloned();
            let matching: Vec<JsonValue> = state
                .transactions
                .iter()
                .filter(|tx| tx["date"].as_str().unwrap_or("") >= date_after.as_str())
                .filter(|tx| match &tag {
                    Some(tag) => tx["tags"]
                        .as_array()
                        .map_or(false, |tags| tags.iter().any(|t| t.as_str() == Some(tag.as_str()))),
                    None => true,
                })
                .cloned()
                .collect();
            let page = paginate(&matching, &request, config, base_url);
            send_response(&mut stream, 200, "OK", &page.to_string());
        }
        ("POST", ["transactions"]) => {
            state.next_id += 1;
            let id = state.next_id;
            let mut entry = body;
            entry["id"] = json!(id);
            state.transactions.push(entry);
            send_response(&mut stream, 201, "Created", &json!({ "id": id }).to_string());
        }
        ("PUT", ["transactions", id]) => {
            match state.transactions.iter_mut().find(|tx| id_matches(tx, id)) {
                Some(tx) => {
                    let mut updated = body;
                    updated["id"] = tx["id"].clone();
                    *tx = updated;
                    send_response(&mut stream, 204, "No Content", "");
                }
                None => send_response(&mut stream, 404, "Not Found", r#"{"error": "no such transaction"}"#),
            }
        }
        ("DELETE", ["transactions", id]) => {
            let before = state.transactions.len();
            state.transactions.retain(|tx| !id_matches(tx, id));
            if state.transactions.len() < before {
                send_response(&mut stream, 204, "No Content", "");
            } else {
                send_response(&mut stream, 404, "Not Found", r#"{"error": "no such transaction"}"#);
            }
        }
        ("GET", ["accounts"]) => {
            let accounts = state.accounts.clone();
            let page = paginate(&accounts, &request, config, base_url);
            send_response(&mut stream, 200, "OK", &page.to_string());
        }
        ("POST", ["accounts"]) => {
            state.next_id += 1;
            let mut account = body;
            account["id"] = json!(state.next_id);
            state.accounts.push(account.clone());
            send_response(&mut stream, 201, "Created", &account.to_string());
        }
        ("GET", ["config", key]) => match state.blobs.get(*key) {
            Some(value) => send_response(&mut stream, 200, "OK", &json!({ "value": value }).to_string()),
            None => send_response(&mut stream, 404, "Not Found", r#"{"error": "no such key"}"#),
        },
        ("PUT", ["config", key]) => {
            let value = body["value"].as_str().unwrap_or_default().to_string();
            state.blobs.insert(key.to_string(), value);
            send_response(&mut stream, 204, "No Content", "");
        }
        ("POST", ["scrape"]) => {
            state.scrape_requests.push(body);
            send_response(&mut stream, 200, "OK", &config.scrape_response.to_string());
        }
        _ => send_response(&mut stream, 404, "Not Found", r#"{"error": "Endpoint not found"}"#),
    }
}

fn id_matches(value: &JsonValue, id: &str) -> bool {
    match &value["id"] {
        JsonValue::Number(n) => n.to_string() == id,
        JsonValue::String(s) => s == id,
        _ => false,
    }
}

fn paginate(items: &[JsonValue], request: &Request, config: &MockConfig, base_url: &str) -> JsonValue {
    let offset: usize = request
        .query
        .get("cursor")
        .and_then(|c| c.strip_prefix("page-"))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let end = (offset + config.page_size).min(items.len());
    let data = items.get(offset..end).unwrap_or(&[]).to_vec();

    let next = if end < items.len() {
        let cursor = format!("page-{}", end);
        match config.next_link {
            NextLink::Cursor => json!(cursor),
            NextLink::Absolute => {
                let mut query: Vec<String> = request
                    .query
                    .iter()
                    .filter(|(k, _)| k.as_str() != "cursor")
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                query.push(format!("cursor={}", cursor));
                json!(format!("{}{}?{}", base_url, request.path, query.join("&")))
            }
        }
    } else {
        JsonValue::Null
    };

    json!({ "data": data, "next": next })
}

fn send_response(stream: &mut TcpStream, status: u16, status_text: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
