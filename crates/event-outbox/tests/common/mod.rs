//! Test harness: a scriptable in-process emitter and a minimal HTTP collector.

#![allow(dead_code)]

use async_trait::async_trait;
use event_outbox::{
    EmitError, EmitResult, Emitter, Event, EventStore, MemoryStore, OutboxConfig,
    OutboxConfigBuilder, StoreError, StoreResult, StoredEvent,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How a mock answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockResponse {
    Accept,
    Reject(u16),
}

#[derive(Default)]
struct MockState {
    queued: VecDeque<MockResponse>,
    fallback: Option<MockResponse>,
    delay: Option<Duration>,
    single: Vec<Vec<u8>>,
    bulk: Vec<Vec<Vec<u8>>>,
}

/// Emitter that records every payload and answers from a script.
///
/// Clones share state, so a test keeps one handle while the dispatcher owns
/// the other.
#[derive(Clone, Default)]
pub struct MockEmitter {
    state: Arc<Mutex<MockState>>,
}

impl MockEmitter {
    pub fn accepting() -> Self {
        Self::answering(MockResponse::Accept)
    }

    pub fn rejecting(status: u16) -> Self {
        Self::answering(MockResponse::Reject(status))
    }

    fn answering(fallback: MockResponse) -> Self {
        let emitter = Self::default();
        emitter.state.lock().unwrap().fallback = Some(fallback);
        emitter
    }

    /// Answer the next request with `response`, ahead of the fallback.
    pub fn queue_response(&self, response: MockResponse) {
        self.state.lock().unwrap().queued.push_back(response);
    }

    pub fn set_fallback(&self, response: MockResponse) {
        self.state.lock().unwrap().fallback = Some(response);
    }

    /// Hold every request for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn single_sends(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().single.clone()
    }

    pub fn bulk_sends(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().unwrap().bulk.clone()
    }

    pub fn request_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.single.len() + state.bulk.len()
    }

    async fn answer(&self) -> EmitResult<()> {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = {
            let mut state = self.state.lock().unwrap();
            state
                .queued
                .pop_front()
                .or(state.fallback)
                .unwrap_or(MockResponse::Accept)
        };

        match response {
            MockResponse::Accept => Ok(()),
            MockResponse::Reject(status) => Err(EmitError::Status {
                status,
                body: "rejected by mock".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Emitter for MockEmitter {
    async fn send_one(&self, payload: &[u8]) -> EmitResult<()> {
        self.state.lock().unwrap().single.push(payload.to_vec());
        self.answer().await
    }

    async fn send_bulk(&self, payloads: &[&[u8]]) -> EmitResult<()> {
        let batch = payloads.iter().map(|p| p.to_vec()).collect();
        self.state.lock().unwrap().bulk.push(batch);
        self.answer().await
    }
}

/// Store operations [`FlakyStore`] can be told to fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreFaults {
    pub set: bool,
    pub update: bool,
    pub remove: bool,
    pub count: bool,
}

/// In-memory store whose operations fail on demand.
///
/// Clones share both the entries and the fault switches.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<Mutex<MemoryStore>>,
    faults: Arc<Mutex<StoreFaults>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: StoreFaults) {
        *self.faults.lock().unwrap() = faults;
    }

    pub fn heal(&self) {
        self.set_faults(StoreFaults::default());
    }

    /// Entries currently held, bypassing the fault switches.
    pub fn snapshot(&self) -> Vec<StoredEvent> {
        self.inner.lock().unwrap().get_all().unwrap()
    }

    fn check(&self, op: &str, failing: impl Fn(&StoreFaults) -> bool) -> StoreResult<()> {
        let faults = *self.faults.lock().unwrap();
        if failing(&faults) {
            return Err(StoreError::InvalidData(format!("{op} failed")));
        }
        Ok(())
    }
}

impl EventStore for FlakyStore {
    fn set(&mut self, event: Event) -> StoreResult<StoredEvent> {
        self.check("set", |f| f.set)?;
        self.inner.lock().unwrap().set(event)
    }

    fn update(&mut self, event: &StoredEvent) -> StoreResult<()> {
        self.check("update", |f| f.update)?;
        self.inner.lock().unwrap().update(event)
    }

    fn remove(&mut self, event: &StoredEvent) -> StoreResult<()> {
        self.check("remove", |f| f.remove)?;
        self.inner.lock().unwrap().remove(event)
    }

    fn count(&self) -> StoreResult<usize> {
        self.check("count", |f| f.count)?;
        self.inner.lock().unwrap().count()
    }

    fn get_all(&self) -> StoreResult<Vec<StoredEvent>> {
        self.inner.lock().unwrap().get_all()
    }
}

/// Config pointed at a collector that is never contacted.
pub fn test_config() -> OutboxConfigBuilder {
    OutboxConfig::builder("http://127.0.0.1:9")
}

pub fn json_event(n: usize) -> String {
    format!(r#"{{"event_type":"track","seq":{n}}}"#)
}

/// One request as seen by [`MockCollector`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_contains(&self, needle: &[u8]) -> bool {
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

/// HTTP/1.1 collector on a loopback port that records requests and answers
/// each with a fixed status.
pub struct MockCollector {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockCollector {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let requests = requests.clone();
            async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        if let Ok(request) = read_request(&mut socket).await {
                            requests.lock().unwrap().push(request);
                            let body = if status > 299 { "nope" } else { "ok" };
                            let response = format!(
                                "HTTP/1.1 {status} Mock\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                                body.len()
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                    });
                }
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let mut body = buf[header_end..].to_vec();
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    if chunked {
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body = decode_chunked(&body);
    } else {
        let len: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        while body.len() < len {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(len);
    }

    Ok(RecordedRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(line_end) = find(raw, b"\r\n") {
        let size_line = String::from_utf8_lossy(&raw[..line_end]).to_string();
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        raw = &raw[line_end + 2..];
        if size == 0 || raw.len() < size {
            break;
        }
        out.extend_from_slice(&raw[..size]);
        raw = raw.get(size + 2..).unwrap_or_default();
    }
    out
}
