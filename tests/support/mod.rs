#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use url::Url;
use vk_longpoll::{Context, CredentialProvider, LongPollError, SessionState};

#[derive(Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub delay_ms: u64,
    pub body: String,
}

pub fn response_json(body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        delay_ms: 0,
        body: body.to_owned(),
    }
}

pub fn delayed_json(delay_ms: u64, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        delay_ms,
        body: body.to_owned(),
    }
}

pub fn response_status(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        delay_ms: 0,
        body: body.to_owned(),
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub struct ScriptedServer {
    pub base_url: String,
    counters: Arc<Counters>,
    targets: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let counters = Arc::new(Counters::default());
        let targets = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let counters = Arc::clone(&counters);
            let targets = Arc::clone(&targets);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let counters = Arc::clone(&counters);
                    let targets = Arc::clone(&targets);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, counters, targets).await;
                    });
                }
            }
        });

        Self {
            base_url,
            counters,
            targets,
            handle,
        }
    }

    /// Long Poll server URL as an upstream API would hand it out.
    pub fn server_url(&self, path: &str) -> Url {
        Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .expect("scripted server URL")
    }

    pub fn request_count(&self) -> usize {
        self.counters.requests.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::Acquire)
    }

    /// Request targets (`/path?query`) in arrival order.
    pub fn targets(&self) -> Vec<String> {
        lock_unpoisoned(&self.targets).clone()
    }

    /// Query pairs of the `index`-th request.
    pub fn query(&self, index: usize) -> Vec<(String, String)> {
        let target = self
            .targets()
            .get(index)
            .cloned()
            .expect("request with this index was recorded");
        let url = Url::parse(&format!("{}{}", self.base_url, target)).expect("recorded target");
        url.query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

pub fn param<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    counters: Arc<Counters>,
    targets: Arc<Mutex<Vec<String>>>,
) {
    let Ok(Some(target)) = read_request_target(&mut socket).await else {
        return;
    };

    let index = counters.requests.fetch_add(1, Ordering::AcqRel);
    lock_unpoisoned(&targets).push(target);
    let current = counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
    counters.max_in_flight.fetch_max(current, Ordering::AcqRel);

    let response = scripts.get(index).cloned().unwrap_or_else(|| {
        response_status(500, r#"{"error":"unexpected request"}"#)
    });

    if response.delay_ms > 0 {
        sleep(Duration::from_millis(response.delay_ms)).await;
    }
    counters.in_flight.fetch_sub(1, Ordering::AcqRel);

    let payload = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        status_reason(response.status),
        response.body.len(),
        response.body,
    );
    if socket.write_all(payload.as_bytes()).await.is_err() {
        return;
    }
    let _ = socket.shutdown().await;
}

async fn read_request_target(socket: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 2048];

    loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        request.extend_from_slice(&buffer[..n]);
        if request.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&request);
    Ok(head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_owned))
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outcome returned by one `ScriptedProvider::acquire` call.
#[derive(Clone)]
pub enum Acquire {
    Session(SessionState),
    Fail,
}

/// Credential provider replaying scripted outcomes and counting calls.
#[derive(Clone)]
pub struct ScriptedProvider {
    outcomes: Arc<Mutex<VecDeque<Acquire>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Acquire>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CredentialProvider for ScriptedProvider {
    async fn acquire(&self, _ctx: &Context) -> Result<SessionState, LongPollError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let outcome = lock_unpoisoned(&self.outcomes).pop_front();
        match outcome {
            Some(Acquire::Session(session)) => Ok(session),
            Some(Acquire::Fail) => Err(LongPollError::decode("response", "scripted failure")),
            None => Err(LongPollError::decode("response", "no scripted session left")),
        }
    }
}
