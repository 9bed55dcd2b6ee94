#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use astrobot::completion::CompletionProvider;
use astrobot::conversation::Prompt;
use astrobot::embedding::EmbeddingProvider;
use astrobot::error::{RagError, Result};

pub const EMBED_DIMS: usize = 27;

/// Letter histogram over a-z plus a constant bias component, so every text
/// (even one with no letters) gets a non-zero vector.
pub fn letter_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIMS];
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v[EMBED_DIMS - 1] = 1.0;
    v
}

#[derive(Default)]
pub struct FakeState {
    pub embed_calls: AtomicUsize,
    pub embedded_texts: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub chat_requests: Mutex<Vec<serde_json::Value>>,
    failures: Mutex<VecDeque<u16>>,
    delay: Mutex<Option<Duration>>,
    answer: Mutex<Option<Vec<String>>>,
}

/// A scripted stand-in for an Ollama server: `/api/version`, `/api/embed`
/// (letter histograms) and streaming `/api/chat`.
pub struct FakeOllama {
    pub url: String,
    pub state: Arc<FakeState>,
    handle: JoinHandle<()>,
}

impl FakeOllama {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(FakeState::default());
        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = server_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, state).await;
                });
            }
        });
        Self { url, state, handle }
    }

    /// Answer the next requests (to embed or chat) with these statuses.
    pub fn fail_next(&self, statuses: &[u16]) {
        self.state.failures.lock().unwrap().extend(statuses.iter().copied());
    }

    /// Sleep this long before answering embed and chat requests.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    /// Tokens streamed back by `/api/chat`.
    pub fn set_answer(&self, tokens: &[&str]) {
        *self.state.answer.lock().unwrap() = Some(tokens.iter().map(|t| t.to_string()).collect());
    }

    pub fn embed_calls(&self) -> usize {
        self.state.embed_calls.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> usize {
        self.state.embedded_texts.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.state.chat_calls.load(Ordering::SeqCst)
    }

    pub fn last_chat_request(&self) -> Option<serde_json::Value> {
        self.state.chat_requests.lock().unwrap().last().cloned()
    }
}

impl Drop for FakeOllama {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn handle_connection(mut socket: TcpStream, state: Arc<FakeState>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let header_end = loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    let end = buf.len().min(header_end + content_length);
    let body: serde_json::Value =
        serde_json::from_slice(&buf[header_end..end]).unwrap_or(serde_json::Value::Null);

    if path == "/api/version" {
        return respond(&mut socket, 200, "application/json", r#"{"version":"0.0.0-fake"}"#).await;
    }

    match path.as_str() {
        "/api/embed" => state.embed_calls.fetch_add(1, Ordering::SeqCst),
        "/api/chat" => state.chat_calls.fetch_add(1, Ordering::SeqCst),
        _ => return respond(&mut socket, 404, "text/plain", "not found").await,
    };

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let failure = state.failures.lock().unwrap().pop_front();
    if let Some(status) = failure {
        return respond(&mut socket, status, "application/json", r#"{"error":"injected"}"#).await;
    }

    if path == "/api/embed" {
        let inputs: Vec<String> = body["input"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        state.embedded_texts.fetch_add(inputs.len(), Ordering::SeqCst);
        let embeddings: Vec<Vec<f32>> = inputs.iter().map(|t| letter_embedding(t)).collect();
        let reply = serde_json::json!({ "model": body["model"], "embeddings": embeddings });
        return respond(&mut socket, 200, "application/json", &reply.to_string()).await;
    }

    state.chat_requests.lock().unwrap().push(body.clone());
    let tokens = state.answer.lock().unwrap().clone().unwrap_or_else(|| {
        ["Pulsars ", "are ", "spinning ", "neutron ", "stars."]
            .iter()
            .map(|t| t.to_string())
            .collect()
    });
    let mut stream = String::new();
    for token in tokens {
        let line = serde_json::json!({
            "model": body["model"],
            "message": { "role": "assistant", "content": token },
            "done": false,
        });
        stream.push_str(&line.to_string());
        stream.push('\n');
    }
    stream.push_str(r#"{"message":{"role":"assistant","content":""},"done":true}"#);
    stream.push('\n');
    respond(&mut socket, 200, "application/x-ndjson", &stream).await
}

async fn respond(socket: &mut TcpStream, status: u16, content_type: &str, body: &str) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await
}

/// Embeds locally with [`letter_embedding`]; counts texts.
#[derive(Default)]
pub struct LetterEmbedder {
    pub texts: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| letter_embedding(t)).collect())
    }
}

/// Replays scripted outcomes, then answers with the last user message
/// prefixed by `echo: `. Records every prompt it receives.
#[derive(Default)]
pub struct ScriptedCompleter {
    pub failures: Mutex<VecDeque<RagError>>,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedCompleter {
    pub fn failing_once(err: RagError) -> Self {
        let completer = Self::default();
        completer.failures.lock().unwrap().push_back(err);
        completer
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompleter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt, on_token: &mut (dyn for<'t> FnMut(&'t str) + Send)) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let question = prompt
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let answer = format!("echo: {}", question);
        for piece in answer.split_inclusive(' ') {
            on_token(piece);
        }
        Ok(answer)
    }
}

pub fn timeout_error() -> RagError {
    RagError::EndpointTimeout {
        endpoint: "http://127.0.0.1:11434/api/chat".to_string(),
        timeout: Duration::from_secs(1),
    }
}
