use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The two network calls the dashboard makes. `Err` means the request never
/// produced a response (DNS, connect, timeout).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
    async fn post(&self, url: &str) -> Result<HttpResponse>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn finish(resp: reqwest::Response) -> Result<HttpResponse> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let resp = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;
        Self::finish(resp).await
    }

    async fn post(&self, url: &str) -> Result<HttpResponse> {
        let resp = self
            .client
            .post(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;
        Self::finish(resp).await
    }
}

type Scripted = Result<HttpResponse, String>;

/// Canned responses, served in order. Once the GET queue drains the last
/// served GET response repeats, so a "never changes" document can be polled
/// indefinitely.
#[derive(Default)]
pub struct ScriptedTransport {
    gets: Mutex<VecDeque<Scripted>>,
    last_get: Mutex<Option<Scripted>>,
    posts: Mutex<VecDeque<Scripted>>,
    log: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, resp: HttpResponse) -> &Self {
        Self::push(&self.gets, Ok(resp));
        self
    }

    pub fn push_get_error(&self, msg: &str) -> &Self {
        Self::push(&self.gets, Err(msg.to_string()));
        self
    }

    pub fn push_post(&self, resp: HttpResponse) -> &Self {
        Self::push(&self.posts, Ok(resp));
        self
    }

    /// `(method, url)` of every request made so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests().iter().filter(|(m, _)| m == method).count()
    }

    fn push(queue: &Mutex<VecDeque<Scripted>>, item: Scripted) {
        if let Ok(mut q) = queue.lock() {
            q.push_back(item);
        }
    }

    fn record(&self, method: &str, url: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.push((method.to_string(), url.to_string()));
        }
    }

    fn pop(queue: &Mutex<VecDeque<Scripted>>) -> Option<Scripted> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }

    fn next_get(&self) -> Option<Scripted> {
        let mut last = self.last_get.lock().ok()?;
        match Self::pop(&self.gets) {
            Some(item) => {
                *last = Some(item.clone());
                Some(item)
            }
            None => last.clone(),
        }
    }

    fn serve(item: Option<Scripted>) -> Result<HttpResponse> {
        match item {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Err(anyhow!("no scripted response")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.record("GET", url);
        Self::serve(self.next_get())
    }

    async fn post(&self, url: &str) -> Result<HttpResponse> {
        self.record("POST", url);
        Self::serve(Self::pop(&self.posts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::ok("").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(500, "server busy").is_success());
    }

    #[tokio::test]
    async fn test_scripted_get_repeats_last() {
        let t = ScriptedTransport::new();
        t.push_get(HttpResponse::ok("a")).push_get(HttpResponse::ok("b"));
        assert_eq!(t.get("u").await.unwrap().body, "a");
        assert_eq!(t.get("u").await.unwrap().body, "b");
        assert_eq!(t.get("u").await.unwrap().body, "b");
        assert_eq!(t.count("GET"), 3);
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            // promises 100 bytes, sends 10, hangs up
            let _ = sock
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"n_rows\":")
                .await;
        });

        let t = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let res = t.get(&format!("http://{}/data/metrics.json", addr)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_scripted_post_drains() {
        let t = ScriptedTransport::new();
        t.push_post(HttpResponse::ok(""));
        assert!(t.post("u").await.is_ok());
        assert!(t.post("u").await.is_err());
    }
}
