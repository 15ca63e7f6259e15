use crate::artifact::ArtifactRef;
use crate::error::ClientError;
use crate::poller::{ArtifactStatus, StatusSource};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const APP_USER_AGENT: &str = "wednesday-chat";

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub use_tts: bool,
    pub model: String,
    pub output_path: String,
}

/// Speech state reported alongside a chat reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsStatus {
    #[default]
    Ready,
    Generating,
    Disabled,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tts_status: TtsStatus,
}

/// Single request/response chat collaborator.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ClientError>;
}

#[derive(Debug, Deserialize)]
struct AudioStatusBody {
    status: String,
}

/// HTTP client for the assistant service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    chat_timeout: Duration,
    status_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        api_url: &str,
        chat_timeout: Duration,
        status_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = parse_base(api_url)?;
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(Self {
            base,
            http,
            chat_timeout,
            status_timeout,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

pub fn parse_base(api_url: &str) -> Result<Url, ClientError> {
    let trimmed = api_url.trim();
    let base = Url::parse(trimmed).map_err(|e| ClientError::InvalidUrl {
        url: trimmed.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl {
            url: trimmed.to_string(),
            message: format!("unsupported scheme '{}'", base.scheme()),
        });
    }
    Ok(base)
}

/// Append path segments to `base`, percent-encoding each one.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl {
            url: base.to_string(),
            message: "address cannot carry a path".into(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ClientError> {
        let url = endpoint(&self.base, &["chat"])?;
        let resp = self
            .http
            .post(url)
            .timeout(self.chat_timeout)
            .json(request)
            .send()
            .await?;
        let reply = error_for_status(resp).await?.json::<ChatReply>().await?;
        log::info!(
            "[client] {} replied in {:.2}s, tts_status={:?}",
            reply.model,
            reply.response_time,
            reply.tts_status
        );
        Ok(reply)
    }
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn artifact_status(&self, artifact: &ArtifactRef) -> Result<ArtifactStatus, ClientError> {
        let url = endpoint(&self.base, &["audio_status", artifact.filename()])?;
        let resp = self
            .http
            .get(url)
            .timeout(self.status_timeout)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ArtifactStatus::NotFound);
        }
        let body = error_for_status(resp).await?.json::<AudioStatusBody>().await?;
        match body.status.as_str() {
            "ready" => Ok(ArtifactStatus::Ready),
            "generating" => Ok(ArtifactStatus::Generating),
            "not_found" => Ok(ArtifactStatus::NotFound),
            other => Err(ClientError::InvalidResponse(format!(
                "unknown audio status '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{endpoint, parse_base, ApiClient, ChatReply, TtsStatus};
    use crate::artifact::ArtifactRef;
    use crate::poller::{ArtifactStatus, StatusSource};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn endpoint_encodes_filename() {
        let base = parse_base("http://localhost:8000").unwrap();
        let url = endpoint(&base, &["audio_status", "a b#1.wav"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/audio_status/a%20b%231.wav");
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let base = parse_base("https://example.com/api/").unwrap();
        let url = endpoint(&base, &["audio", "x.wav"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/audio/x.wav");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(parse_base("ftp://localhost").is_err());
        assert!(parse_base("not a url").is_err());
    }

    #[test]
    fn chat_reply_defaults_to_ready() {
        let reply: ChatReply = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(reply.tts_status, TtsStatus::Ready);
        assert!(reply.audio_path.is_none());

        let reply: ChatReply = serde_json::from_str(
            r#"{"message":"hi","audio_path":"out/x.wav","tts_status":"generating","response_time":1.5,"model":"m","timestamp":1.0}"#,
        )
        .unwrap();
        assert_eq!(reply.tts_status, TtsStatus::Generating);
        assert_eq!(reply.audio_path.as_deref(), Some("out/x.wav"));

        let reply: ChatReply =
            serde_json::from_str(r#"{"message":"hi","tts_status":"queued"}"#).unwrap();
        assert_eq!(reply.tts_status, TtsStatus::Unknown);
    }

    /// Serve one canned HTTP response per connection, in order.
    async fn serve(responses: Vec<(&'static str, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut request_lines = Vec::new();
            for (status_line, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let head = String::from_utf8_lossy(&buf[..n]).to_string();
                request_lines.push(head.lines().next().unwrap_or("").to_string());
                let reply = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            request_lines
        });
        (format!("http://{}", addr), task)
    }

    #[tokio::test]
    async fn maps_status_responses() {
        let (base, server) = serve(vec![
            ("200 OK", r#"{"status":"generating","filename":"x.wav"}"#),
            ("404 Not Found", r#"{"detail":"missing"}"#),
            ("200 OK", r#"{"status":"ready","filename":"x.wav"}"#),
            ("500 Internal Server Error", r#"{"detail":"disk"}"#),
        ])
        .await;
        let client =
            ApiClient::new(&base, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let artifact = ArtifactRef::new("output/x.wav");

        assert_eq!(
            client.artifact_status(&artifact).await.unwrap(),
            ArtifactStatus::Generating
        );
        assert_eq!(
            client.artifact_status(&artifact).await.unwrap(),
            ArtifactStatus::NotFound
        );
        assert_eq!(
            client.artifact_status(&artifact).await.unwrap(),
            ArtifactStatus::Ready
        );
        assert!(client.artifact_status(&artifact).await.is_err());

        let lines = server.await.unwrap();
        assert!(lines.iter().all(|l| l.starts_with("GET /audio_status/x.wav ")));
    }
}
