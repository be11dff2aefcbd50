//! reqwest-backed transport for the assistant backend.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::json;
use url::Url;

use crate::{ByteStream, ChatRequest, ChatTransport, Feedback, StreamError, TraceId};

pub const CHAT_STREAM_PATH: &str = "api/chat/stream";
pub const FEEDBACK_PATH: &str = "api/feedback";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const FEEDBACK_TIMEOUT_SECS: u64 = 15;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

// Manual Debug impl to prevent leaking the API token in logs.
impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

fn client_builder() -> reqwest::ClientBuilder {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        "X-Hearth-Client",
        HeaderValue::from_static(concat!("hearth/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

impl HttpTransport {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, StreamError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| StreamError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(StreamError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                base_url.scheme()
            )));
        }
        // Relative joins replace the last path segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = client_builder()
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StreamError> {
        self.base_url
            .join(path)
            .map_err(|e| StreamError::InvalidEndpoint(e.to_string()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl ChatTransport for HttpTransport {
    fn stream_chat(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, StreamError>> {
        let url = self.endpoint(CHAT_STREAM_PATH);
        let this = self.clone();

        Box::pin(async move {
            let url = url?;
            let body = json!({
                "model": request.model,
                "messages": request.messages,
                "conversation_id": request.session_id,
                "stream": true,
            });

            tracing::debug!(
                session = %request.session_id,
                model = %request.model,
                history = request.messages.len(),
                "Opening chat stream"
            );

            let response = this
                .post(url)
                .header(ACCEPT, "text/event-stream")
                .json(&body)
                .send()
                .await
                .map_err(|e| StreamError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = read_capped_error_body(response).await;
                return Err(StreamError::Http { status, body });
            }

            let bytes = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| StreamError::Transport(e.to_string()))
            });
            Ok(bytes.boxed())
        })
    }

    fn submit_feedback(
        &self,
        trace_id: TraceId,
        feedback: Feedback,
    ) -> BoxFuture<'static, Result<(), StreamError>> {
        let url = self.endpoint(FEEDBACK_PATH);
        let this = self.clone();

        Box::pin(async move {
            let url = url?;
            let response = this
                .post(url)
                .timeout(Duration::from_secs(FEEDBACK_TIMEOUT_SECS))
                .json(&json!({
                    "trace_id": trace_id,
                    "sentiment": feedback,
                }))
                .send()
                .await
                .map_err(|e| StreamError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = read_capped_error_body(response).await;
                return Err(StreamError::Http { status, body });
            }
            Ok(())
        })
    }
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
