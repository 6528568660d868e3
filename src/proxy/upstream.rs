// Upstream client: forwards translated requests and hands back either a
// buffered body or a live byte stream

use std::io::Read;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};

use crate::config::{ProviderProfile, RelayConfig};
use crate::error::ProxyError;
use crate::proxy::schema::UpstreamRequest;

/// Transport framing headers; never copied across a hop in either direction.
pub const HOP_HEADERS: [HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS.iter() {
        headers.remove(name);
    }
}

/// Decode a buffered body according to its `Content-Encoding`.
pub fn decode(encoding: Option<&str>, body: Bytes) -> std::io::Result<Bytes> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        None | Some("") | Some("identity") => Ok(body),
        Some("gzip") | Some("x-gzip") => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(body.as_ref()).read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        Some("deflate") => {
            // zlib-wrapped per RFC 9110, raw deflate from some servers
            let mut out = Vec::new();
            match flate2::read::ZlibDecoder::new(body.as_ref()).read_to_end(&mut out) {
                Ok(_) => Ok(Bytes::from(out)),
                Err(_) => {
                    out.clear();
                    flate2::read::DeflateDecoder::new(body.as_ref()).read_to_end(&mut out)?;
                    Ok(Bytes::from(out))
                }
            }
        }
        Some(other) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported content encoding: {}", other),
        )),
    }
}

pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

pub enum UpstreamBody {
    Buffered(Bytes),
    /// Dropping the stream releases the upstream connection.
    Streaming(ByteStream),
}

pub struct UpstreamResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

#[derive(Clone)]
pub struct UpstreamInvoker {
    http_client: reqwest::Client,
    url: String,
    profile: ProviderProfile,
    credential: Option<HeaderValue>,
}

impl UpstreamInvoker {
    pub fn new(config: &RelayConfig) -> anyhow::Result<Self> {
        // No overall timeout: streams may legitimately run for a long time.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let credential = config
            .upstream_key
            .as_deref()
            .map(|key| {
                let mut value = HeaderValue::from_str(&config.provider.credential_value(key))?;
                value.set_sensitive(true);
                Ok::<_, anyhow::Error>(value)
            })
            .transpose()?;

        Ok(Self {
            http_client,
            url: config.provider.chat_url(),
            profile: config.provider.clone(),
            credential,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build the outbound header set from the inbound one.
    pub fn outbound_headers(&self, inbound: &HeaderMap, stream: bool) -> HeaderMap {
        let mut headers = inbound.clone();
        strip_hop_headers(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::AUTHORIZATION);
        // Bodies reach the client decoded or verbatim, never in an encoding
        // the client asked for but `decode` cannot read.
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        for (name, value) in &self.profile.extra_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Skipping invalid extra header {:?}", name),
            }
        }

        if let Some(credential) = &self.credential {
            match HeaderName::from_bytes(self.profile.credential_header.as_bytes()) {
                Ok(name) => {
                    headers.insert(name, credential.clone());
                }
                Err(e) => tracing::error!("Invalid credential header name: {}", e),
            }
        }

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if stream {
            headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        headers
    }

    pub async fn send(
        &self,
        request: &UpstreamRequest,
        inbound_headers: &HeaderMap,
    ) -> Result<UpstreamResult, ProxyError> {
        let body = serde_json::to_vec(request).map_err(|e| {
            ProxyError::InvalidRequest(format!("Failed to encode upstream request: {}", e))
        })?;
        let headers = self.outbound_headers(inbound_headers, request.stream);

        tracing::debug!(url = %self.url, stream = request.stream, "forwarding to upstream");

        let response = self
            .http_client
            .post(&self.url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Error forwarding request: {}", e);
                ProxyError::UpstreamUnreachable(e.to_string())
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        tracing::debug!(status = status.as_u16(), "upstream responded");

        if status.as_u16() >= 400 {
            let body = read_body(response).await?;
            tracing::warn!(status = status.as_u16(), "upstream returned error");
            return Err(ProxyError::UpstreamError {
                status,
                headers,
                body,
            });
        }

        let body = if request.stream {
            UpstreamBody::Streaming(response.bytes_stream().boxed())
        } else {
            UpstreamBody::Buffered(read_body(response).await?)
        };

        Ok(UpstreamResult {
            status,
            headers,
            body,
        })
    }
}

async fn read_body(response: reqwest::Response) -> Result<Bytes, ProxyError> {
    let encoding = response
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let raw = response.bytes().await.map_err(|e| {
        tracing::error!("Error reading upstream response: {}", e);
        ProxyError::UpstreamResponseMalformed(format!("Error reading response from upstream: {}", e))
    })?;
    decode(encoding.as_deref(), raw)
        .map_err(|e| ProxyError::UpstreamResponseMalformed(e.to_string()))
}
