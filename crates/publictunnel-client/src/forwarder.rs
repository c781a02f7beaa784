//! Executes relayed requests against the local service

use publictunnel_proto::{append_header, is_hop_by_hop, Headers, HttpRequestPayload, HttpResponsePayload};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method};
use tracing::{debug, info, warn};

use crate::client::TunnelError;

/// Request headers the HTTP client computes itself
const RECOMPUTED_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

/// Forwards requests to `http://<local_host>:<local_port>`
#[derive(Debug, Clone)]
pub struct LocalForwarder {
    client: Client,
    base_url: String,
}

impl LocalForwarder {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TunnelError> {
        // Redirects are returned to the public caller untouched
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| TunnelError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one request locally. Failures become a 502 carrying the error text.
    pub async fn forward(&self, request: HttpRequestPayload) -> HttpResponsePayload {
        let id = request.id.clone();
        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Local request failed: {}", e);
                HttpResponsePayload::bad_gateway(id, e)
            }
        }
    }

    async fn execute(&self, request: HttpRequestPayload) -> Result<HttpResponsePayload, String> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| format!("invalid method '{}'", request.method))?;

        let path = if request.path.starts_with('/') {
            request.path
        } else {
            format!("/{}", request.path)
        };
        let url = format!("{}{}", self.base_url, path);
        info!("Proxying: {} {} -> {}", method, path, url);

        let response = self
            .client
            .request(method, &url)
            .headers(to_header_map(&request.headers))
            .body(request.body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body = response.bytes().await.map_err(|e| e.to_string())?;

        debug!("Local service answered {} ({} bytes)", status, body.len());
        Ok(HttpResponsePayload {
            id: request.id,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let skip = RECOMPUTED_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
            || is_hop_by_hop(name);
        if skip {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Skipping invalid header name {:?}", name);
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    map.append(header_name.clone(), value);
                }
                Err(_) => debug!("Skipping invalid value for header {}", name),
            }
        }
    }
    map
}

/// Local response headers in wire form; values that are not valid UTF-8 are dropped
fn from_header_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        match value.to_str() {
            Ok(value) => append_header(&mut headers, name.as_str(), value),
            Err(_) => debug!("Skipping non UTF-8 value for header {}", name),
        }
    }
    headers
}
