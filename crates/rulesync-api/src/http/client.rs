// HTTP adapter client
//
// Wraps `reqwest::Client` with endpoint URL construction, basic auth and
// envelope unwrapping. Endpoint groups (rules, system) are implemented as
// inherent methods in separate files to keep this module focused on
// transport mechanics.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::client::Endpoint;
use crate::error::Error;
use crate::http::models::{Envelope, Meta, UNKNOWN_OBJECT_CODE};
use crate::transport::TransportConfig;

/// Only the `meta` half of an envelope, used to read faults whose `data`
/// would not match the expected payload type.
#[derive(serde::Deserialize)]
struct MetaOnly {
    meta: Meta,
}

/// Raw HTTP client for one device's management endpoint.
///
/// All methods return unwrapped `data` payloads -- the envelope is
/// stripped before the caller sees it.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
}

impl HttpClient {
    /// Create a client for `https://{host}:{port}/api/` from a `TransportConfig`.
    pub fn new(endpoint: &Endpoint, transport: &TransportConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&format!(
            "https://{}:{}/api/",
            endpoint.host, endpoint.port
        ))?;
        let http = transport.build_client()?;
        Ok(Self::with_client(
            http,
            base_url,
            endpoint.username.clone(),
            endpoint.password.clone(),
        ))
    }

    /// Create a client with a pre-built `reqwest::Client` and base URL.
    ///
    /// The base URL should end with `/` so relative paths join beneath it.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: String,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url,
            username,
            password,
        }
    }

    /// The endpoint base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for an API path relative to the base URL.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    /// Send a GET request and unwrap the envelope.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, Error> {
        debug!("GET {}", url);

        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(resp).await
    }

    /// Send a POST request with JSON body and unwrap the envelope.
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<Vec<T>, Error> {
        debug!("POST {}", url);

        let resp = self
            .authorize(self.http.post(url).json(body))
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(resp).await
    }

    /// Send a PUT request with JSON body and unwrap the envelope.
    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<Vec<T>, Error> {
        debug!("PUT {}", url);

        let resp = self
            .authorize(self.http.put(url).json(body))
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(resp).await
    }
}

/// Parse the `{ meta, data }` envelope, returning `data` on success.
///
/// HTTP 401 always becomes a 401 fault. A non-`ok` `rc` becomes
/// `Error::UnknownObject` when tagged with the unknown-object code and
/// `Error::Fault` otherwise.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Vec<T>, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;
    trace!(status = status.as_u16(), len = body.len(), "response received");

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Fault {
            status: 401,
            reason: "Unauthorized".into(),
            body,
        });
    }

    if let Ok(MetaOnly { meta }) = serde_json::from_str::<MetaOnly>(&body) {
        if meta.rc != "ok" {
            let reason = meta
                .msg
                .unwrap_or_else(|| format!("rc={}", meta.rc));
            return Err(match meta.code.as_deref() {
                Some(UNKNOWN_OBJECT_CODE) => Error::UnknownObject { message: reason },
                _ => Error::Fault {
                    status: status.as_u16(),
                    reason,
                    body,
                },
            });
        }
    } else if !status.is_success() {
        return Err(Error::Fault {
            status: status.as_u16(),
            reason: status
                .canonical_reason()
                .map_or_else(|| format!("HTTP {status}"), String::from),
            body,
        });
    }

    let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.clone(),
        }
    })?;

    Ok(envelope.data)
}

/// Check that a batch response carries one entry per request element.
pub(crate) fn expect_len<T>(what: &str, data: Vec<T>, expected: usize) -> Result<Vec<T>, Error> {
    if data.len() == expected {
        Ok(data)
    } else {
        Err(Error::Deserialization {
            message: format!("expected {expected} {what}, got {}", data.len()),
            body: String::new(),
        })
    }
}
