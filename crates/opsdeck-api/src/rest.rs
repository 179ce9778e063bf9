// Token-authenticated REST connectors (Proxmox VE, FortiGate)
//
// Both appliances accept a static API token in the `Authorization` header,
// so a "connection" is just a configured `reqwest::Client` plus a base URL.
// Proxmox wraps every payload in `{ "data": ... }`; FortiGate in
// `{ "results": ..., "status": "success" }`. Callers see the unwrapped value.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::connector::{ApiRequest, Connection, ConnectionParams, Connector, ProtocolKind, Verb};
use crate::error::Error;

/// Which REST appliance a [`RestConnector`] speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestFlavor {
    Proxmox,
    FortiGate,
}

impl RestFlavor {
    fn kind(self) -> ProtocolKind {
        match self {
            Self::Proxmox => ProtocolKind::Proxmox,
            Self::FortiGate => ProtocolKind::FortiGate,
        }
    }

    /// API root below `https://host:port`.
    fn api_root(self) -> &'static str {
        match self {
            Self::Proxmox => "/api2/json",
            Self::FortiGate => "/api/v2",
        }
    }

    fn probe_path(self) -> &'static str {
        match self {
            Self::Proxmox => "/version",
            Self::FortiGate => "/monitor/system/status",
        }
    }

    fn authorization(self, params: &ConnectionParams) -> String {
        let secret = params.secret.expose_secret();
        match self {
            Self::Proxmox => format!("PVEAPIToken={}={secret}", params.username),
            Self::FortiGate => format!("Bearer {secret}"),
        }
    }

    /// Strip the vendor envelope, falling back to the whole body.
    fn unwrap_payload(self, mut body: Value) -> Value {
        let key = match self {
            Self::Proxmox => "data",
            Self::FortiGate => "results",
        };
        if let Some(payload) = body.get_mut(key) {
            return payload.take();
        }
        body
    }
}

// ── Connector ────────────────────────────────────────────────────────

/// Builds [`RestConnection`]s for one flavor.
#[derive(Debug, Clone, Copy)]
pub struct RestConnector {
    flavor: RestFlavor,
}

impl RestConnector {
    pub fn new(flavor: RestFlavor) -> Self {
        Self { flavor }
    }
}

#[async_trait]
impl Connector for RestConnector {
    fn kind(&self) -> ProtocolKind {
        self.flavor.kind()
    }

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Connection>, Error> {
        let base_url = Url::parse(&format!(
            "https://{}:{}{}",
            params.host,
            params.port,
            self.flavor.api_root()
        ))?;
        Ok(Box::new(RestConnection::new(self.flavor, base_url, params)?))
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// A configured HTTP client for one appliance.
#[derive(Debug)]
pub struct RestConnection {
    flavor: RestFlavor,
    http: reqwest::Client,
    base_url: Url,
}

impl RestConnection {
    /// Create a connection rooted at `base_url` (which must already include
    /// the flavor's API root, e.g. `https://pve:8006/api2/json`).
    pub fn new(flavor: RestFlavor, base_url: Url, params: &ConnectionParams) -> Result<Self, Error> {
        let mut auth = HeaderValue::from_str(&flavor.authorization(params))
            .map_err(|e| Error::Authentication {
                message: format!("token is not a valid header value: {e}"),
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        let http = params.transport.build_client_with_headers(headers)?;

        Ok(Self {
            flavor,
            http,
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    async fn send(&self, request: ApiRequest) -> Result<Value, Error> {
        let url = self.url(&request.path)?;
        debug!("{:?} {}", request.verb, url);

        let builder = match request.verb {
            Verb::Get => self.http.get(url),
            Verb::Post => self.http.post(url),
            Verb::Put => self.http.put(url),
            Verb::Delete => self.http.delete(url),
        };
        let builder = if request.params.is_empty() {
            builder
        } else {
            builder.query(&request.params)
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "API token rejected".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;
        Ok(self.flavor.unwrap_payload(value))
    }
}

#[async_trait]
impl Connection for RestConnection {
    fn kind(&self) -> ProtocolKind {
        self.flavor.kind()
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, Error> {
        self.send(request).await
    }

    async fn probe(&self) -> Result<(), Error> {
        self.send(ApiRequest::get(self.flavor.probe_path()))
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        // Stateless over HTTP; pooled sockets go away with the client.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn proxmox_payload_is_unwrapped() {
        let body = json!({ "data": [{ "node": "pve1" }] });
        assert_eq!(
            RestFlavor::Proxmox.unwrap_payload(body),
            json!([{ "node": "pve1" }])
        );
    }

    #[test]
    fn missing_envelope_returns_whole_body() {
        let body = json!({ "version": "7.4" });
        assert_eq!(RestFlavor::FortiGate.unwrap_payload(body.clone()), body);
    }
}
