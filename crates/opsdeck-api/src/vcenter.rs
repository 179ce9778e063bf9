// vCenter REST API: session login and token-authenticated requests
//
// vCenter hands out an opaque session id from `POST /rest/com/vmware/cis/session`
// (HTTP basic auth). Every later request carries it in the
// `vmware-api-session-id` header. Token caching lives in `opsdeck-core`.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::connector::{ConnectionParams, ProtocolKind, SessionLogin};
use crate::error::Error;

const SESSION_HEADER: &str = "vmware-api-session-id";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    value: String,
}

fn rest_root(params: &ConnectionParams) -> Result<Url, Error> {
    Ok(Url::parse(&format!(
        "https://{}:{}/rest",
        params.host, params.port
    ))?)
}

fn join(base: &Url, path: &str) -> Result<Url, Error> {
    Ok(Url::parse(&format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?)
}

// ── Login ────────────────────────────────────────────────────────────

/// [`SessionLogin`] for vCenter.
#[derive(Debug, Default, Clone, Copy)]
pub struct VCenterLogin;

impl VCenterLogin {
    /// Log in against an explicit REST root (`https://vc/rest`).
    pub async fn login_at(base: &Url, params: &ConnectionParams) -> Result<String, Error> {
        let http = params.transport.build_client()?;
        let url = join(base, "com/vmware/cis/session")?;
        debug!("POST {}", url);

        let resp = http
            .post(url)
            .basic_auth(&params.username, Some(params.secret.expose_secret()))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Authentication {
                message: format!("vCenter rejected credentials for {}", params.username),
            });
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let session: SessionResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;
        Ok(session.value)
    }
}

#[async_trait]
impl SessionLogin for VCenterLogin {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::VCenter
    }

    async fn login(&self, params: &ConnectionParams) -> Result<String, Error> {
        Self::login_at(&rest_root(params)?, params).await
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Thin request helper. The session token is supplied per call so a
/// refreshed token takes effect immediately.
#[derive(Debug, Clone)]
pub struct VCenterClient {
    http: reqwest::Client,
    base_url: Url,
}

impl VCenterClient {
    pub fn new(params: &ConnectionParams) -> Result<Self, Error> {
        Ok(Self::with_base_url(
            params.transport.build_client()?,
            rest_root(params)?,
        ))
    }

    pub fn with_base_url(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub async fn get(&self, path: &str, token: &str) -> Result<Value, Error> {
        let url = join(&self.base_url, path)?;
        debug!("GET {}", url);
        let resp = self.http.get(url).header(SESSION_HEADER, token).send().await?;
        Self::parse(resp).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Option<&Value>) -> Result<Value, Error> {
        let url = join(&self.base_url, path)?;
        debug!("POST {}", url);
        let mut req = self.http.post(url).header(SESSION_HEADER, token);
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::parse(req.send().await?).await
    }

    async fn parse(resp: reqwest::Response) -> Result<Value, Error> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired);
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        if body.trim().is_empty() {
            return Ok(serde_json::json!({ "status": "success" }));
        }
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
