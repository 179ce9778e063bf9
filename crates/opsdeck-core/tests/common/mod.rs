// Shared fakes for opsdeck-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use opsdeck_api::{
    ApiRequest, Connection, ConnectionParams, Connector, Error, ProtocolKind, SessionLogin,
};
use opsdeck_core::{Target, TargetId};

pub type Responder = Arc<dyn Fn(&ApiRequest) -> Result<Value, Error> + Send + Sync>;

// ── Fake connector ──────────────────────────────────────────────────

/// Counts opens and closes; every connection answers through `responder`.
pub struct FakeConnector {
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub open_delay: Duration,
    pub fail_open: AtomicBool,
    alive_flags: Mutex<Vec<Arc<AtomicBool>>>,
    responder: Responder,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_responder(Arc::new(|_| Ok(Value::Array(Vec::new()))))
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            open_delay: Duration::ZERO,
            fail_open: AtomicBool::new(false),
            alive_flags: Mutex::new(Vec::new()),
            responder,
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Make every connection opened so far fail its probes and calls.
    pub fn kill_all(&self) {
        for flag in self.alive_flags.lock().unwrap().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::RouterOs
    }

    async fn open(&self, _params: &ConnectionParams) -> Result<Box<dyn Connection>, Error> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Authentication {
                message: "invalid user name or password".into(),
            });
        }
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        self.alive_flags.lock().unwrap().push(Arc::clone(&alive));
        Ok(Box::new(FakeConnection {
            serial: n,
            alive,
            closes: Arc::clone(&self.closes),
            responder: Arc::clone(&self.responder),
        }))
    }
}

#[derive(Clone)]
pub struct FakeConnection {
    pub serial: usize,
    alive: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    responder: Responder,
}

impl std::fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnection").field("serial", &self.serial).finish()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::RouterOs
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, Error> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        (self.responder)(&request)
    }

    async fn probe(&self) -> Result<(), Error> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fake session login ──────────────────────────────────────────────

/// Hands out `tok-1`, `tok-2`, ... and counts logins.
pub struct FakeLogin {
    pub logins: AtomicUsize,
    pub delay: Duration,
    pub reject_password: Option<String>,
}

impl FakeLogin {
    pub fn new() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            delay: Duration::ZERO,
            reject_password: None,
        }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLogin for FakeLogin {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::VCenter
    }

    async fn login(&self, params: &ConnectionParams) -> Result<String, Error> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.reject_password.as_deref() == Some(params.secret.expose_secret()) {
            return Err(Error::Authentication {
                message: "bad credentials".into(),
            });
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tok-{n}"))
    }
}

// ── Targets ─────────────────────────────────────────────────────────

pub fn target(id: u64, kind: ProtocolKind) -> Target {
    Target {
        id: TargetId(id),
        name: format!("device-{id}"),
        host: "192.0.2.1".into(),
        port: None,
        kind,
        username: "admin".into(),
        secret: SecretString::from("pw"),
        active: true,
    }
}
