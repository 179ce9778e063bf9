// RouterOS API client
//
// One TCP session per client. Requests are strictly sequential on the wire,
// so the framed stream sits behind an async mutex; a reply is read to its
// `!done` before the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use super::codec::{Sentence, SentenceCodec};
use crate::connector::{ApiRequest, Connection, ConnectionParams, ProtocolKind};
use crate::error::Error;

/// Command used for liveness probes. Cheap and always permitted.
const PROBE_COMMAND: &str = "/system/identity/print";

/// A row of attribute words from a `!re` reply.
pub type Row = Map<String, Value>;

/// Authenticated RouterOS API session.
pub struct RouterOsClient {
    framed: Mutex<Framed<TcpStream, SentenceCodec>>,
    /// Set while a request is in flight and left set if it never finished,
    /// since the stream can no longer be trusted to be sentence-aligned.
    broken: AtomicBool,
    reply_timeout: Duration,
    peer: String,
}

impl std::fmt::Debug for RouterOsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterOsClient")
            .field("peer", &self.peer)
            .field("broken", &self.broken.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RouterOsClient {
    /// Connect and log in.
    pub async fn connect(params: &ConnectionParams) -> Result<Self, Error> {
        let peer = params.address();
        debug!(peer = %peer, "connecting to RouterOS API");

        let connect_timeout = params.transport.connect_timeout;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: connect_timeout.as_secs(),
            })??;
        stream.set_nodelay(true)?;

        let client = Self {
            framed: Mutex::new(Framed::new(stream, SentenceCodec)),
            broken: AtomicBool::new(false),
            reply_timeout: params.transport.timeout,
            peer,
        };

        let login = vec![
            "/login".to_owned(),
            format!("=name={}", params.username),
            format!("=password={}", params.secret.expose_secret()),
        ];
        match client.run(login).await {
            Ok(_) => {}
            Err(Error::Trap { message }) => return Err(Error::Authentication { message }),
            Err(e) => return Err(e),
        }

        debug!(peer = %client.peer, "RouterOS login succeeded");
        Ok(client)
    }

    /// Run a command given as raw words and collect its `!re` rows.
    ///
    /// If the command produced no rows but `!done` carried attributes
    /// (e.g. `=ret=` from `/add`), those are returned as a single row.
    pub async fn run(&self, words: Sentence) -> Result<Vec<Row>, Error> {
        let mut framed = self.framed.lock().await;

        if self.broken.swap(true, Ordering::AcqRel) {
            return Err(Error::ConnectionClosed);
        }

        trace!(peer = %self.peer, command = words.first().map(String::as_str), "sending");
        framed.send(words).await?;

        let mut rows = Vec::new();
        let mut trap: Option<String> = None;

        loop {
            let sentence = tokio::time::timeout(self.reply_timeout, framed.next())
                .await
                .map_err(|_| Error::Timeout {
                    timeout_secs: self.reply_timeout.as_secs(),
                })?
                .ok_or(Error::ConnectionClosed)??;

            let Some((reply, attrs)) = sentence.split_first() else {
                continue;
            };

            match reply.as_str() {
                "!re" => rows.push(parse_attributes(attrs)),
                "!trap" => {
                    let row = parse_attributes(attrs);
                    trap = Some(
                        row.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("command failed")
                            .to_owned(),
                    );
                }
                "!fatal" => {
                    let message = attrs.first().cloned().unwrap_or_default();
                    return Err(Error::Fatal { message });
                }
                "!done" => {
                    self.broken.store(false, Ordering::Release);
                    if let Some(message) = trap {
                        return Err(Error::Trap { message });
                    }
                    if rows.is_empty() && !attrs.is_empty() {
                        rows.push(parse_attributes(attrs));
                    }
                    return Ok(rows);
                }
                other => {
                    return Err(Error::Protocol(format!("unexpected reply word {other:?}")));
                }
            }
        }
    }

    /// Whether a previous failure left this session unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

/// Translate an [`ApiRequest`] into command words.
///
/// Keys starting with `?` become query words; everything else becomes an
/// `=key=value` attribute word.
pub fn request_words(request: &ApiRequest) -> Sentence {
    let mut words = Vec::with_capacity(request.params.len() + 1);
    words.push(request.path.clone());
    for (key, value) in &request.params {
        if key.starts_with('?') {
            words.push(format!("{key}={value}"));
        } else {
            words.push(format!("={key}={value}"));
        }
    }
    words
}

/// Parse `=key=value` words into a row. Other words are ignored.
fn parse_attributes(words: &[String]) -> Row {
    words
        .iter()
        .filter_map(|word| {
            let (key, value) = word.strip_prefix('=')?.split_once('=')?;
            Some((key.to_owned(), Value::String(value.to_owned())))
        })
        .collect()
}

#[async_trait]
impl Connection for RouterOsClient {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::RouterOs
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, Error> {
        let rows = self.run(request_words(&request)).await?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    async fn probe(&self) -> Result<(), Error> {
        self.run(vec![PROBE_COMMAND.to_owned()]).await.map(|_| ())
    }

    async fn close(&self) {
        let mut framed = self.framed.lock().await;
        let was_broken = self.broken.swap(true, Ordering::AcqRel);
        if !was_broken {
            if let Err(e) = framed.send(vec!["/quit".to_owned()]).await {
                debug!(peer = %self.peer, error = %e, "failed to send /quit");
            }
        }
        if let Err(e) = framed.close().await {
            debug!(peer = %self.peer, error = %e, "error closing RouterOS socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn attribute_values_may_contain_equals() {
        let row = parse_attributes(&[
            "=name=ether1".to_owned(),
            "=comment=a=b".to_owned(),
            ".tag=7".to_owned(),
        ]);
        assert_eq!(row.get("name"), Some(&Value::String("ether1".into())));
        assert_eq!(row.get("comment"), Some(&Value::String("a=b".into())));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn request_words_split_queries_from_attributes() {
        let req = ApiRequest::get("/interface/print")
            .param(".proplist", "name,rx-byte,tx-byte")
            .param("?disabled", "false");
        assert_eq!(
            request_words(&req),
            vec![
                "/interface/print".to_owned(),
                "=.proplist=name,rx-byte,tx-byte".to_owned(),
                "?disabled=false".to_owned(),
            ]
        );
    }
}
