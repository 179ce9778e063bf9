//! `opsdeck agent`: a discovery producer fed from stdin.
//!
//! Each stdin line holding a JSON value is sent upstream as one event;
//! each command pushed by the server is printed to stdout as one line.
//! Scanning itself is left to whatever process feeds stdin.

use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use opsdeck_api::agent_link::{ProducerLink, ReconnectConfig};

use crate::error::CliError;

pub async fn run(server: Url, key: SecretString) -> Result<(), CliError> {
    let link = ProducerLink::spawn(
        server.clone(),
        key,
        ReconnectConfig::default(),
        CancellationToken::new(),
    );
    let mut commands = link.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;
    info!(%server, "agent started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),

            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str(&line) {
                    Ok(event) => {
                        if link.send(event).await.is_err() {
                            break Err(CliError::LinkClosed);
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping line that is not JSON"),
                },
                None => {
                    // Keep relaying commands until interrupted.
                    debug!("stdin closed");
                    stdin_open = false;
                }
            },

            command = commands.recv() => match command {
                Ok(command) => {
                    stdout.write_all(format!("{command}\n").as_bytes()).await?;
                    stdout.flush().await?;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped server commands"),
                Err(RecvError::Closed) => break Err(CliError::LinkClosed),
            },
        }
    };

    link.shutdown();
    result
}
