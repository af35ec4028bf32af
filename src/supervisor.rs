//! Reconnect supervision.
//!
//! [`supervise`] keeps one device session alive across failures: it builds a
//! fresh client for every attempt, publishes the current session over a watch
//! channel and retries after a fixed cooldown. Consumers hold the receiver
//! and always see either the live session or `None` while reconnecting.

use crate::{client::DvrClient, error::DvrError, error::Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run sessions produced by `factory` until cancellation or a clean session
/// exit.
///
/// The first attempt starts immediately; every attempt after a failure waits
/// out `cooldown` first. A session that ends without an error stops the
/// supervisor for good.
pub fn supervise<F>(
    mut factory: F,
    cooldown: Duration,
    cancel: CancellationToken,
) -> watch::Receiver<Option<Arc<DvrClient>>>
where
    F: FnMut() -> Result<Arc<DvrClient>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);

    tokio::spawn(async move {
        let mut after_failure = false;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if after_failure {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(cooldown) => {}
                }
            }
            after_failure = true;

            let client = match factory() {
                Ok(client) => client,
                Err(err) => {
                    warn!(error = %err, "client factory failed");
                    continue;
                }
            };
            let host = client.options().host.clone();
            let mut run = tokio::spawn(Arc::clone(&client).run());

            let ready = tokio::select! {
                _ = cancel.cancelled() => Err(DvrError::Cancelled),
                ready = client.when_connected() => ready,
            };
            match ready {
                Ok(()) => {
                    info!(host = %host, "session ready");
                    let _ = tx.send(Some(Arc::clone(&client)));
                }
                Err(DvrError::Cancelled) => {}
                Err(err) => warn!(host = %host, error = %err, "session failed to come up"),
            }

            let mut cancelled_here = false;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled_here = true;
                    Err(DvrError::Cancelled)
                }
                joined = &mut run => joined.unwrap_or(Err(DvrError::ConnectionClosed)),
            };
            if cancelled_here {
                client.shutdown();
                let _ = run.await;
            }
            let _ = tx.send(None);

            match outcome {
                Ok(()) => {
                    info!(host = %host, "session ended cleanly; supervision stops");
                    break;
                }
                Err(DvrError::Cancelled) if cancelled_here => break,
                Err(err) => warn!(host = %host, error = %err, "session ended; will reconnect"),
            }
        }
        let _ = tx.send(None);
    });

    rx
}
