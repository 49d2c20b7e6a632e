use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cursor_store::CursorStore;
use crate::remote::RemoteEventSource;

use super::IncrementalPoller;

/// Runs one partner's poller on a fixed delay until cancelled.
///
/// The delay is measured from the end of one cycle to the start of the next.
/// Cancellation is observed between cycles; a running cycle always finishes.
#[derive(Debug)]
pub struct PollerWorker;

impl PollerWorker {
    pub fn spawn<C, R>(
        poller: IncrementalPoller<C, R>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        C: CursorStore + 'static,
        R: RemoteEventSource + 'static,
    {
        tokio::spawn(run(poller, interval, cancel))
    }
}

async fn run<C, R>(poller: IncrementalPoller<C, R>, interval: Duration, cancel: CancellationToken)
where
    C: CursorStore,
    R: RemoteEventSource,
{
    let partner = poller.partner().clone();
    info!(partner = %partner, interval_ms = interval.as_millis() as u64, "poller started");

    while !cancel.is_cancelled() {
        match poller.poll_once().await {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                error!(partner = %partner, error = %err, "poller stopped: partner misconfigured");
                return;
            }
            Err(err) => {
                warn!(partner = %partner, error = %err, "poll cycle failed; cursor left unchanged");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(partner = %partner, "poller stopped");
}
