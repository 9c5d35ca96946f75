//! Event sources feeding the dispatcher: a JSON-lines stream and the
//! periodic maintenance tick.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use gridsched_scheduler::Event;

/// Events queued on every tick, in order.
pub const TICK_EVENTS: [Event; 3] = [Event::ExpireStale, Event::Rebalance, Event::Publish];

/// Forward every well-formed line of `reader` as an [`Event`] until EOF or
/// shutdown. Blank lines and `#` comments are skipped; malformed lines are
/// logged and skipped. Returns the number of events forwarded.
pub async fn read_events<R>(
    reader: R,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut forwarded = 0usize;

    loop {
        let next = tokio::select! {
            next = lines.next_line() => next?,
            _ = shutdown.changed() => {
                debug!("event reader stopped");
                break;
            }
        };
        let Some(raw) = next else {
            info!(lines = line_no, forwarded, "event stream ended");
            break;
        };
        line_no += 1;

        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            warn!("dispatcher gone, dropping remaining events");
            break;
        }
        forwarded += 1;
    }

    Ok(forwarded)
}

/// Queue [`TICK_EVENTS`] every `interval` until shutdown.
pub async fn tick(interval: Duration, events: mpsc::Sender<Event>, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = interval.as_secs(), "maintenance tick started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                for event in TICK_EVENTS {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("maintenance tick stopped");
                break;
            }
        }
    }
}
