//! Long-lived NDJSON subscription with stuck detection and reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::EndpointContext;
use crate::error::ChannelError;
use crate::state::{ChannelConfig, PlayerState};

use super::messages::ServerMessage;

/// Events posted from the subscription to the session's event queue.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A parsed server message.
    Message(ServerMessage),
    /// No message for the stuck tolerance. The session requests a server
    /// rebroadcast when a fingerprint is bound, otherwise the channel is
    /// forced to reconnect.
    Stuck {
        /// Whether a fingerprint was bound when the silence was detected.
        has_fingerprint: bool,
    },
    /// The subscription dropped; the channel reconnects on its own after
    /// a short delay, this event lets the session health-check meanwhile.
    Down(ChannelError),
}

/// Handle to the running subscription task.
pub struct EventChannel {
    cancel: CancellationToken,
    reconnect: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl EventChannel {
    /// Spawns the subscription loop.
    ///
    /// The fingerprint is re-read from the shared state on every connect,
    /// so a rebind or session reset is picked up at the next reconnect.
    pub fn spawn(
        client: reqwest::Client,
        ctx: EndpointContext,
        state: Arc<PlayerState>,
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let reconnect = Arc::new(Notify::new());
        let handle = tokio::spawn(subscription_loop(
            client,
            ctx,
            state,
            config,
            events,
            cancel.clone(),
            Arc::clone(&reconnect),
        ));
        Self {
            cancel,
            reconnect,
            handle,
        }
    }

    /// Drops the current connection and reconnects immediately.
    pub fn force_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Closes the subscription for good.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn subscription_loop(
    client: reqwest::Client,
    ctx: EndpointContext,
    state: Arc<PlayerState>,
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
    reconnect: Arc<Notify>,
) {
    let retry_delay = Duration::from_millis(config.reconnect_delay_ms.max(1));

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let fingerprint = state.fingerprint();
        let url = ctx.events_url(fingerprint.as_deref());
        log::info!(
            "[Events] Connecting subscription (fingerprint={})",
            fingerprint.as_deref().unwrap_or("none")
        );

        match connect_and_read(&client, &url, &state, &config, &events, &cancel, &reconnect).await
        {
            Ok(()) => {
                // Cancelled or forced reconnect.
                state.set_channel_online(false);
                if cancel.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(err) => {
                state.set_channel_online(false);
                log::warn!("[Events] Subscription dropped: {err}");
                let _ = events.send(ChannelEvent::Down(err));
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(retry_delay) => {}
        }
    }
    state.set_channel_online(false);
}

/// Reads one subscription until it drops, is cancelled, or is forced to
/// reconnect. Returns `Ok(())` only for the latter two.
async fn connect_and_read(
    client: &reqwest::Client,
    url: &str,
    state: &PlayerState,
    config: &ChannelConfig,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    cancel: &CancellationToken,
    reconnect: &Notify,
) -> Result<(), ChannelError> {
    let response = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        response = client.get(url).send() => response?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(ChannelError::Status(status.as_u16()));
    }

    state.set_channel_online(true);
    let mut body = response.bytes_stream();
    let mut lines = NdjsonBuffer::new();
    let stuck_after = Duration::from_secs(config.stuck_after_secs.max(1));

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = reconnect.notified() => {
                log::info!("[Events] Forced reconnect");
                return Ok(());
            }
            () = tokio::time::sleep(stuck_after) => {
                log::warn!(
                    "[Events] No message for {}s - subscription may be stuck",
                    config.stuck_after_secs
                );
                let _ = events.send(ChannelEvent::Stuck {
                    has_fingerprint: state.fingerprint().is_some(),
                });
                continue;
            }
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => return Err(ChannelError::Http(err)),
            None => return Err(ChannelError::Closed),
        };

        for line in lines.push(&bytes) {
            match serde_json::from_str::<ServerMessage>(&line) {
                Ok(message) => {
                    let _ = events.send(ChannelEvent::Message(message));
                }
                Err(err) => {
                    log::debug!("[Events] Skipping unparseable record: {err} ({line})");
                }
            }
        }
    }
}

/// Splits a byte stream into complete newline-delimited records.
#[derive(Debug, Default)]
struct NdjsonBuffer {
    buf: Vec<u8>,
}

impl NdjsonBuffer {
    fn new() -> Self {
        Self::default()
    }

    /// Absorbs a chunk and returns every complete, non-empty line.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                out.push(line.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut buf = NdjsonBuffer::new();
        let lines = buf.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn holds_partial_lines_until_complete() {
        let mut buf = NdjsonBuffer::new();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n"), vec!["{\"a\":1}"]);
    }

    #[test]
    fn skips_blank_lines() {
        let mut buf = NdjsonBuffer::new();
        let lines = buf.push(b"\n\n{\"a\":1}\n\r\n");
        assert_eq!(lines, vec!["{\"a\":1}"]);
    }

    #[test]
    fn record_split_across_many_chunks() {
        let mut buf = NdjsonBuffer::new();
        let record = r#"{"type":"heartbeat","currentTrack":{"identifier":"abc"}}"#;
        let bytes = format!("{record}\n");
        let mut lines = Vec::new();
        for chunk in bytes.as_bytes().chunks(7) {
            lines.extend(buf.push(chunk));
        }
        assert_eq!(lines, vec![record]);
    }
}
