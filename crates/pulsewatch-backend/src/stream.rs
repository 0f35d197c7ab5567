use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pulsewatch_types::{ConnectionState, LogEntry, StreamMessage};

/// Upper bound for the optional exponential backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Keep-alive payload accepted by the backend stream
const PING_PAYLOAD: &str = r#"{"type":"ping"}"#;

/// Events emitted by the stream connection
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// Connection established; the feed is live again
    Opened,
    /// A log entry arrived on the stream
    Entry(LogEntry),
    /// Connection lost; a reconnect is scheduled
    Closed,
}

/// Delay policy between reconnect attempts
///
/// The default is a fixed delay. Exponential growth is available behind a
/// configuration flag but is not the default behavior.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    base: Duration,
    exponential: bool,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Reconnect after the same delay every time
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            exponential: false,
            attempt: 0,
        }
    }

    /// Double the delay on every failed attempt, capped at one minute
    pub fn exponential(base: Duration) -> Self {
        Self {
            base,
            exponential: true,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = if self.exponential {
            self.base
                .saturating_mul(1 << self.attempt.min(6))
                .min(MAX_BACKOFF)
        } else {
            self.base
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Manages the persistent stream connection to the backend
///
/// Owns a background task driving the connect/read/reconnect cycle. The
/// connection state is readable at any time; entries and connectivity
/// changes are delivered over the event channel.
pub struct StreamManager {
    cancel: CancellationToken,
    state: Arc<RwLock<ConnectionState>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamManager {
    /// Connect to the stream endpoint and start forwarding events
    pub fn start(
        url: String,
        policy: ReconnectPolicy,
        keepalive: Duration,
        events_tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let task = tokio::spawn(run_stream(
            url,
            policy,
            keepalive,
            events_tx,
            Arc::clone(&state),
            cancel.clone(),
        ));

        Self {
            cancel,
            state,
            task: Some(task),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Stop the stream: cancel any pending reconnect and close the
    /// connection. Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        *self.state.write() = ConnectionState::Disconnected;
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_stream(
    url: String,
    mut policy: ReconnectPolicy,
    keepalive: Duration,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        set_state(&state, ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _response)) => {
                set_state(&state, ConnectionState::Connected);
                policy.reset();
                if events_tx.send(StreamEvent::Opened).is_err() {
                    return;
                }

                let (mut sink, mut stream) = ws.split();
                let mut keepalive_timer = tokio::time::interval(keepalive);
                keepalive_timer.tick().await; // first tick completes immediately

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }

                        _ = keepalive_timer.tick() => {
                            // Replies are not tracked; transport close/error
                            // is the sole failure signal
                            if sink.send(Message::Text(PING_PAYLOAD.into())).await.is_err() {
                                break;
                            }
                        }

                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => match parse_message(&text) {
                                Ok(Some(entry)) => {
                                    if events_tx.send(StreamEvent::Entry(entry)).is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {} // heartbeat acknowledgement
                                Err(e) => warn!("dropping malformed stream message: {e}"),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {} // non-text frames are not part of the feed
                            Some(Err(e)) => {
                                debug!("stream read error: {e}");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                debug!("stream connect failed: {e}");
            }
        }

        set_state(&state, ConnectionState::Reconnecting);
        if events_tx.send(StreamEvent::Closed).is_err() {
            return;
        }

        let delay = policy.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn set_state(state: &Arc<RwLock<ConnectionState>>, value: ConnectionState) {
    let mut current = state.write();
    if *current != value {
        debug!("stream connection {} -> {}", current.label(), value.label());
        *current = value;
    }
}

/// Decode one stream payload; heartbeat acknowledgements carry no entry
fn parse_message(raw: &str) -> Result<Option<LogEntry>, serde_json::Error> {
    let message: StreamMessage = serde_json::from_str(raw)?;
    Ok(message.into_entry())
}
