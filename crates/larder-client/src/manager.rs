use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use larder_protocol::ChangeEvent;
use larder_protocol::frame::{DecodedFrame, FrameDecoder};

use crate::backoff::{Backoff, Policy};
use crate::bus::EventBus;
use crate::credentials::CredentialProvider;

/// Where parsed events go, and whether anyone still wants them.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ChangeEvent);
    /// Gates new connection attempts: with nothing to deliver to, there is
    /// no reason to hold a socket open.
    fn has_interest(&self) -> bool;
}

impl EventSink for EventBus {
    fn deliver(&self, event: ChangeEvent) {
        self.publish(event);
    }

    fn has_interest(&self) -> bool {
        self.interested() > 0
    }
}

/// Lifecycle of one event stream. No terminal state while the owning
/// context is alive; teardown is the only exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    BackoffWait,
}

impl ConnectionState {
    /// The status indicator shows exactly two states; this is the split.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("handshake rejected with status {0}")]
    Handshake(u16),

    #[error("stream error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Full URL of the event stream endpoint.
    pub endpoint: String,
    pub policy: Policy,
    /// How often preconditions (credential, interest) are rechecked while
    /// idle.
    pub idle_poll: Duration,
}

impl ManagerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy: Policy::foreground(),
            idle_poll: Duration::from_secs(1),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }
}

/// Opens the event stream, parses frames, republishes events to the sink,
/// and reconnects with backoff. One instance per delivery path.
pub struct ConnectionManager {
    config: ManagerConfig,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn EventSink>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    http: reqwest::Client,
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (state_tx, _rx) = watch::channel(ConnectionState::Idle);
        Arc::new(Self {
            config,
            credentials,
            sink,
            state_tx,
            cancel: CancellationToken::new(),
            http: reqwest::Client::new(),
        })
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the active stream and any pending reconnect timer. No state
    /// transitions occur afterwards.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run().await })
    }

    async fn run(&self) {
        let mut backoff = Backoff::new(self.config.policy);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Preconditions, not errors: wait for a credential and at least
            // one interested context.
            if self.credentials.current().is_none() || !self.sink.has_interest() {
                self.set_state(ConnectionState::Idle);
                if self.wait(self.config.idle_poll).await {
                    break;
                }
                continue;
            }

            self.set_state(ConnectionState::Connecting);
            let result = self.stream_once(&mut backoff).await;
            if self.cancel.is_cancelled() {
                break;
            }
            match result {
                Ok(()) => debug!("event stream ended, reconnecting"),
                Err(e) => debug!(error = %e, "event stream failed"),
            }

            self.set_state(ConnectionState::BackoffWait);
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            if self.wait(delay).await {
                break;
            }
        }
    }

    /// One connect-read cycle. Every exit — handshake rejection included —
    /// funnels into the same backoff path; credential refresh is the
    /// provider's job.
    async fn stream_once(&self, backoff: &mut Backoff) -> Result<(), ClientError> {
        let Some(token) = self.credentials.current() else {
            return Ok(());
        };

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            response = self
                .http
                .get(&self.config.endpoint)
                .bearer_auth(token)
                .send() => response?,
        };

        if !response.status().is_success() {
            return Err(ClientError::Handshake(response.status().as_u16()));
        }

        self.set_state(ConnectionState::Connected);
        backoff.reset();

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.push(&bytes) {
                        match frame {
                            DecodedFrame::Event(event) => self.sink.deliver(event),
                            DecodedFrame::Comment => {}
                            DecodedFrame::Invalid(e) => {
                                warn!(error = %e, "skipping malformed event record");
                            }
                        }
                    }
                }
                Some(Err(e)) => return Err(ClientError::Http(e)),
                // Server closed the stream.
                None => return Ok(()),
            }
        }
    }

    /// Sleep that aborts on teardown. Returns true when cancelled.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
        }
    }
}
