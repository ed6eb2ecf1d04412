//! Dual-path delivery.
//!
//! Two connection managers may run at once: a background worker path that
//! survives page navigation, and a foreground path running in the page
//! itself. They share no memory — the browser contexts they model are
//! genuinely isolated — so everything they coordinate on travels as a
//! [`WorkerMessage`]. Both paths may deliver simultaneously; downstream
//! consumers dedupe by event content.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use larder_protocol::{ChangeEvent, WorkerMessage};

use crate::backoff::Policy;
use crate::bus::EventBus;
use crate::manager::{ConnectionManager, ConnectionState, EventSink, ManagerConfig};
use crate::credentials::StaticCredential;

/// Which path the UI currently treats as its deliverer. Background is
/// preferred whenever its worker is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Foreground,
    Background,
}

/// One-shot notifications surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryNotice {
    /// The background deliverer (re)activated or has a pending update; the
    /// UI should offer a reload to adopt it cleanly.
    UpdateAvailable { version: Option<String> },
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Full URL of the event stream endpoint, used by both paths.
    pub endpoint: String,
    /// Version tag the background worker announces on activation.
    pub worker_version: Option<String>,
}

/// Sink for the background path: parsed events are forwarded to the page
/// as messages rather than published directly.
struct WorkerSink {
    outbox: mpsc::Sender<WorkerMessage>,
}

impl EventSink for WorkerSink {
    fn deliver(&self, event: ChangeEvent) {
        // Best-effort: a full channel drops the notification, and the page
        // re-fetches state next time it looks anyway.
        let _ = self.outbox.try_send(WorkerMessage::Sse { event });
    }

    fn has_interest(&self) -> bool {
        !self.outbox.is_closed()
    }
}

/// Credential as it appears on the wire: the empty string means signed out.
fn token_from_wire(token: String) -> Option<String> {
    if token.is_empty() { None } else { Some(token) }
}

/// The background worker path. Owns its own credential store, fed only by
/// `setToken` messages.
struct BackgroundWorker {
    credential: Arc<StaticCredential>,
    manager: Arc<ConnectionManager>,
    inbox: mpsc::Receiver<WorkerMessage>,
    outbox: mpsc::Sender<WorkerMessage>,
    version: Option<String>,
}

impl BackgroundWorker {
    async fn run(mut self, cancel: CancellationToken) {
        let _ = self
            .outbox
            .send(WorkerMessage::SwActivated {
                version: self.version.clone(),
            })
            .await;
        let manager_task = self.manager.spawn();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = self.inbox.recv() => {
                    let Some(msg) = maybe else { break };
                    self.handle(msg).await;
                }
            }
        }

        self.manager.teardown();
        let _ = manager_task.await;
    }

    async fn handle(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::SetToken { token } => {
                self.credential.set(token_from_wire(token));
            }
            WorkerMessage::RefreshSse => {
                // The manager reconnects on its own; the next idle poll
                // picks up whatever precondition just changed.
                debug!("background stream refresh requested");
            }
            WorkerMessage::SkipWaiting => {
                let _ = self
                    .outbox
                    .send(WorkerMessage::SwActivated {
                        version: self.version.clone(),
                    })
                    .await;
            }
            other => debug!(?other, "unexpected message on worker inbox"),
        }
    }
}

struct CoordState {
    active_tx: watch::Sender<DeliveryPath>,
    /// Version last announced to the UI, so repeated activations of the
    /// same worker don't re-prompt.
    announced: Option<Option<String>>,
}

fn handle_worker_message(
    state: &mut CoordState,
    bus: &EventBus,
    notices: &mpsc::Sender<DeliveryNotice>,
    msg: WorkerMessage,
) {
    match msg {
        WorkerMessage::Sse { event } => {
            bus.publish(event);
        }
        WorkerMessage::SwActivated { version } => {
            let newly_active = *state.active_tx.borrow() != DeliveryPath::Background;
            let new_version = state.announced.as_ref() != Some(&version);
            state.active_tx.send_replace(DeliveryPath::Background);
            if newly_active || new_version {
                state.announced = Some(version.clone());
                let _ = notices.try_send(DeliveryNotice::UpdateAvailable { version });
            }
        }
        WorkerMessage::UpdateAvailable { version } => {
            let _ = notices.try_send(DeliveryNotice::UpdateAvailable { version });
        }
        other => debug!(?other, "unexpected message from worker"),
    }
}

/// Runs both delivery paths and the message pump between them.
pub struct DeliveryCoordinator {
    foreground: Arc<ConnectionManager>,
    foreground_credential: Arc<StaticCredential>,
    to_worker: mpsc::Sender<WorkerMessage>,
    active_rx: watch::Receiver<DeliveryPath>,
    cancel: CancellationToken,
}

impl DeliveryCoordinator {
    /// Spawn the foreground manager, the background worker, and the
    /// coordinator pump. The returned receiver carries the one-shot UI
    /// notices.
    pub fn start(
        config: CoordinatorConfig,
        bus: EventBus,
    ) -> (Self, mpsc::Receiver<DeliveryNotice>) {
        let cancel = CancellationToken::new();

        let foreground_credential = Arc::new(StaticCredential::new(None));
        let foreground = ConnectionManager::new(
            ManagerConfig::new(config.endpoint.clone()),
            Arc::clone(&foreground_credential) as Arc<dyn crate::credentials::CredentialProvider>,
            Arc::new(bus.clone()),
        );
        foreground.spawn();

        let (to_worker, worker_inbox) = mpsc::channel::<WorkerMessage>(16);
        let (from_worker_tx, mut from_worker_rx) = mpsc::channel::<WorkerMessage>(64);

        let worker_credential = Arc::new(StaticCredential::new(None));
        let worker_manager = ConnectionManager::new(
            ManagerConfig::new(config.endpoint).with_policy(Policy::background()),
            Arc::clone(&worker_credential) as Arc<dyn crate::credentials::CredentialProvider>,
            Arc::new(WorkerSink {
                outbox: from_worker_tx.clone(),
            }),
        );
        let worker = BackgroundWorker {
            credential: worker_credential,
            manager: worker_manager,
            inbox: worker_inbox,
            outbox: from_worker_tx,
            version: config.worker_version,
        };
        let worker_cancel = cancel.child_token();
        tokio::spawn(async move { worker.run(worker_cancel).await });

        let (active_tx, active_rx) = watch::channel(DeliveryPath::Foreground);
        let (notice_tx, notice_rx) = mpsc::channel::<DeliveryNotice>(8);
        let pump_bus = bus;
        let pump_cancel = cancel.child_token();
        tokio::spawn(async move {
            let mut state = CoordState {
                active_tx,
                announced: None,
            };
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    maybe = from_worker_rx.recv() => {
                        let Some(msg) = maybe else { break };
                        handle_worker_message(&mut state, &pump_bus, &notice_tx, msg);
                    }
                }
            }
        });

        let coordinator = Self {
            foreground,
            foreground_credential,
            to_worker,
            active_rx,
            cancel,
        };
        (coordinator, notice_rx)
    }

    /// Login/logout. The foreground path reads its store directly; the
    /// background path shares no memory and gets an explicit message.
    pub fn set_credential(&self, token: Option<String>) {
        self.foreground_credential.set(token.clone());
        let _ = self.to_worker.try_send(WorkerMessage::SetToken {
            token: token.unwrap_or_default(),
        });
    }

    /// Ask the background path to (re)establish its stream.
    pub fn refresh_background(&self) {
        let _ = self.to_worker.try_send(WorkerMessage::RefreshSse);
    }

    /// Request immediate activation of a pending worker update.
    pub fn skip_waiting(&self) {
        let _ = self.to_worker.try_send(WorkerMessage::SkipWaiting);
    }

    pub fn active_path(&self) -> watch::Receiver<DeliveryPath> {
        self.active_rx.clone()
    }

    pub fn foreground_state(&self) -> watch::Receiver<ConnectionState> {
        self.foreground.state()
    }

    /// Tear down both paths and the pump. Pending reconnect timers stop;
    /// nothing fires afterwards.
    pub fn teardown(&self) {
        self.foreground.teardown();
        self.cancel.cancel();
    }
}

impl Drop for DeliveryCoordinator {
    fn drop(&mut self) {
        self.teardown();
    }
}
