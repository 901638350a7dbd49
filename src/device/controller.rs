use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::geometry::Point;
use crate::error::DeviceError;

/// An input intent the engine hands to the device-control collaborator.
///
/// This is the entire vocabulary; anything richer belongs in the
/// collaborator behind [`DeviceControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    Tap {
        at: Point,
    },
    Swipe {
        from: Point,
        to: Point,
        duration: Duration,
    },
    Wait {
        duration: Duration,
    },
}

impl std::fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionRequest::Tap { at } => write!(f, "tap {}", at),
            ActionRequest::Swipe { from, to, duration } => {
                write!(f, "swipe {} -> {} over {:?}", from, to, duration)
            }
            ActionRequest::Wait { duration } => write!(f, "wait {:?}", duration),
        }
    }
}

/// Device-control collaborator contract. Failures are reported back to
/// the dispatch task and logged, never raised into the engine loop.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn perform(&self, request: ActionRequest) -> Result<(), DeviceError>;
}

/// Cheap handle the engine uses to queue actions for the device task.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    tx: mpsc::Sender<ActionRequest>,
}

impl ActionDispatcher {
    pub(crate) fn new(tx: mpsc::Sender<ActionRequest>) -> Self {
        Self { tx }
    }

    /// Queue one action without blocking. A full queue drops the action;
    /// replaying stale inputs against a screen that has moved on does
    /// more harm than skipping them.
    pub fn dispatch(&self, request: ActionRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!("Dropping action `{}`: device queue full", request);
                false
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                warn!("Dropping action `{}`: device task stopped", request);
                false
            }
        }
    }
}

/// Start the task that feeds queued actions to the device one at a
/// time.
///
/// Cancellation is observed between actions only, so an input that has
/// begun always runs to completion before the task exits.
pub fn spawn_dispatch_task(
    control: Arc<dyn DeviceControl>,
    capacity: usize,
    cancel: CancellationToken,
) -> (ActionDispatcher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ActionRequest>(capacity.max(1));
    let handle = tokio::spawn(async move {
        info!("Device dispatch task started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = rx.recv() => {
                    let Some(request) = received else { break };
                    debug!("Performing device action: {}", request);
                    if let Err(e) = control.perform(request).await {
                        warn!("Device action failed: {}", e);
                    }
                }
            }
        }
        info!("Device dispatch task stopped");
    });
    (ActionDispatcher::new(tx), handle)
}
