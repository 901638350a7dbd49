use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::device::controller::ActionRequest;
use crate::engine::automation::RunOutcome;

/// Milestones a run emits for the persistence collaborator.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StateEntered {
        run_id: Uuid,
        state: String,
        tick: u64,
        at: DateTime<Utc>,
    },
    ActionIssued {
        run_id: Uuid,
        state: String,
        action: ActionRequest,
        tick: u64,
        at: DateTime<Utc>,
    },
    RunTerminated {
        run_id: Uuid,
        outcome: RunOutcome,
        ticks: u64,
        at: DateTime<Utc>,
    },
}

/// Persistence collaborator contract. Implementations must not block
/// the engine; anything slow belongs on the sink's own task.
pub trait EventSink: Send + Sync {
    fn record(&self, event: RunEvent);
}

/// Default sink: run milestones go to the log and nowhere else.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: RunEvent) {
        match event {
            RunEvent::StateEntered { run_id, state, tick, .. } => {
                info!("Run {} entered state `{}` at tick {}", run_id, state, tick);
            }
            RunEvent::ActionIssued { run_id, state, action, tick, .. } => {
                info!("Run {} issued `{}` from state `{}` at tick {}", run_id, action, state, tick);
            }
            RunEvent::RunTerminated { run_id, outcome, ticks, .. } => {
                info!("Run {} terminated after {} ticks: {:?}", run_id, ticks, outcome);
            }
        }
    }
}
