pub mod automation;
pub mod backoff;
pub mod events;
pub mod session;

pub use automation::{AutomationEngine, RunOutcome};
pub use backoff::Backoff;
pub use events::{EventSink, RunEvent, TracingSink};
pub use session::RunSession;
