pub mod capture;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod engine;
pub mod error;
pub mod script;
pub mod vision;

pub use config::Settings;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use engine::automation::RunOutcome;
pub use error::AppError;
pub use script::loader::load_script;
