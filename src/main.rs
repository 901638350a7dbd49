use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use umabot_rust::config::Settings;
use umabot_rust::coordinator::CoordinatorBuilder;
use umabot_rust::device::adb::connect_device;
use umabot_rust::error::AppError;
use umabot_rust::script::loader::load_script;

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();

    let script_path = std::env::args().nth(1).map(PathBuf::from).ok_or_else(|| {
        AppError::Usage("Usage: umabot-rust <script.json> [settings.toml]".to_string())
    })?;
    let settings = match std::env::args().nth(2) {
        Some(path) => Settings::load_from(Path::new(&path))?,
        None => Settings::load()?,
    };

    if let Err(e) = connect_device(&settings.device) {
        warn!("adb connect failed, assuming the device is already attached: {}", e);
    }

    let script = load_script(&script_path, &settings.vision)?;
    let coordinator = CoordinatorBuilder::new(settings).script(script).build()?;

    let stop = coordinator.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing the current tick");
            stop.cancel();
        }
    });

    let outcome = coordinator.run().await?;
    info!("Run finished: {:?}", outcome);
    Ok(())
}
