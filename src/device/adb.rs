use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::DeviceSettings;
use crate::device::controller::{ActionRequest, DeviceControl};
use crate::device::frame_source::FrameSource;
use crate::error::{CaptureError, DeviceError};

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Pulls PNG screenshots from an emulator over `adb exec-out screencap`.
pub struct AdbFrameSource {
    adb_bin: String,
    device_addr: String,
    timeout: Duration,
}

impl AdbFrameSource {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            adb_bin: settings.adb_bin.clone(),
            device_addr: settings.adb_addr.clone(),
            timeout: Duration::from_millis(settings.capture_timeout_ms),
        }
    }

    fn run_screencap(&self) -> Result<Vec<u8>, CaptureError> {
        let mut child = Command::new(&self.adb_bin)
            .args(screencap_args(&self.device_addr))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::ConnectionLost(format!("adb binary `{}` not found", self.adb_bin))
                }
                _ => CaptureError::Transient(format!("failed to spawn adb: {}", e)),
            })?;

        // Drain stdout on a helper thread; screencap output is larger
        // than the pipe buffer and the child blocks until it is read.
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::Transient("adb stdout not captured".to_string()));
        };
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let status = self.wait_with_deadline(&mut child)?;
        let stdout_buf = match reader.join() {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                return Err(CaptureError::Transient(format!(
                    "failed to read screencap output: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(CaptureError::Transient(
                    "screencap reader thread panicked".to_string(),
                ))
            }
        };

        if !status.success() {
            let mut stderr_buf = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_string(&mut stderr_buf);
            }
            return Err(classify_adb_failure(stderr_buf.trim()));
        }
        if stdout_buf.is_empty() {
            return Err(CaptureError::Transient(
                "screencap produced no data".to_string(),
            ));
        }
        Ok(stdout_buf)
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<std::process::ExitStatus, CaptureError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("Screencap exceeded {:?}, killing adb", self.timeout);
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(CaptureError::Timeout);
                    }
                    std::thread::sleep(EXIT_POLL);
                }
                Err(e) => {
                    return Err(CaptureError::Transient(format!(
                        "failed to wait for adb: {}",
                        e
                    )))
                }
            }
        }
    }
}

impl FrameSource for AdbFrameSource {
    fn capture(&mut self) -> Result<DynamicImage, CaptureError> {
        let bytes = self.run_screencap()?;
        image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| CaptureError::Decode(e.to_string()))
    }
}

fn screencap_args(device_addr: &str) -> Vec<String> {
    vec![
        "-s".to_string(),
        device_addr.to_string(),
        "exec-out".to_string(),
        "screencap".to_string(),
        "-p".to_string(),
    ]
}

/// Map adb's stderr chatter onto the capture error taxonomy. Device
/// disappearance is the only thing the pipeline gives up on.
fn classify_adb_failure(stderr: &str) -> CaptureError {
    let lowered = stderr.to_lowercase();
    let disconnected = ["no devices", "device offline", "device not found", "not found"]
        .iter()
        .any(|marker| lowered.contains(marker));
    if disconnected {
        CaptureError::ConnectionLost(stderr.to_string())
    } else {
        CaptureError::Transient(format!("screencap failed: {}", stderr))
    }
}

/// Best-effort `adb connect` for network transports. Local USB serials
/// have no connect step and are skipped.
pub fn connect_device(settings: &DeviceSettings) -> Result<(), DeviceError> {
    if !settings.adb_addr.contains(':') {
        debug!("Device `{}` is not a network address, skipping connect", settings.adb_addr);
        return Ok(());
    }
    let output = Command::new(&settings.adb_bin)
        .args(["connect", &settings.adb_addr])
        .output()
        .map_err(DeviceError::Spawn)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && !stdout.to_lowercase().contains("cannot connect") {
        info!("Connected to device at {}", settings.adb_addr);
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(DeviceError::Command(format!(
            "adb connect {}: {} {}",
            settings.adb_addr,
            stdout.trim(),
            stderr.trim()
        )))
    }
}

/// Issues taps and swipes through `adb shell input`.
pub struct AdbInput {
    adb_bin: String,
    device_addr: String,
}

impl AdbInput {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            adb_bin: settings.adb_bin.clone(),
            device_addr: settings.adb_addr.clone(),
        }
    }

    async fn shell_input(&self, args: Vec<String>) -> Result<(), DeviceError> {
        let output = tokio::process::Command::new(&self.adb_bin)
            .arg("-s")
            .arg(&self.device_addr)
            .arg("shell")
            .arg("input")
            .args(&args)
            .output()
            .await
            .map_err(DeviceError::Spawn)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DeviceError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[async_trait]
impl DeviceControl for AdbInput {
    async fn perform(&self, request: ActionRequest) -> Result<(), DeviceError> {
        match request {
            ActionRequest::Tap { at } => {
                self.shell_input(vec!["tap".to_string(), at.x.to_string(), at.y.to_string()])
                    .await
            }
            ActionRequest::Swipe { from, to, duration } => {
                self.shell_input(vec![
                    "swipe".to_string(),
                    from.x.to_string(),
                    from.y.to_string(),
                    to.x.to_string(),
                    to.y.to_string(),
                    duration.as_millis().to_string(),
                ])
                .await
            }
            ActionRequest::Wait { duration } => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}
