use std::fs::{self, File};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::types::BrowserArg;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid webdriver url `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("webdriver endpoint {0} is unreachable and autostart is disabled")]
    Unreachable(String),
    #[error("webdriver endpoint {0} is unreachable; autostart only supports localhost endpoints")]
    RemoteUnreachable(String),
    #[error("failed to start webdriver: {0}")]
    Start(String),
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub endpoint: String,
    pub browser: BrowserArg,
    pub binary: Option<String>,
    pub autostart: bool,
    pub start_timeout: Duration,
}

/// A driver process we spawned. Killed when dropped.
#[derive(Debug)]
pub struct DriverProcess {
    child: Child,
    binary: String,
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn webdriver_reachable(endpoint: &str) -> bool {
    let parsed = match Url::parse(endpoint) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

pub fn default_driver_binary(browser: BrowserArg) -> &'static str {
    match browser {
        BrowserArg::Chrome => "chromedriver",
        BrowserArg::Firefox => "geckodriver",
        BrowserArg::Edge => "msedgedriver",
    }
}

fn driver_binary_available(bin: &str) -> bool {
    let p = Path::new(bin);
    if p.components().count() > 1 || p.is_absolute() {
        return p.exists();
    }
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn configure_driver_command(cmd: &mut Command, bin: &str, port: u16) {
    if bin.to_ascii_lowercase().contains("geckodriver") {
        cmd.arg("--port").arg(port.to_string());
        return;
    }
    cmd.arg(format!("--port={port}"));
    cmd.arg("--log-level=SEVERE");
}

fn driver_log_path(port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("damscan-webdriver-{port}.log"))
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let mut tail = text.lines().rev().take(lines.max(1)).collect::<Vec<_>>();
    tail.reverse();
    let tail = tail.join(" | ");
    if tail.is_empty() { None } else { Some(tail) }
}

/// Make sure a WebDriver endpoint accepts connections, spawning a local
/// driver when it does not and autostart is allowed.
///
/// Returns the spawned process, if any; keep it alive for the whole run.
pub async fn ensure_webdriver(opts: &DriverOptions) -> Result<Option<DriverProcess>, DriverError> {
    let parsed = Url::parse(&opts.endpoint).map_err(|e| DriverError::InvalidEndpoint {
        url: opts.endpoint.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DriverError::InvalidEndpoint {
            url: opts.endpoint.clone(),
            reason: "expected http or https".to_string(),
        });
    }
    if webdriver_reachable(&opts.endpoint) {
        info!(endpoint = %opts.endpoint, "webdriver endpoint reachable");
        return Ok(None);
    }
    if !opts.autostart {
        return Err(DriverError::Unreachable(opts.endpoint.clone()));
    }
    let host = parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .unwrap_or_default();
    if !is_local_host(&host) {
        return Err(DriverError::RemoteUnreachable(opts.endpoint.clone()));
    }
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let binary = opts
        .binary
        .clone()
        .unwrap_or_else(|| default_driver_binary(opts.browser).to_string());
    if !driver_binary_available(&binary) {
        return Err(DriverError::Start(format!("{binary} not found or not runnable")));
    }

    let log_path = driver_log_path(port);
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .map_err(|e| {
            DriverError::Start(format!(
                "failed to open webdriver log {}: {e}",
                log_path.display()
            ))
        })?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|e| DriverError::Start(format!("failed to clone webdriver log handle: {e}")))?;

    let mut cmd = Command::new(&binary);
    configure_driver_command(&mut cmd, &binary, port);
    cmd.stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .stdin(Stdio::null());

    info!(binary = %binary, port, "starting webdriver");
    let child = cmd
        .spawn()
        .map_err(|e| DriverError::Start(format!("failed to spawn {binary}: {e}")))?;
    let mut process = DriverProcess { child, binary };

    let steps = (opts.start_timeout.as_millis() / 200).max(1);
    for _ in 0..steps {
        if webdriver_reachable(&opts.endpoint) {
            info!(binary = %process.binary, endpoint = %opts.endpoint, "webdriver ready");
            return Ok(Some(process));
        }
        if let Ok(Some(status)) = process.child.try_wait() {
            let mut msg = format!(
                "{} exited early with status {status} (log: {})",
                process.binary,
                log_path.display()
            );
            if let Some(tail) = read_log_tail(&log_path, 30) {
                msg = format!("{msg}; tail: {tail}");
            }
            return Err(DriverError::Start(msg));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let mut msg = format!(
        "{} did not become ready in time (log: {})",
        process.binary,
        log_path.display()
    );
    if let Some(tail) = read_log_tail(&log_path, 30) {
        msg = format!("{msg}; tail: {tail}");
    }
    warn!("{msg}");
    Err(DriverError::Start(msg))
}
