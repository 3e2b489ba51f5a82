// External tool resolver and bounded process execution
//
// Resolution order:
// 1) Environment variable override (SENTRY_FFMPEG_PATH, SENTRY_FFPROBE_PATH)
// 2) Sidecar next to the executable (or in bin/ beside it)
// 3) PATH fallback

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::constants::{ENV_FFMPEG_PATH, ENV_FFPROBE_PATH};
use crate::error::{Result, SentryError};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }
        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(ENV_FFMPEG_PATH, "ffmpeg")
}

pub fn ffprobe_path() -> PathBuf {
    resolve_tool(ENV_FFPROBE_PATH, "ffprobe")
}

/// Check if a tool is available at the resolved path
pub fn is_tool_available(tool: &str) -> bool {
    let path = match tool {
        "ffmpeg" => ffmpeg_path(),
        "ffprobe" => ffprobe_path(),
        _ => return false,
    };

    if path.exists() {
        return true;
    }

    Command::new(&path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Captured result of a bounded process run.
#[derive(Debug)]
pub struct BoundedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// stdout and stderr are drained on helper threads so a chatty child can
/// never block on a full pipe while we poll for exit.
pub fn run_with_timeout(cmd: &mut Command, tool: &str, timeout: Duration) -> Result<BoundedOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SentryError::Other(format!("Failed to run {}: {}", tool, e)))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, tool, timeout)?;

    let stdout = stdout.join().unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default()).to_string();

    Ok(BoundedOutput { status, stdout, stderr })
}

/// Poll `child` until it exits or `timeout` passes; on timeout the child is
/// killed and reaped.
pub fn wait_with_deadline(child: &mut Child, tool: &str, timeout: Duration) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SentryError::Timeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(WAIT_POLL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}
