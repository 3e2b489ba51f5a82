// External detector process
//
// The model runs in a long-lived child process (typically a Python/YOLO
// script). Protocol, one exchange per frame:
//   -> "<byte_len>\n" followed by the JPEG bytes on stdin
//   <- one JSON line on stdout: [{"class_id": 0, "confidence": 0.91}, ...]
// After any failed exchange the child is killed
// and a fresh one is spawned for the next frame.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use log::{debug, warn};

use super::{Detection, Detector, Frame};
use crate::config::DetectionConfig;
use crate::error::{Result, SentryError};

pub struct CommandDetector {
    program: Vec<String>,
    timeout: Duration,
    process: Option<DetectorProcess>,
}

struct DetectorProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
}

impl CommandDetector {
    pub fn new(program: Vec<String>, timeout: Duration) -> Result<Self> {
        if program.first().map(|p| p.trim().is_empty()).unwrap_or(true) {
            return Err(SentryError::Config("detection.detector_command is empty".to_string()));
        }
        Ok(Self { program, timeout, process: None })
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        Self::new(
            config.detector_command.clone(),
            Duration::from_secs(config.detector_timeout_secs),
        )
    }

    fn spawn(&self) -> Result<DetectorProcess> {
        let mut child = Command::new(&self.program[0])
            .args(&self.program[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SentryError::Detector(format!("Failed to start {}: {}", self.program[0], e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SentryError::Detector("detector stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SentryError::Detector("detector stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("detector-reader".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        debug!("started detector: {}", self.program.join(" "));
        Ok(DetectorProcess { child, stdin, lines: rx })
    }

    fn exchange(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.process.is_none() {
            self.process = Some(self.spawn()?);
        }
        let timeout = self.timeout;
        let process = match self.process.as_mut() {
            Some(p) => p,
            None => return Err(SentryError::Detector("detector not running".to_string())),
        };

        let header = format!("{}\n", frame.jpeg.len());
        process
            .stdin
            .write_all(header.as_bytes())
            .and_then(|_| process.stdin.write_all(&frame.jpeg))
            .and_then(|_| process.stdin.flush())
            .map_err(|e| SentryError::Detector(format!("write to detector failed: {}", e)))?;

        let line = match process.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => return Err(SentryError::Detector(format!("read from detector failed: {}", e))),
            Err(RecvTimeoutError::Timeout) => {
                return Err(SentryError::Timeout {
                    tool: "detector".to_string(),
                    secs: timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SentryError::Detector("detector exited".to_string()))
            }
        };

        parse_detections(&line)
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

impl Detector for CommandDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let result = self.exchange(frame);
        if let Err(e) = &result {
            // The stream may be out of step; start clean next frame.
            warn!("detector reset after error: {}", e);
            self.stop();
        }
        result
    }
}

impl Drop for CommandDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse one response line. Confidences outside [0, 1] are rejected.
pub fn parse_detections(line: &str) -> Result<Vec<Detection>> {
    let detections: Vec<Detection> = serde_json::from_str(line.trim())
        .map_err(|e| SentryError::Detector(format!("bad detector output {:?}: {}", line, e)))?;
    if let Some(bad) = detections.iter().find(|d| !(0.0..=1.0).contains(&d.confidence)) {
        return Err(SentryError::Detector(format!(
            "confidence {} out of range for class {}",
            bad.confidence, bad.class_id
        )));
    }
    Ok(detections)
}
