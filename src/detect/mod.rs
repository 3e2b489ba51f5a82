// Detection boundary: frame sampling, the detector, and the alert rule
//
// The model and the decoder are external collaborators. The pipeline only
// sees the two traits below; `sampler` and `command` provide the ffmpeg and
// external-process implementations used by the binary.

pub mod command;
pub mod sampler;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::error::Result;

/// One sampled frame: its index in the source video and the encoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub jpeg: Vec<u8>,
}

/// One raw detector output for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f64,
}

/// One qualifying detection, as persisted in the alert record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub frame: u64,
    pub class_id: u32,
    pub confidence_score: f64,
}

/// Produces a finite, non-restartable sequence of sampled frames.
pub trait FrameSampler {
    fn sample<'a>(&'a self, video: &Path) -> Result<Box<dyn Iterator<Item = Result<Frame>> + 'a>>;
}

/// Black-box object detector.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Which detections count as hits and how many make an alert.
/// Both thresholds are inclusive.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub classes: Vec<u32>,
    pub min_confidence: f64,
    pub min_hits: usize,
    pub max_frames: usize,
}

impl AlertRule {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            classes: config.classes.clone(),
            min_confidence: config.min_confidence,
            min_hits: config.min_hits,
            max_frames: config.max_frames,
        }
    }

    pub fn qualifies(&self, detection: &Detection) -> bool {
        self.classes.contains(&detection.class_id) && detection.confidence >= self.min_confidence
    }
}

/// Hits across a clip plus the frame holding the single best hit.
#[derive(Debug, Default)]
pub struct DetectionSummary {
    pub hits: Vec<Hit>,
    pub best_frame: Option<Frame>,
    pub best_score: f64,
    pub frames_seen: usize,
}

impl DetectionSummary {
    /// Enough hits, and a snapshot to show for them.
    pub fn should_alert(&self, rule: &AlertRule) -> bool {
        self.hits.len() >= rule.min_hits && self.best_frame.is_some()
    }
}

/// Run the detector over at most `rule.max_frames` sampled frames and collect
/// every qualifying hit. Any sampler or detector error aborts the clip.
pub fn detect_hits(
    sampler: &dyn FrameSampler,
    detector: &mut dyn Detector,
    video: &Path,
    rule: &AlertRule,
) -> Result<DetectionSummary> {
    let mut summary = DetectionSummary::default();

    for frame in sampler.sample(video)?.take(rule.max_frames) {
        let frame = frame?;
        summary.frames_seen += 1;

        let mut best_in_frame: Option<f64> = None;
        for detection in detector.detect(&frame)? {
            if !rule.qualifies(&detection) {
                continue;
            }
            summary.hits.push(Hit {
                frame: frame.index,
                class_id: detection.class_id,
                confidence_score: detection.confidence,
            });
            if detection.confidence > summary.best_score {
                summary.best_score = detection.confidence;
                best_in_frame = Some(detection.confidence);
            }
        }

        if best_in_frame.is_some() {
            summary.best_frame = Some(frame);
        }
    }

    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    fn rule() -> AlertRule {
        AlertRule::from_config(&DetectionConfig::default())
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let rule = rule();
        assert!(rule.qualifies(&Detection { class_id: 0, confidence: 0.35 }));
        assert!(!rule.qualifies(&Detection { class_id: 0, confidence: 0.3499 }));
        assert!(!rule.qualifies(&Detection { class_id: 6, confidence: 0.99 }));
    }

    #[test]
    fn test_collects_hits_and_best_frame() {
        let sampler = FakeSampler { count: 5, step: 10 };
        let mut detector = ScriptedDetector::default()
            .with(0, 2, 0.40)
            .with(10, 0, 0.90)
            .with(10, 16, 0.99) // dog: not in allow-list
            .with(20, 7, 0.50)
            .with(30, 2, 0.20); // below threshold

        let summary = detect_hits(&sampler, &mut detector, Path::new("clip.mp4"), &rule()).unwrap();
        assert_eq!(summary.hits.len(), 3);
        assert_eq!(summary.frames_seen, 5);
        assert!((summary.best_score - 0.90).abs() < 1e-9);
        assert_eq!(summary.best_frame.as_ref().map(|f| f.index), Some(10));
        assert!(summary.should_alert(&rule()));
    }

    #[test]
    fn test_max_frames_bounds_consumption() {
        let sampler = FakeSampler { count: 100, step: 1 };
        let mut detector = ScriptedDetector::default();
        let mut rule = rule();
        rule.max_frames = 7;

        let summary = detect_hits(&sampler, &mut detector, Path::new("clip.mp4"), &rule).unwrap();
        assert_eq!(summary.frames_seen, 7);
        assert_eq!(detector.calls, 7);
    }

    #[test]
    fn test_too_few_hits_do_not_alert() {
        let sampler = FakeSampler { count: 3, step: 1 };
        let mut detector = ScriptedDetector::default().with(1, 0, 0.8);
        let summary = detect_hits(&sampler, &mut detector, Path::new("clip.mp4"), &rule()).unwrap();
        assert_eq!(summary.hits.len(), 1);
        assert!(!summary.should_alert(&rule()));
    }

    #[test]
    fn test_detector_failure_propagates() {
        let sampler = FakeSampler { count: 3, step: 1 };
        let mut detector = ScriptedDetector { fail: true, ..Default::default() };
        assert!(detect_hits(&sampler, &mut detector, Path::new("clip.mp4"), &rule()).is_err());
    }
}
