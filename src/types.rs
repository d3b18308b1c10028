use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

pub const NUM_LANDMARKS: usize = 5;
pub const EYE_CONTOUR_POINTS: usize = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The five-point landmark set in detector order: left eye, right eye, nose,
/// left mouth corner, right mouth corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
}

/// Six contour points per eye (outer corner, two upper lid points, inner
/// corner, two lower lid points), when the landmark model provides them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EyeContour {
    pub left: Vec<Point>,
    pub right: Vec<Point>,
}

/// One candidate face as delivered by the recognition pipeline for a frame.
///
/// Records are either pre-scored (`similarity` set against the active target)
/// or raw (`embedding` set, scored by the controller).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub center: Point,
    #[serde(default)]
    pub landmarks: Vec<Point>,
    #[serde(default)]
    pub eye_contour: Option<EyeContour>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub similarity: Option<f32>,
    pub timestamp: f64,
}

impl DetectionRecord {
    pub fn scored(center: Point, landmarks: Vec<Point>, similarity: f32, timestamp: f64) -> Self {
        Self {
            center,
            landmarks,
            eye_contour: None,
            embedding: Vec::new(),
            similarity: Some(similarity),
            timestamp,
        }
    }

    /// Checks the record and extracts its landmark set.
    pub fn validate(&self) -> Result<FaceLandmarks, DetectionError> {
        if !self.center.is_finite() || !self.timestamp.is_finite() {
            return Err(DetectionError::NonFinite);
        }
        if self.landmarks.len() != NUM_LANDMARKS {
            return Err(DetectionError::LandmarkCount {
                expected: NUM_LANDMARKS,
                got: self.landmarks.len(),
            });
        }
        if self.landmarks.iter().any(|p| !p.is_finite()) {
            return Err(DetectionError::NonFinite);
        }
        if let Some(contour) = &self.eye_contour {
            for eye in [&contour.left, &contour.right] {
                if eye.len() != EYE_CONTOUR_POINTS {
                    return Err(DetectionError::EyeContourCount {
                        expected: EYE_CONTOUR_POINTS,
                        got: eye.len(),
                    });
                }
                if eye.iter().any(|p| !p.is_finite()) {
                    return Err(DetectionError::NonFinite);
                }
            }
        }
        if self.similarity.is_none() && self.embedding.is_empty() {
            return Err(DetectionError::Unscored);
        }

        Ok(FaceLandmarks {
            left_eye: self.landmarks[0],
            right_eye: self.landmarks[1],
            nose: self.landmarks[2],
            mouth_left: self.landmarks[3],
            mouth_right: self.landmarks[4],
        })
    }
}

/// All candidates seen in one camera frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameBatch {
    pub timestamp: f64,
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Movement,
    Blink,
    Smile,
}

impl ActionKind {
    /// Fixed reporting order.
    pub const ALL: [ActionKind; 3] = [ActionKind::Movement, ActionKind::Blink, ActionKind::Smile];

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Movement => "movement",
            ActionKind::Blink => "blink",
            ActionKind::Smile => "smile",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionEvent {
    pub kind: ActionKind,
    pub timestamp: f64,
    pub description: String,
    pub magnitude: f32,
    pub sequence: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub movement: u64,
    pub blink: u64,
    pub smile: u64,
}

impl ActionCounts {
    pub fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Movement => self.movement += 1,
            ActionKind::Blink => self.blink += 1,
            ActionKind::Smile => self.smile += 1,
        }
    }

    pub fn get(&self, kind: ActionKind) -> u64 {
        match kind {
            ActionKind::Movement => self.movement,
            ActionKind::Blink => self.blink,
            ActionKind::Smile => self.smile,
        }
    }

    pub fn total(&self) -> u64 {
        self.movement + self.blink + self.smile
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked,
}

impl LockState {
    pub fn label(&self) -> &'static str {
        match self {
            LockState::Unlocked => "SEARCHING",
            LockState::Locked => "LOCKED",
        }
    }
}

/// Point-in-time view of the controller for status queries.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LockStatus {
    pub state: LockState,
    pub target: String,
    pub identity: Option<String>,
    pub lock_duration: f64,
    pub counts: ActionCounts,
    pub pending_writes: usize,
    pub warning: Option<String>,
    pub history_file: Option<String>,
}

impl LockStatus {
    pub fn display_text(&self) -> String {
        match &self.identity {
            Some(identity) => format!(
                "{} {} ({:.1}s, {} actions)",
                self.state.label(),
                identity,
                self.lock_duration,
                self.counts.total()
            ),
            None => format!("{} for {}", self.state.label(), self.target),
        }
    }
}
