use std::collections::VecDeque;

use crate::{
    config::FaceLockConfig,
    types::{ActionKind, DetectionRecord, EyeContour, FaceLandmarks, Point},
};

const HISTORY_LEN: usize = 8;
const MIN_SPAN: f32 = 1e-3;
// Smoothing for the neutral mouth baseline.
const BASELINE_ALPHA: f32 = 0.1;

/// Per-frame measurements of the tracked face that the detectors consume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceSample {
    pub center: Point,
    pub eye_aspect_ratio: Option<f32>,
    pub mouth_curvature: Option<f32>,
    pub timestamp: f64,
}

impl FaceSample {
    pub fn from_record(record: &DetectionRecord, landmarks: &FaceLandmarks) -> Self {
        Self {
            center: record.center,
            eye_aspect_ratio: eye_aspect_ratio(landmarks, record.eye_contour.as_ref()),
            mouth_curvature: mouth_curvature(landmarks),
            timestamp: record.timestamp,
        }
    }
}

/// Eye openness. Uses the six-point contour ratio when contours are present,
/// otherwise the coarse five-point ratio of mean eye-to-nose distance over
/// inter-ocular distance.
pub fn eye_aspect_ratio(landmarks: &FaceLandmarks, contour: Option<&EyeContour>) -> Option<f32> {
    if let Some(contour) = contour {
        let left = contour_ratio(&contour.left)?;
        let right = contour_ratio(&contour.right)?;
        return Some((left + right) / 2.0);
    }

    let eye_distance = landmarks.left_eye.distance(landmarks.right_eye);
    if eye_distance < MIN_SPAN {
        return None;
    }
    let left = landmarks.left_eye.distance(landmarks.nose);
    let right = landmarks.right_eye.distance(landmarks.nose);
    Some((left + right) / 2.0 / eye_distance)
}

fn contour_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() < 6 {
        return None;
    }
    let width = eye[0].distance(eye[3]);
    if width < MIN_SPAN {
        return None;
    }
    let vertical = eye[1].distance(eye[5]) + eye[2].distance(eye[4]);
    Some(vertical / (2.0 * width))
}

/// Nose-to-mouth-center distance over mouth width.
pub fn mouth_curvature(landmarks: &FaceLandmarks) -> Option<f32> {
    let width = landmarks.mouth_left.distance(landmarks.mouth_right);
    if width < MIN_SPAN {
        return None;
    }
    let mouth_center = landmarks.mouth_left.midpoint(landmarks.mouth_right);
    Some(mouth_center.distance(landmarks.nose) / width)
}

/// An action before it is stamped with a session sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedAction {
    pub kind: ActionKind,
    pub timestamp: f64,
    pub description: String,
    pub magnitude: f32,
}

#[derive(Debug)]
struct MovementDebounce {
    threshold: f32,
    armed: bool,
}

impl MovementDebounce {
    fn update(&mut self, previous: Point, current: Point) -> Option<(f32, f32)> {
        let distance = previous.distance(current);
        if self.armed {
            if distance >= self.threshold {
                self.armed = false;
                return Some((distance, current.x - previous.x));
            }
        } else if distance < self.threshold / 2.0 {
            self.armed = true;
        }
        None
    }
}

#[derive(Debug)]
struct BlinkDebounce {
    threshold: f32,
    closed_min: Option<f32>,
}

impl BlinkDebounce {
    /// Returns the deepest ratio of a completed close-then-reopen cycle.
    fn update(&mut self, ratio: f32) -> Option<f32> {
        match self.closed_min {
            None if ratio < self.threshold => {
                self.closed_min = Some(ratio);
                None
            }
            None => None,
            Some(min) if ratio >= self.threshold => {
                self.closed_min = None;
                Some(min)
            }
            Some(min) => {
                self.closed_min = Some(min.min(ratio));
                None
            }
        }
    }
}

#[derive(Debug)]
struct SmileDebounce {
    threshold: f32,
    baseline: Option<f32>,
    smiling: bool,
}

impl SmileDebounce {
    /// Returns the deviation above the neutral baseline when a smile starts.
    fn update(&mut self, curvature: f32) -> Option<f32> {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(curvature);
            return None;
        };

        let deviation = curvature - baseline;
        let mut onset = None;
        if !self.smiling && deviation > self.threshold {
            self.smiling = true;
            onset = Some(deviation);
        } else if self.smiling && deviation <= self.threshold {
            self.smiling = false;
        }

        if !self.smiling {
            self.baseline = Some(baseline + BASELINE_ALPHA * (curvature - baseline));
        }
        onset
    }
}

/// Turns the stream of accepted samples for the locked face into discrete
/// Movement, Blink and Smile actions, each debounced independently.
#[derive(Debug)]
pub struct ActionDetector {
    history: VecDeque<FaceSample>,
    movement: MovementDebounce,
    blink: BlinkDebounce,
    smile: SmileDebounce,
}

impl ActionDetector {
    pub fn new(config: &FaceLockConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_LEN),
            movement: MovementDebounce {
                threshold: config.movement_threshold,
                armed: true,
            },
            blink: BlinkDebounce {
                threshold: config.blink_threshold,
                closed_min: None,
            },
            smile: SmileDebounce {
                threshold: config.smile_threshold,
                baseline: None,
                smiling: false,
            },
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.movement.armed = true;
        self.blink.closed_min = None;
        self.smile.baseline = None;
        self.smile.smiling = false;
    }

    /// Feeds one accepted sample; actions come back in Movement, Blink, Smile order.
    pub fn observe(&mut self, sample: FaceSample) -> Vec<DetectedAction> {
        let mut actions = Vec::new();

        if let Some(previous) = self.history.back() {
            if let Some((distance, dx)) = self.movement.update(previous.center, sample.center) {
                let direction = if dx >= 0.0 { "right" } else { "left" };
                actions.push(DetectedAction {
                    kind: ActionKind::Movement,
                    timestamp: sample.timestamp,
                    description: format!("moved {direction}"),
                    magnitude: distance,
                });
            }
        }

        if let Some(depth) = sample
            .eye_aspect_ratio
            .and_then(|ratio| self.blink.update(ratio))
        {
            actions.push(DetectedAction {
                kind: ActionKind::Blink,
                timestamp: sample.timestamp,
                description: "eye blink detected".to_string(),
                magnitude: depth,
            });
        }

        if let Some(deviation) = sample
            .mouth_curvature
            .and_then(|curvature| self.smile.update(curvature))
        {
            actions.push(DetectedAction {
                kind: ActionKind::Smile,
                timestamp: sample.timestamp,
                description: "smile detected".to_string(),
                magnitude: deviation,
            });
        }

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample);

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f32, y: f32, t: f64) -> FaceSample {
        FaceSample {
            center: Point::new(x, y),
            eye_aspect_ratio: None,
            mouth_curvature: None,
            timestamp: t,
        }
    }

    fn eye_sample(ratio: f32, t: f64) -> FaceSample {
        FaceSample {
            eye_aspect_ratio: Some(ratio),
            ..sample(100.0, 100.0, t)
        }
    }

    fn mouth_sample(curvature: f32, t: f64) -> FaceSample {
        FaceSample {
            mouth_curvature: Some(curvature),
            ..sample(100.0, 100.0, t)
        }
    }

    fn detector() -> ActionDetector {
        ActionDetector::new(&FaceLockConfig::default())
    }

    #[test]
    fn movement_right_reports_distance() {
        let mut detector = detector();
        assert!(detector.observe(sample(100.0, 100.0, 0.0)).is_empty());
        let actions = detector.observe(sample(140.0, 100.0, 0.1));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Movement);
        assert_eq!(actions[0].magnitude, 40.0);
        assert_eq!(actions[0].description, "moved right");
    }

    #[test]
    fn movement_left_uses_horizontal_sign() {
        let mut detector = detector();
        detector.observe(sample(100.0, 100.0, 0.0));
        let actions = detector.observe(sample(60.0, 110.0, 0.1));
        assert_eq!(actions[0].description, "moved left");
    }

    #[test]
    fn movement_debounces_continuous_excursion() {
        let mut detector = detector();
        detector.observe(sample(0.0, 0.0, 0.0));
        assert_eq!(detector.observe(sample(35.0, 0.0, 0.1)).len(), 1);
        // Still moving fast: no second event until the face settles.
        assert!(detector.observe(sample(70.0, 0.0, 0.2)).is_empty());
        assert!(detector.observe(sample(90.0, 0.0, 0.3)).is_empty());
        // Settles (delta 5 < 15), re-arms.
        assert!(detector.observe(sample(95.0, 0.0, 0.4)).is_empty());
        assert_eq!(detector.observe(sample(130.0, 0.0, 0.5)).len(), 1);
    }

    #[test]
    fn movement_below_threshold_is_ignored() {
        let mut detector = detector();
        detector.observe(sample(0.0, 0.0, 0.0));
        assert!(detector.observe(sample(29.9, 0.0, 0.1)).is_empty());
    }

    #[test]
    fn blink_fires_once_per_close_reopen_cycle() {
        let mut detector = detector();
        let mut blinks = Vec::new();
        for (i, ratio) in [0.30, 0.20, 0.32].into_iter().enumerate() {
            blinks.extend(detector.observe(eye_sample(ratio, i as f64 * 0.1)));
        }
        assert_eq!(blinks.len(), 1);
        assert_eq!(blinks[0].kind, ActionKind::Blink);
        assert_eq!(blinks[0].magnitude, 0.20);
    }

    #[test]
    fn sustained_closure_is_one_blink() {
        let mut detector = detector();
        let ratios = [0.3, 0.2, 0.1, 0.15, 0.2, 0.3, 0.31];
        let blinks: Vec<_> = ratios
            .into_iter()
            .enumerate()
            .flat_map(|(i, r)| detector.observe(eye_sample(r, i as f64)))
            .collect();
        assert_eq!(blinks.len(), 1);
        assert_eq!(blinks[0].magnitude, 0.1);
    }

    #[test]
    fn closed_eyes_without_reopen_do_not_blink() {
        let mut detector = detector();
        for (i, ratio) in [0.3, 0.2, 0.1, 0.2].into_iter().enumerate() {
            assert!(detector.observe(eye_sample(ratio, i as f64)).is_empty());
        }
    }

    #[test]
    fn separate_smiles_are_separate_events() {
        let mut detector = detector();
        let curves = [0.80, 0.80, 0.85, 0.86, 0.86, 0.80, 0.80, 0.86];
        let smiles: Vec<_> = curves
            .into_iter()
            .enumerate()
            .flat_map(|(i, c)| detector.observe(mouth_sample(c, i as f64)))
            .collect();
        assert_eq!(smiles.len(), 2);
        assert!(smiles.iter().all(|a| a.kind == ActionKind::Smile));
        assert!((smiles[0].magnitude - 0.05).abs() < 1e-4);
    }

    #[test]
    fn actions_follow_fixed_order() {
        let mut detector = detector();
        detector.observe(FaceSample {
            center: Point::new(0.0, 0.0),
            eye_aspect_ratio: Some(0.1),
            mouth_curvature: Some(0.5),
            timestamp: 0.0,
        });
        let actions = detector.observe(FaceSample {
            center: Point::new(50.0, 0.0),
            eye_aspect_ratio: Some(0.3),
            mouth_curvature: Some(0.6),
            timestamp: 0.1,
        });
        let kinds: Vec<_> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Movement, ActionKind::Blink, ActionKind::Smile]
        );
    }

    #[test]
    fn reset_forgets_previous_center() {
        let mut detector = detector();
        detector.observe(sample(0.0, 0.0, 0.0));
        detector.reset();
        assert!(detector.observe(sample(200.0, 0.0, 1.0)).is_empty());
        let actions = detector.observe(sample(240.0, 0.0, 2.0));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].magnitude, 40.0);
    }

    #[test]
    fn contour_ratio_measures_lid_opening() {
        let landmarks = FaceLandmarks {
            left_eye: Point::new(80.0, 80.0),
            right_eye: Point::new(120.0, 80.0),
            nose: Point::new(100.0, 100.0),
            mouth_left: Point::new(85.0, 120.0),
            mouth_right: Point::new(115.0, 120.0),
        };
        let open = vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, -2.0),
            Point::new(7.0, -2.0),
            Point::new(10.0, 0.0),
            Point::new(7.0, 2.0),
            Point::new(3.0, 2.0),
        ];
        let contour = EyeContour {
            left: open.clone(),
            right: open,
        };
        let ratio = eye_aspect_ratio(&landmarks, Some(&contour)).unwrap();
        assert!((ratio - 0.4).abs() < 1e-6);

        let coarse = eye_aspect_ratio(&landmarks, None).unwrap();
        let expected = Point::new(80.0, 80.0).distance(Point::new(100.0, 100.0)) / 40.0;
        assert!((coarse - expected).abs() < 1e-6);

        let curve = mouth_curvature(&landmarks).unwrap();
        assert!((curve - 20.0 / 30.0).abs() < 1e-6);
    }
}
