use std::cmp::Ordering;

use crate::{
    action::{ActionDetector, FaceSample},
    config::FaceLockConfig,
    error::{ConfigError, ControlError},
    history::{FileSink, HistoryRecorder, HistorySession, HistorySink},
    similarity::{CosineScorer, EnrolledIdentity, SimilarityScorer},
    types::{ActionEvent, DetectionRecord, FaceLandmarks, LockState, LockStatus, Point},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseReason {
    Timeout,
    Manual,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Acquired { identity: String, similarity: f32 },
    Released { identity: String, reason: ReleaseReason },
}

/// How this frame's candidate (if any) was taken.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Acceptance {
    /// No candidate qualified. Not an error.
    None,
    Acquired { index: usize, similarity: f32 },
    Matched { index: usize, similarity: f32 },
    /// Below tracking tolerance but close to the last known center.
    Proximity { index: usize, distance: f32 },
}

impl Acceptance {
    pub fn index(&self) -> Option<usize> {
        match *self {
            Acceptance::None => None,
            Acceptance::Acquired { index, .. }
            | Acceptance::Matched { index, .. }
            | Acceptance::Proximity { index, .. } => Some(index),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub state: LockState,
    pub acceptance: Acceptance,
    pub transition: Option<Transition>,
    pub events: Vec<ActionEvent>,
    /// Candidates dropped as malformed or unscorable.
    pub skipped: usize,
    pub closed_session: Option<HistorySession>,
}

#[derive(Clone, Debug)]
struct ActiveLock {
    identity: String,
    started_at: f64,
    last_seen: f64,
    center: Point,
    landmarks: FaceLandmarks,
}

struct Candidate<'a> {
    index: usize,
    record: &'a DetectionRecord,
    landmarks: FaceLandmarks,
    similarity: f32,
}

/// Owns the exclusive lock on one enrolled identity.
///
/// Each call to [`LockController::process_frame`] takes one frame's
/// candidates and a timestamp and returns the resulting state and events.
/// Control signals are separate calls and therefore always land between
/// frames. The controller never reads the system clock.
pub struct LockController<S: HistorySink = FileSink> {
    config: FaceLockConfig,
    target: EnrolledIdentity,
    scorer: Box<dyn SimilarityScorer>,
    lock: Option<ActiveLock>,
    prior_center: Option<Point>,
    detector: ActionDetector,
    recorder: HistoryRecorder<S>,
    last_timestamp: Option<f64>,
}

impl LockController<FileSink> {
    /// Controller persisting sessions under `config.history_dir`.
    pub fn with_file_history(
        config: FaceLockConfig,
        target: EnrolledIdentity,
    ) -> Result<Self, ConfigError> {
        let sink = FileSink::new(config.history_dir.clone());
        Self::new(config, target, sink)
    }
}

impl<S: HistorySink> LockController<S> {
    pub fn new(
        config: FaceLockConfig,
        target: EnrolledIdentity,
        sink: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        log::info!("face locking initialized for target '{}'", target.name());

        Ok(Self {
            detector: ActionDetector::new(&config),
            recorder: HistoryRecorder::new(sink, config.max_pending_lines),
            config,
            target,
            scorer: Box::new(CosineScorer),
            lock: None,
            prior_center: None,
            last_timestamp: None,
        })
    }

    pub fn with_scorer(mut self, scorer: impl SimilarityScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn config(&self) -> &FaceLockConfig {
        &self.config
    }

    pub fn target(&self) -> &EnrolledIdentity {
        &self.target
    }

    pub fn state(&self) -> LockState {
        if self.lock.is_some() {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }

    pub fn recorder(&self) -> &HistoryRecorder<S> {
        &self.recorder
    }

    pub fn last_known_center(&self) -> Option<Point> {
        self.lock.as_ref().map(|lock| lock.center).or(self.prior_center)
    }

    /// Latest frame timestamp seen, used to stamp control signals.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    pub fn last_known_landmarks(&self) -> Option<&FaceLandmarks> {
        self.lock.as_ref().map(|lock| &lock.landmarks)
    }

    pub fn status(&self) -> LockStatus {
        let session = self.recorder.session();
        LockStatus {
            state: self.state(),
            target: self.target.name().to_string(),
            identity: self.lock.as_ref().map(|lock| lock.identity.clone()),
            lock_duration: match (&self.lock, self.last_timestamp) {
                (Some(lock), Some(now)) => (now - lock.started_at).max(0.0),
                _ => 0.0,
            },
            counts: session.map(|s| s.counts).unwrap_or_default(),
            pending_writes: self.recorder.pending_len(),
            warning: self.recorder.warning().map(str::to_string),
            history_file: session.map(|s| s.file_name.clone()),
        }
    }

    /// Processes one frame's candidates observed at `now` (seconds).
    pub fn process_frame(&mut self, detections: &[DetectionRecord], now: f64) -> FrameOutcome {
        self.last_timestamp = Some(self.last_timestamp.map_or(now, |last| last.max(now)));
        self.recorder.retry_pending();

        let (candidates, skipped) = self.score_candidates(detections);

        let mut outcome = FrameOutcome {
            state: self.state(),
            acceptance: Acceptance::None,
            transition: None,
            events: Vec::new(),
            skipped,
            closed_session: None,
        };

        match self.lock.as_ref().map(|lock| (lock.center, lock.last_seen)) {
            None => {
                if let Some(best) = self.select_for_acquisition(&candidates) {
                    outcome.acceptance = Acceptance::Acquired {
                        index: best.index,
                        similarity: best.similarity,
                    };
                    outcome.transition = Some(Transition::Acquired {
                        identity: self.target.name().to_string(),
                        similarity: best.similarity,
                    });
                    outcome.events = self.acquire(best, now);
                }
            }
            Some((center, last_seen)) => {
                let acceptance = self.select_for_tracking(&candidates, center);
                match acceptance.index().and_then(|i| candidates.iter().find(|c| c.index == i)) {
                    Some(candidate) => {
                        outcome.acceptance = acceptance;
                        outcome.events = self.accept(candidate, now);
                    }
                    None if now - last_seen > self.config.lock_timeout_seconds => {
                        log::debug!(
                            "no accepted detection for {:.2}s, releasing",
                            now - last_seen
                        );
                        if let Some((transition, closed)) = self.release_at(now, ReleaseReason::Timeout) {
                            outcome.transition = Some(transition);
                            outcome.closed_session = closed;
                        }
                    }
                    None => {}
                }
            }
        }

        outcome.state = self.state();
        outcome
    }

    /// Manual release. Returns the closed session, or `None` when already unlocked.
    pub fn release(&mut self, now: f64) -> Option<HistorySession> {
        self.release_at(now, ReleaseReason::Manual)
            .and_then(|(_, closed)| closed)
    }

    /// Changes the target identity. Refused while a lock is held.
    pub fn request_switch(&mut self, identity: EnrolledIdentity) -> Result<(), ControlError> {
        if let Some(lock) = &self.lock {
            log::warn!(
                "switch to '{}' refused: locked on '{}'",
                identity.name(),
                lock.identity
            );
            return Err(ControlError::SwitchPendingRelease {
                active: lock.identity.clone(),
            });
        }

        log::info!("target changed to '{}'", identity.name());
        self.target = identity;
        self.prior_center = None;
        Ok(())
    }

    /// Releases any held lock and makes a final attempt at buffered writes.
    pub fn shutdown(&mut self, now: f64) -> Option<HistorySession> {
        let closed = self
            .release_at(now, ReleaseReason::Shutdown)
            .and_then(|(_, closed)| closed);
        let remaining = self.recorder.retry_pending();
        if remaining > 0 {
            log::error!("{remaining} history line(s) could not be persisted at shutdown");
        }
        closed
    }

    fn score_candidates<'a>(&self, detections: &'a [DetectionRecord]) -> (Vec<Candidate<'a>>, usize) {
        let mut skipped = 0;
        let mut candidates = Vec::with_capacity(detections.len());

        for (index, record) in detections.iter().enumerate() {
            let scored = record.validate().and_then(|landmarks| {
                let similarity = match record.similarity {
                    Some(similarity) => similarity,
                    None => self.scorer.score(&self.target, &record.embedding)?,
                };
                Ok((landmarks, similarity))
            });

            match scored {
                Ok((landmarks, similarity)) if similarity.is_finite() => candidates.push(Candidate {
                    index,
                    record,
                    landmarks,
                    similarity,
                }),
                Ok(_) => {
                    log::debug!("skipping detection {index}: non-finite similarity");
                    skipped += 1;
                }
                Err(err) => {
                    log::debug!("skipping detection {index}: {err}");
                    skipped += 1;
                }
            }
        }

        (candidates, skipped)
    }

    fn select_for_acquisition<'c, 'a>(&self, candidates: &'c [Candidate<'a>]) -> Option<&'c Candidate<'a>> {
        let threshold = self.config.lock_confidence_threshold;
        let prior = self.prior_center;
        candidates
            .iter()
            .filter(|c| c.similarity >= threshold)
            .min_by(|a, b| {
                b.similarity
                    .total_cmp(&a.similarity)
                    .then_with(|| match prior {
                        Some(center) => distance_to(a, center).total_cmp(&distance_to(b, center)),
                        None => Ordering::Equal,
                    })
                    .then_with(|| a.index.cmp(&b.index))
            })
    }

    fn select_for_tracking(&self, candidates: &[Candidate<'_>], center: Point) -> Acceptance {
        let tolerance = self.config.tracking_tolerance;
        let radius = self.config.proximity_radius();

        let rank = |a: &&Candidate, b: &&Candidate| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| distance_to(a, center).total_cmp(&distance_to(b, center)))
                .then_with(|| a.index.cmp(&b.index))
        };

        let (near, far): (Vec<&Candidate>, Vec<&Candidate>) = candidates
            .iter()
            .partition(|c| distance_to(c, center) <= radius);
        let best_near = near.iter().copied().filter(|c| c.similarity >= tolerance).min_by(rank);
        let best_far = far.into_iter().filter(|c| c.similarity >= tolerance).min_by(rank);
        let nearest = near
            .iter()
            .map(|c| (*c, distance_to(c, center)))
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.index.cmp(&b.index)));

        let matched = |c: &Candidate| Acceptance::Matched {
            index: c.index,
            similarity: c.similarity,
        };
        let outbids = |far: &Candidate, near: &Candidate| {
            far.similarity - near.similarity > self.config.swap_margin
        };

        // The face near the last center is the default winner, qualifying or not.
        match (best_near, nearest, best_far) {
            (Some(near), _, Some(far)) if outbids(far, near) => matched(far),
            (Some(near), _, _) => matched(near),
            (None, Some((near, _)), Some(far)) if outbids(far, near) => matched(far),
            (None, Some((near, distance)), _) => Acceptance::Proximity {
                index: near.index,
                distance,
            },
            (None, None, Some(far)) => matched(far),
            (None, None, None) => Acceptance::None,
        }
    }

    fn acquire(&mut self, candidate: &Candidate<'_>, now: f64) -> Vec<ActionEvent> {
        let identity = self.target.name().to_string();
        log::info!(
            "LOCKED onto {identity} (similarity: {:.3})",
            candidate.similarity
        );

        self.lock = Some(ActiveLock {
            identity: identity.clone(),
            started_at: now,
            last_seen: now,
            center: candidate.record.center,
            landmarks: candidate.landmarks,
        });
        self.prior_center = Some(candidate.record.center);
        self.recorder.open(&identity, now);
        self.detector.reset();
        self.forward(candidate)
    }

    fn accept(&mut self, candidate: &Candidate<'_>, now: f64) -> Vec<ActionEvent> {
        if let Some(lock) = self.lock.as_mut() {
            lock.last_seen = lock.last_seen.max(now);
            lock.center = candidate.record.center;
            lock.landmarks = candidate.landmarks;
        }
        self.prior_center = Some(candidate.record.center);
        self.forward(candidate)
    }

    fn forward(&mut self, candidate: &Candidate<'_>) -> Vec<ActionEvent> {
        let sample = FaceSample::from_record(candidate.record, &candidate.landmarks);
        self.detector
            .observe(sample)
            .into_iter()
            .filter_map(|action| self.recorder.record(action))
            .collect()
    }

    fn release_at(
        &mut self,
        now: f64,
        reason: ReleaseReason,
    ) -> Option<(Transition, Option<HistorySession>)> {
        let lock = self.lock.take()?;
        log::info!(
            "RELEASED lock on {} ({:?}, duration: {:.1}s)",
            lock.identity,
            reason,
            (now - lock.started_at).max(0.0)
        );

        self.detector.reset();
        let closed = self.recorder.close(now);
        Some((
            Transition::Released {
                identity: lock.identity,
                reason,
            },
            closed,
        ))
    }
}

impl<S: HistorySink> Drop for LockController<S> {
    fn drop(&mut self) {
        if self.lock.is_some() {
            let now = self.last_timestamp.unwrap_or_default();
            log::warn!("controller dropped while locked; closing session");
            self.shutdown(now);
        }
    }
}

fn distance_to(candidate: &Candidate<'_>, center: Point) -> f32 {
    candidate.record.center.distance(center)
}
