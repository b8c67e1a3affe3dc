//! Voice alert arbitration.
//!
//! One clock, `last_alert`, is shared by both tiers and by every class:
//! - a proximity warning needs `now - last_alert > cooldown_base`,
//! - an informational announcement needs `now - last_alert > 2 * cooldown_base`.
//!
//! Per frame at most one alert is chosen: the first eligible detection in
//! processed order. Choosing it moves the clock to `now`, which suppresses any
//! other alert in the same cycle.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::processor::{ProcessedDetection, Severity};

pub const DEFAULT_COOLDOWN_BASE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTier {
    Proximity,
    Informational,
}

/// Whether the voice path can take an utterance right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceReadiness {
    Ready,
    /// An utterance is still in flight.
    Busy,
    /// Voice output is switched off.
    Disabled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertDecision {
    /// Index into the processed detections of this frame.
    pub detection_index: usize,
    pub message: String,
    pub tier: AlertTier,
    /// True when the message should be spoken. Only emitted decisions move the
    /// cooldown clock.
    pub emit: bool,
}

#[derive(Clone, Debug)]
pub struct AlertArbiter {
    cooldown_base: Duration,
    last_alert: Option<Instant>,
}

impl AlertArbiter {
    pub fn new(cooldown_base: Duration) -> Self {
        Self {
            cooldown_base,
            last_alert: None,
        }
    }

    pub fn cooldown_base(&self) -> Duration {
        self.cooldown_base
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Pick at most one alert for this frame.
    ///
    /// Returns `None` when no detection is alertable or every candidate is still
    /// cooling down. A candidate found while voice is `Busy` or `Disabled` is
    /// returned with `emit == false` and leaves the clock untouched.
    pub fn decide(
        &mut self,
        detections: &[ProcessedDetection],
        now: Instant,
        readiness: VoiceReadiness,
    ) -> Option<AlertDecision> {
        let (detection_index, tier) = detections
            .iter()
            .enumerate()
            .find_map(|(idx, det)| self.eligible_tier(det, now).map(|tier| (idx, tier)))?;

        let emit = readiness == VoiceReadiness::Ready;
        if emit {
            // Eligibility implies `now > last_alert`, so the clock only moves forward.
            self.last_alert = Some(now);
        }
        Some(AlertDecision {
            detection_index,
            message: alert_message(&detections[detection_index], tier),
            tier,
            emit,
        })
    }

    fn eligible_tier(&self, det: &ProcessedDetection, now: Instant) -> Option<AlertTier> {
        det.distance_m?;
        let (tier, cooldown) = match det.severity {
            Severity::Warning => (AlertTier::Proximity, self.cooldown_base),
            Severity::Informational => (AlertTier::Informational, self.cooldown_base * 2),
            Severity::Suppressed => return None,
        };
        let cooled = match self.last_alert {
            None => true,
            Some(last) => now.saturating_duration_since(last) > cooldown,
        };
        cooled.then_some(tier)
    }
}

impl Default for AlertArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_BASE)
    }
}

/// Spoken text for a detection at the given tier.
pub fn alert_message(det: &ProcessedDetection, tier: AlertTier) -> String {
    let distance = det.distance_m.unwrap_or_default();
    match tier {
        AlertTier::Proximity => format!(
            "Warning! {} too close at {:.2} meters",
            det.label, distance
        ),
        AlertTier::Informational => format!("{} detected at {:.2} meters", det.label, distance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection};

    fn processed(label: &str, distance: Option<f64>, severity: Severity) -> ProcessedDetection {
        ProcessedDetection {
            raw: RawDetection::new(0, 0.9, BoundingBox::new(0, 0, 10, 100)),
            label: label.to_string(),
            distance_m: distance,
            severity,
            display_box: None,
        }
    }

    fn warning() -> ProcessedDetection {
        processed("person", Some(1.92), Severity::Warning)
    }

    fn primed(at: Instant) -> AlertArbiter {
        let mut arbiter = AlertArbiter::default();
        arbiter
            .decide(&[warning()], at, VoiceReadiness::Ready)
            .expect("first alert is always eligible");
        arbiter
    }

    #[test]
    fn first_warning_emits_and_sets_clock() {
        let now = Instant::now();
        let mut arbiter = AlertArbiter::default();
        let decision = arbiter
            .decide(&[warning()], now, VoiceReadiness::Ready)
            .unwrap();
        assert!(decision.emit);
        assert_eq!(decision.tier, AlertTier::Proximity);
        assert_eq!(decision.message, "Warning! person too close at 1.92 meters");
        assert_eq!(arbiter.last_alert(), Some(now));
    }

    #[test]
    fn warning_cooldown_boundary() {
        let t = Instant::now();
        let mut arbiter = primed(t);

        let early = t + Duration::from_millis(1900);
        assert!(arbiter
            .decide(&[warning()], early, VoiceReadiness::Ready)
            .is_none());
        assert_eq!(arbiter.last_alert(), Some(t));

        let late = t + Duration::from_millis(2100);
        let decision = arbiter
            .decide(&[warning()], late, VoiceReadiness::Ready)
            .unwrap();
        assert!(decision.emit);
        assert_eq!(arbiter.last_alert(), Some(late));
    }

    #[test]
    fn informational_needs_double_cooldown() {
        let t = Instant::now();
        let mut arbiter = primed(t);
        let info = processed("car", Some(5.0), Severity::Informational);

        assert!(arbiter
            .decide(&[info.clone()], t + Duration::from_millis(3900), VoiceReadiness::Ready)
            .is_none());
        let decision = arbiter
            .decide(&[info], t + Duration::from_millis(4100), VoiceReadiness::Ready)
            .unwrap();
        assert_eq!(decision.tier, AlertTier::Informational);
        assert_eq!(decision.message, "car detected at 5.00 meters");
    }

    #[test]
    fn first_eligible_detection_wins_and_blocks_the_rest() {
        let t = Instant::now();
        let mut arbiter = primed(t);
        // At t+3s the informational tier is still cooling, the warning is not.
        let detections = [
            processed("dog", Some(4.0), Severity::Informational),
            processed("chair", Some(1.5), Severity::Warning),
            processed("person", Some(1.0), Severity::Warning),
        ];
        let now = t + Duration::from_secs(3);
        let decision = arbiter
            .decide(&detections, now, VoiceReadiness::Ready)
            .unwrap();
        assert_eq!(decision.detection_index, 1);
        // Same cycle, clock already advanced: nothing else fires.
        assert!(arbiter
            .decide(&detections, now, VoiceReadiness::Ready)
            .is_none());
    }

    #[test]
    fn disabled_voice_never_emits_or_moves_clock() {
        let now = Instant::now();
        let mut arbiter = AlertArbiter::default();
        let decision = arbiter
            .decide(&[warning()], now, VoiceReadiness::Disabled)
            .unwrap();
        assert!(!decision.emit);
        assert_eq!(arbiter.last_alert(), None);
    }

    #[test]
    fn busy_voice_defers_without_moving_clock() {
        let t = Instant::now();
        let mut arbiter = primed(t);
        let later = t + Duration::from_secs(3);
        let decision = arbiter
            .decide(&[warning()], later, VoiceReadiness::Busy)
            .unwrap();
        assert!(!decision.emit);
        assert_eq!(arbiter.last_alert(), Some(t));
    }

    #[test]
    fn suppressed_and_distanceless_detections_never_alert() {
        let mut arbiter = AlertArbiter::default();
        let detections = [
            processed("chair", Some(5.0), Severity::Suppressed),
            processed("person", None, Severity::Suppressed),
        ];
        assert!(arbiter
            .decide(&detections, Instant::now(), VoiceReadiness::Ready)
            .is_none());
    }

    #[test]
    fn stale_timestamp_does_not_rewind_clock() {
        let t = Instant::now() + Duration::from_secs(10);
        let mut arbiter = primed(t);
        assert!(arbiter
            .decide(&[warning()], t - Duration::from_secs(5), VoiceReadiness::Ready)
            .is_none());
        assert_eq!(arbiter.last_alert(), Some(t));
    }
}
