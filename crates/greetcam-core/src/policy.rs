//! Per-face greeting cooldown and variant selection.

use crate::types::{GreetingDecision, SkipReason, Timestamp, TrackedFace, Variant};
use std::time::Duration;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_VARIANT_CLIP: &str = "data/audio/hello.wav";

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Minimum time between two greetings of the same face.
    pub cooldown: Duration,
    /// Pick the n-th configured variant for a face's n-th greeting.
    pub sequential: bool,
    /// Variant clips for greetings 1..=N, in order.
    pub variants: Vec<String>,
    /// Clip used when no numbered variant applies.
    pub default_variant: String,
    /// Greet a face in the same frame it was first detected.
    pub greet_new_faces: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            sequential: false,
            variants: Vec::new(),
            default_variant: DEFAULT_VARIANT_CLIP.to_string(),
            greet_new_faces: true,
        }
    }
}

pub struct GreetingPolicy {
    config: PolicyConfig,
}

impl GreetingPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide without changing any state.
    pub fn decide(&self, face: &TrackedFace, is_new: bool, now: Timestamp) -> GreetingDecision {
        if face.missed_frames > 0 {
            return GreetingDecision::Skip(SkipReason::NotVisible);
        }
        if face.last_greeted_frame == Some(face.last_seen_frame) {
            return GreetingDecision::Skip(SkipReason::AlreadyGreetedThisFrame);
        }
        if is_new && !self.config.greet_new_faces {
            return GreetingDecision::Skip(SkipReason::NewFaceSuppressed);
        }
        if let Some(last) = face.last_greeted_time {
            // A clock that went backwards reads as no time elapsed.
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.config.cooldown {
                return GreetingDecision::Skip(SkipReason::Cooldown);
            }
        }

        let (variant, clip) = self.select_variant(face.greeting_count + 1);
        GreetingDecision::Greet { variant, clip }
    }

    /// Decide and, on a greet decision, commit it to the face: the greeting
    /// count goes up by one and the greeted time and frame are stamped.
    pub fn should_greet(
        &self,
        face: &mut TrackedFace,
        is_new: bool,
        now: Timestamp,
    ) -> GreetingDecision {
        let decision = self.decide(face, is_new, now);
        if decision.is_greet() {
            face.greeting_count += 1;
            face.last_greeted_time = Some(now);
            face.last_greeted_frame = Some(face.last_seen_frame);
        }
        decision
    }

    /// Variant for a face's `nth` greeting (1-based).
    pub fn select_variant(&self, nth: u32) -> (Variant, String) {
        if self.config.sequential && nth >= 1 {
            if let Some(clip) = self.config.variants.get(nth as usize - 1) {
                return (Variant::Sequential(nth), clip.clone());
            }
        }
        (Variant::Default, self.config.default_variant.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use chrono::{Local, TimeZone};

    fn t(secs: i64) -> Timestamp {
        Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn face() -> TrackedFace {
        TrackedFace::new(1, BoundingBox::new(0.0, 0.0, 50.0, 50.0), 1, t(0))
    }

    /// Simulate the face being matched again in a later frame.
    fn seen(face: &mut TrackedFace, frame: u64, now: Timestamp) {
        face.last_seen_frame = frame;
        face.last_seen_time = now;
        face.missed_frames = 0;
    }

    fn sequential_policy() -> GreetingPolicy {
        GreetingPolicy::new(PolicyConfig {
            cooldown: Duration::ZERO,
            sequential: true,
            variants: vec!["one.wav".into(), "two.wav".into(), "three.wav".into()],
            default_variant: "hello.wav".into(),
            greet_new_faces: true,
        })
    }

    #[test]
    fn test_new_face_greeted_immediately() {
        let policy = GreetingPolicy::new(PolicyConfig::default());
        let mut f = face();
        let decision = policy.should_greet(&mut f, true, t(0));
        assert_eq!(
            decision,
            GreetingDecision::Greet {
                variant: Variant::Default,
                clip: DEFAULT_VARIANT_CLIP.into()
            }
        );
        assert_eq!(f.greeting_count, 1);
        assert_eq!(f.last_greeted_time, Some(t(0)));
        assert_eq!(f.last_greeted_frame, Some(1));
    }

    #[test]
    fn test_cooldown_enforced() {
        let policy = GreetingPolicy::new(PolicyConfig::default());
        let mut f = face();
        assert!(policy.should_greet(&mut f, true, t(0)).is_greet());

        for (frame, secs) in [(2, 1), (3, 30), (4, 59)] {
            seen(&mut f, frame, t(secs));
            assert_eq!(
                policy.should_greet(&mut f, false, t(secs)),
                GreetingDecision::Skip(SkipReason::Cooldown),
                "t={secs}"
            );
        }
        assert_eq!(f.greeting_count, 1);

        seen(&mut f, 5, t(61));
        assert!(policy.should_greet(&mut f, false, t(61)).is_greet());
        assert_eq!(f.greeting_count, 2);
        assert_eq!(f.last_greeted_time, Some(t(61)));
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let policy = GreetingPolicy::new(PolicyConfig::default());
        let mut f = face();
        policy.should_greet(&mut f, true, t(0));
        seen(&mut f, 2, t(60));
        assert!(policy.decide(&f, false, t(60)).is_greet());
    }

    #[test]
    fn test_sequential_variants_fall_back_to_default() {
        let policy = sequential_policy();
        let mut f = face();
        let mut picked = Vec::new();
        for frame in 1..=4u64 {
            seen(&mut f, frame, t(frame as i64 * 100));
            match policy.should_greet(&mut f, frame == 1, t(frame as i64 * 100)) {
                GreetingDecision::Greet { variant, clip } => picked.push((variant, clip)),
                other => panic!("expected greet, got {other:?}"),
            }
        }
        assert_eq!(
            picked,
            vec![
                (Variant::Sequential(1), "one.wav".to_string()),
                (Variant::Sequential(2), "two.wav".to_string()),
                (Variant::Sequential(3), "three.wav".to_string()),
                (Variant::Default, "hello.wav".to_string()),
            ]
        );
    }

    #[test]
    fn test_non_sequential_always_default() {
        let mut config = sequential_policy().config().clone();
        config.sequential = false;
        let policy = GreetingPolicy::new(config);
        for nth in 1..=3 {
            assert_eq!(policy.select_variant(nth).0, Variant::Default);
        }
    }

    #[test]
    fn test_at_most_one_greeting_per_frame() {
        let policy = sequential_policy();
        let mut f = face();
        assert!(policy.should_greet(&mut f, true, t(0)).is_greet());
        assert_eq!(
            policy.should_greet(&mut f, true, t(0)),
            GreetingDecision::Skip(SkipReason::AlreadyGreetedThisFrame)
        );
        assert_eq!(f.greeting_count, 1);
    }

    #[test]
    fn test_new_face_suppression_only_on_first_frame() {
        let policy = GreetingPolicy::new(PolicyConfig {
            greet_new_faces: false,
            ..PolicyConfig::default()
        });
        let mut f = face();
        assert_eq!(
            policy.should_greet(&mut f, true, t(0)),
            GreetingDecision::Skip(SkipReason::NewFaceSuppressed)
        );
        assert_eq!(f.greeting_count, 0);
        seen(&mut f, 2, t(1));
        assert!(policy.should_greet(&mut f, false, t(1)).is_greet());
    }

    #[test]
    fn test_missed_face_not_greeted() {
        let policy = GreetingPolicy::new(PolicyConfig::default());
        let mut f = face();
        f.missed_frames = 2;
        assert_eq!(
            policy.decide(&f, false, t(0)),
            GreetingDecision::Skip(SkipReason::NotVisible)
        );
    }

    #[test]
    fn test_clock_going_backwards_keeps_cooldown() {
        let policy = GreetingPolicy::new(PolicyConfig::default());
        let mut f = face();
        policy.should_greet(&mut f, true, t(500));
        seen(&mut f, 2, t(0));
        assert_eq!(
            policy.decide(&f, false, t(0)),
            GreetingDecision::Skip(SkipReason::Cooldown)
        );
    }
}
