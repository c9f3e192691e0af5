//! Per-frame pipeline: tracker update, then greeting decisions, then stats.

use crate::policy::{GreetingPolicy, PolicyConfig};
use crate::stats::{StatsError, StatsStore};
use crate::tracker::{Tracker, TrackerConfig};
use crate::types::{FrameDetections, GreetingDecision, GreetingEvent};

/// What happened while processing one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub new_faces: Vec<u64>,
    pub evicted: Vec<u64>,
    pub live_faces: usize,
    /// One event per greet decision, in ascending face id order.
    pub events: Vec<GreetingEvent>,
    /// Stats writes that failed this frame. The greetings still count.
    pub stats_errors: Vec<StatsError>,
}

pub struct Greeter {
    tracker: Tracker,
    policy: GreetingPolicy,
}

impl Greeter {
    pub fn new(tracker: Tracker, policy: GreetingPolicy) -> Self {
        Self { tracker, policy }
    }

    /// Build a greeter whose face ids continue after those already counted in
    /// the store's current record.
    pub fn for_store(tracker: TrackerConfig, policy: PolicyConfig, stats: &StatsStore) -> Self {
        Self::new(
            Tracker::with_first_id(tracker, stats.next_face_id()),
            GreetingPolicy::new(policy),
        )
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Process one frame.
    ///
    /// All tracker updates for the frame are applied before any face is
    /// evaluated. Faces are then evaluated in ascending id order; each greet
    /// decision is recorded in `stats` before its event is returned.
    pub fn process_frame(
        &mut self,
        stats: &mut StatsStore,
        frame: &FrameDetections,
    ) -> FrameReport {
        let now = frame.timestamp;
        for det in frame.detections() {
            tracing::trace!(bbox = ?det.bbox, timestamp = %det.timestamp, "detection");
        }
        let update = self.tracker.update(&frame.boxes, now);

        let mut report = FrameReport {
            frame: update.frame,
            new_faces: update.new_ids(),
            evicted: update.evicted.clone(),
            live_faces: update.faces.len(),
            ..FrameReport::default()
        };

        for (snapshot, is_new) in &update.faces {
            if !snapshot.is_visible_in(update.frame) {
                continue;
            }
            let Some(face) = self.tracker.get_mut(snapshot.id) else {
                continue;
            };
            let GreetingDecision::Greet { variant, clip } =
                self.policy.should_greet(face, *is_new, now)
            else {
                continue;
            };

            tracing::info!(
                face_id = face.id,
                variant = %variant,
                count = face.greeting_count,
                "greeting decided"
            );
            if let Err(e) = stats.record_greeting(face.id, now.date_naive()) {
                tracing::warn!(
                    error = %e,
                    face_id = face.id,
                    "greeting not saved; will retry on next greeting"
                );
                report.stats_errors.push(e);
            }
            report.events.push(GreetingEvent {
                face_id: face.id,
                variant,
                clip,
                timestamp: now,
                bbox: face.bbox,
                greeting_count: face.greeting_count,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Timestamp, Variant};
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn frame(boxes: &[(f32, f32)], now: Timestamp) -> FrameDetections {
        FrameDetections::new(
            boxes
                .iter()
                .map(|&(x, y)| BoundingBox::new(x, y, 50.0, 50.0))
                .collect(),
            now,
        )
    }

    fn greeter(stats: &StatsStore) -> Greeter {
        Greeter::for_store(
            TrackerConfig::default(),
            PolicyConfig {
                cooldown: Duration::from_secs(60),
                sequential: true,
                variants: vec!["first.wav".into(), "second.wav".into()],
                default_variant: "hello.wav".into(),
                greet_new_faces: true,
            },
            stats,
        )
    }

    #[test]
    fn test_first_sighting_greets_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let start = at(2026, 10, 18, 12, 0, 0);
        let mut stats = StatsStore::open(dir.path(), start.date_naive()).unwrap();
        let mut greeter = greeter(&stats);

        let first = frame(&[(10.0, 10.0), (300.0, 10.0)], start);
        let report = greeter.process_frame(&mut stats, &first);
        assert_eq!(report.new_faces, vec![1, 2]);
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[0].face_id, 1);
        assert_eq!(report.events[1].face_id, 2);
        assert_eq!(report.events[0].variant, Variant::Sequential(1));
        assert_eq!(report.events[0].clip, "first.wav");
        assert_eq!(stats.current().total_greetings, 2);

        // Still inside the cooldown: tracked, not greeted.
        let later = start + chrono::Duration::seconds(30);
        let second = frame(&[(12.0, 11.0), (301.0, 10.0)], later);
        let report = greeter.process_frame(&mut stats, &second);
        assert!(report.new_faces.is_empty());
        assert!(report.events.is_empty());
        assert_eq!(stats.current().total_greetings, 2);

        let after = start + chrono::Duration::seconds(61);
        let report = greeter.process_frame(&mut stats, &frame(&[(13.0, 11.0)], after));
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].face_id, 1);
        assert_eq!(report.events[0].variant, Variant::Sequential(2));
        assert_eq!(report.events[0].greeting_count, 2);
        assert_eq!(stats.current().count_for(1), 2);
        assert_eq!(stats.current().count_for(2), 1);
    }

    #[test]
    fn test_missed_faces_are_not_greeted() {
        let dir = tempfile::tempdir().unwrap();
        let start = at(2026, 10, 18, 12, 0, 0);
        let mut stats = StatsStore::open(dir.path(), start.date_naive()).unwrap();
        let mut greeter = greeter(&stats);

        greeter.process_frame(&mut stats, &frame(&[(10.0, 10.0)], start));
        let gone = FrameDetections::empty(start + chrono::Duration::seconds(120));
        let report = greeter.process_frame(&mut stats, &gone);
        assert_eq!(report.live_faces, 1);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_midnight_rollover_starts_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let evening = at(2026, 10, 18, 23, 59, 0);
        let mut stats = StatsStore::open(dir.path(), evening.date_naive()).unwrap();
        let mut greeter = greeter(&stats);

        greeter.process_frame(&mut stats, &frame(&[(10.0, 10.0)], evening));
        let morning = at(2026, 10, 19, 0, 0, 30);
        let report = greeter.process_frame(&mut stats, &frame(&[(11.0, 10.0)], morning));
        assert_eq!(report.events.len(), 1);
        assert_eq!(stats.current().date, morning.date_naive());
        assert_eq!(stats.current().total_greetings, 1);
        assert_eq!(stats.load(evening.date_naive()).total_greetings, 1);
    }

    #[test]
    fn test_restart_continues_face_ids() {
        let dir = tempfile::tempdir().unwrap();
        let start = at(2026, 10, 18, 9, 0, 0);
        {
            let mut stats = StatsStore::open(dir.path(), start.date_naive()).unwrap();
            let mut greeter = greeter(&stats);
            greeter.process_frame(&mut stats, &frame(&[(10.0, 10.0), (300.0, 10.0)], start));
        }

        let mut stats = StatsStore::open(dir.path(), start.date_naive()).unwrap();
        let mut greeter = greeter(&stats);
        let report = greeter.process_frame(&mut stats, &frame(&[(10.0, 10.0)], start));
        assert_eq!(report.new_faces, vec![3]);
        assert_eq!(stats.current().total_greetings, 3);
        assert_eq!(stats.current().count_for(3), 1);
    }

    #[test]
    fn test_stats_failure_does_not_undo_greeting() {
        let dir = tempfile::tempdir().unwrap();
        let stats_dir = dir.path().join("stats");
        let start = at(2026, 10, 18, 12, 0, 0);
        let mut stats = StatsStore::open(&stats_dir, start.date_naive()).unwrap();
        let mut greeter = greeter(&stats);
        std::fs::remove_dir_all(&stats_dir).unwrap();

        let report = greeter.process_frame(&mut stats, &frame(&[(10.0, 10.0)], start));
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.stats_errors.len(), 1);
        assert_eq!(greeter.tracker().get(1).unwrap().greeting_count, 1);
        assert_eq!(stats.current().total_greetings, 1);
    }
}
