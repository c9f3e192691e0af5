//! Frame-to-frame face identity tracker.
//!
//! Correlates each frame's detections with the live face set using a greedy
//! lowest-cost assignment. Cost is the center distance (optionally against a
//! velocity-predicted center) scaled by the size ratio between the boxes.

use crate::types::{distance, BoundingBox, Timestamp, TrackedFace};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum center distance in pixels for a detection to match a face.
    pub match_distance_threshold: f32,
    /// Maximum side-wise size ratio (>= 1.0) for a detection to match a face.
    pub match_size_ratio_threshold: f32,
    /// A face is evicted once it has missed more than this many consecutive frames.
    pub max_missed_frames: u32,
    /// Optional wall-clock ceiling on absence, checked in addition to the frame count.
    pub max_missed_duration: Option<Duration>,
    /// Match against the center extrapolated from the face's velocity as well.
    pub velocity_prediction: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance_threshold: 60.0,
            match_size_ratio_threshold: 1.5,
            max_missed_frames: 15, // 0.5s at 30fps
            max_missed_duration: None,
            velocity_prediction: true,
        }
    }
}

/// Result of feeding one frame into the tracker.
#[derive(Debug, Clone)]
pub struct FrameUpdate {
    /// Tracker frame index of this update (first frame is 1).
    pub frame: u64,
    /// All live faces after the update in ascending id order, with whether
    /// each was created in this frame.
    pub faces: Vec<(TrackedFace, bool)>,
    /// Ids removed in this frame. They are never returned again.
    pub evicted: Vec<u64>,
}

impl FrameUpdate {
    pub fn new_ids(&self) -> Vec<u64> {
        self.faces
            .iter()
            .filter(|(_, is_new)| *is_new)
            .map(|(face, _)| face.id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f32,
    face_id: u64,
    det_idx: usize,
}

/// Owns the live set of tracked faces, indexed by id.
pub struct Tracker {
    config: TrackerConfig,
    faces: BTreeMap<u64, TrackedFace>,
    next_id: u64,
    frame: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_first_id(config, 1)
    }

    /// Start id allocation at `first_id` (clamped to at least 1).
    pub fn with_first_id(config: TrackerConfig, first_id: u64) -> Self {
        Self {
            config,
            faces: BTreeMap::new(),
            next_id: first_id.max(1),
            frame: 0,
        }
    }

    pub fn get(&self, id: u64) -> Option<&TrackedFace> {
        self.faces.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut TrackedFace> {
        self.faces.get_mut(&id)
    }

    /// Index of the most recently processed frame (0 before the first update).
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Id the next new face will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Feed one frame's detections into the tracker.
    ///
    /// An empty `detections` slice is a normal frame: every live face ages by one
    /// missed frame and nothing is created.
    pub fn update(&mut self, detections: &[BoundingBox], now: Timestamp) -> FrameUpdate {
        self.frame += 1;
        let frame = self.frame;

        let matches = self.assign(detections);

        let mut matched_faces = BTreeSet::new();
        let mut matched_dets = vec![false; detections.len()];
        for &(face_id, det_idx) in &matches {
            matched_faces.insert(face_id);
            matched_dets[det_idx] = true;
            if let Some(face) = self.faces.get_mut(&face_id) {
                observe(face, detections[det_idx], frame, now);
            }
        }

        let mut evicted = Vec::new();
        for face in self.faces.values_mut() {
            if matched_faces.contains(&face.id) {
                continue;
            }
            face.missed_frames += 1;
            if should_evict(&self.config, face, now) {
                evicted.push(face.id);
            }
        }
        for id in &evicted {
            if let Some(face) = self.faces.remove(id) {
                tracing::debug!(
                    face_id = face.id,
                    missed_frames = face.missed_frames,
                    last_seen_frame = face.last_seen_frame,
                    "face evicted"
                );
            }
        }

        let mut created = BTreeSet::new();
        for (det_idx, det) in detections.iter().enumerate() {
            if matched_dets[det_idx] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            tracing::debug!(face_id = id, bbox = ?det, frame, "new face");
            self.faces.insert(id, TrackedFace::new(id, *det, frame, now));
            created.insert(id);
        }

        let faces = self
            .faces
            .values()
            .map(|face| (face.clone(), created.contains(&face.id)))
            .collect();

        FrameUpdate {
            frame,
            faces,
            evicted,
        }
    }

    /// Greedy assignment: repeatedly take the cheapest acceptable pair whose face
    /// and detection are both still free. Ties go to the lower face id, then the
    /// lower detection index, so identical input always yields identical ids.
    fn assign(&self, detections: &[BoundingBox]) -> Vec<(u64, usize)> {
        let mut candidates = Vec::new();
        for face in self.faces.values() {
            for (det_idx, det) in detections.iter().enumerate() {
                if let Some(cost) = self.match_cost(face, det) {
                    candidates.push(Candidate {
                        cost,
                        face_id: face.id,
                        det_idx,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then(a.face_id.cmp(&b.face_id))
                .then(a.det_idx.cmp(&b.det_idx))
        });

        let mut taken_faces = BTreeSet::new();
        let mut taken_dets = vec![false; detections.len()];
        let mut matches = Vec::new();
        for c in candidates {
            if taken_faces.contains(&c.face_id) || taken_dets[c.det_idx] {
                continue;
            }
            taken_faces.insert(c.face_id);
            taken_dets[c.det_idx] = true;
            matches.push((c.face_id, c.det_idx));
        }
        matches
    }

    /// Cost of assigning `det` to `face`, or `None` if the pair is outside the
    /// distance or size gates.
    fn match_cost(&self, face: &TrackedFace, det: &BoundingBox) -> Option<f32> {
        let det_center = det.center();
        let last_center = face.bbox.center();
        let mut dist = distance(last_center, det_center);

        if self.config.velocity_prediction {
            let steps = (face.missed_frames + 1) as f32;
            let predicted = (
                last_center.0 + face.velocity.0 * steps,
                last_center.1 + face.velocity.1 * steps,
            );
            dist = dist.min(distance(predicted, det_center));
        }

        let ratio = face.bbox.size_ratio(det);
        if !dist.is_finite()
            || !ratio.is_finite()
            || dist > self.config.match_distance_threshold
            || ratio > self.config.match_size_ratio_threshold
        {
            return None;
        }
        Some(dist * ratio)
    }
}

/// Apply a matched detection to a face.
fn observe(face: &mut TrackedFace, det: BoundingBox, frame: u64, now: Timestamp) {
    let (old_x, old_y) = face.bbox.center();
    let (new_x, new_y) = det.center();
    // Per-frame displacement; equals new - old when the face was seen last frame.
    let elapsed = frame.saturating_sub(face.last_seen_frame).max(1) as f32;
    face.velocity = ((new_x - old_x) / elapsed, (new_y - old_y) / elapsed);
    face.bbox = det;
    face.last_seen_frame = frame;
    face.last_seen_time = now;
    face.missed_frames = 0;
}

fn should_evict(config: &TrackerConfig, face: &TrackedFace, now: Timestamp) -> bool {
    if face.missed_frames > config.max_missed_frames {
        return true;
    }
    match config.max_missed_duration {
        // A clock that went backwards reads as no time elapsed.
        Some(limit) => (now - face.last_seen_time)
            .to_std()
            .map(|absent| absent > limit)
            .unwrap_or(false),
        None => false,
    }
}
