use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Wall-clock time of a frame, in the process's local timezone.
pub type Timestamp = DateTime<Local>;

/// Axis-aligned bounding box for a detected face, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Area in square pixels; zero for boxes with a non-positive side.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Largest side-wise ratio between two boxes (always >= 1.0).
    ///
    /// Degenerate boxes (zero or negative sides) compare as infinitely different.
    pub fn size_ratio(&self, other: &BoundingBox) -> f32 {
        fn ratio(a: f32, b: f32) -> f32 {
            if a <= 0.0 || b <= 0.0 {
                return f32::INFINITY;
            }
            if a > b {
                a / b
            } else {
                b / a
            }
        }
        ratio(self.width, other.width).max(ratio(self.height, other.height))
    }
}

/// Euclidean distance between two points.
pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// A single-frame observation produced by the external detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub timestamp: Timestamp,
}

/// All detections for one captured frame.
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub boxes: Vec<BoundingBox>,
    pub timestamp: Timestamp,
}

impl FrameDetections {
    pub fn new(boxes: Vec<BoundingBox>, timestamp: Timestamp) -> Self {
        Self { boxes, timestamp }
    }

    /// A frame in which the detector found nothing.
    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            boxes: Vec::new(),
            timestamp,
        }
    }

    pub fn detections(&self) -> impl Iterator<Item = Detection> + '_ {
        self.boxes.iter().map(|bbox| Detection {
            bbox: *bbox,
            timestamp: self.timestamp,
        })
    }
}

/// A face identity kept stable across consecutive frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFace {
    pub id: u64,
    pub bbox: BoundingBox,
    /// Center displacement between the two most recent matched observations.
    pub velocity: (f32, f32),
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub last_seen_time: Timestamp,
    /// Consecutive frames with no matching detection.
    pub missed_frames: u32,
    pub greeting_count: u32,
    pub last_greeted_time: Option<Timestamp>,
    pub last_greeted_frame: Option<u64>,
}

impl TrackedFace {
    pub fn new(id: u64, bbox: BoundingBox, frame: u64, now: Timestamp) -> Self {
        Self {
            id,
            bbox,
            velocity: (0.0, 0.0),
            first_seen_frame: frame,
            last_seen_frame: frame,
            last_seen_time: now,
            missed_frames: 0,
            greeting_count: 0,
            last_greeted_time: None,
            last_greeted_frame: None,
        }
    }

    /// Whether a detection was matched to this face in `frame`.
    pub fn is_visible_in(&self, frame: u64) -> bool {
        self.missed_frames == 0 && self.last_seen_frame == frame
    }
}

/// Which greeting clip a decision selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// The n-th configured greeting (1-based).
    Sequential(u32),
    Default,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Sequential(n) => write!(f, "{n}"),
            Variant::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Greeted less than the cooldown ago.
    Cooldown,
    /// Already greeted during this frame.
    AlreadyGreetedThisFrame,
    /// First frame of a new identity while new-face greetings are off.
    NewFaceSuppressed,
    /// Not matched to a detection in the current frame.
    NotVisible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetingDecision {
    Skip(SkipReason),
    Greet { variant: Variant, clip: String },
}

impl GreetingDecision {
    pub fn is_greet(&self) -> bool {
        matches!(self, GreetingDecision::Greet { .. })
    }
}

/// Emitted once per greet decision for the audio/photo collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreetingEvent {
    pub face_id: u64,
    pub variant: Variant,
    /// Clip path or phrase the audio side effect should play.
    pub clip: String,
    pub timestamp: Timestamp,
    pub bbox: BoundingBox,
    /// The face's greeting count including this greeting.
    pub greeting_count: u32,
}
