//! Detection input: one JSON object per frame, produced by an external detector.
//!
//! ```text
//! {"boxes": [[x, y, w, h], ...], "timestamp": "2026-10-18T12:00:00+02:00"}
//! ```
//!
//! `timestamp` is optional; frames without one are stamped with the local
//! clock when read.

use chrono::{DateTime, FixedOffset, Local};
use greetcam_core::{BoundingBox, FrameDetections, Timestamp};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open detection input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read detection input: {0}")]
    Read(#[from] std::io::Error),
}

/// Yields one frame's detections at a time.
pub trait DetectionSource {
    /// Next frame, or `None` once the input is exhausted.
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct FrameLine {
    #[serde(default)]
    boxes: Vec<[f32; 4]>,
    #[serde(default)]
    timestamp: Option<DateTime<FixedOffset>>,
}

pub struct JsonLinesSource {
    reader: Box<dyn BufRead + Send>,
    line: String,
    line_no: u64,
    clock: fn() -> Timestamp,
}

impl JsonLinesSource {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            line: String::new(),
            line_no: 0,
            clock: Local::now,
        }
    }

    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "reading detections from file");
        Ok(Self::new(BufReader::new(file)))
    }

    pub fn stdin() -> Self {
        tracing::info!("reading detections from stdin");
        Self::new(BufReader::new(std::io::stdin()))
    }

    fn parse(&self, line: &str) -> FrameDetections {
        let now = (self.clock)();
        let parsed: FrameLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    line = self.line_no,
                    error = %e,
                    "malformed detection line; treating as empty frame"
                );
                return FrameDetections::empty(now);
            }
        };

        let timestamp = parsed
            .timestamp
            .map(|t| t.with_timezone(&Local))
            .unwrap_or(now);
        let boxes = parsed
            .boxes
            .into_iter()
            .map(|[x, y, w, h]| BoundingBox::new(x, y, w, h))
            .filter(|b| {
                let usable = [b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite())
                    && b.area() > 0.0;
                if !usable {
                    tracing::debug!(line = self.line_no, bbox = ?b, "dropping degenerate box");
                }
                usable
            })
            .collect();
        FrameDetections::new(boxes, timestamp)
    }
}

impl DetectionSource for JsonLinesSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, SourceError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(self.parse(line)));
        }
    }
}
