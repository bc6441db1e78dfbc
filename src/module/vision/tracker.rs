//! Multi-object tracking.
//!
//! Turns per-frame detections into detections carrying a stable track id.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use image::RgbImage;

use super::detector::{Detection, Detector};
use super::zone::Point;
use crate::module::error::Result;

/// Axis-aligned box in frame pixels, corners inclusive-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Integer midpoint.
    pub fn midpoint(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    fn area(&self) -> f32 {
        ((self.x2 - self.x1).max(0) * (self.y2 - self.y1).max(0)) as f32
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<&Detection> for BBox {
    fn from(det: &Detection) -> Self {
        Self::new(det.x1 as i32, det.y1 as i32, det.x2 as i32, det.y2 as i32)
    }
}

/// One tracked object in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDetection {
    pub track_id: Option<u32>,
    pub cls: u32,
    pub bbox: Option<BBox>,
}

impl TrackedDetection {
    pub fn new(track_id: u32, cls: u32, bbox: BBox) -> Self {
        Self {
            track_id: Some(track_id),
            cls,
            bbox: Some(bbox),
        }
    }
}

/// Source of tracked detections, one call per frame in video order.
pub trait Tracker {
    fn track(&mut self, frame: &RgbImage) -> Result<Vec<TrackedDetection>>;
}

#[derive(Debug, Clone)]
struct Track {
    cls: u32,
    bbox: BBox,
    missing: u32,
}

/// Greedy IoU association on top of a frame detector.
pub struct IouTracker<D: Detector> {
    detector: D,
    classes: Vec<u32>,
    iou_threshold: f32,
    max_missing: u32,
    tracks: HashMap<u32, Track>,
    next_id: u32,
}

impl<D: Detector> IouTracker<D> {
    pub fn new(detector: D, classes: Vec<u32>, iou_threshold: f32, max_missing: u32) -> Self {
        Self {
            detector,
            classes,
            iou_threshold,
            max_missing,
            tracks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Associate detections with live tracks and return them with ids.
    pub fn associate(&mut self, detections: &[Detection]) -> Vec<TrackedDetection> {
        let detections: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.classes.is_empty() || self.classes.contains(&d.cls))
            .collect();

        let mut pairs: Vec<(f32, u32, usize)> = Vec::new();
        for (id, track) in &self.tracks {
            for (idx, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&BBox::from(*det));
                if iou >= self.iou_threshold && iou > 0.0 {
                    pairs.push((iou, *id, idx));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut matched_tracks: HashSet<u32> = HashSet::new();
        let mut assigned: Vec<Option<u32>> = vec![None; detections.len()];
        for (_, id, idx) in pairs {
            if matched_tracks.contains(&id) || assigned[idx].is_some() {
                continue;
            }
            matched_tracks.insert(id);
            assigned[idx] = Some(id);
        }

        for (id, track) in self.tracks.iter_mut() {
            if !matched_tracks.contains(id) {
                track.missing = track.missing.saturating_add(1);
            }
        }

        let mut out = Vec::with_capacity(detections.len());
        for (idx, det) in detections.iter().enumerate() {
            let bbox = BBox::from(*det);
            let id = match assigned[idx] {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            self.tracks.insert(
                id,
                Track {
                    cls: det.cls,
                    bbox,
                    missing: 0,
                },
            );
            out.push(TrackedDetection::new(id, det.cls, bbox));
        }

        let max_missing = self.max_missing;
        self.tracks.retain(|_, t| t.missing <= max_missing);
        out
    }
}

impl<D: Detector> Tracker for IouTracker<D> {
    fn track(&mut self, frame: &RgbImage) -> Result<Vec<TrackedDetection>> {
        let detections = self.detector.detect(frame)?;
        let tracked = self.associate(&detections);
        log::debug!(
            "{} detections, {} live tracks",
            tracked.len(),
            self.tracks.len()
        );
        Ok(tracked)
    }
}
