//! Zone-crossing image extraction.
//!
//! Walks a video frame by frame and saves one crop per tracked vehicle, taken
//! on the first frame its midpoint crosses a detection zone.

pub mod dedup;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{imageops, ImageFormat, RgbImage};

use self::dedup::TrackDeduper;
use crate::module::dataset::{CaptureRecord, DatasetStore};
use crate::module::define;
use crate::module::error::Result;
use crate::module::util::conf::Extract;
use crate::module::vision::source::FrameSource;
use crate::module::vision::tracker::{TrackedDetection, Tracker};
use crate::module::vision::zone::{Point, ZoneSet};

/// Crop rectangle clamped to the frame, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropWindow {
    /// A `size`-wide square centred on `mid`, each edge clamped to the frame.
    ///
    /// `None` when nothing of the window falls inside the frame.
    pub fn centered(mid: Point, size: u32, width: u32, height: u32) -> Option<Self> {
        let half = (size / 2) as i64;
        let (cx, cy) = (mid.x as i64, mid.y as i64);
        let x1 = (cx - half).max(0);
        let x2 = (cx + half).min(width as i64);
        let y1 = (cy - half).max(0);
        let y2 = (cy + half).min(height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// Crop sizes per detector class.
#[derive(Debug, Clone)]
pub struct CropSizes {
    pub target_size: u32,
    pub truck_size: u32,
    pub large_classes: Vec<u32>,
}

impl CropSizes {
    pub fn for_class(&self, cls: u32) -> u32 {
        if self.large_classes.contains(&cls) {
            self.truck_size
        } else {
            self.target_size
        }
    }
}

/// Totals of one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub frames: u64,
    pub captures: usize,
}

/// Drives zone checks, dedup and persistence over a frame stream.
pub struct FrameExtractor {
    zones: ZoneSet,
    sizes: CropSizes,
    deduper: TrackDeduper,
    store: Arc<DatasetStore>,
    output_dir: PathBuf,
    frame_index: u64,
    counter: u64,
}

impl FrameExtractor {
    pub fn new(
        zones: ZoneSet,
        sizes: CropSizes,
        deduper: TrackDeduper,
        store: Arc<DatasetStore>,
        output_dir: &Path,
    ) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        Ok(Self {
            zones,
            sizes,
            deduper,
            store,
            output_dir: output_dir.to_path_buf(),
            frame_index: 0,
            counter: 0,
        })
    }

    /// Build from the `[extract]` section, saving into `output_dir`.
    pub fn from_conf(conf: &Extract, output_dir: &Path, store: Arc<DatasetStore>) -> Result<Self> {
        Self::new(
            ZoneSet::from_conf(conf),
            CropSizes {
                target_size: conf.target_size,
                truck_size: conf.truck_size,
                large_classes: conf.large_classes.clone(),
            },
            TrackDeduper::with_ttl(conf.track_ttl_frames),
            store,
            output_dir,
        )
    }

    /// Process every frame of `source` in order.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        tracker: &mut dyn Tracker,
    ) -> Result<ExtractSummary> {
        let mut summary = ExtractSummary::default();
        while let Some(frame) = source.next_frame()? {
            let detections = tracker.track(&frame)?;
            summary.captures += self.process_frame(&frame, &detections)?.len();
            summary.frames += 1;
        }
        log::info!(
            "Extraction finished: {} images from {} frames saved in {}",
            summary.captures,
            summary.frames,
            self.output_dir.display()
        );
        Ok(summary)
    }

    /// Handle one frame's detections, returning the captures it produced.
    ///
    /// `frame` must be the untouched decoded frame; crops are cut from it.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        detections: &[TrackedDetection],
    ) -> Result<Vec<CaptureRecord>> {
        let frame_idx = self.frame_index;
        self.frame_index += 1;

        let mut captures = vec![];
        for det in detections {
            let (id, bbox) = match (det.track_id, det.bbox) {
                (Some(id), Some(bbox)) => (id, bbox),
                _ => {
                    log::debug!("Frame {}: detection without id or box skipped", frame_idx);
                    continue;
                }
            };
            let mid = bbox.midpoint();
            let crossing = self.zones.is_crossed_by(mid);
            if !self.deduper.should_capture(id, frame_idx, crossing) {
                continue;
            }
            let size = self.sizes.for_class(det.cls);
            let window = match CropWindow::centered(mid, size, frame.width(), frame.height()) {
                Some(window) => window,
                None => {
                    log::warn!("Track {}: crop window outside frame {}", id, frame_idx);
                    self.deduper.rollback(id);
                    continue;
                }
            };
            let record = self.capture(frame, window)?;
            log::info!(
                "Track {} (class {}) captured as {} at frame {}",
                id,
                det.cls,
                record.vehicle,
                frame_idx
            );
            captures.push(record);
        }
        self.deduper.evict_stale(frame_idx);
        Ok(captures)
    }

    fn capture(&mut self, frame: &RgbImage, window: CropWindow) -> Result<CaptureRecord> {
        let crop = imageops::crop_imm(frame, window.x1, window.y1, window.width(), window.height())
            .to_image();

        let partial = self.output_dir.join(format!(
            ".capture-{}.{}",
            std::process::id(),
            define::path::PARTIAL_EXT
        ));
        crop.save_with_format(&partial, ImageFormat::Jpeg)?;

        // The row has to exist before the image shows up in the watched directory.
        let output_dir = &self.output_dir;
        let counter = &mut self.counter;
        let record = match self.store.append_unique(|| next_name(output_dir, counter)) {
            Ok(record) => record,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };
        fs::rename(&partial, self.output_dir.join(&record.vehicle))?;
        Ok(record)
    }
}

// Next `vehicle_<n>.jpg` not present on disk. Names taken in the dataset are
// skipped by the store.
fn next_name(output_dir: &Path, counter: &mut u64) -> String {
    loop {
        let name = format!(
            "{}{}.{}",
            define::path::CAPTURE_PREFIX,
            counter,
            define::path::CAPTURE_EXT
        );
        *counter += 1;
        if !output_dir.join(&name).exists() {
            return name;
        }
    }
}
