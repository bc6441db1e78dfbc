//! Frame Sources
//!
//! Video decoding happens outside this crate; a source here yields already
//! decoded frames in video order.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::module::error::{Error, Result};
use crate::module::util::path::is_image;

/// Ordered stream of frames.
pub trait FrameSource {
    /// Next frame, `None` once the video is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// A directory of frame images read in lexical file name order.
#[derive(Debug)]
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    /// Open the sequence. Fails when the directory is missing or holds no frames.
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::VideoSource(format!("can't open {}: {}", dir.display(), e))
        })?;
        let mut frames: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        if frames.is_empty() {
            return Err(Error::VideoSource(format!(
                "no frames in {}",
                dir.display()
            )));
        }
        frames.sort();
        log::info!("Opened {} frames from {}", frames.len(), dir.display());
        Ok(Self { frames, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let path = match self.frames.get(self.cursor) {
            Some(path) => path,
            None => return Ok(None),
        };
        self.cursor += 1;
        Ok(Some(image::open(path)?.to_rgb8()))
    }
}

/// In-memory frames, mostly for synthetic videos.
impl FrameSource for std::vec::IntoIter<RgbImage> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ImageSequence::open(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::VideoSource(_)));
    }

    #[test]
    fn empty_directory_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequence::open(tmp.path()),
            Err(Error::VideoSource(_))
        ));
    }

    #[test]
    fn frames_come_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        for (name, shade) in [("0002.png", 2u8), ("0000.png", 0), ("0001.png", 1)] {
            RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 0]))
                .save(tmp.path().join(name))
                .unwrap();
        }
        std::fs::write(tmp.path().join("readme.txt"), "x").unwrap();
        let mut seq = ImageSequence::open(tmp.path()).unwrap();
        assert_eq!(seq.len(), 3);
        for shade in 0..3u8 {
            let frame = seq.next_frame().unwrap().unwrap();
            assert_eq!(frame.get_pixel(0, 0)[0], shade);
        }
        assert!(seq.next_frame().unwrap().is_none());
    }
}
