//! Provide Object Detection
//!
pub mod onnx {
    use image::{imageops::FilterType, DynamicImage, ImageBuffer, Pixel, Rgb};
    use ndarray::{s, Array, Axis, IxDyn};
    use ort::{
        environment::Environment, value::Value, ExecutionProvider, GraphOptimizationLevel,
        LoggingLevel, Session, SessionBuilder,
    };
    use std::path::Path;

    use super::{Classifier, Detection};
    use crate::module::vision::tracker::BBox;
    use crate::module::error::{Error, Result};

    /// YoloV8 session store.
    ///
    pub struct YoloV8 {
        pub session: Session,
        pub imgsz: u32,
        pub threshold: f32,
    }

    /// Methods for yolov8.
    ///
    impl YoloV8 {
        /// yolov8's constructor.
        ///
        pub fn new(name: &str, model_path: &str, imgsz: u32, threshold: f32) -> Result<Self> {
            Ok(Self {
                session: Self::get_session(name, model_path)?,
                imgsz,
                threshold,
            })
        }
        /// get session
        ///
        pub fn get_session(name: &str, model_path: &str) -> Result<Session> {
            let environment = Environment::builder()
                .with_name(name)
                .with_log_level(LoggingLevel::Warning)
                .with_execution_providers([ExecutionProvider::CPU(Default::default())])
                .build()?
                .into_arc();
            let session = SessionBuilder::new(&environment)?
                .with_optimization_level(GraphOptimizationLevel::Level1)?
                .with_intra_threads(4)?
                .with_model_from_file(model_path)?;
            Ok(session)
        }
        /// Infer on an image file.
        ///
        pub fn infer(&self, impath: &Path) -> Result<Vec<Detection>> {
            let img = image::open(impath)?;
            self.infer_image(&img)
        }
        /// Infer on a decoded image. Boxes are returned in source image coordinates.
        ///
        pub fn infer_image(&self, src: &DynamicImage) -> Result<Vec<Detection>> {
            let sz = self.imgsz;
            // Resize to model's shape, converting to RGB format
            let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
                src.resize_exact(sz, sz, FilterType::Nearest).to_rgb8();

            let array = ndarray::CowArray::from(
                ndarray::Array::from_shape_fn((1, 3, sz as usize, sz as usize), |(_, c, j, i)| {
                    let pixel = img.get_pixel(i as u32, j as u32);
                    let channels = pixel.channels();
                    // normalize
                    // range [0, 255] -> range [0, 1]
                    (channels[c] as f32) / 255.0
                })
                .into_dyn(),
            );

            let tensor = vec![Value::from_array(self.session.allocator(), &array)?];

            let outs = self.session.run(tensor)?;
            let out = outs
                .get(0)
                .ok_or_else(|| Error::Inference("model produced no output".into()))?
                .try_extract::<f32>()?
                .view()
                .t()
                .into_owned();
            let scale = (
                src.width() as f32 / sz as f32,
                src.height() as f32 / sz as f32,
            );
            Ok(convert_yolo_fmt(out, self.threshold)
                .into_iter()
                .map(|det| rescale(det, scale))
                .collect())
        }
    }

    /// Detector-backed classifier. The class of the most confident box is the label.
    ///
    pub struct YoloClassifier {
        pub detector: YoloV8,
        pub labels: Vec<String>,
    }

    impl YoloClassifier {
        /// Loads the model and its labels file (one label per line).
        pub fn new(
            name: &str,
            model_path: &str,
            labels_path: &str,
            imgsz: u32,
            threshold: f32,
        ) -> Result<Self> {
            let labels = super::load_labels(Path::new(labels_path))?;
            log::info!("Classifier {} loaded with {} labels", name, labels.len());
            Ok(Self {
                detector: YoloV8::new(name, model_path, imgsz, threshold)?,
                labels,
            })
        }
    }

    impl Classifier for YoloClassifier {
        fn classify(&self, path: &Path) -> Result<Option<String>> {
            let dets = self.detector.infer(path)?;
            Ok(dets.first().map(|det| {
                self.labels
                    .get(det.cls as usize)
                    .cloned()
                    .unwrap_or_else(|| det.cls.to_string())
            }))
        }
    }

    fn rescale(det: Detection, (sx, sy): (f32, f32)) -> Detection {
        let x1 = (det.x1 as f32 * sx) as u32;
        let y1 = (det.y1 as f32 * sy) as u32;
        let x2 = (det.x2 as f32 * sx) as u32;
        let y2 = (det.y2 as f32 * sy) as u32;
        Detection {
            x1,
            y1,
            x2,
            y2,
            xc: det.xc * sx,
            yc: det.yc * sy,
            w: x2.saturating_sub(x1),
            h: y2.saturating_sub(y1),
            ..det
        }
    }

    pub(super) fn convert_yolo_fmt(out: Array<f32, IxDyn>, threshold: f32) -> Vec<Detection> {
        // https://github.com/AndreyGermanov/yolov8_onnx_rust
        let mut bboxes = vec![];
        let output = out.slice(s![.., .., 0]);
        for row in output.axis_iter(Axis(0)) {
            let row: Vec<_> = row.iter().copied().collect();
            let best = row
                .iter()
                .skip(4)
                .enumerate()
                .map(|(index, value)| (index, *value))
                .reduce(|accum, row| if row.1 > accum.1 { row } else { accum });
            let (class_id, prob) = match best {
                Some(best) => best,
                None => continue,
            };
            if prob < threshold {
                continue;
            }
            let cls = class_id as u32;
            let xc = row[0];
            let yc = row[1];
            let w = row[2];
            let h = row[3];
            let x1 = (xc - w / 2.0).max(0.0) as u32;
            let x2 = (xc + w / 2.0).max(0.0) as u32;
            let y1 = (yc - h / 2.0).max(0.0) as u32;
            let y2 = (yc + h / 2.0).max(0.0) as u32;
            bboxes.push(Detection {
                x1,
                y1,
                x2,
                y2,
                xc,
                yc,
                cls,
                prob,
                w: w as u32,
                h: h as u32,
            })
        }
        bboxes.sort_by(|box1, box2| box2.prob.total_cmp(&box1.prob));
        merge_bboxes(bboxes)
    }

    /// Merges bounding boxes of the same class whose IoU is greater than or equal to 0.7.
    ///
    pub(super) fn merge_bboxes(bboxes: Vec<Detection>) -> Vec<Detection> {
        let mut merged_bboxes = Vec::new();
        let mut used = vec![false; bboxes.len()];
        for i in 0..bboxes.len() {
            if used[i] {
                continue;
            }
            let mut merged_bbox = bboxes[i].clone();
            used[i] = true;
            for j in 0..bboxes.len() {
                if used[j] || bboxes[i].cls != bboxes[j].cls {
                    continue;
                }
                if BBox::from(&bboxes[i]).iou(&BBox::from(&bboxes[j])) >= 0.7 {
                    let x1 = merged_bbox.x1.min(bboxes[j].x1);
                    let y1 = merged_bbox.y1.min(bboxes[j].y1);
                    let x2 = merged_bbox.x2.max(bboxes[j].x2);
                    let y2 = merged_bbox.y2.max(bboxes[j].y2);
                    let w = x2 - x1;
                    let h = y2 - y1;
                    merged_bbox = Detection {
                        x1,
                        y1,
                        x2,
                        y2,
                        xc: x1 as f32 + w as f32 / 2.0,
                        yc: y1 as f32 + h as f32 / 2.0,
                        w,
                        h,
                        ..merged_bbox
                    };
                    used[j] = true;
                }
            }
            merged_bboxes.push(merged_bbox);
        }
        merged_bboxes
    }
}

use crate::module::error::Result;
use std::path::Path;

/// Image-to-label model. `None` means the model found nothing.
///
pub trait Classifier: Send + Sync {
    fn classify(&self, path: &Path) -> Result<Option<String>>;
}

/// Per-frame object detector.
///
pub trait Detector {
    fn detect(&self, frame: &image::RgbImage) -> Result<Vec<Detection>>;
}

impl Detector for onnx::YoloV8 {
    fn detect(&self, frame: &image::RgbImage) -> Result<Vec<Detection>> {
        self.infer_image(&image::DynamicImage::ImageRgb8(frame.clone()))
    }
}

/// Read a labels file, one label per line, blank lines skipped.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Detection result
///
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub xc: f32,
    pub yc: f32,
    pub cls: u32,
    pub prob: f32,
    pub w: u32,
    pub h: u32,
}

impl Detection {
    /// Box-only constructor.
    pub fn from_box(x1: u32, y1: u32, x2: u32, y2: u32, cls: u32, prob: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            xc: (x1 + x2) as f32 / 2.0,
            yc: (y1 + y2) as f32 / 2.0,
            cls,
            prob,
            w: x2.saturating_sub(x1),
            h: y2.saturating_sub(y1),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use ndarray::Array;

    #[test]
    fn merge_overlapping_same_class() {
        let a = Detection::from_box(10, 10, 50, 50, 2, 0.9);
        let b = Detection::from_box(11, 11, 51, 51, 2, 0.8);
        let c = Detection::from_box(11, 11, 51, 51, 7, 0.7);
        let merged = onnx::merge_bboxes(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].x1, merged[0].x2), (10, 51));
        assert_eq!(merged[1].cls, 7);
    }

    #[test]
    fn merge_keeps_boxes_below_overlap_threshold() {
        // IoU of these two is 0.6 with exclusive corners
        let a = Detection::from_box(0, 0, 80, 10, 2, 0.9);
        let b = Detection::from_box(20, 0, 100, 10, 2, 0.8);
        assert_eq!(onnx::merge_bboxes(vec![a, b]).len(), 2);
    }

    #[test]
    fn yolo_output_is_thresholded_and_sorted() {
        // layout after transpose: [boxes, 4 + classes, 1]
        let rows: [[f32; 6]; 3] = [
            [100.0, 100.0, 20.0, 20.0, 0.1, 0.6],
            [300.0, 300.0, 40.0, 40.0, 0.9, 0.2],
            [500.0, 500.0, 10.0, 10.0, 0.01, 0.02],
        ];
        let out = Array::from_shape_fn((3, 6, 1), |(b, f, _)| rows[b][f]).into_dyn();
        let dets = onnx::convert_yolo_fmt(out, 0.5);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].cls, 0);
        assert_eq!((dets[0].x1, dets[0].y1, dets[0].x2, dets[0].y2), (280, 280, 320, 320));
        assert_eq!(dets[1].cls, 1);
    }

    #[test]
    fn labels_skip_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("labels.txt");
        std::fs::write(&path, "PC\n\nTruck \nBus\n").unwrap();
        assert_eq!(load_labels(&path).unwrap(), vec!["PC", "Truck", "Bus"]);
    }
}
