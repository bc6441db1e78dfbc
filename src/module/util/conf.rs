//! Config Handler.

use serde::{Deserialize, Serialize};

/// Provides TOML config file handling.
pub mod toml {

    use super::DEFAULT_CONFIG;
    use crate::module::define;
    use crate::module::error::Result;
    use std::fs::{self, File};
    use std::io::prelude::*;
    use std::path::Path;

    /// Loads a configuration file from the given directory.
    /// If not found, generates a default config file.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file is located or should be created.
    ///
    pub fn load(dir: &str) -> Result<super::Config> {
        // Check if the config file exists
        let path = Path::new(dir).join(define::path::CONF_FILE);
        let exist: bool = path.is_file();

        if !exist {
            // Create the default config if it doesn't exist
            fs::create_dir_all(dir)?;
            let config: super::Config = toml::from_str(DEFAULT_CONFIG)?;
            save(dir, &config)?;
            log::info!("Default config written to {}", path.display());
        }

        // Load the config
        let conf_str: String = fs::read_to_string(&path)?;
        let conf: super::Config = toml::from_str(&conf_str)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Saves a configuration file to the given directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file should be saved.
    /// * `conf` - The configuration data to be saved.
    ///
    pub fn save(dir: &str, conf: &super::Config) -> Result<()> {
        let toml_str = toml::to_string(conf)?;
        let path = crate::module::util::path::join(&[dir, define::path::CONF_FILE]);
        let mut file = File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }
}

/// Represents the configuration data structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub system: System,
    pub extract: Extract,
    pub classify: Classify,
    pub dataset: Dataset,
    pub model: Model,
}

impl Config {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> crate::module::error::Result<()> {
        use crate::module::error::Error;
        if self.extract.tolerance < 0.0 {
            return Err(Error::Config("extract.tolerance must be non-negative".into()));
        }
        if self.extract.zones.is_empty() {
            return Err(Error::Config("extract.zones needs at least one zone".into()));
        }
        if self.extract.target_size == 0 || self.extract.truck_size == 0 {
            return Err(Error::Config(
                "extract.target_size and extract.truck_size must be positive".into(),
            ));
        }
        if self.classify.workers == 0 {
            return Err(Error::Config("classify.workers must be at least 1".into()));
        }
        Ok(())
    }
}

/// Represents system-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct System {
    pub data_dir: String,
    pub log_level: String,
}

/// Represents extraction-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Extract {
    pub video_path: String,
    pub output_dir: String,
    pub zones: Vec<[[i32; 2]; 4]>,
    pub tolerance: f32,
    pub target_size: u32,
    pub truck_size: u32,
    pub large_classes: Vec<u32>,
    pub vehicle_classes: Vec<u32>,
    pub max_missing: u32,
    pub track_ttl_frames: u64,
}

/// Represents classification-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Classify {
    pub watch_dir: String,
    pub results_dir: String,
    pub workers: usize,
    pub constants_path: String,
    pub backlog_scan: bool,
}

/// Represents dataset-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Dataset {
    pub path: String,
    pub report_path: String,
}

/// Represents model-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Model {
    pub detector: String,
    pub detector_size: u32,
    pub tier1: String,
    pub tier1_labels: String,
    pub pc: String,
    pub pc_labels: String,
    pub classifier_size: u32,
    pub detect_threshold: f32,
    pub tier1_threshold: f32,
    pub pc_threshold: f32,
    pub iou_threshold: f32,
}

// Default configuration data in TOML format
const DEFAULT_CONFIG: &str = r#"
[system]
  data_dir = 'shared' # Directory for logs and runtime data
  log_level = 'info' # Log level (e.g., 'info', 'debug')

[extract]
  video_path = 'shared/input/frames' # Directory of decoded video frames
  output_dir = 'shared/images' # Captured vehicle images
  zones = [[[13, 322], [221, 231], [853, 566], [932, 278]]] # Detection zones
  tolerance = 10.0 # Vertical tolerance around the crossing line in pixels
  target_size = 224 # Crop size for regular vehicles
  truck_size = 448 # Crop size for large vehicles
  large_classes = [5, 7] # Detector classes using the large crop (bus, truck)
  vehicle_classes = [2, 3, 5, 7] # Detector classes to track (car, motorcycle, bus, truck)
  max_missing = 30 # Frames a track may be unseen before its id is retired
  track_ttl_frames = 0 # Evict dedup state after this many unseen frames (0 = never)

[classify]
  watch_dir = 'shared/images' # Directory watched for new images
  results_dir = 'results' # Root of the classified image tree
  workers = 5 # Number of classification workers
  constants_path = 'asset/constants.csv' # Fuel and emission constants per tier
  backlog_scan = true # Enqueue images already present at startup

[dataset]
  path = 'shared/vehicle_data.csv' # Shared dataset file
  report_path = 'shared/report.html' # Generated HTML report

[model]
  detector = 'asset/model/vehicle_yolov8.onnx' # Vehicle detector
  detector_size = 640 # Detector input resolution
  tier1 = 'asset/model/tier1_yolov8.onnx' # Tier1 classifier
  tier1_labels = 'asset/model/tier1.txt' # Tier1 labels, one per line
  pc = 'asset/model/pc_yolov8.onnx' # Passenger car subclassifier
  pc_labels = 'asset/model/pc.txt' # PC labels, one per line
  classifier_size = 224 # Classifier input resolution
  detect_threshold = 0.05 # Detector confidence threshold
  tier1_threshold = 0.05 # Tier1 confidence threshold
  pc_threshold = 0.10 # PC confidence threshold
  iou_threshold = 0.2 # Track association IoU threshold
"#;
