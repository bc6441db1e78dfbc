//! Path Operations Module
//!
//! This module handles path operations for directories and files.

use std::path::{Path, PathBuf};

/// Join Paths
///
/// This function takes a slice of strings as input and joins them into a single path string.
/// It uses the PathBuf type to handle platform-specific separators and conversions.
pub fn join(paths: &[&str]) -> String {
    let mut path: PathBuf = PathBuf::new();
    for p in paths {
        path.push(p);
    }
    path.to_string_lossy().into_owned()
}

/// File name of a path as an owned string, if it has one.
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Whether the path carries one of the accepted image extensions (case-insensitive).
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| crate::module::define::path::IMAGE_EXTS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub mod dir {
    //! Directory Operations Submodule
    //!
    //! This submodule provides functions for directory operations.

    use std::fs;
    use std::path::Path;

    use super::AppPath;
    use crate::module::define;
    use crate::module::error::Result;
    use crate::module::util::conf::Config;

    /// Create Directory from Path List
    ///
    /// This function takes a slice of strings as input and creates a directory with the joined path.
    /// It returns the joined path if the directory exists afterwards.
    pub fn create_dir_from_path_list(paths: &[&str]) -> Result<String> {
        let path = super::join(paths);
        fs::create_dir_all(Path::new(&path))?;
        Ok(path)
    }

    /// Create Application Directories and Paths
    ///
    /// This function creates every directory the services write into and
    /// returns an `AppPath` holding them.
    pub fn create_app_sub_dir(conf: &Config) -> Result<AppPath> {
        let data = create_dir_from_path_list(&[&conf.system.data_dir])?;
        let log = create_dir_from_path_list(&[&data, define::path::LOG_DIR])?;
        let images = create_dir_from_path_list(&[&conf.extract.output_dir])?;
        let watch = create_dir_from_path_list(&[&conf.classify.watch_dir])?;
        let results = create_dir_from_path_list(&[&conf.classify.results_dir])?;
        Ok(AppPath {
            log,
            images,
            watch,
            results,
            dataset: conf.dataset.path.clone(),
            report: conf.dataset.report_path.clone(),
        })
    }
}

/// Paths of Resources
///
/// This struct represents the paths of the resources used by the application.
#[derive(Debug, Clone)]
pub struct AppPath {
    /// Log Directory Path
    pub log: String,
    /// Captured Image Directory Path
    pub images: String,
    /// Watched Directory Path
    pub watch: String,
    /// Classified Image Root Path
    pub results: String,
    /// Dataset File Path
    pub dataset: String,
    /// Report File Path
    pub report: String,
}
