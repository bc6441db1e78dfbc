//! This module contains all the sub-modules of the project.

pub mod classify; // Classify module: Watch queue, worker pool and per-image classification pipeline.
pub mod dataset; // Dataset module: Shared vehicle dataset file.
pub mod define; // Definition module: Contains definitions and constants used throughout the project.
pub mod error; // Error module: Crate error type.
pub mod extract; // Extract module: Zone-crossing capture of vehicle images.
pub mod report; // Report module: HTML summary of the dataset.
pub mod util; // Utility module: Provides various utility functions and helpers.
pub mod vision; // Vision module: Zones, detection, tracking and frame sources.
