//! Module for Constants and Paths Definitions
//!
//! This module defines various constants and paths used throughout the application.

/// System Constants
pub mod system {
    /// Name of the system
    pub const NAME: &str = "emitrack";
}

/// File Paths
pub mod path {

    // Log Directory
    pub const LOG_DIR: &str = "log";

    // Configuration File
    pub const CONF_FILE: &str = "emitrack.toml";

    // Prefix of captured vehicle images
    pub const CAPTURE_PREFIX: &str = "vehicle_";

    // Extension of captured vehicle images
    pub const CAPTURE_EXT: &str = "jpg";

    // Extension of images while they are being written
    pub const PARTIAL_EXT: &str = "part";

    // Image extensions accepted by the classification queue
    pub const IMAGE_EXTS: [&str; 3] = ["jpg", "jpeg", "png"];
}

/// Dataset Columns
pub mod column {
    pub const VEHICLE: &str = "vehicle";
    pub const TIER1: &str = "classifier-tier1";
    pub const PC: &str = "classifier-PC";
    pub const FUEL: &str = "Fuel";
    pub const FUEL_CONSUMPTION: &str = "Fuel_Consumption";

    /// Header written when the dataset is first created.
    pub const BASE: [&str; 3] = [VEHICLE, TIER1, PC];

    /// Tracked pollutants, in dataset column order.
    pub const POLLUTANTS: [&str; 8] = ["CO", "NMVOC", "NOx", "PM", "N2O", "NH3", "IDP", "BKF"];
}

/// Reference Constants Table Columns
pub mod constants {
    pub const KEY: &str = "Type";
    pub const FUEL: &str = "Fuel";
    pub const CONSUMPTION: &str = "CONSUMO (g/km)";

    // Distance every vehicle is assumed to travel, in km.
    pub const DISTANCE_KM: f64 = 1.0;

    /// Column holding the emission factor of a pollutant.
    pub fn factor_column(pollutant: &str) -> String {
        format!("{} (g/kg fuel)", pollutant)
    }
}

/// Classification Labels
pub mod label {
    // Tier1 label that triggers the passenger car subclassification
    pub const PASSENGER_CAR: &str = "PC";

    // Tier1 label used when the classifier finds nothing
    pub const NO_DETECTION: &str = "No detection";

    // PC label used when the subclassifier finds nothing
    pub const NO_SUBTYPE: &str = "No PC subclass";
}
