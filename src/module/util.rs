//! Configuration, start-up resources and path helpers shared by both services.

pub mod conf; // emitrack.toml handling
pub mod init; // Config + directories bundled into AppProperty
pub mod path; // Path joins, image filters, app directories
