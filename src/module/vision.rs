//! Processing related to visual information.
//!
pub mod detector;
pub mod source;
pub mod tracker;
pub mod zone;
