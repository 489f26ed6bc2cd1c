//! Utility modules for solo

pub mod errors;
pub mod logger;
pub mod prereqs;
pub mod progress;

// Re-export commonly used items
pub use errors::{SoloError, SoloResult};
pub use logger::{log_error, log_info, log_warn};
pub use prereqs::{CommonPrereqs, Prerequisite};
