//! Descriptive metadata attached to measurements and instruments
pub mod detector_type;
pub mod tags;

pub use crate::meta::detector_type::DetectorType;
pub use crate::meta::tags::{OccupancyStatus, SourceType};
