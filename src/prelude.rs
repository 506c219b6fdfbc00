//! The types and traits most uses of this crate need, in one import
pub use crate::calibration::{CalibrationOptions, EnergyCalType, EnergyCalibration};
pub use crate::error::{SpecError, SpecResult};
pub use crate::io::{SpectrumCodec, SpectrumFileFormat};
pub use crate::measurement::Measurement;
pub use crate::meta::{DetectorType, OccupancyStatus, SourceType};
pub use crate::spec_file::{CleanupOptions, MeasurementId, SpecFile};
pub use std::io::prelude::*;
