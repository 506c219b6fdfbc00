//! Energy calibrations map fractional channel indices to energies (keV) and back.
//!
//! Three calibration kinds are supported, polynomial, full range fraction and explicit
//! lower channel energies, each optionally corrected by a set of deviation pairs.
//! Calibrations are immutable values; records share them by [`std::sync::Arc`] and compare
//! them by value.
pub mod deviation;
pub mod energy;
pub mod rebin;

pub use crate::calibration::deviation::DeviationCorrection;
pub use crate::calibration::energy::{
    frf_to_polynomial, polynomial_to_frf, CalibrationOptions, EnergyCalType, EnergyCalibration,
};
pub use crate::calibration::rebin::rebin;
