//! Read, write and manipulate gamma-ray spectroscopy files.
//!
//! A [`SpecFile`] holds any number of [`Measurement`]s, each a spectrum of gamma counts
//! from one detector over one time interval plus optional neutron counts, identified by a
//! sample number and a detector name. Measurements share [`EnergyCalibration`]s mapping
//! channels to energies.
//!
//! Files are read with [`SpecFile::from_path`] or [`io::decode_auto`], which detect the
//! format from the content, and written with [`SpecFile::write_to`] or the `write_<format>`
//! functions in [`io`].
pub mod calibration;
pub mod error;
pub mod io;
pub mod measurement;
pub mod meta;
pub mod prelude;
pub mod spec_file;

pub use crate::calibration::{CalibrationOptions, EnergyCalType, EnergyCalibration};
pub use crate::error::{SpecError, SpecResult};
pub use crate::measurement::{Measurement, Position};
pub use crate::meta::{DetectorType, OccupancyStatus, SourceType};
pub use crate::spec_file::{CleanupOptions, FileProperties, MeasurementId, SpecFile};

pub use crate::io::{decode_auto, encode, SpectrumCodec, SpectrumFileFormat};
