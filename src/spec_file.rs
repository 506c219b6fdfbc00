//! The spectrum file container, which owns a set of [`Measurement`](crate::Measurement)s, the
//! instrument metadata describing where they came from, and the indices derived from them.
pub mod cleanup;
pub mod container;
pub mod flags;
pub mod sum;

pub use crate::spec_file::container::{MeasurementId, SpecFile};
pub use crate::spec_file::flags::{CleanupOptions, FileProperties};
