//! The error taxonomy shared by the data model, the container and every codec.
use std::io;

use quick_xml::Error as XMLError;
use thiserror::Error;

use crate::io::SpectrumFileFormat;
use crate::spec_file::MeasurementId;

/// All the ways an operation on calibrations, measurements, containers or
/// codecs can fail.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Invalid energy calibration: {0}")]
    InvalidCalibration(String),
    #[error("Gamma counts have {actual} channels but the energy calibration expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Energy calibration has {actual} channels but the gamma counts have {expected}")]
    ChannelCountMismatch { expected: usize, actual: usize },
    #[error("A measurement for sample {sample} and detector {detector:?} already exists")]
    DuplicateRecordKey { sample: i32, detector: String },
    #[error("Input is not a {format} file: {reason}")]
    FormatMismatch {
        format: SpectrumFileFormat,
        reason: String,
    },
    #[error("Could not identify the format of the input")]
    UnrecognizedFormat,
    #[error("Failed to encode spectrum file: {0}")]
    EncodeError(String),
    #[error("No measurements matched the requested sample numbers and detectors")]
    EmptySelection,
    #[error("No measurement is associated with {0:?}")]
    UnknownMeasurement(MeasurementId),
    #[error("Malformed {format} data: {message}")]
    MalformedData {
        format: SpectrumFileFormat,
        message: String,
    },
    #[error("An XML error was encountered: {0}")]
    XMLError(
        #[from]
        #[source]
        XMLError,
    ),
    #[error("An IO error was encountered: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

impl SpecError {
    pub(crate) fn mismatch<S: Into<String>>(format: SpectrumFileFormat, reason: S) -> Self {
        Self::FormatMismatch {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed<S: Into<String>>(format: SpectrumFileFormat, message: S) -> Self {
        Self::MalformedData {
            format,
            message: message.into(),
        }
    }

    /// Whether this error only means "this decoder does not apply", which the
    /// auto-detector treats as a cue to try the next candidate.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, Self::FormatMismatch { .. })
    }
}

impl From<SpecError> for io::Error {
    fn from(value: SpecError) -> Self {
        match value {
            SpecError::IOError(e) => e,
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

pub type SpecResult<T> = Result<T, SpecError>;
