use std::io;

use log::debug;

use crate::error::{SpecError, SpecResult};
use crate::io::{
    chn::ChnCodec, compression::decompress_if_gzipped, csv::CsvCodec, mca::McaCodec,
    n42::N42Codec, pcf::PcfCodec, spe::SpeCodec, SpectrumCodec,
};
use crate::spec_file::SpecFile;

use super::inference::SpectrumFileFormat;

/// The order [`decode_auto`] tries formats in, most specific first. CSV accepts nearly
/// anything made of numbers so it comes last.
pub const DETECTION_ORDER: [SpectrumFileFormat; 6] = [
    SpectrumFileFormat::Chn,
    SpectrumFileFormat::Pcf,
    SpectrumFileFormat::N42,
    SpectrumFileFormat::Mca,
    SpectrumFileFormat::Spe,
    SpectrumFileFormat::Csv,
];

/// The number of leading bytes handed to [`SpectrumCodec::matches`]
pub const PREFIX_SIZE: usize = 512;

impl SpectrumFileFormat {
    /// The codec that reads and writes this format
    pub fn codec(&self) -> Option<&'static dyn SpectrumCodec> {
        match self {
            Self::Chn => Some(&ChnCodec),
            Self::Pcf => Some(&PcfCodec),
            Self::N42 => Some(&N42Codec),
            Self::Mca => Some(&McaCodec),
            Self::Spe => Some(&SpeCodec),
            Self::Csv => Some(&CsvCodec),
            Self::Unknown => None,
        }
    }
}

/// Decode `bytes` with the first codec in [`DETECTION_ORDER`] that both recognizes the
/// prefix and decodes the whole input. Gzipped input is inflated first.
///
/// When no codec succeeds, the first error other than [`SpecError::FormatMismatch`] is
/// returned, so a truncated or corrupt file of a recognized format reports what is wrong
/// with it. Otherwise this fails with [`SpecError::UnrecognizedFormat`].
pub fn decode_auto(bytes: &[u8]) -> SpecResult<SpecFile> {
    let bytes = decompress_if_gzipped(bytes)?;
    let prefix = &bytes[..bytes.len().min(PREFIX_SIZE)];
    let mut failure = None;
    for format in DETECTION_ORDER {
        let Some(codec) = format.codec() else {
            continue;
        };
        if !codec.matches(prefix) {
            continue;
        }
        let mut stream = io::Cursor::new(bytes.as_ref());
        match codec.decode(&mut stream) {
            Ok(file) => {
                debug!(
                    "Decoded {} measurements as {format}",
                    file.num_measurements()
                );
                return Ok(file);
            }
            Err(e) => {
                debug!("{format} recognized the input but failed to decode it: {e}");
                if failure.is_none() && !e.is_format_mismatch() {
                    failure = Some(e);
                }
            }
        }
    }
    Err(failure.unwrap_or(SpecError::UnrecognizedFormat))
}

/// Decode `bytes` as `format` without trying any other
pub fn decode_as(format: SpectrumFileFormat, bytes: &[u8]) -> SpecResult<SpecFile> {
    let codec = format.codec().ok_or(SpecError::UnrecognizedFormat)?;
    let bytes = decompress_if_gzipped(bytes)?;
    let mut stream = io::Cursor::new(bytes.as_ref());
    codec.decode(&mut stream)
}

/// Encode the measurements of `file` matching `samples` and `detectors` as `format`
pub fn encode<D: AsRef<str>>(
    format: SpectrumFileFormat,
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
) -> SpecResult<Vec<u8>> {
    file.to_bytes(format, samples, detectors)
}

/// Decode many inputs at once, one result per input in the same order
#[cfg(feature = "parallelism")]
pub fn decode_many<B: AsRef<[u8]> + Sync>(inputs: &[B]) -> Vec<SpecResult<SpecFile>> {
    use rayon::prelude::*;
    inputs
        .par_iter()
        .map(|bytes| decode_auto(bytes.as_ref()))
        .collect()
}
