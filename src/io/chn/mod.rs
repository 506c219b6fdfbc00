//! Ortec CHN, an integer binary format holding a single spectrum.
//!
//! The file is a 32 byte header, `u32` channel counts and an optional 512 byte trailer with
//! the energy calibration and two short descriptions.
mod reader;
mod writer;

pub use reader::read_chn;
pub use writer::write_chn;

use crate::io::SpectrumFileFormat;

pub(crate) const HEADER_SIZE: usize = 32;
pub(crate) const TRAILER_SIZE: usize = 512;
/// Trailer marker for a three term energy polynomial
pub(crate) const TRAILER_QUADRATIC: i16 = -102;
/// Trailer marker for a linear energy polynomial
pub(crate) const TRAILER_LINEAR: i16 = -101;
/// File remark prefix carrying the trailer's detector description
pub(crate) const DETECTOR_DESCRIPTION: &str = "Detector Description: ";

/// Test whether `buf` starts with a CHN header: the `-1` marker followed by the ASCII date
/// and time fields
pub fn is_chn(buf: &[u8]) -> bool {
    if buf.len() < HEADER_SIZE || buf[0] != 0xff || buf[1] != 0xff {
        return false;
    }
    buf[16..28]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b' ' || *b == 0)
}

crate::io::traits::impl_codec!(
    ChnCodec,
    SpectrumFileFormat::Chn,
    is_chn,
    read_chn,
    write_chn
);
