//! Helpers shared by the codecs: fixed-width binary fields, number formatting and the
//! common encode/decode bookends.
use std::io::{self, prelude::*};

use crate::error::{SpecError, SpecResult};
use crate::io::SpectrumFileFormat;
use crate::measurement::Measurement;
use crate::spec_file::{CleanupOptions, SpecFile};

/// Read the whole stream. The binary formats need random access to their records and the
/// text formats are small enough that this never matters.
pub(crate) fn read_all<R: Read>(mut stream: R) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// The most channels a decoder will build for one spectrum from counts or ranges stated in
/// the file
pub(crate) const MAX_DECODED_CHANNELS: usize = 1 << 20;

const DECODE_OPTIONS: CleanupOptions =
    CleanupOptions::PRESERVE_ORDER.union(CleanupOptions::AUTO_RENUMBER);

/// An empty container that accepts records with colliding sample numbers and detector names
/// by renumbering them, as foreign files often have them
pub(crate) fn new_decoded() -> SpecFile {
    let mut file = SpecFile::new();
    file.set_cleanup_options(DECODE_OPTIONS);
    file
}

/// Turn a freshly decoded container into a consistent one, keeping the order the records
/// appeared in and moving colliding records to new sample numbers
pub(crate) fn finish_decoded(mut file: SpecFile) -> SpecResult<SpecFile> {
    file.cleanup(DECODE_OPTIONS)?;
    file.set_cleanup_options(CleanupOptions::default());
    Ok(file)
}

/// The one measurement a single record format writes for a selection: the record itself
/// when exactly one is selected, otherwise their sum carrying the first one's labels
pub(crate) fn single_record<D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
) -> SpecResult<Measurement> {
    let selected = file.select_for_encode(samples, detectors)?;
    let first = selected
        .first()
        .and_then(|id| file.measurement(*id))
        .ok_or(SpecError::EmptySelection)?;
    if selected.len() == 1 {
        return Ok(first.clone());
    }
    let mut summed = file.sum_measurements(samples, detectors)?;
    summed.set_title(first.title());
    summed.set_detector_name(first.detector_name());
    summed.set_sample_number(first.sample_number());
    summed.set_remarks(first.remarks().to_vec());
    if let Some(p) = first.position() {
        summed.set_position(p.latitude, p.longitude, p.time);
    }
    Ok(summed)
}

/// Little-endian field access over a byte slice, failing with [`SpecError::MalformedData`]
/// instead of panicking when the data is too short
pub(crate) struct ByteFields<'a> {
    pub data: &'a [u8],
    pub format: SpectrumFileFormat,
}

impl<'a> ByteFields<'a> {
    pub fn new(data: &'a [u8], format: SpectrumFileFormat) -> Self {
        Self { data, format }
    }

    pub fn bytes(&self, offset: usize, len: usize) -> SpecResult<&'a [u8]> {
        let end = offset.checked_add(len);
        end.and_then(|end| self.data.get(offset..end)).ok_or_else(|| {
            SpecError::malformed(
                self.format,
                format!(
                    "needed {len} bytes at offset {offset} but the data is {} bytes long",
                    self.data.len()
                ),
            )
        })
    }

    fn array<const N: usize>(&self, offset: usize) -> SpecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    pub fn i16(&self, offset: usize) -> SpecResult<i16> {
        self.array(offset).map(i16::from_le_bytes)
    }

    pub fn u16(&self, offset: usize) -> SpecResult<u16> {
        self.array(offset).map(u16::from_le_bytes)
    }

    pub fn i32(&self, offset: usize) -> SpecResult<i32> {
        self.array(offset).map(i32::from_le_bytes)
    }

    pub fn u32(&self, offset: usize) -> SpecResult<u32> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn f32(&self, offset: usize) -> SpecResult<f32> {
        self.array(offset).map(f32::from_le_bytes)
    }

    /// A space or NUL padded text field, with the padding removed
    pub fn text(&self, offset: usize, len: usize) -> SpecResult<String> {
        Ok(trim_padding(self.bytes(offset, len)?))
    }
}

pub(crate) fn trim_padding(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Append `text` to `out`, truncated or space padded to exactly `len` bytes
pub(crate) fn push_padded(out: &mut Vec<u8>, text: &str, len: usize) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (len - n), b' ');
}

/// Format a count as an integer when it is whole, otherwise with enough digits to
/// reproduce it exactly
pub(crate) fn format_count(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Parse every whitespace separated float in `text`, skipping tokens that are not numbers
pub(crate) fn parse_floats_lenient(text: &str, context: &str) -> Vec<f32> {
    let mut values = Vec::new();
    for token in text.split_ascii_whitespace() {
        match token.parse::<f32>() {
            Ok(v) => values.push(v),
            Err(e) => log::warn!("Skipping {token:?} in {context}: {e}"),
        }
    }
    values
}

pub(crate) const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// The month number, from 1, for a three letter English abbreviation in any case
pub(crate) fn month_from_abbrev(text: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(text.trim()))
        .map(|i| i as u32 + 1)
}
