//! Amptek MCA, the text format written by the DPP MCA acquisition software.
//!
//! A file is a set of `<<SECTION>>` blocks. `<<PMCA SPECTRUM>>` holds `KEY - value` lines,
//! `<<CALIBRATION>>` a label and `channel energy` points, and `<<DATA>>` the counts up to
//! `<<END>>`. The device configuration and status blocks carry free text.
mod reader;
mod writer;

pub use reader::read_mca;
pub use writer::write_mca;

use crate::io::SpectrumFileFormat;

pub(crate) const MAGIC: &str = "<<PMCA SPECTRUM>>";
pub(crate) const CALIBRATION: &str = "<<CALIBRATION>>";
pub(crate) const DATA: &str = "<<DATA>>";
pub(crate) const END: &str = "<<END>>";
pub(crate) const DP5_CONFIGURATION: &str = "<<DP5 CONFIGURATION>>";
pub(crate) const DP5_CONFIGURATION_END: &str = "<<DP5 CONFIGURATION END>>";
pub(crate) const DPP_STATUS: &str = "<<DPP STATUS>>";
pub(crate) const DPP_STATUS_END: &str = "<<DPP STATUS END>>";

pub(crate) const TAG: &str = "TAG";
pub(crate) const DESCRIPTION: &str = "DESCRIPTION";
pub(crate) const GAIN: &str = "GAIN";
pub(crate) const LIVE_TIME: &str = "LIVE_TIME";
pub(crate) const REAL_TIME: &str = "REAL_TIME";
pub(crate) const START_TIME: &str = "START_TIME";
pub(crate) const SERIAL_NUMBER: &str = "SERIAL_NUMBER";

/// File remark prefix for the spectrum tag
pub(crate) const TAG_REMARK: &str = "Tag: ";
pub(crate) const STATUS_SERIAL_NUMBER: &str = "Serial Number: ";
pub(crate) const STATUS_DEVICE_TYPE: &str = "Device Type: ";

pub(crate) const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

pub fn is_mca(buf: &[u8]) -> bool {
    let buf = buf.strip_prefix(b"\xef\xbb\xbf").unwrap_or(buf);
    buf.starts_with(MAGIC.as_bytes())
}

crate::io::traits::impl_codec!(
    McaCodec,
    SpectrumFileFormat::Mca,
    is_mca,
    read_mca,
    write_mca
);
