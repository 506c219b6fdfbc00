//! ANSI N42.42-2012 radiation instrument XML.
//!
//! This is the archival format of the crate: every field of the data model has a home in
//! the document, so a container written and read back compares equal to the original.
//! Fields N42 has no element for are carried in `Remark` elements with a fixed prefix:
//!
//! * `Title: ...` as the first remark of a `RadMeasurement`,
//! * `LiveTime: ...` after it, for measurements without a gamma spectrum,
//! * `PositionTime: ...` inside the `StateVector` holding the position,
//! * `CalibrationType: FullRangeFraction` inside an `EnergyCalibration`.
use quick_xml::events::Event;
use quick_xml::Reader;

mod reader;
mod writer;

pub use reader::{read_n42, N42ParserError, N42ParserState};
pub use writer::write_n42;

use crate::io::SpectrumFileFormat;

pub(crate) const NAMESPACE: &str = "http://physics.nist.gov/N42/2011/N42";
pub(crate) const ROOT: &str = "RadInstrumentData";
pub(crate) const CREATOR: &str = "gammaspec";

pub(crate) const TITLE: &str = "Title: ";
pub(crate) const LIVE_TIME: &str = "LiveTime: ";
pub(crate) const POSITION_TIME: &str = "PositionTime: ";
pub(crate) const CALIBRATION_TYPE: &str = "CalibrationType: ";

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub(crate) const CHARACTERISTIC_DETECTOR_TYPE: &str = "DetectorType";
pub(crate) const CHARACTERISTIC_LOCATION: &str = "MeasurementLocationName";
pub(crate) const CHARACTERISTIC_INSPECTION: &str = "Inspection";
pub(crate) const CHARACTERISTIC_LANE: &str = "LaneNumber";

pub(crate) const SAMPLE_GROUP_PREFIX: &str = "Sample-";

/// Format an ISO 8601 duration in seconds
pub(crate) fn format_duration(seconds: f32) -> String {
    format!("PT{seconds}S")
}

/// Parse an ISO 8601 duration such as `PT12.5S` or `P1DT2H3M4.5S` into seconds
pub(crate) fn parse_duration(text: &str) -> Option<f32> {
    let text = text.trim();
    if let Some(seconds) = text
        .strip_prefix("PT")
        .and_then(|t| t.strip_suffix('S'))
        .and_then(|t| t.parse::<f32>().ok())
    {
        return Some(seconds);
    }

    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let body = text.strip_prefix('P')?;
    let mut total = 0.0f64;
    let mut in_time = false;
    let mut number = String::new();
    for c in body.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
            unit => {
                let value: f64 = number.parse().ok()?;
                number.clear();
                let scale = match (unit, in_time) {
                    ('D', false) => 86400.0,
                    ('H', true) => 3600.0,
                    ('M', true) => 60.0,
                    ('S', true) => 1.0,
                    _ => return None,
                };
                total += value * scale;
            }
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total } as f32)
}

/// Whether `prefix` starts an XML document whose root element is `RadInstrumentData`
pub fn is_n42(prefix: &[u8]) -> bool {
    let mut reader = Reader::from_reader(prefix);
    let mut buffer = Vec::new();
    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return e.local_name().as_ref() == ROOT.as_bytes()
            }
            Ok(Event::Eof) | Err(_) => return false,
            Ok(Event::Text(t)) => {
                if t.iter().any(|b| !b.is_ascii_whitespace()) {
                    return false;
                }
            }
            Ok(_) => {}
        }
        buffer.clear();
    }
}

crate::io::traits::impl_codec!(
    N42Codec,
    SpectrumFileFormat::N42,
    is_n42,
    read_n42,
    write_n42
);
