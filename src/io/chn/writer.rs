use std::io::{BufWriter, Write};

use chrono::{Datelike, Timelike};

use crate::calibration::EnergyCalType;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{single_record, MONTHS};
use crate::spec_file::SpecFile;

use super::{DETECTOR_DESCRIPTION, TRAILER_QUADRATIC};

fn to_ticks(seconds: f32) -> u32 {
    (50.0 * seconds.max(0.0) as f64)
        .round()
        .min(u32::MAX as f64) as u32
}

fn to_count(value: f32) -> u32 {
    let rounded = value.max(0.0).round_ties_even() as f64;
    rounded.min(u32::MAX as f64) as u32
}

/// Write a length byte followed by a NUL terminated text field occupying 64 bytes in total
fn push_description(out: &mut Vec<u8>, text: &str) {
    let text = text.trim();
    let mut end = text.len().min(63);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let start = out.len();
    out.push(end as u8);
    out.extend_from_slice(&text.as_bytes()[..end]);
    out.resize(start + 64, 0);
}

/// Encode the sum of the selected measurements as an Ortec CHN file.
///
/// Counts are rounded half to even and clamped to the `u32` range. Non-polynomial
/// calibrations are converted where possible and otherwise left out.
pub fn write_chn<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let record = single_record(file, samples, detectors)?;
    let counts = record
        .gamma_counts()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SpecError::EncodeError("CHN files need gamma counts".to_string()))?;
    if counts.len() > u16::MAX as usize {
        return Err(SpecError::EncodeError(format!(
            "CHN files hold at most {} channels, not {}",
            u16::MAX,
            counts.len()
        )));
    }

    let mut out: Vec<u8> = Vec::with_capacity(32 + 4 * counts.len() + 512);
    out.extend_from_slice(&(-1i16).to_le_bytes());
    out.extend_from_slice(&0i16.to_le_bytes());
    out.extend_from_slice(&1i16.to_le_bytes());

    let start = record.start_time();
    match start {
        Some(t) => out.extend_from_slice(format!("{:02}", t.second()).as_bytes()),
        None => out.extend_from_slice(b"00"),
    }
    out.extend_from_slice(&to_ticks(record.real_time()).to_le_bytes());
    out.extend_from_slice(&to_ticks(record.live_time()).to_le_bytes());
    match start {
        Some(t) => {
            let stamp = format!(
                "{:02}{}{:02}{}{:02}{:02}",
                t.day() % 100,
                MONTHS[t.month0() as usize],
                t.year().rem_euclid(100),
                if t.year() >= 2000 { "1" } else { "0" },
                t.hour(),
                t.minute()
            );
            out.extend_from_slice(stamp.as_bytes());
        }
        None => out.extend_from_slice(b"00   0000000"),
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(counts.len() as u16).to_le_bytes());
    for c in counts {
        out.extend_from_slice(&to_count(*c).to_le_bytes());
    }

    let mut coefficients = match record.energy_calibration() {
        Some(cal) => match cal.kind() {
            EnergyCalType::LowerChannelEdge => Vec::new(),
            _ => cal
                .to_polynomial()
                .map(|p| p.coefficients().to_vec())
                .unwrap_or_default(),
        },
        None => Vec::new(),
    };
    coefficients.resize(3, 0.0);

    let trailer_start = out.len();
    out.extend_from_slice(&TRAILER_QUADRATIC.to_le_bytes());
    out.extend_from_slice(b"00");
    for c in &coefficients[..3] {
        out.extend_from_slice(&c.to_le_bytes());
    }
    // FWHM calibration, not tracked
    out.resize(trailer_start + 256, 0);

    let detector = file
        .remarks()
        .iter()
        .rev()
        .find_map(|r| r.strip_prefix(DETECTOR_DESCRIPTION))
        .unwrap_or_default();
    push_description(&mut out, detector);
    push_description(&mut out, record.title());
    out.resize(trailer_start + 512, 0);

    let mut handle = BufWriter::new(stream);
    handle.write_all(&out)?;
    handle.flush()?;
    Ok(())
}
