use std::io::Read;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{finish_decoded, month_from_abbrev, new_decoded, read_all, ByteFields};
use crate::io::SpectrumFileFormat;
use crate::measurement::Measurement;
use crate::spec_file::SpecFile;

use super::{DETECTOR_DESCRIPTION, HEADER_SIZE, TRAILER_LINEAR, TRAILER_QUADRATIC, TRAILER_SIZE};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::Chn;

fn parse_start_time(fields: &ByteFields) -> SpecResult<Option<NaiveDateTime>> {
    let text = |offset, len| fields.text(offset, len);
    let day = text(16, 2)?;
    let month = text(18, 3)?;
    let year = text(21, 2)?;
    let century = fields.bytes(23, 1)?[0];
    let hour = text(24, 2)?;
    let minute = text(26, 2)?;
    let second = text(6, 2)?;

    let parse = |s: &str| s.trim().parse::<u32>().ok();
    let (Some(day), Some(month), Some(year)) =
        (parse(&day), month_from_abbrev(&month), parse(&year))
    else {
        return Ok(None);
    };
    // A '1' marks the 2000s; some writers leave a NUL there, which is read the same way
    let year = if century == b'0' { 1900 } else { 2000 } + year as i32;
    Ok(NaiveDate::from_ymd_opt(year, month, day).and_then(|d| {
        d.and_hms_opt(
            parse(&hour).unwrap_or(0),
            parse(&minute).unwrap_or(0),
            parse(&second).unwrap_or(0),
        )
    }))
}

/// Pick the calibration form the trailer coefficients most plausibly describe
fn interpret_calibration(
    mut coefficients: [f32; 3],
    channel_count: usize,
    measurement: &mut Measurement,
) {
    let [c0, c1, c2] = coefficients;
    let unset = c0.abs() < 1e-12 && (c1.abs() < 1e-12 || (c1 - 1.0).abs() < 1e-8);
    let result = if unset {
        return;
    } else if c1 > 1000.0 && c1 < 16000.0 && c0.abs() < 100.0 {
        if c2.abs() >= 0.25 * c1 {
            coefficients[2] = 0.0;
        }
        EnergyCalibration::full_range_fraction(&coefficients, channel_count, &[])
    } else if c1 < 1000.0 {
        EnergyCalibration::polynomial(&coefficients, channel_count, &[])
    } else {
        measurement.add_parse_warning(format!(
            "Could not identify CHN energy calibration with coefficients {coefficients:?}"
        ));
        return;
    };
    match result.and_then(|cal| measurement.set_energy_calibration(Arc::new(cal))) {
        Ok(()) => {}
        Err(e) => {
            warn!("Ignoring CHN energy calibration {coefficients:?}: {e}");
            measurement.add_parse_warning(format!("Invalid CHN energy calibration: {e}"));
        }
    }
}

/// Read a length-prefixed description from the trailer
fn description(trailer: &[u8], offset: usize) -> Option<String> {
    let len = *trailer.get(offset)? as usize;
    let start = offset + 1;
    if len == 0 || len >= 64 || start + len >= trailer.len() {
        return None;
    }
    let text = String::from_utf8_lossy(&trailer[start..start + len])
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// Decode an Ortec CHN file.
///
/// The first and last two channels are zeroed since instruments use them for housekeeping
/// rather than counts.
pub fn read_chn<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let data = read_all(stream)?;
    if data.len() < HEADER_SIZE {
        return Err(SpecError::mismatch(FORMAT, "shorter than a CHN header"));
    }
    let fields = ByteFields::new(&data, FORMAT);
    if fields.i16(0)? != -1 {
        return Err(SpecError::mismatch(FORMAT, "missing the -1 header marker"));
    }

    let mca_number = fields.i16(2)?;
    let segment = fields.i16(4)?;
    let real_time = fields.u32(8)? as f32 / 50.0;
    let live_time = fields.u32(12)? as f32 / 50.0;
    let first_channel = fields.u16(28)?;
    let mut n_channels = fields.u16(30)? as usize;
    if n_channels == 0 {
        // Some writers leave the count out; only trust what must then be a power of two
        n_channels = data.len().saturating_sub(HEADER_SIZE + TRAILER_SIZE) / 4;
        if !n_channels.is_power_of_two() || !(128..=32768).contains(&n_channels) {
            return Err(SpecError::malformed(
                FORMAT,
                "the channel count is zero and cannot be inferred from the file size",
            ));
        }
    }
    debug!(
        "CHN header: MCA {mca_number}, segment {segment}, first channel {first_channel}, {n_channels} channels"
    );

    let raw = fields.bytes(HEADER_SIZE, 4 * n_channels)?;
    let mut counts: Vec<f32> = raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
        .collect();
    if n_channels > 2 {
        for i in [0, 1, n_channels - 2, n_channels - 1] {
            counts[i] = 0.0;
        }
    }

    let mut measurement = Measurement::new();
    measurement.set_gamma_counts(counts, live_time, real_time)?;
    measurement.set_start_time(parse_start_time(&fields)?);

    let trailer_start = HEADER_SIZE + 4 * n_channels;
    let trailer = &data[trailer_start..(trailer_start + TRAILER_SIZE).min(data.len())];
    let mut file = new_decoded();
    if trailer.len() > 1 {
        let trailer_fields = ByteFields::new(trailer, FORMAT);
        let kind = trailer_fields.i16(0)?;
        if kind != TRAILER_QUADRATIC && kind != TRAILER_LINEAR {
            debug!("Unexpected CHN trailer marker {kind}");
        }
        let n_terms = if kind == TRAILER_QUADRATIC && trailer.len() >= 16 {
            3
        } else if trailer.len() >= 12 {
            2
        } else {
            0
        };
        let mut coefficients = [0.0f32; 3];
        for (i, c) in coefficients.iter_mut().enumerate().take(n_terms) {
            *c = trailer_fields.f32(4 + 4 * i)?;
        }
        interpret_calibration(coefficients, n_channels, &mut measurement);

        if let Some(detector) = description(trailer, 256) {
            file.add_remark(format!("{DETECTOR_DESCRIPTION}{detector}"));
        }
        if let Some(title) = description(trailer, 320) {
            measurement.set_title(title);
        }
    } else {
        debug!("CHN file has no trailer");
    }

    if measurement.has_time_inconsistency() {
        warn!("CHN live time {live_time} exceeds real time {real_time}");
    }
    file.add_measurement(measurement, true)?;
    finish_decoded(file)
}
