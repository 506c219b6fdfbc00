use std::io::{BufWriter, Write};

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, warn};

use crate::calibration::EnergyCalType;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{push_padded, MONTHS};
use crate::measurement::Measurement;
use crate::meta::{OccupancyStatus, SourceType};
use crate::spec_file::SpecFile;

use super::reader::assign_deviation_slots;
use super::{
    DeviationSlot, CARGO_TYPE, DESCRIPTION, DEVIATION_BLOCK_SIZE, DEVIATION_HEADER,
    DEVIATION_HEADER_COMPRESSED, ENERGY_RECORD_TITLE, ITEM_DESCRIPTION, ITEM_DISTANCE,
    MAX_CHANNELS, MAX_DEVIATION_PAIRS, OCCUPANCY_NUMBER, RECORD_SIZE, SOURCE,
};

const FILE_REMARK_PREFIXES: [&str; 4] =
    [ITEM_DESCRIPTION, CARGO_TYPE, ITEM_DISTANCE, OCCUPANCY_NUMBER];
const MAX_TEXT: usize = 128;

pub(crate) fn format_vax_date(t: &NaiveDateTime) -> String {
    format!(
        "{:02}-{}-{:04} {:02}:{:02}:{:02}.{:02}",
        t.day(),
        MONTHS[t.month0() as usize],
        t.year(),
        t.hour(),
        t.minute(),
        t.second(),
        (t.nanosecond() / 10_000_000).min(99)
    )
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn file_remark<'a>(file: &'a SpecFile, prefix: &str) -> Option<&'a str> {
    file.remarks()
        .iter()
        .find_map(|r| r.strip_prefix(prefix))
        .map(str::trim)
}

/// Parse the leading integer of a remark value like `250 cm`
fn leading_number(text: Option<&str>) -> i16 {
    text.and_then(|t| t.split_whitespace().next())
        .and_then(|t| t.parse::<f64>().ok())
        .map(|v| v.round().clamp(0.0, i16::MAX as f64) as i16)
        .unwrap_or(0)
}

/// Text for the 16 byte GPS field, with as many decimals as fit
fn format_gps(latitude: f64, longitude: f64) -> String {
    (0..=7usize)
        .rev()
        .map(|d| format!("{latitude:.d$},{longitude:.d$}"))
        .find(|s| s.len() <= 16)
        .unwrap_or_default()
}

fn push_file_header(out: &mut Vec<u8>, file: &SpecFile, records: &[&Measurement], nrps: i16) {
    let start = out.len();
    out.extend_from_slice(&nrps.to_le_bytes());
    push_padded(out, "DHS", 10);
    push_padded(out, file.uuid(), 36);
    push_padded(out, file.inspection(), 16);
    let lane = file.lane_number().clamp(0, i16::MAX as i32) as i16;
    out.extend_from_slice(&lane.to_le_bytes());

    let remarks: Vec<&str> = file
        .remarks()
        .iter()
        .filter(|r| !FILE_REMARK_PREFIXES.iter().any(|p| r.starts_with(p)))
        .map(|r| r.trim())
        .collect();
    let remarks = remarks.join("\r\n");
    if remarks.len() > 26 {
        debug!("Truncating PCF file remarks {remarks:?} to 26 bytes");
    }
    push_padded(out, &remarks, 26);
    push_padded(out, file.instrument_type(), 28);
    push_padded(out, file.manufacturer(), 28);
    push_padded(out, file.instrument_model(), 18);
    push_padded(out, file.instrument_id(), 18);
    push_padded(out, file_remark(file, ITEM_DESCRIPTION).unwrap_or_default(), 20);
    push_padded(out, file.measurement_location_name(), 16);

    let located: Vec<_> = records
        .iter()
        .filter(|m| m.has_gps_info())
        .filter_map(|m| m.position())
        .collect();
    let gps = if located.is_empty() {
        String::new()
    } else {
        let n = located.len() as f64;
        let latitude = located.iter().map(|p| p.latitude).sum::<f64>() / n;
        let longitude = located.iter().map(|p| p.longitude).sum::<f64>() / n;
        format_gps(latitude, longitude)
    };
    push_padded(out, &gps, 16);

    out.extend_from_slice(&leading_number(file_remark(file, ITEM_DISTANCE)).to_le_bytes());
    out.extend_from_slice(&leading_number(file_remark(file, OCCUPANCY_NUMBER)).to_le_bytes());
    push_padded(out, file_remark(file, CARGO_TYPE).unwrap_or_default(), 16);
    debug_assert_eq!(out.len() - start, RECORD_SIZE);
}

/// Write the deviation pair block when any record's calibration has deviation pairs.
/// Each detector uses the pairs of its first record.
fn push_deviation_block(out: &mut Vec<u8>, records: &[&Measurement]) {
    let mut names: Vec<&str> = Vec::new();
    let mut pairs: Vec<(&str, &[(f32, f32)])> = Vec::new();
    for m in records {
        let name = m.detector_name();
        if !names.contains(&name) {
            names.push(name);
        }
        if let Some(cal) = m.energy_calibration() {
            if !cal.deviation_pairs().is_empty() && !pairs.iter().any(|(n, _)| *n == name) {
                pairs.push((name, cal.deviation_pairs()));
            }
        }
    }
    if pairs.is_empty() {
        return;
    }
    let compressed = records.iter().any(|m| {
        m.gamma_counts().is_some()
            && DeviationSlot::from_detector_name(m.detector_name()).is_some_and(|s| s.column >= 2)
    });

    let mut values = vec![0.0f32; DeviationSlot::num_slots(compressed) * 2 * MAX_DEVIATION_PAIRS];
    for (name, slot) in assign_deviation_slots(&names, compressed) {
        let Some((_, dev)) = pairs.iter().find(|(n, _)| *n == name) else {
            continue;
        };
        if dev.len() > MAX_DEVIATION_PAIRS {
            warn!(
                "Only the first {MAX_DEVIATION_PAIRS} of {} deviation pairs of {name:?} fit in a PCF file",
                dev.len()
            );
        }
        let start = slot.value_offset();
        for (i, (energy, offset)) in dev.iter().take(MAX_DEVIATION_PAIRS).enumerate() {
            values[start + 2 * i] = *energy;
            values[start + 2 * i + 1] = *offset;
        }
    }

    let label = if compressed {
        DEVIATION_HEADER_COMPRESSED
    } else {
        DEVIATION_HEADER
    };
    push_padded(out, label, RECORD_SIZE);
    let start = out.len();
    for v in values {
        if compressed {
            let v = v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    debug_assert_eq!(out.len() - start, DEVIATION_BLOCK_SIZE);
}

/// The lower channel energies every gamma record shares, when all of them use one
/// lower channel energy calibration
fn shared_lower_edges<'a>(records: &[&'a Measurement]) -> Option<&'a [f32]> {
    let mut shared: Option<&'a [f32]> = None;
    for m in records {
        if m.num_gamma_channels() == 0 {
            continue;
        }
        let cal = m.energy_calibration()?;
        if cal.kind() != EnergyCalType::LowerChannelEdge {
            return None;
        }
        match shared {
            Some(edges) if edges != cal.coefficients() => return None,
            Some(_) => {}
            None => shared = Some(cal.coefficients()),
        }
    }
    shared
}

/// The text block of a spectrum header. The title is suffixed with the source type, the
/// detector name and the sample number, and shortened rather than lose that suffix.
fn text_block(m: &Measurement) -> Vec<u8> {
    let remark = |prefix: &str| {
        m.remarks()
            .iter()
            .find_map(|r| r.strip_prefix(prefix))
            .map(|r| truncate(r.trim(), MAX_TEXT))
            .unwrap_or_default()
    };
    let description = remark(DESCRIPTION);
    let source = remark(SOURCE);
    let source_type = match m.source_type() {
        SourceType::Other(_) => SourceType::Unknown.as_str(),
        kind => kind.as_str(),
    };
    let tags = format!(
        "{source_type} Det={} Sample={}",
        m.detector_name(),
        m.sample_number()
    );
    let tagged = |title: &str| {
        if title.is_empty() {
            tags.clone()
        } else {
            format!("{title} {tags}")
        }
    };

    let title = tagged(m.title());
    let mut out = Vec::with_capacity(180);
    if title.len() < 61 && description.len() < 61 && source.len() < 61 {
        push_padded(&mut out, &title, 60);
        push_padded(&mut out, description, 60);
        push_padded(&mut out, source, 60);
        return out;
    }

    let description = if title.len() + description.len() + source.len() < 178 {
        description
    } else {
        ""
    };
    let room = 177 - source.len() - description.len();
    let title = if title.len() > room {
        let keep = room.saturating_sub(tags.len() + 1);
        debug!("Shortening PCF title {:?} to {keep} bytes", m.title());
        tagged(truncate(m.title(), keep))
    } else {
        title
    };
    out.push(0xff);
    out.extend_from_slice(title.as_bytes());
    out.push(0xff);
    out.extend_from_slice(description.as_bytes());
    out.push(0xff);
    out.extend_from_slice(source.as_bytes());
    out.resize(180, b' ');
    out
}

fn frf_coefficients(m: &Measurement, lower_edges_written: bool) -> [f32; 5] {
    let mut out = [0.0f32; 5];
    let Some(cal) = m.energy_calibration() else {
        return out;
    };
    let coefficients = match cal.kind() {
        EnergyCalType::FullRangeFraction => cal.coefficients().to_vec(),
        EnergyCalType::LowerChannelEdge => {
            if !lower_edges_written {
                warn!(
                    "Lower channel energies of {:?} differ from the other records and are not written",
                    m.detector_name()
                );
            }
            return out;
        }
        EnergyCalType::Polynomial => match cal.to_full_range_fraction() {
            Ok(frf) => frf.coefficients().to_vec(),
            Err(e) => {
                warn!("Polynomial calibration cannot be written to PCF: {e}");
                return out;
            }
        },
    };
    for (slot, c) in out.iter_mut().zip(coefficients) {
        *slot = c;
    }
    out
}

fn push_spectrum(out: &mut Vec<u8>, m: &Measurement, n_file: usize, lower_edges_written: bool) {
    let start = out.len();
    out.extend_from_slice(&text_block(m));
    match m.start_time() {
        Some(t) => push_padded(out, &format_vax_date(&t), 23),
        None => push_padded(out, "", 23),
    }
    out.push(match m.occupancy_status() {
        OccupancyStatus::NotOccupied => b'-',
        _ => b' ',
    });
    let counts = m.gamma_counts().unwrap_or_default();
    let live_time = if counts.is_empty() && m.neutron_live_time() > 0.0 {
        m.neutron_live_time()
    } else {
        m.live_time()
    };
    out.extend_from_slice(&live_time.to_le_bytes());
    out.extend_from_slice(&m.real_time().to_le_bytes());
    // half-life, molecular weight and spectrum multiplier
    out.resize(out.len() + 12, 0);
    for c in frf_coefficients(m, lower_edges_written) {
        out.extend_from_slice(&c.to_le_bytes());
    }
    out.resize(out.len() + 4, 0);
    out.extend_from_slice(&(m.neutron_counts_sum() as f32).to_le_bytes());
    out.extend_from_slice(&(counts.len() as i32).to_le_bytes());
    debug_assert_eq!(out.len() - start, RECORD_SIZE);

    for c in counts {
        out.extend_from_slice(&c.to_le_bytes());
    }
    out.resize(start + RECORD_SIZE + 4 * n_file, 0);
}

fn push_energy_record(out: &mut Vec<u8>, edges: &[f32], n_file: usize, records: &[&Measurement]) {
    let start = out.len();
    push_padded(out, ENERGY_RECORD_TITLE, 180);
    let date = records
        .iter()
        .find_map(|m| m.start_time())
        .map(|t| format_vax_date(&t))
        .unwrap_or_else(|| "01-Jan-1900 00:00:00.00".to_string());
    push_padded(out, &date, 23);
    out.push(b' ');
    out.extend_from_slice(&1.0f32.to_le_bytes());
    out.extend_from_slice(&1.0f32.to_le_bytes());
    out.resize(out.len() + 12, 0);
    let first = edges.first().copied().unwrap_or_default();
    let last = edges.last().copied().unwrap_or_default();
    out.extend_from_slice(&first.to_le_bytes());
    out.extend_from_slice(&(last - first).to_le_bytes());
    out.resize(start + 252, 0);
    out.extend_from_slice(&(edges.len() as i32).to_le_bytes());
    for e in edges {
        out.extend_from_slice(&e.to_le_bytes());
    }
    out.resize(start + RECORD_SIZE + 4 * n_file, 0);
}

/// Encode the selected measurements as a GADRAS PCF file.
///
/// Records without gamma counts or neutron counts are skipped. Calibrations are written as
/// full range fraction coefficients, except that a lower channel energy calibration shared
/// by every record is written once as the leading `Energy` record.
pub fn write_pcf<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let records: Vec<&Measurement> = file
        .select_for_encode(samples, detectors)?
        .into_iter()
        .filter_map(|id| file.measurement(id))
        .filter(|m| m.num_gamma_channels() > 0 || m.contained_neutron())
        .collect();
    if records.is_empty() {
        return Err(SpecError::EncodeError(
            "none of the selected measurements have gamma or neutron counts".to_string(),
        ));
    }

    let lower_edges = shared_lower_edges(&records);
    let max_channels = records
        .iter()
        .map(|m| m.num_gamma_channels())
        .max()
        .unwrap_or(0)
        .max(lower_edges.map(|e| e.len()).unwrap_or(0));
    let n_file = max_channels.div_ceil(64).max(1) * 64;
    if n_file > MAX_CHANNELS {
        return Err(SpecError::EncodeError(format!(
            "PCF files hold at most {MAX_CHANNELS} channels, not {max_channels}"
        )));
    }
    let nrps = (1 + n_file / 64) as i16;

    let mut out = Vec::with_capacity(RECORD_SIZE * nrps as usize * (records.len() + 2));
    push_file_header(&mut out, file, &records, nrps);
    push_deviation_block(&mut out, &records);
    if let Some(edges) = lower_edges {
        push_energy_record(&mut out, edges, n_file, &records);
    }
    for m in &records {
        push_spectrum(&mut out, m, n_file, lower_edges.is_some());
    }

    let mut handle = BufWriter::new(stream);
    handle.write_all(&out)?;
    handle.flush()?;
    Ok(())
}
