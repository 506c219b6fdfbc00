use std::collections::HashSet;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use regex::Regex;

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{
    finish_decoded, month_from_abbrev, new_decoded, read_all, trim_padding, ByteFields,
};
use crate::io::SpectrumFileFormat;
use crate::measurement::{Measurement, Position};
use crate::meta::{OccupancyStatus, SourceType};
use crate::spec_file::SpecFile;

use super::{
    DeviationSlot, CARGO_TYPE, DESCRIPTION, DEVIATION_BLOCK_SIZE, DEVIATION_HEADER,
    DEVIATION_HEADER_COMPRESSED, ENERGY_RECORD_TITLE, ITEM_DESCRIPTION, ITEM_DISTANCE,
    MAX_CHANNELS, MAX_DEVIATION_PAIRS, OCCUPANCY_NUMBER, RECORD_SIZE, SOURCE,
};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::Pcf;

/// A header text field: everything before the first NUL, without surrounding whitespace
fn field(fields: &ByteFields, offset: usize, len: usize) -> SpecResult<String> {
    let bytes = fields.bytes(offset, len)?;
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).trim().to_string())
}

fn parse_gps(text: &str) -> Option<Position> {
    let (lat, lon) = text.split_once(',')?;
    let position = Position::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?, None);
    position.is_valid().then_some(position)
}

/// Read the metadata in the file header into `file`, returning the position it gives
fn parse_file_header(fields: &ByteFields, file: &mut SpecFile) -> SpecResult<Option<Position>> {
    let marker = fields.bytes(2, 3)?;
    if marker != b"DHS" && marker != b"   " {
        debug!(
            "PCF header has no metadata marker ({:?}), ignoring its fields",
            String::from_utf8_lossy(marker)
        );
        return Ok(None);
    }

    file.set_uuid(field(fields, 12, 36)?);
    file.set_inspection(field(fields, 48, 16)?);
    let lane = fields.i16(64)?;
    if lane > 0 {
        file.set_lane_number(lane as i32);
    }
    for remark in field(fields, 66, 26)?.split(['\r', '\n']) {
        let remark = remark.trim();
        if !remark.is_empty() {
            file.add_remark(remark);
        }
    }
    file.set_instrument_type(field(fields, 92, 28)?);
    file.set_manufacturer(field(fields, 120, 28)?);
    file.set_instrument_model(field(fields, 148, 18)?);
    file.set_instrument_id(field(fields, 166, 18)?);

    let item = field(fields, 184, 20)?;
    if !item.is_empty() {
        file.add_remark(format!("{ITEM_DESCRIPTION} {item}"));
    }
    file.set_measurement_location_name(field(fields, 204, 16)?);
    let position = parse_gps(&field(fields, 220, 16)?);
    let distance = fields.i16(236)?;
    if distance > 0 {
        file.add_remark(format!("{ITEM_DISTANCE} {distance} cm"));
    }
    let occupancy = fields.i16(238)?;
    if occupancy > 0 {
        file.add_remark(format!("{OCCUPANCY_NUMBER} {occupancy}"));
    }
    let cargo = field(fields, 240, 16)?;
    if !cargo.is_empty() {
        file.add_remark(format!("{CARGO_TYPE} {cargo}"));
    }
    Ok(position)
}

/// Read the deviation pairs of every slot of the block following the header record
fn parse_deviation_block(block: &[u8], compressed: bool) -> Vec<Vec<(f32, f32)>> {
    let value = |i: usize| -> f32 {
        if compressed {
            i16::from_le_bytes([block[2 * i], block[2 * i + 1]]) as f32
        } else {
            let b = &block[4 * i..4 * i + 4];
            f32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }
    };
    (0..DeviationSlot::num_slots(compressed))
        .map(|index| {
            let start = DeviationSlot::from_index(index).value_offset();
            let mut pairs: Vec<(f32, f32)> = (0..MAX_DEVIATION_PAIRS)
                .map(|i| (value(start + 2 * i), value(start + 2 * i + 1)))
                .collect();
            while pairs.last().is_some_and(|p| p.0 == 0.0 && p.1 == 0.0) {
                pairs.pop();
            }
            pairs
        })
        .collect()
}

/// Parse a `dd-Mon-yyyy hh:mm:ss.cc` timestamp, or an ISO 8601 one as some writers use
pub(crate) fn parse_vax_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
    {
        return Some(t);
    }
    let (date, time) = text.split_once(' ').unwrap_or((text, ""));
    let mut parts = date.split('-');
    let day = parts.next()?.trim().parse().ok()?;
    let month = month_from_abbrev(parts.next()?)?;
    let year = parts.next()?.trim().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = time.trim();
    if time.is_empty() {
        return date.and_hms_opt(0, 0, 0);
    }
    NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
        .ok()
        .map(|t| date.and_time(t))
}

fn title_tags() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?:^| )(?:(Background|Calibration|Foreground|IntrinsicActivity|Unknown) )?Det=([^=]*) Sample=(-?\d+)$",
        )
        .unwrap()
    })
}

fn detector_in_title() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bDet\s*=\s*([^\s:,]+)").unwrap())
}

fn sample_in_title() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(?:sample|survey)\s*[=:]?\s*(\d+)").unwrap())
}

/// What a spectrum's stored title says about it
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct StoredTitle {
    pub title: String,
    pub detector: String,
    pub sample: Option<i32>,
    pub source_type: SourceType,
}

/// Split a stored title into the measurement title, detector name, sample number and
/// source type.
///
/// Titles ending in `[<source type>] Det=<name> Sample=<n>` carry these explicitly, and a
/// tagged title without a source type word is [`SourceType::Unknown`]. Otherwise they are
/// looked for anywhere in the title the way GADRAS labels its records.
pub(crate) fn parse_title(stored: &str) -> StoredTitle {
    if let Some(caps) = title_tags().captures(stored) {
        if let (Some(whole), Some(detector), Some(sample)) = (caps.get(0), caps.get(2), caps.get(3))
        {
            if let Ok(sample) = sample.as_str().parse() {
                let source_type = caps
                    .get(1)
                    .map(|m| m.as_str().parse::<SourceType>().unwrap_or_else(|e| match e {}))
                    .unwrap_or_default();
                return StoredTitle {
                    title: stored[..whole.start()].to_string(),
                    detector: detector.as_str().to_string(),
                    sample: Some(sample),
                    source_type,
                };
            }
        }
    }
    let detector = detector_in_title()
        .captures(stored)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let sample = sample_in_title()
        .captures(stored)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    StoredTitle {
        title: stored.to_string(),
        detector,
        sample,
        source_type: source_type_from_title(stored),
    }
}

/// Split the 180 byte title, description and source block
fn parse_text_block(block: &[u8]) -> (String, String, String) {
    let text = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
    if block.first() == Some(&0xff) {
        let mut parts = block[1..].splitn(3, |b| *b == 0xff);
        let title = parts.next().map(text).unwrap_or_default();
        let description = parts.next().map(text).unwrap_or_default();
        let source = parts
            .next()
            .map(trim_padding)
            .unwrap_or_default();
        (title, description.trim().to_string(), source.trim().to_string())
    } else {
        let part = |range: std::ops::Range<usize>| trim_padding(&block[range]);
        (part(0..60), part(60..120).trim().to_string(), part(120..180).trim().to_string())
    }
}

fn source_type_from_title(title: &str) -> SourceType {
    let lower = title.to_ascii_lowercase();
    if lower.contains("background") {
        SourceType::Background
    } else if lower.contains("calib") {
        SourceType::Calibration
    } else {
        SourceType::Foreground
    }
}

/// A decoded spectrum whose calibration, sample number and neutron counts are settled once
/// every record has been read
struct PendingRecord {
    measurement: Measurement,
    coefficients: Vec<f32>,
    sample: Option<i32>,
    neutrons: f32,
}

fn parse_spectrum(fields: &ByteFields, capacity: usize) -> SpecResult<Option<PendingRecord>> {
    let num_channel = fields.i32(252)?;
    if num_channel < 0 || num_channel as usize > MAX_CHANNELS || num_channel as usize > capacity
    {
        return Err(SpecError::malformed(
            FORMAT,
            format!("a spectrum claims {num_channel} channels but records hold at most {capacity}"),
        ));
    }
    let num_channel = num_channel as usize;
    let live_time = fields.f32(204)?;
    let real_time = fields.f32(208)?;
    let neutrons = Some(fields.f32(248)?)
        .filter(|n| n.is_finite())
        .unwrap_or(0.0);
    if num_channel == 0 && neutrons <= 1e-8 {
        debug!("Skipping a PCF record without channels or neutron counts");
        return Ok(None);
    }

    let (stored_title, description, source) = parse_text_block(fields.bytes(0, 180)?);
    let StoredTitle {
        title,
        detector,
        sample,
        source_type,
    } = parse_title(&stored_title);
    let mut measurement = Measurement::new();
    measurement.set_source_type(source_type);
    measurement.set_detector_name(detector);
    measurement.set_title(title);
    let mut remarks = Vec::new();
    if !description.is_empty() {
        remarks.push(format!("{DESCRIPTION} {description}"));
    }
    if !source.is_empty() {
        remarks.push(format!("{SOURCE} {source}"));
    }
    measurement.set_remarks(remarks);
    measurement.set_start_time(parse_vax_date(&field(fields, 180, 23)?));
    measurement.set_occupancy_status(match fields.bytes(203, 1)?[0] {
        b'-' => OccupancyStatus::NotOccupied,
        _ => OccupancyStatus::Unknown,
    });

    let multiplier = fields.f32(220)?;
    let mut coefficients = Vec::with_capacity(5);
    for i in 0..5 {
        coefficients.push(fields.f32(224 + 4 * i)?);
    }
    while coefficients.last() == Some(&0.0) {
        coefficients.pop();
    }

    if num_channel > 0 {
        let raw = fields.bytes(RECORD_SIZE, 4 * num_channel)?;
        let counts: Vec<f32> = raw
            .chunks_exact(4)
            .map(|c| {
                let v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                let v = if v.is_finite() { v } else { 0.0 };
                if multiplier > 1.0 {
                    v * multiplier
                } else {
                    v
                }
            })
            .collect();
        measurement.set_gamma_counts(counts, live_time, real_time)?;
    } else {
        measurement.set_live_time(live_time);
        measurement.set_real_time(real_time);
    }

    Ok(Some(PendingRecord {
        measurement,
        coefficients,
        sample,
        neutrons,
    }))
}

/// Give records without a sample number one, starting a new sample whenever a detector
/// repeats
fn assign_sample_numbers(records: &mut [PendingRecord]) {
    if records.iter().all(|r| r.sample.is_some()) {
        for r in records.iter_mut() {
            if let Some(s) = r.sample {
                r.measurement.set_sample_number(s);
            }
        }
        return;
    }
    let mut sample = 1;
    let mut seen: HashSet<String> = HashSet::new();
    for r in records.iter_mut() {
        match r.sample {
            Some(s) => r.measurement.set_sample_number(s),
            None => {
                let name = r.measurement.detector_name().to_string();
                if seen.contains(&name) {
                    sample += 1;
                    seen.clear();
                }
                r.measurement.set_sample_number(sample);
                seen.insert(name);
            }
        }
    }
}

/// Map detector names to deviation pair slots: names of the `Aa1` form take their own slot
/// and the rest take the free slots in order
pub(crate) fn assign_deviation_slots<'a>(
    names: &[&'a str],
    compressed: bool,
) -> Vec<(&'a str, DeviationSlot)> {
    let n_slots = DeviationSlot::num_slots(compressed);
    let mut used = vec![false; n_slots];
    let mut assigned = Vec::new();
    let mut unplaced = Vec::new();
    for name in names {
        match DeviationSlot::from_detector_name(name) {
            Some(slot) if slot.index() < n_slots && !used[slot.index()] => {
                used[slot.index()] = true;
                assigned.push((*name, slot));
            }
            _ => unplaced.push(*name),
        }
    }
    for name in unplaced {
        if let Some(index) = used.iter().position(|u| !u) {
            used[index] = true;
            assigned.push((name, DeviationSlot::from_index(index)));
        } else {
            warn!("No deviation pair slot is left for detector {name:?}");
        }
    }
    assigned
}

fn distinct_names(records: &[PendingRecord]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for r in records {
        let name = r.measurement.detector_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn calibrate(
    record: &mut PendingRecord,
    lower_edges: Option<&[f32]>,
    deviation_pairs: &[(f32, f32)],
) {
    let n = record.measurement.num_gamma_channels();
    if n < 2 {
        return;
    }
    let m = &mut record.measurement;
    if let Some(edges) = lower_edges {
        if edges.len() == n + 1 {
            match EnergyCalibration::lower_channel_energy(n, edges) {
                Ok(cal) => {
                    if let Err(e) = m.set_energy_calibration(Arc::new(cal)) {
                        warn!("Could not attach lower channel energies: {e}");
                    }
                    return;
                }
                Err(e) => {
                    warn!("Invalid PCF lower channel energies: {e}");
                    m.add_parse_warning(format!("PCF lower channel energies invalid: {e}"));
                }
            }
        } else {
            m.add_parse_warning(
                "PCF specified lower channel energies, but the number of channels did not match \
                 for this record",
            );
        }
    }

    match record.coefficients.len() {
        0 => {}
        1 => {
            m.add_parse_warning(format!(
                "PCF FRF calibration only had one coefficient ({})",
                record.coefficients[0]
            ));
        }
        _ => {
            let result = EnergyCalibration::full_range_fraction(
                &record.coefficients,
                n,
                deviation_pairs,
            )
            .and_then(|cal| m.set_energy_calibration(Arc::new(cal)));
            if let Err(e) = result {
                warn!(
                    "Ignoring PCF calibration {:?} for {n} channels: {e}",
                    record.coefficients
                );
                m.add_parse_warning(format!("PCF FRF calibration invalid: {e}"));
            }
        }
    }
}

/// Decode a GADRAS PCF file.
///
/// Titles ending in `Det=<name> Sample=<n>` give the detector name and sample number, and
/// the tag is stripped from the title along with the source type word written before it.
/// Titles without that word have their source type guessed from the words they contain,
/// falling back to foreground. The header position is given to every record.
pub fn read_pcf<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let data = read_all(stream)?;
    if data.len() < RECORD_SIZE {
        return Err(SpecError::mismatch(FORMAT, "shorter than a PCF header record"));
    }
    let fields = ByteFields::new(&data, FORMAT);
    let records_per_spectrum = fields.i16(0)?;
    if records_per_spectrum <= 0 {
        return Err(SpecError::mismatch(
            FORMAT,
            format!("{records_per_spectrum} records per spectrum"),
        ));
    }
    if records_per_spectrum as usize * RECORD_SIZE > data.len() {
        return Err(SpecError::malformed(
            FORMAT,
            format!(
                "{records_per_spectrum} records per spectrum do not fit in {} bytes",
                data.len()
            ),
        ));
    }
    let spectrum_size = records_per_spectrum as usize * RECORD_SIZE;
    let capacity = spectrum_size / 4 - RECORD_SIZE / 4;

    let mut file = new_decoded();
    let position = parse_file_header(&fields, &mut file)?;

    let mut offset = RECORD_SIZE;
    let mut deviation_pairs = None;
    if data.len() >= offset + RECORD_SIZE {
        let label = field(&fields, offset, 32)?;
        if label.starts_with(DEVIATION_HEADER) {
            let compressed = label.starts_with(DEVIATION_HEADER_COMPRESSED);
            let block = fields.bytes(offset + RECORD_SIZE, DEVIATION_BLOCK_SIZE)?;
            deviation_pairs = Some((compressed, parse_deviation_block(block, compressed)));
            offset += RECORD_SIZE + DEVIATION_BLOCK_SIZE;
            debug!("PCF deviation pair block found, compressed = {compressed}");
        }
    }

    let mut lower_edges: Option<Vec<f32>> = None;
    let mut records = Vec::new();
    let mut first = true;
    while offset < data.len() {
        if offset + spectrum_size > data.len() {
            return Err(SpecError::malformed(
                FORMAT,
                format!(
                    "the spectrum at byte {offset} needs {spectrum_size} bytes but only {} remain",
                    data.len() - offset
                ),
            ));
        }
        let record = ByteFields::new(&data[offset..offset + spectrum_size], FORMAT);
        offset += spectrum_size;

        if first && field(&record, 0, 180)? == ENERGY_RECORD_TITLE {
            first = false;
            let n = record.i32(252)?.clamp(0, capacity as i32) as usize;
            let mut edges = Vec::with_capacity(n);
            for i in 0..n {
                edges.push(record.f32(RECORD_SIZE + 4 * i)?);
            }
            if n > 2 && edges.windows(2).all(|w| w[0] < w[1]) {
                lower_edges = Some(edges);
            } else {
                warn!("Ignoring a PCF lower channel energy record with {n} unusable energies");
            }
            continue;
        }
        first = false;

        if let Some(pending) = parse_spectrum(&record, capacity)? {
            records.push(pending);
        }
    }
    if records.is_empty() {
        return Err(SpecError::malformed(FORMAT, "the file holds no spectra"));
    }

    assign_sample_numbers(&mut records);

    let mut pairs_by_name: Vec<(String, Vec<(f32, f32)>)> = Vec::new();
    if let Some((compressed, slots)) = deviation_pairs.as_ref() {
        for (name, slot) in assign_deviation_slots(&distinct_names(&records), *compressed) {
            if let Some(pairs) = slots.get(slot.index()) {
                pairs_by_name.push((name.to_string(), pairs.clone()));
            }
        }
    }

    let any_neutrons = records.iter().any(|r| r.neutrons > 1e-8);
    for mut record in records {
        let pairs = pairs_by_name
            .iter()
            .find(|(name, _)| name == record.measurement.detector_name())
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[]);
        calibrate(&mut record, lower_edges.as_deref(), pairs);
        let mut measurement = record.measurement;
        if any_neutrons {
            let live_time = measurement.live_time();
            measurement.set_neutron_counts(vec![record.neutrons], live_time);
        }
        if let Some(p) = position {
            measurement.set_position(p.latitude, p.longitude, p.time);
        }
        file.add_measurement(measurement, true)?;
    }
    finish_decoded(file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vax_date() {
        let t = parse_vax_date("24-FEB-2010 00:08:24.82").unwrap();
        assert_eq!(t.to_string(), "2010-02-24 00:08:24.820");
        let t = parse_vax_date("2010-02-24T00:08:24.82Z").unwrap();
        assert_eq!(t.to_string(), "2010-02-24 00:08:24.820");
        assert!(parse_vax_date("                       ").is_none());
        assert!(parse_vax_date("not a date").is_none());
    }

    #[test]
    fn test_parse_title() {
        let t = parse_title("Check source Det=Aa1 Sample=12");
        assert_eq!(
            (t.title.as_str(), t.detector.as_str(), t.sample),
            ("Check source", "Aa1", Some(12))
        );
        assert_eq!(t.source_type, SourceType::Unknown);

        let t = parse_title("Det= Sample=-3");
        assert_eq!((t.title.as_str(), t.detector.as_str(), t.sample), ("", "", Some(-3)));

        let t = parse_title("Shield Background Calibration Det=Ab2 Sample=1");
        assert_eq!(t.title, "Shield Background");
        assert_eq!(t.source_type, SourceType::Calibration);

        let t = parse_title("Background Det=Aa1 Sample=0");
        assert_eq!(t.title, "");
        assert_eq!(t.source_type, SourceType::Background);

        let t = parse_title("Survey 4 Det=Ba2 Background @250cm");
        assert_eq!(t.title, "Survey 4 Det=Ba2 Background @250cm");
        assert_eq!((t.detector.as_str(), t.sample), ("Ba2", Some(4)));
        assert_eq!(t.source_type, SourceType::Background);

        let t = parse_title("Foreground");
        assert_eq!((t.detector.as_str(), t.sample), ("", None));
        assert_eq!(t.source_type, SourceType::Foreground);
        assert_eq!(parse_title("Item 7").source_type, SourceType::Foreground);
    }

    #[test]
    fn test_deviation_slot_assignment() {
        let slots = assign_deviation_slots(&["Aa1", "gamma", "Aa2"], false);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], ("Aa1", DeviationSlot::from_index(0)));
        assert_eq!(slots[1], ("Aa2", DeviationSlot::from_index(1)));
        assert_eq!(slots[2], ("gamma", DeviationSlot::from_index(2)));
    }
}
