use std::collections::HashMap;
use std::io::{self, BufReader, Read};
use std::mem;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Error as XMLError, Reader};
use regex::Regex;
use thiserror::Error;

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{finish_decoded, new_decoded, parse_floats_lenient, MAX_DECODED_CHANNELS};
use crate::io::SpectrumFileFormat;
use crate::measurement::Measurement;
use crate::meta::{DetectorType, OccupancyStatus, SourceType};
use crate::spec_file::SpecFile;

use super::{
    parse_duration, CALIBRATION_TYPE, CHARACTERISTIC_DETECTOR_TYPE, CHARACTERISTIC_INSPECTION,
    CHARACTERISTIC_LANE, CHARACTERISTIC_LOCATION, DATE_FORMAT, LIVE_TIME, POSITION_TIME, ROOT,
    SAMPLE_GROUP_PREFIX, TITLE,
};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::N42;

/**
The different states the N42 reader can enter while parsing different parts of the
document. Only needed by consumers to find where in the document an error occurred.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum N42ParserState {
    Start = 0,
    Document,
    InstrumentInformation,
    Characteristic,
    DetectorInformation,
    EnergyCalibration,
    MeasurementGroup,
    Measurement,
    Spectrum,
    GrossCounts,
    StateVector,
    Done,
}

/**
All the ways that N42 parsing can go wrong
*/
#[derive(Debug, Error)]
pub enum N42ParserError {
    #[error("The document root is {0}, not RadInstrumentData")]
    UnexpectedRoot(String),
    #[error("The document ended inside {0:?}")]
    IncompleteDocument(N42ParserState),
    #[error("An XML error {1} was encountered in {0:?}")]
    XMLError(N42ParserState, #[source] XMLError),
    #[error("Measurement data in {0:?} could not be stored: {1}")]
    InvalidData(N42ParserState, #[source] SpecError),
}

impl From<N42ParserError> for SpecError {
    fn from(value: N42ParserError) -> Self {
        match value {
            N42ParserError::UnexpectedRoot(_) => SpecError::mismatch(FORMAT, value.to_string()),
            // Anything before the root element that fails to parse is not N42 either
            N42ParserError::XMLError(N42ParserState::Start, _)
            | N42ParserError::IncompleteDocument(N42ParserState::Start) => {
                SpecError::mismatch(FORMAT, value.to_string())
            }
            N42ParserError::InvalidData(_, e) => e,
            _ => SpecError::malformed(FORMAT, value.to_string()),
        }
    }
}

impl From<N42ParserError> for io::Error {
    fn from(value: N42ParserError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

pub type ParserResult = Result<N42ParserState, N42ParserError>;

fn sample_group_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(&format!(r"^{SAMPLE_GROUP_PREFIX}(-?\d+)$")).unwrap())
}

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|t| t.naive_local()))
}

/// Expand `CountedZeroes` channel data, where a zero is followed by how many zero
/// channels it stands for. Fails once the spectrum would pass [`MAX_DECODED_CHANNELS`].
fn expand_counted_zeroes(values: &[f32]) -> SpecResult<Vec<f32>> {
    let mut counts = Vec::with_capacity(values.len());
    let mut values = values.iter();
    while let Some(v) = values.next() {
        if *v == 0.0 {
            let n = values.next().copied().unwrap_or(1.0).max(0.0);
            if n > (MAX_DECODED_CHANNELS - counts.len()) as f32 {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("a run of {n} zero channels exceeds {MAX_DECODED_CHANNELS} channels"),
                ));
            }
            counts.resize(counts.len() + n as usize, 0.0);
        } else {
            if counts.len() >= MAX_DECODED_CHANNELS {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("channel data exceeds {MAX_DECODED_CHANNELS} channels"),
                ));
            }
            counts.push(*v);
        }
    }
    Ok(counts)
}

#[derive(Debug, Default, Clone)]
struct DetectorEntry {
    name: Option<String>,
    category: String,
}

#[derive(Debug, Default, Clone)]
struct CalibrationEntry {
    remarks: Vec<String>,
    coefficients: Vec<f32>,
    boundaries: Vec<f32>,
    energies: Vec<f32>,
    deviations: Vec<f32>,
}

impl CalibrationEntry {
    fn is_full_range_fraction(&self) -> bool {
        self.remarks.iter().any(|r| {
            r.trim()
                .strip_prefix(CALIBRATION_TYPE.trim())
                .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("FullRangeFraction"))
        })
    }

    fn build(&self, channel_count: usize) -> SpecResult<EnergyCalibration> {
        if !self.boundaries.is_empty() {
            return EnergyCalibration::lower_channel_energy(channel_count, &self.boundaries);
        }
        if self.energies.len() != self.deviations.len() {
            return Err(SpecError::InvalidCalibration(format!(
                "{} deviation pair energies but {} offsets",
                self.energies.len(),
                self.deviations.len()
            )));
        }
        let pairs: Vec<(f32, f32)> = self
            .energies
            .iter()
            .copied()
            .zip(self.deviations.iter().copied())
            .collect();
        if self.is_full_range_fraction() {
            EnergyCalibration::full_range_fraction(&self.coefficients, channel_count, &pairs)
        } else {
            EnergyCalibration::polynomial(&self.coefficients, channel_count, &pairs)
        }
    }
}

#[derive(Debug, Default, Clone)]
struct SpectrumEntry {
    detector: String,
    calibration: Option<String>,
    compression: String,
    live_time: f32,
    counts: Vec<f32>,
}

#[derive(Debug, Default, Clone)]
struct GrossCountsEntry {
    detector: String,
    live_time: f32,
    counts: Vec<f32>,
}

#[derive(Debug, Default, Clone)]
struct MeasurementEntry {
    ordinal: usize,
    groups: Vec<String>,
    remarks: Vec<String>,
    class_code: Option<String>,
    start_time: Option<NaiveDateTime>,
    real_time: f32,
    spectra: Vec<SpectrumEntry>,
    gross_counts: Vec<GrossCountsEntry>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    position_time: Option<NaiveDateTime>,
    occupancy: Option<String>,
}

/// Accumulates the document as it streams past, deferring reference resolution to
/// [`N42Builder::finish`] since ids may be used before the element declaring them
#[derive(Debug, Default)]
struct N42Builder {
    file: SpecFile,
    path: Vec<String>,
    text: String,
    characteristic: (String, String),
    detector_id: String,
    detector: DetectorEntry,
    detectors: HashMap<String, DetectorEntry>,
    calibration_id: String,
    calibration: CalibrationEntry,
    calibrations: HashMap<String, CalibrationEntry>,
    groups: IndexMap<String, i32>,
    measurement: MeasurementEntry,
    measurements: Vec<MeasurementEntry>,
    spectrum: SpectrumEntry,
    gross_counts: GrossCountsEntry,
}

impl N42Builder {
    fn new() -> Self {
        Self {
            file: new_decoded(),
            ..Default::default()
        }
    }

    fn attribute(
        event: &BytesStart,
        name: &str,
        state: N42ParserState,
    ) -> Result<Option<String>, N42ParserError> {
        for attr in event.attributes() {
            let attr = attr.map_err(|e| N42ParserError::XMLError(state, e.into()))?;
            if attr.key.local_name().as_ref() == name.as_bytes() {
                let value = attr
                    .unescape_value()
                    .map_err(|e| N42ParserError::XMLError(state, e))?;
                return Ok(Some(value.trim().to_string()));
            }
        }
        Ok(None)
    }

    fn parent(&self) -> &str {
        let n = self.path.len();
        if n >= 2 {
            &self.path[n - 2]
        } else {
            ""
        }
    }

    fn warn_value(&mut self, element: &str, value: &str) {
        warn!("Could not parse N42 {element} value {value:?}");
        self.file
            .add_parse_warning(format!("Invalid {element} value {value:?}"));
    }

    fn parse_seconds(&mut self, element: &str, text: &str) -> f32 {
        match parse_duration(text) {
            Some(v) => v,
            None => {
                self.warn_value(element, text);
                0.0
            }
        }
    }

    fn parse_coordinate(&mut self, element: &str, text: &str) -> Option<f64> {
        let value = text.trim().parse::<f64>().ok();
        if value.is_none() {
            self.warn_value(element, text);
        }
        value
    }

    pub fn start_element(&mut self, event: &BytesStart, state: N42ParserState) -> ParserResult {
        let name = String::from_utf8_lossy(event.local_name().as_ref()).into_owned();
        trace!("Start {name} in {state:?}");
        self.text.clear();
        let next = match (state, name.as_str()) {
            (N42ParserState::Start, ROOT) => {
                if let Some(uuid) = Self::attribute(event, "n42DocUUID", state)? {
                    self.file.set_uuid(uuid);
                }
                N42ParserState::Document
            }
            (N42ParserState::Start, _) => return Err(N42ParserError::UnexpectedRoot(name)),
            (N42ParserState::Document, "RadInstrumentInformation") => {
                N42ParserState::InstrumentInformation
            }
            (N42ParserState::InstrumentInformation, "Characteristic") => {
                self.characteristic = Default::default();
                N42ParserState::Characteristic
            }
            (N42ParserState::Document, "RadDetectorInformation") => {
                self.detector_id = Self::attribute(event, "id", state)?.unwrap_or_default();
                self.detector = DetectorEntry::default();
                N42ParserState::DetectorInformation
            }
            (N42ParserState::Document, "EnergyCalibration") => {
                self.calibration_id = Self::attribute(event, "id", state)?.unwrap_or_default();
                self.calibration = CalibrationEntry::default();
                N42ParserState::EnergyCalibration
            }
            (N42ParserState::Document, "RadMeasurementGroup") => {
                let id = Self::attribute(event, "id", state)?.unwrap_or_default();
                let sample = sample_group_pattern()
                    .captures(&id)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<i32>().ok())
                    .unwrap_or(self.groups.len() as i32 + 1);
                self.groups.insert(id, sample);
                N42ParserState::MeasurementGroup
            }
            (N42ParserState::Document, "RadMeasurement") => {
                let groups = Self::attribute(event, "radMeasurementGroupReferences", state)?
                    .unwrap_or_default();
                self.measurement = MeasurementEntry {
                    ordinal: self.measurements.len() + 1,
                    groups: groups.split_ascii_whitespace().map(String::from).collect(),
                    ..Default::default()
                };
                N42ParserState::Measurement
            }
            (N42ParserState::Measurement, "Spectrum") => {
                self.spectrum = SpectrumEntry {
                    detector: Self::attribute(event, "radDetectorInformationReference", state)?
                        .unwrap_or_default(),
                    calibration: Self::attribute(event, "energyCalibrationReference", state)?,
                    ..Default::default()
                };
                N42ParserState::Spectrum
            }
            (N42ParserState::Spectrum, "ChannelData") => {
                self.spectrum.compression =
                    Self::attribute(event, "compressionCode", state)?.unwrap_or_default();
                state
            }
            (N42ParserState::Measurement, "GrossCounts") => {
                self.gross_counts = GrossCountsEntry {
                    detector: Self::attribute(event, "radDetectorInformationReference", state)?
                        .unwrap_or_default(),
                    ..Default::default()
                };
                N42ParserState::GrossCounts
            }
            (N42ParserState::Measurement, "StateVector") => N42ParserState::StateVector,
            _ => state,
        };
        self.path.push(name);
        Ok(next)
    }

    pub fn text(&mut self, event: &BytesText, state: N42ParserState) -> ParserResult {
        let text = event
            .unescape()
            .map_err(|e| N42ParserError::XMLError(state, e))?;
        self.text.push_str(&text);
        Ok(state)
    }

    fn end_document_child(&mut self, name: &str, text: String, state: N42ParserState) -> N42ParserState {
        match name {
            "Remark" if self.parent() == ROOT => self.file.add_remark(text),
            "RadInstrumentData" => return N42ParserState::Done,
            _ => {}
        }
        state
    }

    fn end_instrument_child(&mut self, name: &str, text: String, state: N42ParserState) -> N42ParserState {
        match name {
            "RadInstrumentManufacturerName" => self.file.set_manufacturer(text),
            "RadInstrumentIdentifier" => self.file.set_instrument_id(text),
            "RadInstrumentModelName" => self.file.set_instrument_model(text),
            "RadInstrumentClassCode" => self.file.set_instrument_type(text),
            "CharacteristicName" => self.characteristic.0 = text.trim().to_string(),
            "CharacteristicValue" => self.characteristic.1 = text,
            "Characteristic" => {
                let (name, value) = mem::take(&mut self.characteristic);
                match name.as_str() {
                    CHARACTERISTIC_DETECTOR_TYPE => {
                        let kind = value.parse::<DetectorType>().unwrap_or_else(|e| match e {});
                        self.file.set_detector_type(kind)
                    }
                    CHARACTERISTIC_LOCATION => self.file.set_measurement_location_name(value),
                    CHARACTERISTIC_INSPECTION => self.file.set_inspection(value),
                    CHARACTERISTIC_LANE => match value.trim().parse::<i32>() {
                        Ok(lane) => self.file.set_lane_number(lane),
                        Err(_) => self.warn_value("LaneNumber", &value),
                    },
                    _ => debug!("Skipping instrument characteristic {name}"),
                }
                return N42ParserState::InstrumentInformation;
            }
            "RadInstrumentInformation" => return N42ParserState::Document,
            _ => {}
        }
        state
    }

    fn end_calibration_child(&mut self, name: &str, text: String, state: N42ParserState) -> N42ParserState {
        let context = "N42 energy calibration";
        match name {
            "Remark" => self.calibration.remarks.push(text),
            "CoefficientValues" => self.calibration.coefficients = parse_floats_lenient(&text, context),
            "EnergyBoundaryValues" => self.calibration.boundaries = parse_floats_lenient(&text, context),
            "EnergyValues" => self.calibration.energies = parse_floats_lenient(&text, context),
            "EnergyDeviationValues" => {
                self.calibration.deviations = parse_floats_lenient(&text, context)
            }
            "EnergyCalibration" => {
                let id = mem::take(&mut self.calibration_id);
                self.calibrations.insert(id, mem::take(&mut self.calibration));
                return N42ParserState::Document;
            }
            _ => {}
        }
        state
    }

    fn end_measurement_child(&mut self, name: &str, text: String, state: N42ParserState) -> ParserResult {
        match (state, name) {
            (N42ParserState::Measurement, "Remark") if self.parent() == "RadMeasurement" => {
                self.measurement.remarks.push(text)
            }
            (N42ParserState::Measurement, "MeasurementClassCode") => {
                self.measurement.class_code = Some(text)
            }
            (N42ParserState::Measurement, "StartDateTime") => match parse_date_time(&text) {
                Some(t) => self.measurement.start_time = Some(t),
                None => self.warn_value("StartDateTime", &text),
            },
            (N42ParserState::Measurement, "RealTimeDuration") => {
                self.measurement.real_time = self.parse_seconds("RealTimeDuration", &text)
            }
            (N42ParserState::Measurement, "OccupancyIndicator") => {
                self.measurement.occupancy = Some(text)
            }
            (N42ParserState::Measurement, "RadMeasurement") => {
                self.measurements.push(mem::take(&mut self.measurement));
                return Ok(N42ParserState::Document);
            }
            (N42ParserState::Spectrum, "LiveTimeDuration") => {
                self.spectrum.live_time = self.parse_seconds("LiveTimeDuration", &text)
            }
            (N42ParserState::Spectrum, "ChannelData") => {
                let values = parse_floats_lenient(&text, "N42 channel data");
                self.spectrum.counts = if self.spectrum.compression == "CountedZeroes" {
                    expand_counted_zeroes(&values)
                        .map_err(|e| N42ParserError::InvalidData(state, e))?
                } else {
                    values
                };
            }
            (N42ParserState::Spectrum, "Spectrum") => {
                self.measurement.spectra.push(mem::take(&mut self.spectrum));
                return Ok(N42ParserState::Measurement);
            }
            (N42ParserState::GrossCounts, "LiveTimeDuration") => {
                self.gross_counts.live_time = self.parse_seconds("LiveTimeDuration", &text)
            }
            (N42ParserState::GrossCounts, "CountData") => {
                self.gross_counts.counts = parse_floats_lenient(&text, "N42 gross counts")
            }
            (N42ParserState::GrossCounts, "GrossCounts") => {
                self.measurement
                    .gross_counts
                    .push(mem::take(&mut self.gross_counts));
                return Ok(N42ParserState::Measurement);
            }
            (N42ParserState::StateVector, "LatitudeValue") => {
                self.measurement.latitude = self.parse_coordinate("LatitudeValue", &text)
            }
            (N42ParserState::StateVector, "LongitudeValue") => {
                self.measurement.longitude = self.parse_coordinate("LongitudeValue", &text)
            }
            (N42ParserState::StateVector, "Remark") => {
                if let Some(time) = text.strip_prefix(POSITION_TIME) {
                    self.measurement.position_time = parse_date_time(time);
                }
            }
            (N42ParserState::StateVector, "StateVector") => return Ok(N42ParserState::Measurement),
            _ => {}
        }
        Ok(state)
    }

    pub fn end_element(&mut self, name: &[u8], state: N42ParserState) -> ParserResult {
        let name = String::from_utf8_lossy(name).into_owned();
        trace!("End {name} in {state:?}");
        let text = mem::take(&mut self.text);
        let next = match state {
            N42ParserState::Start | N42ParserState::Done => state,
            N42ParserState::Document => self.end_document_child(&name, text, state),
            N42ParserState::InstrumentInformation | N42ParserState::Characteristic => {
                self.end_instrument_child(&name, text, state)
            }
            N42ParserState::DetectorInformation => {
                match name.as_str() {
                    "RadDetectorName" => self.detector.name = Some(text),
                    "RadDetectorCategoryCode" => self.detector.category = text.trim().to_string(),
                    "RadDetectorInformation" => {
                        let id = mem::take(&mut self.detector_id);
                        self.detectors.insert(id, mem::take(&mut self.detector));
                    }
                    _ => {}
                }
                if name == "RadDetectorInformation" {
                    N42ParserState::Document
                } else {
                    state
                }
            }
            N42ParserState::EnergyCalibration => self.end_calibration_child(&name, text, state),
            N42ParserState::MeasurementGroup => {
                if name == "RadMeasurementGroup" {
                    N42ParserState::Document
                } else {
                    state
                }
            }
            N42ParserState::Measurement
            | N42ParserState::Spectrum
            | N42ParserState::GrossCounts
            | N42ParserState::StateVector => self.end_measurement_child(&name, text, state)?,
        };
        self.path.pop();
        Ok(next)
    }

    fn detector_name(&self, reference: &str) -> String {
        match self.detectors.get(reference) {
            Some(DetectorEntry { name: Some(name), .. }) => name.clone(),
            _ => reference.to_string(),
        }
    }

    fn is_neutron_detector(&self, reference: &str) -> bool {
        self.detectors
            .get(reference)
            .is_some_and(|d| d.category.eq_ignore_ascii_case("Neutron"))
    }

    fn sample_number(&self, entry: &MeasurementEntry) -> i32 {
        entry
            .groups
            .iter()
            .find_map(|g| self.groups.get(g).copied())
            .unwrap_or(entry.ordinal as i32)
    }

    fn calibrate(
        &self,
        reference: &str,
        channel_count: usize,
        cache: &mut HashMap<(String, usize), Option<Arc<EnergyCalibration>>>,
        measurement: &mut Measurement,
    ) {
        let key = (reference.to_string(), channel_count);
        let cal = match cache.get(&key) {
            Some(cal) => cal.clone(),
            None => {
                let built = match self.calibrations.get(reference) {
                    Some(entry) => match entry.build(channel_count) {
                        Ok(cal) => Some(Arc::new(cal)),
                        Err(e) => {
                            warn!("Ignoring N42 energy calibration {reference:?}: {e}");
                            measurement
                                .add_parse_warning(format!("Invalid energy calibration {reference:?}: {e}"));
                            None
                        }
                    },
                    None => {
                        measurement.add_parse_warning(format!(
                            "Reference to undeclared energy calibration {reference:?}"
                        ));
                        None
                    }
                };
                cache.insert(key, built.clone());
                built
            }
        };
        if let Some(cal) = cal {
            if let Err(e) = measurement.set_energy_calibration(cal) {
                measurement.add_parse_warning(format!("Energy calibration does not fit: {e}"));
            }
        }
    }

    /// The measurement fields shared by every detector in a `RadMeasurement`
    fn common_fields(&self, entry: &MeasurementEntry, remarks: &[String], title: &str) -> Measurement {
        let mut m = Measurement::new();
        m.set_sample_number(self.sample_number(entry));
        m.set_title(title);
        m.set_remarks(remarks.to_vec());
        m.set_real_time(entry.real_time);
        m.set_start_time(entry.start_time);
        if let Some(code) = entry.class_code.as_deref() {
            let kind = code.parse::<SourceType>().unwrap_or_else(|e| match e {});
            m.set_source_type(kind);
        }
        if let Some(occupancy) = entry.occupancy.as_deref() {
            let status = occupancy.parse::<OccupancyStatus>().unwrap_or_else(|e| match e {});
            m.set_occupancy_status(status);
        }
        if let (Some(lat), Some(lon)) = (entry.latitude, entry.longitude) {
            m.set_position(lat, lon, entry.position_time);
        }
        m
    }

    fn build_measurements(
        &self,
        entry: &MeasurementEntry,
        cache: &mut HashMap<(String, usize), Option<Arc<EnergyCalibration>>>,
    ) -> Result<Vec<Measurement>, SpecError> {
        let mut remarks = entry.remarks.as_slice();
        let mut title = "";
        if let Some(first) = remarks.first().and_then(|r| r.strip_prefix(TITLE)) {
            title = first;
            remarks = &remarks[1..];
        }

        let mut neutrons: Vec<Option<&GrossCountsEntry>> = entry.gross_counts.iter().map(Some).collect();
        let mut records = Vec::new();
        for spectrum in entry.spectra.iter() {
            let mut m = self.common_fields(entry, remarks, title);
            m.set_detector_name(self.detector_name(&spectrum.detector));
            m.set_gamma_counts(spectrum.counts.clone(), spectrum.live_time, entry.real_time)?;
            if let Some(reference) = spectrum.calibration.as_deref() {
                if !spectrum.counts.is_empty() {
                    self.calibrate(reference, spectrum.counts.len(), cache, &mut m);
                }
            }
            let paired = neutrons
                .iter()
                .position(|g| g.is_some_and(|g| g.detector == spectrum.detector))
                .or_else(|| {
                    // A lone spectrum takes a neutron detector reported alongside it
                    if entry.spectra.len() != 1 {
                        return None;
                    }
                    neutrons
                        .iter()
                        .position(|g| g.is_some_and(|g| self.is_neutron_detector(&g.detector)))
                });
            let matched = paired.and_then(|i| neutrons[i].take());
            if let Some(g) = matched {
                m.set_neutron_counts(g.counts.clone(), g.live_time);
            }
            records.push(m);
        }

        for g in neutrons.into_iter().flatten() {
            let mut remarks = remarks;
            let mut live_time = 0.0;
            if let Some(value) = remarks.first().and_then(|r| r.strip_prefix(LIVE_TIME)) {
                match value.trim().parse::<f32>() {
                    Ok(v) => {
                        live_time = v;
                        remarks = &remarks[1..];
                    }
                    Err(_) => debug!("Keeping unparsable live time remark {value:?}"),
                }
            }
            let mut m = self.common_fields(entry, remarks, title);
            m.set_detector_name(self.detector_name(&g.detector));
            m.set_live_time(live_time);
            m.set_neutron_counts(g.counts.clone(), g.live_time);
            records.push(m);
        }
        Ok(records)
    }

    pub fn finish(mut self, state: N42ParserState) -> SpecResult<SpecFile> {
        if state != N42ParserState::Done {
            return Err(N42ParserError::IncompleteDocument(state).into());
        }
        let mut cache = HashMap::new();
        let entries = mem::take(&mut self.measurements);
        let mut records = Vec::new();
        for entry in entries.iter() {
            records.extend(
                self.build_measurements(entry, &mut cache)
                    .map_err(|e| N42ParserError::InvalidData(N42ParserState::Measurement, e))?,
            );
        }
        debug!(
            "Read {} N42 measurements from {} RadMeasurement elements",
            records.len(),
            entries.len()
        );
        let mut file = self.file;
        for m in records {
            file.add_measurement(m, true)?;
        }
        finish_decoded(file)
    }
}

/// Decode an N42-2012 document.
///
/// Measurements are read in document order. Each `RadMeasurement` yields one measurement
/// per detector with a `Spectrum`, plus one for every `GrossCounts` not paired with one.
/// Sample numbers come from `RadMeasurementGroup` references, or the position of the
/// `RadMeasurement` in the document when there are none.
pub fn read_n42<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let mut reader = Reader::from_reader(BufReader::new(stream));
    reader.trim_text(false);
    let mut buffer = Vec::new();
    let mut builder = N42Builder::new();
    let mut state = N42ParserState::Start;
    loop {
        let event = reader
            .read_event_into(&mut buffer)
            .map_err(|e| N42ParserError::XMLError(state, e))?;
        state = match event {
            Event::Start(ref e) => builder.start_element(e, state)?,
            Event::Empty(ref e) => {
                let inner = builder.start_element(e, state)?;
                builder.end_element(e.local_name().as_ref(), inner)?
            }
            Event::End(ref e) => builder.end_element(e.local_name().as_ref(), state)?,
            Event::Text(ref e) => builder.text(e, state)?,
            Event::CData(ref e) => {
                builder.text.push_str(&String::from_utf8_lossy(e));
                state
            }
            Event::Eof => break,
            _ => state,
        };
        buffer.clear();
    }
    builder.finish(state)
}
