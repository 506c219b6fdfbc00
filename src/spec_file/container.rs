use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::debug;

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::{decode_auto, SpectrumFileFormat};
use crate::measurement::Measurement;
use crate::meta::{DetectorType, OccupancyStatus, SourceType};
use crate::spec_file::flags::{CleanupOptions, FileProperties};

/// A handle to a [`Measurement`] owned by a [`SpecFile`]. Handles stay valid until the
/// measurement is removed and are never reused within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementId(pub(crate) usize);

impl MeasurementId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A collection of measurements, the instrument that took them and the summary indices
/// derived from them.
///
/// Measurements are held in a slot arena addressed by [`MeasurementId`]. Read access is
/// available through [`SpecFile::measurement`] and [`SpecFile::measurements`]; all mutation
/// goes through methods on the container so the derived indices stay consistent.
///
/// The derived indices (sample numbers, detector names, per-record lookup, sums and
/// [`FileProperties`]) are rebuilt by [`SpecFile::cleanup`]. Adding measurements with
/// `defer_cleanup = true` leaves them stale until the next cleanup.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpecFile {
    pub(crate) slots: Vec<Option<Measurement>>,
    pub(crate) order: Vec<MeasurementId>,
    pub(crate) calibrations: Vec<Arc<EnergyCalibration>>,

    pub(crate) manufacturer: String,
    pub(crate) instrument_model: String,
    pub(crate) instrument_id: String,
    pub(crate) instrument_type: String,
    pub(crate) detector_type: DetectorType,
    pub(crate) measurement_location_name: String,
    pub(crate) inspection: String,
    pub(crate) lane_number: i32,
    pub(crate) uuid: String,
    pub(crate) remarks: Vec<String>,
    pub(crate) parse_warnings: Vec<String>,
    pub(crate) cleanup_options: CleanupOptions,

    pub(crate) sample_numbers: BTreeSet<i32>,
    pub(crate) detector_names: Vec<String>,
    pub(crate) gamma_detector_names: Vec<String>,
    pub(crate) neutron_detector_names: Vec<String>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) record_index: HashMap<(i32, String), MeasurementId>,
    pub(crate) gamma_count_sum: f64,
    pub(crate) neutron_counts_sum: f64,
    pub(crate) gamma_live_time: f32,
    pub(crate) gamma_real_time: f32,
    pub(crate) mean_latitude: Option<f64>,
    pub(crate) mean_longitude: Option<f64>,
    pub(crate) properties: FileProperties,
}

impl PartialEq for SpecFile {
    /// Two files are equal when their metadata and their measurements, in order, are equal.
    fn eq(&self, other: &Self) -> bool {
        self.manufacturer == other.manufacturer
            && self.instrument_model == other.instrument_model
            && self.instrument_id == other.instrument_id
            && self.instrument_type == other.instrument_type
            && self.detector_type == other.detector_type
            && self.measurement_location_name == other.measurement_location_name
            && self.inspection == other.inspection
            && self.lane_number == other.lane_number
            && self.uuid == other.uuid
            && self.remarks == other.remarks
            && self.num_measurements() == other.num_measurements()
            && self
                .measurements()
                .zip(other.measurements())
                .all(|(a, b)| a == b)
    }
}

macro_rules! string_property {
    ($getter:ident, $setter:ident, $field:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $getter(&self) -> &str {
            &self.$field
        }

        pub fn $setter<S: Into<String>>(&mut self, value: S) {
            self.$field = value.into();
        }
    };
}

impl SpecFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` in whatever supported format they are in
    pub fn from_bytes(bytes: &[u8]) -> SpecResult<Self> {
        decode_auto(bytes)
    }

    /// Read and decode the file at `path`, detecting its format from its content
    pub fn from_path<P: AsRef<path::Path>>(path: P) -> SpecResult<Self> {
        let bytes = fs::read(path.as_ref())?;
        debug!("Decoding {} ({} bytes)", path.as_ref().display(), bytes.len());
        decode_auto(&bytes)
    }

    /// Replace the contents of this container with the file decoded from `bytes`.
    ///
    /// On failure the container is left untouched.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> SpecResult<()> {
        let decoded = decode_auto(bytes)?;
        *self = decoded;
        Ok(())
    }

    /// Encode the measurements matching `samples` and `detectors` in `format`. Empty
    /// filters select everything.
    pub fn write_to<W: Write, D: AsRef<str>>(
        &self,
        format: SpectrumFileFormat,
        samples: &[i32],
        detectors: &[D],
        stream: &mut W,
    ) -> SpecResult<()> {
        let detectors: Vec<String> = detectors.iter().map(|d| d.as_ref().to_string()).collect();
        let codec = format.codec().ok_or_else(|| {
            SpecError::EncodeError(format!("{format} files cannot be written"))
        })?;
        codec.encode(self, samples, &detectors, stream)
    }

    /// Encode the selected measurements into a new buffer
    pub fn to_bytes<D: AsRef<str>>(
        &self,
        format: SpectrumFileFormat,
        samples: &[i32],
        detectors: &[D],
    ) -> SpecResult<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_to(format, samples, detectors, &mut buffer)?;
        Ok(buffer)
    }

    /// Write the selected measurements to `path`.
    ///
    /// Fails with [`SpecError::EncodeError`] when `path` exists and `overwrite` is false.
    /// The file is only created once encoding has succeeded.
    pub fn write_to_path<P: AsRef<path::Path>, D: AsRef<str>>(
        &self,
        path: P,
        format: SpectrumFileFormat,
        samples: &[i32],
        detectors: &[D],
        overwrite: bool,
    ) -> SpecResult<()> {
        let path = path.as_ref();
        if !overwrite && path.exists() {
            return Err(SpecError::EncodeError(format!(
                "{} already exists and overwriting was not requested",
                path.display()
            )));
        }
        let buffer = self.to_bytes(format, samples, detectors)?;
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut handle = options.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SpecError::EncodeError(format!(
                "{} already exists and overwriting was not requested",
                path.display()
            )),
            _ => SpecError::IOError(e),
        })?;
        handle.write_all(&buffer)?;
        handle.flush()?;
        Ok(())
    }

    pub fn num_measurements(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The handles of all measurements, in container order
    pub fn measurement_ids(&self) -> &[MeasurementId] {
        &self.order
    }

    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    /// The `index`-th measurement in container order
    pub fn measurement_at(&self, index: usize) -> Option<&Measurement> {
        self.order.get(index).and_then(|id| self.measurement(*id))
    }

    /// Iterate over the measurements in container order
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> + '_ {
        self.order.iter().filter_map(|id| self.measurement(*id))
    }

    /// Look up the measurement for a sample number and detector using the index built by
    /// the last cleanup
    pub fn measurement_by(&self, sample_number: i32, detector_name: &str) -> Option<&Measurement> {
        self.record_index
            .get(&(sample_number, detector_name.to_string()))
            .and_then(|id| self.measurement(*id))
    }

    pub fn id_for(&self, sample_number: i32, detector_name: &str) -> Option<MeasurementId> {
        self.order.iter().copied().find(|id| {
            self.measurement(*id).is_some_and(|m| {
                m.sample_number() == sample_number && m.detector_name() == detector_name
            })
        })
    }

    fn get_mut(&mut self, id: MeasurementId) -> SpecResult<&mut Measurement> {
        self.slots
            .get_mut(id.0)
            .and_then(|s| s.as_mut())
            .ok_or(SpecError::UnknownMeasurement(id))
    }

    pub(crate) fn next_free_sample(&self, detector_name: &str) -> i32 {
        self.measurements()
            .filter(|m| m.detector_name() == detector_name)
            .map(|m| m.sample_number())
            .max()
            .map(|s| s + 1)
            .unwrap_or(1)
    }

    /// Return the shared calibration equal to `cal`, adding it to the calibration arena if
    /// no equal one is held yet
    pub(crate) fn intern_calibration(
        &mut self,
        cal: &Arc<EnergyCalibration>,
    ) -> Arc<EnergyCalibration> {
        match self.calibrations.iter().find(|c| ***c == **cal) {
            Some(existing) => existing.clone(),
            None => {
                self.calibrations.push(cal.clone());
                cal.clone()
            }
        }
    }

    /// Take ownership of `measurement`.
    ///
    /// Fails with [`SpecError::DuplicateRecordKey`] when a measurement with the same sample
    /// number and detector name is already held, unless the container's cleanup options
    /// include [`CleanupOptions::AUTO_RENUMBER`], in which case the new measurement is
    /// given the next unused sample number for its detector.
    ///
    /// Unless `defer_cleanup` is set, a cleanup pass with the container's options runs
    /// afterwards.
    pub fn add_measurement(
        &mut self,
        mut measurement: Measurement,
        defer_cleanup: bool,
    ) -> SpecResult<MeasurementId> {
        if self
            .id_for(measurement.sample_number(), measurement.detector_name())
            .is_some()
        {
            if self.cleanup_options.contains(CleanupOptions::AUTO_RENUMBER) {
                let sample = self.next_free_sample(measurement.detector_name());
                debug!(
                    "Renumbering measurement for {:?} from sample {} to {}",
                    measurement.detector_name(),
                    measurement.sample_number(),
                    sample
                );
                measurement.set_sample_number(sample);
            } else {
                return Err(SpecError::DuplicateRecordKey {
                    sample: measurement.sample_number(),
                    detector: measurement.detector_name().to_string(),
                });
            }
        }
        if let Some(cal) = measurement.energy_calibration().cloned() {
            let shared = self.intern_calibration(&cal);
            measurement.set_energy_calibration(shared)?;
        }
        let id = MeasurementId(self.slots.len());
        self.slots.push(Some(measurement));
        self.order.push(id);
        if !defer_cleanup {
            self.cleanup(self.cleanup_options)?;
        }
        Ok(id)
    }

    /// Remove a measurement from the container, returning it
    pub fn remove_measurement(&mut self, id: MeasurementId) -> SpecResult<Measurement> {
        let removed = self
            .slots
            .get_mut(id.0)
            .and_then(|s| s.take())
            .ok_or(SpecError::UnknownMeasurement(id))?;
        self.order.retain(|i| *i != id);
        self.recalculate_indices();
        Ok(removed)
    }

    pub fn set_live_time(&mut self, id: MeasurementId, live_time: f32) -> SpecResult<()> {
        let m = self.get_mut(id)?;
        let old = m.live_time();
        let has_gamma = m.gamma_counts().is_some();
        m.set_live_time(live_time);
        if has_gamma {
            self.gamma_live_time += live_time - old;
        }
        Ok(())
    }

    pub fn set_real_time(&mut self, id: MeasurementId, real_time: f32) -> SpecResult<()> {
        let m = self.get_mut(id)?;
        let old = m.real_time();
        let has_gamma = m.gamma_counts().is_some();
        m.set_real_time(real_time);
        if has_gamma {
            self.gamma_real_time += real_time - old;
        }
        Ok(())
    }

    pub fn set_title<S: Into<String>>(&mut self, id: MeasurementId, title: S) -> SpecResult<()> {
        self.get_mut(id)?.set_title(title);
        Ok(())
    }

    pub fn set_start_time(
        &mut self,
        id: MeasurementId,
        start_time: Option<NaiveDateTime>,
    ) -> SpecResult<()> {
        self.get_mut(id)?.set_start_time(start_time);
        self.recalculate_indices();
        Ok(())
    }

    pub fn set_source_type(&mut self, id: MeasurementId, source_type: SourceType) -> SpecResult<()> {
        self.get_mut(id)?.set_source_type(source_type);
        Ok(())
    }

    pub fn set_occupancy_status(
        &mut self,
        id: MeasurementId,
        status: OccupancyStatus,
    ) -> SpecResult<()> {
        self.get_mut(id)?.set_occupancy_status(status);
        Ok(())
    }

    pub fn set_remarks(&mut self, id: MeasurementId, remarks: Vec<String>) -> SpecResult<()> {
        self.get_mut(id)?.set_remarks(remarks);
        Ok(())
    }

    pub fn set_position(
        &mut self,
        id: MeasurementId,
        latitude: f64,
        longitude: f64,
        time: Option<NaiveDateTime>,
    ) -> SpecResult<()> {
        self.get_mut(id)?.set_position(latitude, longitude, time);
        self.recalculate_indices();
        Ok(())
    }

    /// Replace a measurement's gamma counts and times, keeping the summed counts and times
    /// current
    pub fn set_gamma_counts(
        &mut self,
        id: MeasurementId,
        counts: Vec<f32>,
        live_time: f32,
        real_time: f32,
    ) -> SpecResult<()> {
        self.get_mut(id)?
            .set_gamma_counts(counts, live_time, real_time)?;
        self.recalculate_indices();
        Ok(())
    }

    pub fn set_neutron_counts(
        &mut self,
        id: MeasurementId,
        counts: Vec<f32>,
        live_time: f32,
    ) -> SpecResult<()> {
        self.get_mut(id)?.set_neutron_counts(counts, live_time);
        self.recalculate_indices();
        Ok(())
    }

    /// Attach a calibration to a measurement, sharing it with any other measurement that
    /// has an equal one
    pub fn set_energy_calibration(
        &mut self,
        id: MeasurementId,
        cal: EnergyCalibration,
    ) -> SpecResult<()> {
        self.get_mut(id)?;
        let shared = self.intern_calibration(&Arc::new(cal));
        self.get_mut(id)?.set_energy_calibration(shared)?;
        self.recalculate_indices();
        Ok(())
    }

    /// Rename the detector of a measurement. Fails with [`SpecError::DuplicateRecordKey`]
    /// when the new name collides with another measurement of the same sample.
    pub fn set_detector_name<S: Into<String>>(&mut self, id: MeasurementId, name: S) -> SpecResult<()> {
        let name = name.into();
        let sample = self.get_mut(id)?.sample_number();
        if let Some(other) = self.id_for(sample, &name) {
            if other != id {
                return Err(SpecError::DuplicateRecordKey {
                    sample,
                    detector: name,
                });
            }
        }
        self.get_mut(id)?.set_detector_name(name);
        self.recalculate_indices();
        Ok(())
    }

    /// Change the sample number of a measurement. Fails with
    /// [`SpecError::DuplicateRecordKey`] when its detector already has that sample number.
    pub fn set_sample_number(&mut self, id: MeasurementId, sample_number: i32) -> SpecResult<()> {
        let detector = self.get_mut(id)?.detector_name().to_string();
        if let Some(other) = self.id_for(sample_number, &detector) {
            if other != id {
                return Err(SpecError::DuplicateRecordKey {
                    sample: sample_number,
                    detector,
                });
            }
        }
        self.get_mut(id)?.set_sample_number(sample_number);
        self.recalculate_indices();
        Ok(())
    }

    string_property!(manufacturer, set_manufacturer, manufacturer, "The instrument manufacturer");
    string_property!(instrument_model, set_instrument_model, instrument_model, "The instrument model");
    string_property!(
        instrument_id,
        set_instrument_id,
        instrument_id,
        "The instrument serial number"
    );
    string_property!(
        instrument_type,
        set_instrument_type,
        instrument_type,
        "A free text instrument class, e.g. \"Spectroscopic Portal Monitor\""
    );
    string_property!(
        measurement_location_name,
        set_measurement_location_name,
        measurement_location_name,
        "Where the measurements were taken"
    );
    string_property!(inspection, set_inspection, inspection, "The kind of inspection performed");
    string_property!(uuid, set_uuid, uuid, "A unique identifier for this file's contents");

    /// Give the file a fresh random UUID, returning it
    pub fn generate_uuid(&mut self) -> &str {
        self.uuid = uuid::Uuid::new_v4().to_string();
        &self.uuid
    }

    pub fn serial_number(&self) -> &str {
        self.instrument_id()
    }

    pub fn set_serial_number<S: Into<String>>(&mut self, value: S) {
        self.set_instrument_id(value)
    }

    pub fn detector_type(&self) -> &DetectorType {
        &self.detector_type
    }

    pub fn set_detector_type(&mut self, detector_type: DetectorType) {
        self.detector_type = detector_type;
    }

    pub fn lane_number(&self) -> i32 {
        self.lane_number
    }

    pub fn set_lane_number(&mut self, lane_number: i32) {
        self.lane_number = lane_number;
    }

    pub fn remarks(&self) -> &[String] {
        &self.remarks
    }

    pub fn set_remarks_for_file(&mut self, remarks: Vec<String>) {
        self.remarks = remarks;
    }

    pub fn add_remark<S: Into<String>>(&mut self, remark: S) {
        self.remarks.push(remark.into());
    }

    /// Notes left by the decoder about content it could not fully interpret
    pub fn parse_warnings(&self) -> &[String] {
        &self.parse_warnings
    }

    pub(crate) fn add_parse_warning<S: Into<String>>(&mut self, warning: S) {
        self.parse_warnings.push(warning.into());
    }

    pub fn cleanup_options(&self) -> CleanupOptions {
        self.cleanup_options
    }

    /// The options used by cleanup passes triggered by [`SpecFile::add_measurement`]
    pub fn set_cleanup_options(&mut self, options: CleanupOptions) {
        self.cleanup_options = options;
    }

    /// Distinct sample numbers, ascending
    pub fn sample_numbers(&self) -> &BTreeSet<i32> {
        &self.sample_numbers
    }

    /// Distinct detector names in the order they were first seen
    pub fn detector_names(&self) -> &[String] {
        &self.detector_names
    }

    pub fn gamma_detector_names(&self) -> &[String] {
        &self.gamma_detector_names
    }

    pub fn neutron_detector_names(&self) -> &[String] {
        &self.neutron_detector_names
    }

    pub fn gamma_count_sum(&self) -> f64 {
        self.gamma_count_sum
    }

    pub fn neutron_counts_sum(&self) -> f64 {
        self.neutron_counts_sum
    }

    pub fn gamma_live_time(&self) -> f32 {
        self.gamma_live_time
    }

    pub fn gamma_real_time(&self) -> f32 {
        self.gamma_real_time
    }

    pub fn mean_latitude(&self) -> Option<f64> {
        self.mean_latitude
    }

    pub fn mean_longitude(&self) -> Option<f64> {
        self.mean_longitude
    }

    pub fn has_gps_info(&self) -> bool {
        self.properties.contains(FileProperties::HAS_GPS_INFO)
    }

    pub fn properties(&self) -> FileProperties {
        self.properties
    }

    /// The distinct calibrations shared by the measurements
    pub fn energy_calibrations(&self) -> &[Arc<EnergyCalibration>] {
        &self.calibrations
    }

    /// The ids of the measurements whose sample number is in `samples` and whose detector
    /// is in `detectors`, in container order. An empty filter matches everything.
    pub fn select_measurements<D: AsRef<str>>(
        &self,
        samples: &[i32],
        detectors: &[D],
    ) -> Vec<MeasurementId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.measurement(*id).is_some_and(|m| {
                    (samples.is_empty() || samples.contains(&m.sample_number()))
                        && (detectors.is_empty()
                            || detectors.iter().any(|d| d.as_ref() == m.detector_name()))
                })
            })
            .collect()
    }

    /// Like [`SpecFile::select_measurements`], but every requested sample number and
    /// detector must exist, as is required when writing
    pub(crate) fn select_for_encode<D: AsRef<str>>(
        &self,
        samples: &[i32],
        detectors: &[D],
    ) -> SpecResult<Vec<MeasurementId>> {
        for s in samples {
            if !self.measurements().any(|m| m.sample_number() == *s) {
                return Err(SpecError::EncodeError(format!(
                    "sample number {s} is not in the file"
                )));
            }
        }
        for d in detectors {
            if !self.measurements().any(|m| m.detector_name() == d.as_ref()) {
                return Err(SpecError::EncodeError(format!(
                    "detector {:?} is not in the file",
                    d.as_ref()
                )));
            }
        }
        let selected = self.select_measurements(samples, detectors);
        if selected.is_empty() {
            return Err(SpecError::EncodeError(
                "no measurements were selected for writing".to_string(),
            ));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(sample: i32, detector: &str, counts: Vec<f32>) -> SpecResult<Measurement> {
        let mut m = Measurement::new();
        let n = counts.len();
        m.set_gamma_counts(counts, 10.0, 15.0)?;
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(&[0.0, 3.0], n, &[])?))?;
        m.set_sample_number(sample);
        m.set_detector_name(detector);
        Ok(m)
    }

    #[test_log::test]
    fn test_duplicate_key() -> SpecResult<()> {
        let mut file = SpecFile::new();
        file.add_measurement(record(1, "Aa1", vec![1.0; 8])?, false)?;
        let err = file
            .add_measurement(record(1, "Aa1", vec![2.0; 8])?, false)
            .unwrap_err();
        assert!(matches!(err, SpecError::DuplicateRecordKey { sample: 1, .. }));
        assert_eq!(file.num_measurements(), 1);

        file.set_cleanup_options(CleanupOptions::AUTO_RENUMBER);
        let id = file.add_measurement(record(1, "Aa1", vec![2.0; 8])?, false)?;
        assert_eq!(file.measurement(id).unwrap().sample_number(), 2);
        assert_eq!(file.sample_numbers().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        Ok(())
    }

    #[test_log::test]
    fn test_shared_calibration() -> SpecResult<()> {
        let mut file = SpecFile::new();
        let a = file.add_measurement(record(1, "Aa1", vec![1.0; 8])?, true)?;
        let b = file.add_measurement(record(1, "Aa2", vec![1.0; 8])?, true)?;
        file.cleanup(CleanupOptions::empty())?;
        let cal_a = file.measurement(a).unwrap().energy_calibration().unwrap();
        let cal_b = file.measurement(b).unwrap().energy_calibration().unwrap();
        assert!(Arc::ptr_eq(cal_a, cal_b));
        assert_eq!(file.energy_calibrations().len(), 1);
        Ok(())
    }

    #[test_log::test]
    fn test_routed_setters_patch_sums() -> SpecResult<()> {
        let mut file = SpecFile::new();
        let a = file.add_measurement(record(1, "Aa1", vec![1.0; 8])?, false)?;
        let b = file.add_measurement(record(1, "Aa2", vec![2.0; 8])?, false)?;
        assert_eq!(file.gamma_live_time(), 20.0);
        assert_eq!(file.gamma_count_sum(), 24.0);

        file.set_live_time(a, 5.0)?;
        file.set_real_time(b, 20.0)?;
        assert_eq!(file.gamma_live_time(), 15.0);
        assert_eq!(file.gamma_real_time(), 35.0);

        file.set_title(a, "Item 7")?;
        assert_eq!(file.measurement(a).unwrap().title(), "Item 7");

        let err = file.set_detector_name(b, "Aa1").unwrap_err();
        assert!(matches!(err, SpecError::DuplicateRecordKey { .. }));
        file.set_detector_name(b, "Ba1")?;
        assert_eq!(file.detector_names(), &["Aa1".to_string(), "Ba1".to_string()]);

        let removed = file.remove_measurement(a)?;
        assert_eq!(removed.detector_name(), "Aa1");
        assert_eq!(file.gamma_count_sum(), 16.0);
        assert!(file.measurement(a).is_none());
        assert!(matches!(
            file.remove_measurement(a),
            Err(SpecError::UnknownMeasurement(_))
        ));
        Ok(())
    }

    #[test_log::test]
    fn test_metadata() {
        let mut file = SpecFile::new();
        file.set_manufacturer("Ortec");
        file.set_instrument_model("Detective-X");
        file.set_serial_number("SN-1234");
        file.set_detector_type(DetectorType::DetectiveX);
        assert_eq!(file.manufacturer(), "Ortec");
        assert_eq!(file.instrument_id(), "SN-1234");
        assert_eq!(file.detector_type(), &DetectorType::DetectiveX);
        assert!(file.is_empty());

        let first = file.generate_uuid().to_string();
        assert_eq!(first.len(), 36);
        assert_ne!(file.generate_uuid(), first);
    }

    #[test_log::test]
    fn test_write_to_path_overwrite() -> SpecResult<()> {
        let mut file = SpecFile::new();
        file.add_measurement(record(1, "Aa1", vec![1.0; 8])?, false)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.n42");
        let none: &[&str] = &[];
        file.write_to_path(&path, SpectrumFileFormat::N42, &[], none, false)?;
        let err = file
            .write_to_path(&path, SpectrumFileFormat::N42, &[], none, false)
            .unwrap_err();
        assert!(matches!(err, SpecError::EncodeError(_)));
        file.write_to_path(&path, SpectrumFileFormat::N42, &[], none, true)?;
        let reread = SpecFile::from_path(&path)?;
        assert_eq!(reread, file);

        let err = file.to_bytes(SpectrumFileFormat::N42, &[7], none).unwrap_err();
        assert!(matches!(err, SpecError::EncodeError(_)));
        Ok(())
    }
}
