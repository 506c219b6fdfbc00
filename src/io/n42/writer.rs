use std::io::{BufWriter, Write};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::calibration::{EnergyCalType, EnergyCalibration};
use crate::error::SpecResult;
use crate::io::utils::format_count;
use crate::measurement::Measurement;
use crate::meta::{DetectorType, OccupancyStatus, SourceType};
use crate::spec_file::SpecFile;

use super::{
    format_duration, CALIBRATION_TYPE, CHARACTERISTIC_DETECTOR_TYPE, CHARACTERISTIC_INSPECTION,
    CHARACTERISTIC_LANE, CHARACTERISTIC_LOCATION, CREATOR, DATE_FORMAT, LIVE_TIME, NAMESPACE,
    POSITION_TIME, ROOT, SAMPLE_GROUP_PREFIX, TITLE,
};

const BUFFER_SIZE: usize = 10000;

macro_rules! bstart {
    ($e:tt) => {
        BytesStart::from_content($e, $e.len())
    };
}

macro_rules! attrib {
    ($name:expr, $value:expr, $elt:ident) => {
        let value = $value;
        let value: &str = value.as_ref();
        $elt.push_attribute(($name, value));
    };
}

macro_rules! start_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::Start($target.borrow()))?;
    };
}

macro_rules! end_event {
    ($writer:ident, $target:ident) => {
        $writer.handle.write_event(Event::End($target.to_end()))?;
    };
}

type WriterResult = SpecResult<()>;

fn detector_id(index: usize) -> String {
    format!("RadDetectorInformation-{}", index + 1)
}

fn calibration_id(index: usize) -> String {
    format!("EnergyCalibration-{}", index + 1)
}

fn sample_group_id(sample_number: i32) -> String {
    format!("{SAMPLE_GROUP_PREFIX}{sample_number}")
}

fn join_values<T, F: Fn(&T) -> String>(values: &[T], format: F) -> String {
    values.iter().map(format).collect::<Vec<_>>().join(" ")
}

fn class_code(source_type: &SourceType) -> &str {
    match source_type {
        SourceType::Unknown => "NotSpecified",
        other => other.as_str(),
    }
}

fn detector_category(records: &[&Measurement], name: &str) -> &'static str {
    let mut category = "Other";
    for m in records.iter().filter(|m| m.detector_name() == name) {
        if m.gamma_counts().is_some() {
            return "Gamma";
        }
        if m.contained_neutron() {
            category = "Neutron";
        }
    }
    category
}

/// Whether a measurement needs its live time carried in a remark because it has no
/// spectrum to hold it. A user remark that looks like one forces it too, so the reader
/// never mistakes that remark for the live time.
fn needs_live_time_remark(m: &Measurement) -> bool {
    m.gamma_counts().is_none()
        && (m.live_time() != 0.0 || m.remarks().first().is_some_and(|r| r.starts_with(LIVE_TIME)))
}

/// The remarks of a `RadMeasurement`: the title first whenever anything follows it or it
/// is set, then the live time of spectrum-less measurements, then the user's remarks
fn measurement_remarks(m: &Measurement) -> Vec<String> {
    let live_time = needs_live_time_remark(m);
    let mut remarks = Vec::with_capacity(m.remarks().len() + 2);
    if !m.title().is_empty() || live_time || !m.remarks().is_empty() {
        remarks.push(format!("{TITLE}{}", m.title()));
    }
    if live_time {
        remarks.push(format!("{LIVE_TIME}{}", m.live_time()));
    }
    remarks.extend(m.remarks().iter().cloned());
    remarks
}

/// The ids shared across the document, assigned before any measurement is written
struct References<'a> {
    detectors: IndexMap<&'a str, &'static str>,
    calibrations: Vec<Arc<EnergyCalibration>>,
    samples: IndexSet<i32>,
}

impl<'a> References<'a> {
    fn new(records: &[&'a Measurement]) -> Self {
        let mut detectors = IndexMap::new();
        let mut calibrations: Vec<Arc<EnergyCalibration>> = Vec::new();
        let mut samples = IndexSet::new();
        for m in records {
            if !detectors.contains_key(m.detector_name()) {
                detectors.insert(m.detector_name(), detector_category(records, m.detector_name()));
            }
            samples.insert(m.sample_number());
            if let Some(cal) = Self::spectrum_calibration(m) {
                if !calibrations.iter().any(|c| **c == **cal) {
                    calibrations.push(cal.clone());
                }
            }
        }
        Self {
            detectors,
            calibrations,
            samples,
        }
    }

    /// The calibration a spectrum refers to. Calibrations of measurements without gamma
    /// channels have nothing to describe and are left out.
    fn spectrum_calibration(m: &Measurement) -> Option<&Arc<EnergyCalibration>> {
        m.gamma_counts()
            .filter(|c| !c.is_empty())
            .and(m.energy_calibration())
    }

    fn detector_index(&self, name: &str) -> usize {
        self.detectors.get_index_of(name).unwrap_or_default()
    }

    fn calibration_index(&self, cal: &EnergyCalibration) -> Option<usize> {
        self.calibrations.iter().position(|c| **c == *cal)
    }
}

/// Writes a selection of a [`SpecFile`] as an N42-2012 document
struct N42Writer<W: Write> {
    handle: Writer<BufWriter<W>>,
}

impl<W: Write> N42Writer<W> {
    fn new(stream: W) -> Self {
        let handle = BufWriter::with_capacity(BUFFER_SIZE, stream);
        Self {
            handle: Writer::new_with_indent(handle, b' ', 2),
        }
    }

    /// Write `<name>text</name>`. The text event is always written, even when empty, so
    /// the indenter never puts whitespace inside the element.
    fn write_text_element(&mut self, name: &str, text: &str) -> WriterResult {
        let elt = bstart!(name);
        start_event!(self, elt);
        self.handle.write_event(Event::Text(BytesText::new(text)))?;
        end_event!(self, elt);
        Ok(())
    }

    fn write_remarks<S: AsRef<str>>(&mut self, remarks: &[S]) -> WriterResult {
        for remark in remarks {
            self.write_text_element("Remark", remark.as_ref())?;
        }
        Ok(())
    }

    fn write_characteristic(&mut self, name: &str, value: &str, data_class: &str) -> WriterResult {
        let elt = bstart!("Characteristic");
        start_event!(self, elt);
        self.write_text_element("CharacteristicName", name)?;
        self.write_text_element("CharacteristicValue", value)?;
        self.write_text_element("CharacteristicValueUnits", "unit-less")?;
        self.write_text_element("CharacteristicValueDataClassCode", data_class)?;
        end_event!(self, elt);
        Ok(())
    }

    fn write_instrument_information(&mut self, file: &SpecFile) -> WriterResult {
        let mut elt = bstart!("RadInstrumentInformation");
        attrib!("id", "RadInstrumentInformation-1", elt);
        start_event!(self, elt);
        self.write_text_element("RadInstrumentManufacturerName", file.manufacturer())?;
        if !file.instrument_id().is_empty() {
            self.write_text_element("RadInstrumentIdentifier", file.instrument_id())?;
        }
        self.write_text_element("RadInstrumentModelName", file.instrument_model())?;
        self.write_text_element("RadInstrumentClassCode", file.instrument_type())?;

        let mut characteristics: Vec<(&str, String, &str)> = Vec::new();
        if *file.detector_type() != DetectorType::Unknown {
            characteristics.push((
                CHARACTERISTIC_DETECTOR_TYPE,
                file.detector_type().to_string(),
                "string",
            ));
        }
        if !file.measurement_location_name().is_empty() {
            characteristics.push((
                CHARACTERISTIC_LOCATION,
                file.measurement_location_name().to_string(),
                "string",
            ));
        }
        if !file.inspection().is_empty() {
            characteristics.push((CHARACTERISTIC_INSPECTION, file.inspection().to_string(), "string"));
        }
        if file.lane_number() != 0 {
            characteristics.push((CHARACTERISTIC_LANE, file.lane_number().to_string(), "integer"));
        }
        if !characteristics.is_empty() {
            let group = bstart!("RadInstrumentCharacteristics");
            start_event!(self, group);
            for (name, value, data_class) in characteristics.iter() {
                self.write_characteristic(name, value, data_class)?;
            }
            end_event!(self, group);
        }
        end_event!(self, elt);
        Ok(())
    }

    fn write_detectors(&mut self, refs: &References) -> WriterResult {
        for (i, (name, category)) in refs.detectors.iter().enumerate() {
            let mut elt = bstart!("RadDetectorInformation");
            attrib!("id", detector_id(i), elt);
            start_event!(self, elt);
            self.write_text_element("RadDetectorName", name)?;
            self.write_text_element("RadDetectorCategoryCode", category)?;
            end_event!(self, elt);
        }
        Ok(())
    }

    fn write_calibration(&mut self, index: usize, cal: &EnergyCalibration) -> WriterResult {
        let mut elt = bstart!("EnergyCalibration");
        attrib!("id", calibration_id(index), elt);
        start_event!(self, elt);
        let values = join_values(cal.coefficients(), |c| c.to_string());
        match cal.kind() {
            EnergyCalType::LowerChannelEdge => {
                self.write_text_element("EnergyBoundaryValues", &values)?;
            }
            EnergyCalType::FullRangeFraction => {
                self.write_remarks(&[format!("{CALIBRATION_TYPE}{}", cal.kind())])?;
                self.write_text_element("CoefficientValues", &values)?;
            }
            EnergyCalType::Polynomial => {
                self.write_text_element("CoefficientValues", &values)?;
            }
        }
        if !cal.deviation_pairs().is_empty() {
            let energies = join_values(cal.deviation_pairs(), |(e, _)| e.to_string());
            let offsets = join_values(cal.deviation_pairs(), |(_, d)| d.to_string());
            self.write_text_element("EnergyValues", &energies)?;
            self.write_text_element("EnergyDeviationValues", &offsets)?;
        }
        end_event!(self, elt);
        Ok(())
    }

    fn write_sample_groups(&mut self, refs: &References) -> WriterResult {
        for sample in refs.samples.iter() {
            let mut elt = bstart!("RadMeasurementGroup");
            attrib!("id", sample_group_id(*sample), elt);
            start_event!(self, elt);
            self.write_text_element("RadMeasurementGroupDescription", &format!("Sample {sample}"))?;
            end_event!(self, elt);
        }
        Ok(())
    }

    fn write_spectrum(&mut self, id: &str, m: &Measurement, refs: &References) -> WriterResult {
        let Some(counts) = m.gamma_counts() else {
            return Ok(());
        };
        let mut elt = bstart!("Spectrum");
        attrib!("id", format!("{id}-Spectrum"), elt);
        attrib!(
            "radDetectorInformationReference",
            detector_id(refs.detector_index(m.detector_name())),
            elt
        );
        if let Some(index) = References::spectrum_calibration(m).and_then(|c| refs.calibration_index(c)) {
            attrib!("energyCalibrationReference", calibration_id(index), elt);
        }
        start_event!(self, elt);
        self.write_text_element("LiveTimeDuration", &format_duration(m.live_time()))?;

        let mut channels = bstart!("ChannelData");
        attrib!("compressionCode", "None", channels);
        start_event!(self, channels);
        let text = join_values(counts, |c| format_count(*c));
        self.handle.write_event(Event::Text(BytesText::new(&text)))?;
        end_event!(self, channels);

        end_event!(self, elt);
        Ok(())
    }

    /// Neutron counts, and for measurements without a spectrum the element that names
    /// their detector
    fn write_gross_counts(&mut self, id: &str, m: &Measurement, refs: &References) -> WriterResult {
        if m.gamma_counts().is_some() && !m.contained_neutron() && m.neutron_live_time() == 0.0 {
            return Ok(());
        }
        let mut elt = bstart!("GrossCounts");
        attrib!("id", format!("{id}-GrossCounts"), elt);
        attrib!(
            "radDetectorInformationReference",
            detector_id(refs.detector_index(m.detector_name())),
            elt
        );
        start_event!(self, elt);
        self.write_text_element("LiveTimeDuration", &format_duration(m.neutron_live_time()))?;
        let text = join_values(m.neutron_counts(), |c| format_count(*c));
        self.write_text_element("CountData", &text)?;
        end_event!(self, elt);
        Ok(())
    }

    fn write_position(&mut self, m: &Measurement) -> WriterResult {
        let Some(position) = m.position() else {
            return Ok(());
        };
        let state = bstart!("RadInstrumentState");
        start_event!(self, state);
        let vector = bstart!("StateVector");
        start_event!(self, vector);
        let point = bstart!("GeographicPoint");
        start_event!(self, point);
        self.write_text_element("LatitudeValue", &position.latitude.to_string())?;
        self.write_text_element("LongitudeValue", &position.longitude.to_string())?;
        end_event!(self, point);
        if let Some(time) = position.time {
            self.write_remarks(&[format!("{POSITION_TIME}{}", time.format(DATE_FORMAT))])?;
        }
        end_event!(self, vector);
        end_event!(self, state);
        Ok(())
    }

    fn write_measurement(&mut self, index: usize, m: &Measurement, refs: &References) -> WriterResult {
        let id = format!("RadMeasurement-{}", index + 1);
        let mut elt = bstart!("RadMeasurement");
        attrib!("id", &id, elt);
        attrib!(
            "radMeasurementGroupReferences",
            sample_group_id(m.sample_number()),
            elt
        );
        start_event!(self, elt);
        self.write_remarks(&measurement_remarks(m))?;
        self.write_text_element("MeasurementClassCode", class_code(m.source_type()))?;
        if let Some(start) = m.start_time() {
            self.write_text_element("StartDateTime", &start.format(DATE_FORMAT).to_string())?;
        }
        self.write_text_element("RealTimeDuration", &format_duration(m.real_time()))?;
        self.write_spectrum(&id, m, refs)?;
        self.write_gross_counts(&id, m, refs)?;
        self.write_position(m)?;
        if *m.occupancy_status() != OccupancyStatus::Unknown {
            self.write_text_element("OccupancyIndicator", m.occupancy_status().as_str())?;
        }
        end_event!(self, elt);
        Ok(())
    }

    fn write_document(&mut self, file: &SpecFile, records: &[&Measurement]) -> WriterResult {
        let refs = References::new(records);
        debug!(
            "Writing N42 with {} measurements, {} detectors and {} calibrations",
            records.len(),
            refs.detectors.len(),
            refs.calibrations.len()
        );

        self.handle
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut root = bstart!(ROOT);
        attrib!("xmlns", NAMESPACE, root);
        if !file.uuid().is_empty() {
            attrib!("n42DocUUID", file.uuid(), root);
        }
        start_event!(self, root);
        self.write_remarks(file.remarks())?;
        self.write_text_element("RadInstrumentDataCreatorName", CREATOR)?;
        self.write_instrument_information(file)?;
        self.write_detectors(&refs)?;
        for (i, cal) in refs.calibrations.iter().enumerate() {
            self.write_calibration(i, cal)?;
        }
        self.write_sample_groups(&refs)?;
        for (i, m) in records.iter().enumerate() {
            self.write_measurement(i, m, &refs)?;
        }
        end_event!(self, root);
        self.handle.get_mut().write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> WriterResult {
        self.handle.get_mut().flush()?;
        Ok(())
    }
}

/// Encode the selected measurements as an N42-2012 document.
///
/// Every measurement becomes its own `RadMeasurement` grouped by sample number, so
/// reading the document back yields the same measurements in the same order.
pub fn write_n42<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let selected = file.select_for_encode(samples, detectors)?;
    let records: Vec<&Measurement> = selected
        .iter()
        .filter_map(|id| file.measurement(*id))
        .collect();
    let mut writer = N42Writer::new(stream);
    writer.write_document(file, &records)?;
    writer.flush()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_measurement_remarks() {
        let mut m = Measurement::new();
        assert!(measurement_remarks(&m).is_empty());

        m.set_live_time(2.5);
        assert_eq!(measurement_remarks(&m), vec!["Title: ", "LiveTime: 2.5"]);

        let mut m = Measurement::new();
        m.set_gamma_counts(vec![1.0], 2.5, 3.0).unwrap();
        m.set_remarks(vec!["LiveTime: 4".to_string()]);
        assert_eq!(measurement_remarks(&m), vec!["Title: ", "LiveTime: 4"]);

        m.clear_gamma_counts();
        m.set_live_time(0.0);
        assert_eq!(
            measurement_remarks(&m),
            vec!["Title: ", "LiveTime: 0", "LiveTime: 4"]
        );
    }

    #[test_log::test]
    fn test_escaping() -> SpecResult<()> {
        let mut file = SpecFile::new();
        file.set_uuid("a\"b&c");
        let mut m = Measurement::new();
        m.set_gamma_counts(vec![1.0, 2.0], 1.0, 1.0)?;
        m.set_title("<b> & </b>");
        file.add_measurement(m, false)?;

        let mut buffer = Vec::new();
        write_n42(&file, &[], &[] as &[&str], &mut buffer)?;
        let text = String::from_utf8_lossy(&buffer);
        assert!(text.contains("n42DocUUID=\"a&quot;b&amp;c\""), "{text}");
        assert!(text.contains("<Remark>Title: &lt;b&gt; &amp; &lt;/b&gt;</Remark>"), "{text}");
        Ok(())
    }
}
