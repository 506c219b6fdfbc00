//! GADRAS PCF, a binary format of 256 byte records holding many spectra that share a
//! channel count.
//!
//! The first record is the file header. It may be followed by a block of deviation pairs
//! for up to 512 detectors, addressed by detector names of the form `Aa1`, and by a pseudo
//! spectrum titled `Energy` holding lower channel energies shared by every record. Each
//! spectrum then takes a 256 byte header record and as many records as its counts need.
use std::sync::OnceLock;

use regex::Regex;

mod reader;
mod writer;

pub use reader::read_pcf;
pub use writer::write_pcf;

use crate::io::SpectrumFileFormat;

pub(crate) const RECORD_SIZE: usize = 256;
pub(crate) const DEVIATION_BLOCK_SIZE: usize = 20480;
pub(crate) const DEVIATION_HEADER: &str = "DeviationPairsInFile";
pub(crate) const DEVIATION_HEADER_COMPRESSED: &str = "DeviationPairsInFileCompressed";
pub(crate) const MAX_DEVIATION_PAIRS: usize = 20;
pub(crate) const ENERGY_RECORD_TITLE: &str = "Energy";
pub(crate) const MAX_CHANNELS: usize = 65536;

/// Measurement remark prefixes stored in the spectrum header's text block
pub(crate) const DESCRIPTION: &str = "Description:";
pub(crate) const SOURCE: &str = "Source:";

/// File remark prefixes carried by dedicated file header fields
pub(crate) const ITEM_DESCRIPTION: &str = "ItemDescription:";
pub(crate) const CARGO_TYPE: &str = "CargoType:";
pub(crate) const ITEM_DISTANCE: &str = "ItemToDetectorDistance:";
pub(crate) const OCCUPANCY_NUMBER: &str = "OccupancyNumber:";

const SLOTS_PER_COLUMN: usize = 8 * 8;
const VALUES_PER_SLOT: usize = 2 * MAX_DEVIATION_PAIRS;

/// Where a detector's deviation pairs live inside the deviation pair block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct DeviationSlot {
    pub column: usize,
    pub panel: usize,
    pub mca: usize,
}

fn detector_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?i)([a-h])([a-d])?([1-8])$").unwrap())
}

impl DeviationSlot {
    /// Parse a GADRAS detector name: a panel letter `A`-`H`, an optional column letter
    /// `a`-`d` and an MCA digit `1`-`8`
    pub fn from_detector_name(name: &str) -> Option<Self> {
        let caps = detector_name_pattern().captures(name)?;
        let letter = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().bytes().next())
                .map(|b| b.to_ascii_lowercase())
        };
        let panel = (letter(1)? - b'a') as usize;
        let column = letter(2).map(|c| (c - b'a') as usize).unwrap_or(0);
        let mca = (caps.get(3)?.as_str().as_bytes()[0] - b'1') as usize;
        Some(Self { column, panel, mca })
    }

    /// The slot at `index` in block order
    pub fn from_index(index: usize) -> Self {
        Self {
            column: index / SLOTS_PER_COLUMN,
            panel: (index / 8) % 8,
            mca: index % 8,
        }
    }

    pub fn index(&self) -> usize {
        self.column * SLOTS_PER_COLUMN + self.panel * 8 + self.mca
    }

    /// The position of the slot's first value, counted in values rather than bytes
    pub fn value_offset(&self) -> usize {
        self.index() * VALUES_PER_SLOT
    }

    /// Only the compressed block has room for columns `c` and `d`
    pub fn num_slots(compressed: bool) -> usize {
        SLOTS_PER_COLUMN * if compressed { 4 } else { 2 }
    }
}

/// Test whether `buf` starts with a PCF file header
pub fn is_pcf(buf: &[u8]) -> bool {
    if buf.len() < 12 {
        return false;
    }
    let records_per_spectrum = i16::from_le_bytes([buf[0], buf[1]]);
    if records_per_spectrum <= 0 {
        return false;
    }
    let marker = &buf[2..5];
    marker == b"DHS" || marker == b"   "
}

crate::io::traits::impl_codec!(
    PcfCodec,
    SpectrumFileFormat::Pcf,
    is_pcf,
    read_pcf,
    write_pcf
);

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::calibration::{EnergyCalType, EnergyCalibration};
    use crate::error::{SpecError, SpecResult};
    use crate::measurement::Measurement;
    use crate::meta::{OccupancyStatus, SourceType};
    use crate::spec_file::SpecFile;

    fn record(
        sample: i32,
        detector: &str,
        cal: &Arc<EnergyCalibration>,
        scale: f32,
    ) -> SpecResult<Measurement> {
        let n = cal.num_channels();
        let mut m = Measurement::new();
        m.set_gamma_counts((0..n).map(|i| scale * (i % 11) as f32).collect(), 9.5, 10.0)?;
        m.set_energy_calibration(cal.clone())?;
        m.set_detector_name(detector);
        m.set_sample_number(sample);
        m.set_source_type(SourceType::Foreground);
        m.set_title(format!("Portal pass {sample}"));
        m.set_start_time(
            NaiveDate::from_ymd_opt(2021, 3, 14)
                .and_then(|d| d.and_hms_milli_opt(9, 26, 53 + sample as u32, 250)),
        );
        m.set_neutron_counts(vec![3.0 * sample as f32], 9.5);
        m.set_position(37.5, -121.75, None);
        Ok(m)
    }

    fn portal_file() -> SpecResult<SpecFile> {
        let frf = Arc::new(EnergyCalibration::full_range_fraction(
            &[-4.0, 3010.5, 12.25],
            100,
            &[(0.0, 0.0), (661.0, -7.5), (2614.0, 3.25)],
        )?);
        let plain = Arc::new(EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 100, &[])?);
        let mut file = SpecFile::new();
        file.set_uuid("1f0e6bd2-8d51-4f2c-9d0b-6f0b5a3e2a11");
        file.set_inspection("Primary");
        file.set_lane_number(3);
        file.set_instrument_type("Spectroscopic Portal Monitor");
        file.set_manufacturer("Acme Detection");
        file.set_instrument_model("SPM-9");
        file.set_instrument_id("SN-0042");
        file.set_measurement_location_name("Gate 7");
        file.add_remark("Calibrated with Th-232");
        file.add_remark(format!("{CARGO_TYPE} Produce"));
        for sample in 1..=2 {
            file.add_measurement(record(sample, "Aa1", &frf, 1.0)?, true)?;
            let mut other = record(sample, "Ba2", &plain, 2.0)?;
            other.set_remarks(vec![
                format!("{DESCRIPTION} lower panel"),
                format!("{SOURCE} Cs137,Co60"),
            ]);
            file.add_measurement(other, true)?;
        }
        file.cleanup(Default::default())?;
        Ok(file)
    }

    #[test_log::test]
    fn test_detector_slots() {
        let slot = DeviationSlot::from_detector_name("Ba2").unwrap();
        assert_eq!((slot.column, slot.panel, slot.mca), (0, 1, 1));
        assert_eq!(slot.value_offset(), 8 * 2 * 20 + 2 * 20);
        let slot = DeviationSlot::from_detector_name("hd8").unwrap();
        assert_eq!((slot.column, slot.panel, slot.mca), (3, 7, 7));
        assert_eq!(DeviationSlot::from_index(slot.index()), slot);
        assert!(DeviationSlot::from_detector_name("Ai1").is_none());
        assert!(DeviationSlot::from_detector_name("Aa9").is_none());
        assert!(DeviationSlot::from_detector_name("gamma").is_none());
    }

    #[test_log::test]
    fn test_round_trip() -> SpecResult<()> {
        let file = portal_file()?;
        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        assert!(is_pcf(&buf));
        assert_eq!(buf.len() % RECORD_SIZE, 0);

        let decoded = read_pcf(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), 4);
        assert_eq!(decoded.uuid(), file.uuid());
        assert_eq!(decoded.inspection(), "Primary");
        assert_eq!(decoded.lane_number(), 3);
        assert_eq!(decoded.instrument_type(), "Spectroscopic Portal Monitor");
        assert_eq!(decoded.manufacturer(), "Acme Detection");
        assert_eq!(decoded.instrument_model(), "SPM-9");
        assert_eq!(decoded.instrument_id(), "SN-0042");
        assert_eq!(decoded.measurement_location_name(), "Gate 7");
        assert_eq!(decoded.remarks(), file.remarks());
        assert_eq!(decoded.detector_names(), &["Aa1".to_string(), "Ba2".to_string()]);

        for (a, b) in file.measurements().zip(decoded.measurements()) {
            assert_eq!(a.detector_name(), b.detector_name());
            assert_eq!(a.sample_number(), b.sample_number());
            assert_eq!(a.title(), b.title());
            assert_eq!(a.remarks(), b.remarks());
            assert_eq!(a.gamma_counts(), b.gamma_counts());
            assert_eq!(a.live_time(), b.live_time());
            assert_eq!(a.real_time(), b.real_time());
            assert_eq!(a.start_time(), b.start_time());
            assert_eq!(a.neutron_counts(), b.neutron_counts());
            assert_eq!(a.source_type(), b.source_type());
            assert_eq!(a.energy_calibration(), b.energy_calibration());
            let pos = b.position().unwrap();
            assert_eq!((pos.latitude, pos.longitude), (37.5, -121.75));
        }
        let cal = decoded.measurement_at(0).unwrap().energy_calibration().unwrap();
        assert_eq!(cal.kind(), EnergyCalType::FullRangeFraction);
        assert_eq!(cal.deviation_pairs().len(), 3);
        assert_eq!(decoded.energy_calibrations().len(), 2);
        Ok(())
    }

    #[test_log::test]
    fn test_compressed_deviation_pairs() -> SpecResult<()> {
        let cal = Arc::new(EnergyCalibration::full_range_fraction(
            &[0.0, 3000.0],
            64,
            &[(0.0, 0.0), (1460.0, 12.0)],
        )?);
        let mut file = SpecFile::new();
        file.add_measurement(record(1, "Ac1", &cal, 1.0)?, true)?;
        file.add_measurement(record(1, "Ad3", &cal, 1.0)?, true)?;
        file.cleanup(Default::default())?;

        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        assert_eq!(
            trim_header(&buf[RECORD_SIZE..2 * RECORD_SIZE]),
            DEVIATION_HEADER_COMPRESSED
        );
        let decoded = read_pcf(buf.as_slice())?;
        for m in decoded.measurements() {
            let cal = m.energy_calibration().unwrap();
            assert_eq!(cal.deviation_pairs(), &[(0.0, 0.0), (1460.0, 12.0)]);
        }
        Ok(())
    }

    fn trim_header(record: &[u8]) -> String {
        String::from_utf8_lossy(record).trim_end().to_string()
    }

    #[test_log::test]
    fn test_lower_channel_energy_record() -> SpecResult<()> {
        let energies: Vec<f32> = (0..=70).map(|i| (i * i) as f32 * 0.5 + 3.0 * i as f32).collect();
        let cal = Arc::new(EnergyCalibration::lower_channel_energy(70, &energies)?);
        let mut m = Measurement::new();
        m.set_gamma_counts(vec![1.0; 70], 1.0, 1.0)?;
        m.set_energy_calibration(cal.clone())?;
        m.set_title("Background");
        m.set_source_type(SourceType::Background);
        m.set_occupancy_status(OccupancyStatus::NotOccupied);
        let mut file = SpecFile::new();
        file.add_measurement(m, false)?;

        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        assert_eq!(trim_header(&buf[RECORD_SIZE..RECORD_SIZE + 180]), "Energy");
        // 71 edges round up to 128 channels: a header and two data records per spectrum
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 3);

        let decoded = read_pcf(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), 1);
        let m = decoded.measurement_at(0).unwrap();
        assert_eq!(m.energy_calibration().unwrap().as_ref(), cal.as_ref());
        assert_eq!(m.gamma_counts().unwrap().len(), 70);
        assert_eq!(m.source_type(), &SourceType::Background);
        assert_eq!(m.occupancy_status(), &OccupancyStatus::NotOccupied);
        assert_eq!(m.start_time(), None);
        Ok(())
    }

    #[test_log::test]
    fn test_long_title() -> SpecResult<()> {
        let cal = Arc::new(EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 64, &[])?);
        let mut m = record(4, "", &cal, 1.0)?;
        let title = "A very long title that will not fit in the sixty byte slot of the text block";
        m.set_title(title);
        let mut file = SpecFile::new();
        file.add_measurement(m, false)?;
        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        let decoded = read_pcf(buf.as_slice())?;
        let m = decoded.measurement_at(0).unwrap();
        assert_eq!(m.title(), title);
        assert_eq!(m.sample_number(), 4);
        assert_eq!(m.detector_name(), "");
        Ok(())
    }

    #[test_log::test]
    fn test_truncated() -> SpecResult<()> {
        let file = portal_file()?;
        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        buf.truncate(buf.len() - 100);
        let err = read_pcf(buf.as_slice()).unwrap_err();
        assert!(matches!(err, SpecError::MalformedData { .. }), "{err}");
        Ok(())
    }

    #[test_log::test]
    fn test_source_types_survive() -> SpecResult<()> {
        let cal = Arc::new(EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 64, &[])?);
        let kinds = [
            SourceType::Background,
            SourceType::Calibration,
            SourceType::Unknown,
            SourceType::Foreground,
            SourceType::IntrinsicActivity,
        ];
        let mut file = SpecFile::new();
        for (i, kind) in kinds.iter().enumerate() {
            let mut m = record(i as i32 + 1, "Aa1", &cal, 1.0)?;
            m.set_title(if i == 3 { "Item 7 Background" } else { "Item 7" });
            m.set_source_type(kind.clone());
            file.add_measurement(m, false)?;
        }
        let mut other = record(9, "Aa1", &cal, 1.0)?;
        other.set_source_type(SourceType::Other("Medical".to_string()));
        file.add_measurement(other, false)?;
        file.cleanup(Default::default())?;

        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        let decoded = read_pcf(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), kinds.len() + 1);
        for (a, b) in file.measurements().zip(decoded.measurements()) {
            assert_eq!(a.title(), b.title());
            assert_eq!(a.sample_number(), b.sample_number());
        }
        for (kind, m) in kinds.iter().zip(decoded.measurements()) {
            assert_eq!(m.source_type(), kind, "{}", m.title());
        }
        assert_eq!(
            decoded.measurements().last().unwrap().source_type(),
            &SourceType::Unknown
        );
        Ok(())
    }

    #[test_log::test]
    fn test_truncated_header() -> SpecResult<()> {
        let file = portal_file()?;
        let mut buf = Vec::new();
        write_pcf(&file, &[], &[] as &[&str], &mut buf)?;
        buf.truncate(RECORD_SIZE + 10);
        let err = read_pcf(buf.as_slice()).unwrap_err();
        assert!(matches!(err, SpecError::MalformedData { .. }), "{err}");

        let err = crate::io::decode_auto(&buf).unwrap_err();
        assert!(
            matches!(
                err,
                SpecError::MalformedData {
                    format: SpectrumFileFormat::Pcf,
                    ..
                }
            ),
            "{err}"
        );
        Ok(())
    }

    #[test_log::test]
    fn test_not_pcf() {
        assert!(!is_pcf(b"<?xml version=\"1.0\"?><RadInstrumentData/>"));
        let err = read_pcf(&b"\x00\x00DHS       "[..]).unwrap_err();
        assert!(err.is_format_mismatch());
    }
}
