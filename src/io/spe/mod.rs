//! IAEA SPE, a line oriented text format holding one spectrum.
//!
//! A file is a sequence of sections, each opened by a `$TAG:` line and running until the
//! next one. `$DATA` holds the first and last channel numbers followed by the counts.
mod reader;
mod writer;

pub use reader::read_spe;
pub use writer::write_spe;

use crate::io::SpectrumFileFormat;

pub(crate) const SPEC_ID: &str = "SPEC_ID";
pub(crate) const SPEC_REM: &str = "SPEC_REM";
pub(crate) const DATE_MEA: &str = "DATE_MEA";
pub(crate) const MEAS_TIM: &str = "MEAS_TIM";
pub(crate) const DATA: &str = "DATA";
pub(crate) const ENER_FIT: &str = "ENER_FIT";
pub(crate) const MCA_CAL: &str = "MCA_CAL";
pub(crate) const GPS: &str = "GPS";
pub(crate) const NEUTRONS: &str = "NEUTRONS";
pub(crate) const NEUTRONS_LIVETIME: &str = "NEUTRONS_LIVETIME";
pub(crate) const ENDRECORD: &str = "ENDRECORD";

pub(crate) const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Split a `$TAG:` line into its tag and whatever follows the colon
pub(crate) fn section_tag(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix('$')?;
    let (tag, tail) = rest.split_once(':')?;
    let valid = !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
    valid.then_some((tag, tail.trim()))
}

/// Test whether `buf` starts with an SPE section tag, after an optional byte order mark
pub fn is_spe(buf: &[u8]) -> bool {
    let buf = buf.strip_prefix(b"\xef\xbb\xbf").unwrap_or(buf);
    let end = buf.len().min(64);
    let head = String::from_utf8_lossy(&buf[..end]);
    head.trim_start()
        .lines()
        .next()
        .and_then(section_tag)
        .is_some()
}

crate::io::traits::impl_codec!(
    SpeCodec,
    SpectrumFileFormat::Spe,
    is_spe,
    read_spe,
    write_spe
);

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::calibration::{EnergyCalType, EnergyCalibration};
    use crate::error::{SpecError, SpecResult};
    use crate::measurement::Measurement;
    use crate::spec_file::SpecFile;

    fn example() -> SpecResult<SpecFile> {
        let mut m = Measurement::new();
        let counts: Vec<f32> = (0..256).map(|i| ((i * 7) % 31) as f32).collect();
        m.set_gamma_counts(counts, 118.25, 120.0)?;
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(
            &[2.5, 1.5, 1e-4],
            256,
            &[],
        )?))?;
        m.set_title("Soil sample 14");
        m.set_remarks(vec!["Collected at the north fence".to_string()]);
        m.set_start_time(
            NaiveDate::from_ymd_opt(2021, 3, 4).and_then(|d| d.and_hms_opt(9, 15, 30)),
        );
        m.set_position(35.25, -106.5, None);
        m.set_neutron_counts(vec![12.0], 120.0);
        let mut file = SpecFile::new();
        file.add_measurement(m, false)?;
        Ok(file)
    }

    #[test_log::test]
    fn test_section_tag() {
        assert_eq!(section_tag("$DATA:"), Some(("DATA", "")));
        assert_eq!(section_tag("  $MEAS_TIM: 1 2"), Some(("MEAS_TIM", "1 2")));
        assert_eq!(section_tag("$data:"), None);
        assert_eq!(section_tag("DATA:"), None);
        assert_eq!(section_tag("$:"), None);
    }

    #[test_log::test]
    fn test_round_trip() -> SpecResult<()> {
        let file = example()?;
        let mut buf = Vec::new();
        write_spe(&file, &[], &[] as &[&str], &mut buf)?;
        assert!(is_spe(&buf));
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("$SPEC_ID:\r\nSoil sample 14\r\n"));
        assert!(text.contains("$DATA:\r\n0 255\r\n"));
        assert!(text.trim_end().ends_with("$ENDRECORD:"));

        let decoded = read_spe(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), 1);
        let m = decoded.measurement_at(0).unwrap();
        let original = file.measurement_at(0).unwrap();
        assert_eq!(m.gamma_counts(), original.gamma_counts());
        assert_eq!(m.title(), "Soil sample 14");
        assert_eq!(m.remarks(), &["Collected at the north fence".to_string()]);
        assert!((m.live_time() - 118.25).abs() < 1e-4);
        assert!((m.real_time() - 120.0).abs() < 1e-4);
        assert_eq!(m.start_time(), original.start_time());
        assert_eq!(m.neutron_counts(), &[12.0]);
        assert!((m.neutron_live_time() - 120.0).abs() < 1e-4);
        let p = m.position().unwrap();
        assert!((p.latitude - 35.25).abs() < 1e-9);
        assert!((p.longitude + 106.5).abs() < 1e-9);

        let cal = m.energy_calibration().unwrap();
        assert_eq!(cal.kind(), EnergyCalType::Polynomial);
        assert_eq!(cal.coefficients(), &[2.5, 1.5, 1e-4]);
        Ok(())
    }

    #[test_log::test]
    fn test_full_range_fraction_is_converted() -> SpecResult<()> {
        let mut m = Measurement::new();
        m.set_gamma_counts(vec![1.0; 100], 10.0, 10.0)?;
        m.set_energy_calibration(Arc::new(EnergyCalibration::full_range_fraction(
            &[0.0, 3000.0],
            100,
            &[],
        )?))?;
        let mut file = SpecFile::new();
        file.add_measurement(m, false)?;
        let mut buf = Vec::new();
        write_spe(&file, &[], &[] as &[&str], &mut buf)?;

        let decoded = read_spe(buf.as_slice())?;
        let cal = decoded.measurement_at(0).unwrap().energy_calibration().unwrap();
        assert_eq!(cal.kind(), EnergyCalType::Polynomial);
        assert!((cal.upper_energy(99) - 3000.0).abs() < 1e-2);
        Ok(())
    }

    #[test_log::test]
    fn test_sums_selection() -> SpecResult<()> {
        let mut file = SpecFile::new();
        for (i, name) in ["A", "B"].into_iter().enumerate() {
            let mut m = Measurement::new();
            m.set_gamma_counts(vec![i as f32 + 1.0; 8], 5.0, 6.0)?;
            m.set_detector_name(name);
            m.set_sample_number(1);
            file.add_measurement(m, true)?;
        }
        file.cleanup(Default::default())?;
        let mut buf = Vec::new();
        write_spe(&file, &[], &[] as &[&str], &mut buf)?;
        let decoded = read_spe(buf.as_slice())?;
        let m = decoded.measurement_at(0).unwrap();
        assert_eq!(m.gamma_counts().unwrap(), &[3.0; 8]);
        assert!((m.live_time() - 10.0).abs() < 1e-4);

        let err = write_spe(&file, &[4], &[] as &[&str], &mut Vec::new());
        assert!(matches!(err, Err(SpecError::EncodeError(_))));
        Ok(())
    }

    #[test_log::test]
    fn test_read_fixture() -> SpecResult<()> {
        let file = SpecFile::from_path("./test/data/example.spe")?;
        assert_eq!(file.num_measurements(), 1);
        let m = file.measurement_at(0).unwrap();
        assert_eq!(m.num_gamma_channels(), 32);
        assert_eq!(m.gamma_channel_content(5), 40.0);
        assert!((m.live_time() - 295.5).abs() < 1e-4);
        assert!((m.real_time() - 300.0).abs() < 1e-4);
        assert_eq!(
            m.start_time(),
            NaiveDate::from_ymd_opt(2018, 7, 23).and_then(|d| d.and_hms_opt(13, 5, 0))
        );
        assert_eq!(m.title(), "Calibration check");
        assert_eq!(m.remarks(), &["Shelf 2".to_string(), "Operator: JS".to_string()]);
        let cal = m.energy_calibration().unwrap();
        assert_eq!(cal.coefficients(), &[-1.25, 2.0]);
        Ok(())
    }

    #[test_log::test]
    fn test_missing_data() {
        let text = b"$SPEC_ID:\r\nNo counts\r\n$MEAS_TIM:\r\n10 10\r\n";
        assert!(is_spe(text));
        assert!(matches!(
            read_spe(&text[..]),
            Err(SpecError::MalformedData { .. })
        ));
        assert!(!is_spe(b"Energy, Data\n"));
        assert!(matches!(
            read_spe(&b"Energy, Data\n"[..]),
            Err(SpecError::FormatMismatch { .. })
        ));
    }

    #[test_log::test]
    fn test_channel_range_is_a_hint() -> SpecResult<()> {
        for range in ["0 4000000000000", "-9223372036854775808 9223372036854775807", "9 2"] {
            let text = format!("$SPEC_ID:\nx\n$MEAS_TIM:\n1 1\n$DATA:\n{range}\n1\n2\n3\n");
            let file = read_spe(text.as_bytes())?;
            let m = file.measurement_at(0).unwrap();
            assert_eq!(m.gamma_counts().unwrap(), &[1.0, 2.0, 3.0], "{range}");
        }
        Ok(())
    }
}
