//! Comma separated or whitespace separated channel data, the format of last resort.
//!
//! Each record is a block of rows, optionally under a header naming the columns, such as
//! `Energy, Data` or `Channel, Energy, Counts`. Blocks are separated by blank lines or by a
//! new header. A few `Key: value` lines (`Remark`, `LiveTime`, `RealTime`, `StartTime`) are
//! understood before a block's rows.
mod reader;
mod writer;

pub use reader::read_csv;
pub use writer::write_csv;

use crate::io::SpectrumFileFormat;

/// Records with fewer channels than this are not taken for spectra
pub(crate) const MIN_CHANNELS: usize = 7;

/// Content that is spectrum data in some richer format and must not be read as text rows
const FOREIGN_MARKERS: [&str; 4] = ["<?xml", "<event", "<n42instrumentdata", "<radinstrumentdata"];

const HEADER_WORDS: [&str; 9] = [
    "channel", "counts", "data", "energy", "ch", "##", "remark", "livetime", "realtime",
];

/// Whether `line` opens a block with column names
pub(crate) fn is_header_word(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    HEADER_WORDS.iter().any(|w| field.starts_with(w))
}

/// Test whether `buf` looks like rows of numbers, possibly under a header. Binary data and
/// markup are rejected.
pub fn is_csv(buf: &[u8]) -> bool {
    if buf.is_empty() || buf.contains(&0) {
        return false;
    }
    let text = String::from_utf8_lossy(buf);
    let text = text.trim_start_matches('\u{feff}');
    let head: String = text.chars().take(64).collect::<String>().to_ascii_lowercase();
    if FOREIGN_MARKERS.iter().any(|m| head.contains(m)) || head.trim_start().starts_with('$') {
        return false;
    }
    let Some(first) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return false;
    };
    let leading = first
        .split(|c: char| c == ',' || c == '\t' || c == ';')
        .next()
        .unwrap_or_default()
        .trim();
    if first.starts_with(|c: char| c.is_ascii_digit()) {
        let fields = first
            .split(|c: char| c == ',' || c == ';' || c.is_ascii_whitespace())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>();
        (1..9).contains(&fields.len()) && fields.iter().all(|f| f.parse::<f64>().is_ok())
    } else {
        is_header_word(leading)
    }
}

crate::io::traits::impl_codec!(
    CsvCodec,
    SpectrumFileFormat::Csv,
    is_csv,
    read_csv,
    write_csv
);

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::calibration::{EnergyCalType, EnergyCalibration};
    use crate::error::{SpecError, SpecResult};
    use crate::measurement::Measurement;
    use crate::spec_file::SpecFile;

    fn two_records() -> SpecResult<SpecFile> {
        let mut file = SpecFile::new();
        for (i, name) in ["Aa1", "Ba1"].into_iter().enumerate() {
            let mut m = Measurement::new();
            let counts: Vec<f32> = (0..64).map(|c| ((c * (i + 3)) % 11) as f32).collect();
            m.set_gamma_counts(counts, 10.0, 10.0)?;
            m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(
                &[0.0, 2.5 * (i + 1) as f32],
                64,
                &[],
            )?))?;
            m.set_detector_name(name);
            m.set_sample_number(1);
            file.add_measurement(m, false)?;
        }
        Ok(file)
    }

    #[test_log::test]
    fn test_detection() {
        assert!(is_csv(b"Energy, Data\r\n0,1\r\n"));
        assert!(is_csv(b"Channel\tCounts\n0\t1\n"));
        assert!(is_csv(b"1 2 3\n"));
        assert!(is_csv(b"\xef\xbb\xbf12,4\n"));
        assert!(!is_csv(b"<?xml version=\"1.0\"?>"));
        assert!(!is_csv(b"$SPEC_ID:\r\n"));
        assert!(!is_csv(b"\xff\xff\x00\x01"));
        assert!(!is_csv(b"Dear reader,\n"));
        assert!(!is_csv(b""));
    }

    #[test_log::test]
    fn test_round_trip() -> SpecResult<()> {
        let file = two_records()?;
        let mut buf = Vec::new();
        write_csv(&file, &[], &[] as &[&str], &mut buf)?;
        assert!(is_csv(&buf));
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("Energy, Data\r\n0,0\r\n2.5,3\r\n"));

        let decoded = read_csv(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), 2);
        for (m, original) in decoded.measurements().zip(file.measurements()) {
            assert_eq!(m.gamma_counts(), original.gamma_counts());
            let cal = m.energy_calibration().unwrap();
            assert_eq!(cal.kind(), EnergyCalType::LowerChannelEdge);
            for channel in [0, 1, 31, 63] {
                let expected = original.gamma_channel_lower(channel).unwrap();
                assert!((cal.lower_energy(channel) - expected).abs() < 1e-3);
            }
        }

        let mut buf = Vec::new();
        write_csv(&file, &[], &["Ba1"], &mut buf)?;
        let decoded = read_csv(buf.as_slice())?;
        assert_eq!(decoded.num_measurements(), 1);
        assert!(matches!(
            write_csv(&file, &[], &["Zz9"], &mut Vec::new()),
            Err(SpecError::EncodeError(_))
        ));
        Ok(())
    }

    #[test_log::test]
    fn test_channel_columns() -> SpecResult<()> {
        let text = "Remark: bench test\nLiveTime: 12.5\nRealTime: 13\nChannel, Energy (MeV), Counts\n0, 0.0, 1\n1, 0.01, 2\n2, 0.02, 3\n3, 0.03, 4\n4, 0.04, 5\n5, 0.05, 6\n6, 0.06, 7\n7, 0.07, 8\n";
        let file = read_csv(text.as_bytes())?;
        let m = file.measurement_at(0).unwrap();
        assert_eq!(m.remarks(), &["bench test".to_string()]);
        assert_eq!(m.live_time(), 12.5);
        assert_eq!(m.real_time(), 13.0);
        assert_eq!(m.num_gamma_channels(), 8);
        assert_eq!(m.gamma_channel_content(7), 8.0);
        assert!((m.gamma_channel_lower(3).unwrap() - 30.0).abs() < 1e-3);
        Ok(())
    }

    #[test_log::test]
    fn test_counts_only() -> SpecResult<()> {
        let text = "5\n6\n7\n8\n9\n10\n11\n12\n";
        let file = read_csv(text.as_bytes())?;
        let m = file.measurement_at(0).unwrap();
        assert_eq!(m.num_gamma_channels(), 8);
        assert_eq!(m.gamma_count_sum(), 68.0);
        Ok(())
    }

    #[test_log::test]
    fn test_decreasing_energy() {
        let text = "Energy, Data\n0,1\n2,1\n4,1\n3,1\n5,1\n6,1\n7,1\n8,1\n";
        assert!(matches!(
            read_csv(text.as_bytes()),
            Err(SpecError::MalformedData { .. })
        ));
    }

    #[test_log::test]
    fn test_too_short() {
        let text = "Energy, Data\n0,1\n2,1\n";
        assert!(matches!(
            read_csv(text.as_bytes()),
            Err(SpecError::FormatMismatch { .. })
        ));
    }

    #[test_log::test]
    fn test_read_fixture() -> SpecResult<()> {
        let file = SpecFile::from_path("./test/data/example.csv")?;
        assert_eq!(file.num_measurements(), 2);
        let first = file.measurement_at(0).unwrap();
        assert_eq!(first.num_gamma_channels(), 12);
        assert_eq!(first.gamma_channel_content(4), 17.0);
        let second = file.measurement_at(1).unwrap();
        assert_eq!(second.num_gamma_channels(), 12);
        assert_eq!(
            second.energy_calibration().unwrap().kind(),
            EnergyCalType::Polynomial
        );
        Ok(())
    }
}
