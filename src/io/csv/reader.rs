use std::io::Read;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, warn};

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{finish_decoded, new_decoded, read_all};
use crate::io::SpectrumFileFormat;
use crate::measurement::Measurement;
use crate::spec_file::SpecFile;

use super::{is_header_word, MIN_CHANNELS};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::Csv;

const DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
];

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Columns {
    channel: Option<usize>,
    energy: Option<usize>,
    counts: Option<usize>,
    energy_scale: f32,
}

impl Columns {
    fn from_header(fields: &[String]) -> Self {
        let mut columns = Columns {
            energy_scale: 1.0,
            ..Default::default()
        };
        for (i, field) in fields.iter().enumerate() {
            let field = field.to_ascii_lowercase();
            if field.starts_with("channel") || field.starts_with("ch") || field == "##" {
                columns.channel.get_or_insert(i);
            } else if field.starts_with("energy") || field.starts_with("en") {
                columns.energy.get_or_insert(i);
                if field.contains("mev") {
                    columns.energy_scale = 1000.0;
                }
            } else if ["counts", "data", "selection", "signal", "detector"]
                .iter()
                .any(|w| field.starts_with(w))
            {
                columns.counts.get_or_insert(i);
            }
        }
        columns
    }

    /// Guess the layout of a row when no header named a counts column
    fn infer(&mut self, row: &[&str]) -> SpecResult<()> {
        match row.len() {
            1 => self.counts = Some(0),
            2 => {
                self.energy = Some(0);
                self.counts = Some(1);
            }
            3..=8 if row[0].contains('.') => {
                self.energy = Some(0);
                self.counts = Some(1);
            }
            3..=8 => {
                self.channel = Some(0);
                self.energy = Some(1);
                self.counts = Some(2);
            }
            n => {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("cannot tell which of {n} columns hold counts"),
                ))
            }
        }
        if self.energy_scale == 0.0 {
            self.energy_scale = 1.0;
        }
        Ok(())
    }
}

/// The record being assembled from the current block of lines
#[derive(Debug, Default)]
struct CsvBlock {
    columns: Option<Columns>,
    channels: Vec<i64>,
    energies: Vec<f32>,
    counts: Vec<f32>,
    remarks: Vec<String>,
    live_time: Option<f32>,
    real_time: Option<f32>,
    start_time: Option<NaiveDateTime>,
}

impl CsvBlock {
    fn has_rows(&self) -> bool {
        !self.counts.is_empty()
    }

    fn has_metadata(&self) -> bool {
        self.columns.is_some()
            || !self.remarks.is_empty()
            || self.live_time.is_some()
            || self.real_time.is_some()
            || self.start_time.is_some()
    }

    fn push_row(&mut self, row: &[&str]) -> SpecResult<()> {
        let columns = match self.columns.as_mut() {
            Some(c) if c.counts.is_some() => *c,
            Some(c) => {
                c.infer(row)?;
                *c
            }
            None => {
                let mut c = Columns {
                    energy_scale: 1.0,
                    ..Default::default()
                };
                c.infer(row)?;
                self.columns = Some(c);
                c
            }
        };
        let value = |i: Option<usize>| -> SpecResult<Option<f64>> {
            match i.and_then(|i| row.get(i)) {
                Some(token) => token.parse::<f64>().map(Some).map_err(|e| {
                    SpecError::malformed(FORMAT, format!("unreadable value {token:?}: {e}"))
                }),
                None => Ok(None),
            }
        };
        let Some(count) = value(columns.counts)? else {
            return Err(SpecError::malformed(FORMAT, "a row is missing its counts"));
        };
        let energy = value(columns.energy)?;
        let channel = value(columns.channel)?;
        if !count.is_finite() || energy.is_some_and(|e| !e.is_finite()) {
            debug!("Skipping non-finite row {row:?}");
            return Ok(());
        }
        if let Some(energy) = energy {
            let energy = energy as f32 * columns.energy_scale;
            if self.energies.last().is_some_and(|last| *last > energy) {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("energy decreases to {energy}"),
                ));
            }
            self.energies.push(energy);
        }
        if let Some(channel) = channel {
            let channel = channel as i64;
            if self.channels.last().is_some_and(|last| *last > channel) {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("channel number decreases to {channel}"),
                ));
            }
            self.channels.push(channel);
        }
        self.counts.push(count as f32);
        Ok(())
    }

    /// Take up a `Key: value` line. Returns false when the key is not one this reader knows.
    fn push_metadata(&mut self, line: &str) -> bool {
        let Some(split) = line.find([':', ',', '\t', '=']) else {
            return false;
        };
        let key = line[..split].trim().to_ascii_lowercase().replace([' ', '_'], "");
        let value = line[split + 1..].trim_start_matches([' ', ':', '\t']).trim();
        let seconds = || value.trim_end_matches(['s', 'S']).trim().parse::<f32>().ok();
        match key.as_str() {
            "remark" | "remarks" => self.remarks.push(value.to_string()),
            "livetime" => self.live_time = seconds(),
            "realtime" => self.real_time = seconds(),
            "starttime" => {
                self.start_time = DATE_FORMATS
                    .iter()
                    .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
            }
            _ => return false,
        }
        true
    }

    fn finish(self, ordinal: usize) -> SpecResult<Option<Measurement>> {
        let n_channels = self.counts.len();
        if n_channels < MIN_CHANNELS {
            debug!("Dropping a block of {n_channels} rows");
            return Ok(None);
        }
        let mut measurement = Measurement::new();
        let live_time = self.live_time.unwrap_or(0.0);
        let real_time = self.real_time.unwrap_or(live_time);
        measurement.set_gamma_counts(self.counts, live_time, real_time)?;
        measurement.set_remarks(self.remarks);
        measurement.set_start_time(self.start_time);
        measurement.set_sample_number(ordinal as i32 + 1);

        let has_energies = self.energies.len() >= n_channels
            && self.energies.last().is_some_and(|e| *e != 0.0);
        if has_energies {
            let cal = EnergyCalibration::lower_channel_energy(n_channels, &self.energies);
            if let Err(e) = cal.and_then(|c| measurement.set_energy_calibration(Arc::new(c))) {
                warn!("Ignoring CSV channel energies: {e}");
                measurement
                    .add_parse_warning(format!("Lower channel energies provided were invalid: {e}"));
            }
        }
        Ok(Some(measurement))
    }
}

/// Split a line on commas when it has them, otherwise on tabs and semicolons, and also on
/// spaces once the line is known to be numeric
fn split_fields(line: &str) -> Vec<&str> {
    let numeric = line.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
    let fields: Vec<&str> = if line.contains(',') {
        line.split(',').collect()
    } else if numeric {
        line.split(|c: char| c == ';' || c.is_ascii_whitespace()).collect()
    } else {
        line.split(['\t', ';']).collect()
    };
    fields
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect()
}

/// Decode rows of channel data, one record per block.
///
/// Channel energies, when given, become a lower channel energy calibration. Blocks of
/// fewer than seven rows are ignored, and finding no usable block at all means the input
/// is not channel data.
pub fn read_csv<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let data = read_all(stream)?;
    if !super::is_csv(&data[..data.len().min(crate::io::PREFIX_SIZE)]) {
        return Err(SpecError::mismatch(FORMAT, "does not look like rows of numbers"));
    }
    let text = String::from_utf8_lossy(&data);
    let text = text.trim_start_matches('\u{feff}');

    let mut measurements = Vec::new();
    let mut block = CsvBlock::default();
    let close = |block: CsvBlock, measurements: &mut Vec<Measurement>| -> SpecResult<()> {
        if let Some(m) = block.finish(measurements.len())? {
            measurements.push(m);
        }
        Ok(())
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if block.has_rows() {
                close(std::mem::take(&mut block), &mut measurements)?;
            }
            continue;
        }
        let fields = split_fields(line);
        let Some(first) = fields.first() else {
            continue;
        };
        if first.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
            block.push_row(&fields)?;
            continue;
        }
        if block.has_rows() {
            close(std::mem::take(&mut block), &mut measurements)?;
        }
        if block.push_metadata(line) {
            continue;
        }
        if is_header_word(first) {
            let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
            block.columns = Some(Columns::from_header(&names));
        } else {
            debug!("Skipping unrecognized CSV line {line:?}");
        }
    }
    if block.has_rows() || block.has_metadata() {
        close(block, &mut measurements)?;
    }

    if measurements.is_empty() {
        return Err(SpecError::mismatch(FORMAT, "no block of channel data was found"));
    }
    let mut file = new_decoded();
    for m in measurements {
        file.add_measurement(m, true)?;
    }
    finish_decoded(file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_split_fields() {
        assert_eq!(split_fields("1, 2,3"), vec!["1", "2", "3"]);
        assert_eq!(split_fields("1 \t2  3"), vec!["1", "2", "3"]);
        assert_eq!(split_fields("Energy (keV)\tCounts"), vec!["Energy (keV)", "Counts"]);
    }

    #[test_log::test]
    fn test_header_columns() {
        let names: Vec<String> = ["Channel", "Energy (MeV)", "Counts", "Data"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns = Columns::from_header(&names);
        assert_eq!(columns.channel, Some(0));
        assert_eq!(columns.energy, Some(1));
        assert_eq!(columns.counts, Some(2));
        assert_eq!(columns.energy_scale, 1000.0);
    }

    #[test_log::test]
    fn test_inferred_columns() -> SpecResult<()> {
        let mut block = CsvBlock::default();
        block.push_row(&["0", "1.5", "4"])?;
        block.push_row(&["1", "3.0", "5"])?;
        assert_eq!(block.channels, vec![0, 1]);
        assert_eq!(block.energies, vec![1.5, 3.0]);
        assert_eq!(block.counts, vec![4.0, 5.0]);

        let mut block = CsvBlock::default();
        block.push_row(&["0.5", "4", "9"])?;
        assert_eq!(block.energies, vec![0.5]);
        assert_eq!(block.counts, vec![4.0]);
        Ok(())
    }

    #[test_log::test]
    fn test_metadata_lines() {
        let mut block = CsvBlock::default();
        assert!(block.push_metadata("LiveTime: 10 s"));
        assert!(block.push_metadata("Real Time, 11"));
        assert!(block.push_metadata("StartTime: 2020-01-02T03:04:05"));
        assert!(!block.push_metadata("Energy, Data"));
        assert_eq!(block.live_time, Some(10.0));
        assert_eq!(block.real_time, Some(11.0));
        assert!(block.start_time.is_some());
    }
}
