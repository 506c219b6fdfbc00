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

use super::{
    CALIBRATION, DATA, DATE_FORMAT, DESCRIPTION, DP5_CONFIGURATION, DP5_CONFIGURATION_END,
    DPP_STATUS, DPP_STATUS_END, END, GAIN, LIVE_TIME, MAGIC, REAL_TIME, SERIAL_NUMBER,
    START_TIME, STATUS_DEVICE_TYPE, STATUS_SERIAL_NUMBER, TAG, TAG_REMARK,
};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::Mca;

/// The lines of the block opened by `start`, up to `end` or the next block header.
/// `None` when the block is absent, or when `end` is required but missing.
fn block<'a>(lines: &[&'a str], start: &str, end: Option<&str>) -> Option<Vec<&'a str>> {
    let first = lines.iter().position(|l| *l == start)? + 1;
    let mut body = Vec::new();
    for line in &lines[first..] {
        match end {
            Some(end) if *line == end => return Some(body),
            None if line.starts_with("<<") && line.ends_with(">>") => return Some(body),
            _ => body.push(*line),
        }
    }
    match end {
        Some(_) => None,
        None => Some(body),
    }
}

/// `KEY - value` pairs of the spectrum header
fn header_value<'a>(header: &[&'a str], key: &str) -> Option<&'a str> {
    header.iter().find_map(|line| {
        let (k, v) = line
            .split_once(" - ")
            .or_else(|| line.strip_suffix(" -").map(|k| (k, "")))?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    [DATE_FORMAT, "%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M:%S"]
        .into_iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text.trim(), fmt).ok())
}

/// Least squares line through `(channel, energy)` points, as `[offset, gain]`
pub(crate) fn fit_line(points: &[(f64, f64)]) -> Option<[f32; 2]> {
    match points {
        [] => None,
        [(channel, energy)] => (*channel != 0.0).then(|| [0.0, (energy / channel) as f32]),
        _ => {
            let n = points.len() as f64;
            let (sx, sy) = points
                .iter()
                .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            let (mx, my) = (sx / n, sy / n);
            let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
                (sxx + (x - mx) * (x - mx), sxy + (x - mx) * (y - my))
            });
            if sxx == 0.0 {
                return None;
            }
            let gain = sxy / sxx;
            Some([(my - gain * mx) as f32, gain as f32])
        }
    }
}

fn calibration_points(lines: &[&str]) -> Vec<(f64, f64)> {
    lines
        .iter()
        .filter(|l| !l.starts_with("LABEL"))
        .filter_map(|l| {
            let mut fields = l.split_ascii_whitespace().map(|t| t.parse::<f64>());
            match (fields.next(), fields.next()) {
                (Some(Ok(channel)), Some(Ok(energy))) => Some((channel, energy)),
                _ => {
                    debug!("Skipping MCA calibration line {l:?}");
                    None
                }
            }
        })
        .collect()
}

fn parse_counts(lines: &[&str]) -> SpecResult<Vec<f32>> {
    let mut counts = Vec::with_capacity(lines.len());
    for token in lines.iter().flat_map(|l| l.split_ascii_whitespace()) {
        let value = token.parse::<f32>().map_err(|e| {
            SpecError::malformed(FORMAT, format!("unreadable channel count {token:?}: {e}"))
        })?;
        counts.push(value);
    }
    if counts.len() < 2 {
        return Err(SpecError::malformed(
            FORMAT,
            format!("only {} channel counts", counts.len()),
        ));
    }
    Ok(counts)
}

fn parse_seconds(header: &[&str], key: &str, measurement: &mut Measurement) -> f32 {
    match header_value(header, key).map(|v| v.parse::<f32>()) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            warn!("Unreadable MCA {key}: {e}");
            measurement.add_parse_warning(format!("Unreadable {key}"));
            0.0
        }
        None => 0.0,
    }
}

/// Decode an Amptek MCA file.
///
/// A `<<CALIBRATION>>` block is fitted to a straight line. Without one, a `GAIN` between
/// 0 and 100 is taken as keV per channel.
pub fn read_mca<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let data = read_all(stream)?;
    if !super::is_mca(&data) {
        return Err(SpecError::mismatch(FORMAT, format!("does not start with {MAGIC}")));
    }
    let text = String::from_utf8_lossy(&data);
    let lines: Vec<&str> = text
        .trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .collect();

    let mut file = new_decoded();
    let mut measurement = Measurement::new();
    let header = block(&lines, MAGIC, None).unwrap_or_default();

    if let Some(tag) = header_value(&header, TAG).filter(|v| !v.is_empty()) {
        file.add_remark(format!("{TAG_REMARK}{tag}"));
    }
    if let Some(description) = header_value(&header, DESCRIPTION) {
        measurement.set_title(description);
    }
    let gain = header_value(&header, GAIN).and_then(|v| v.parse::<f32>().ok());
    let live_time = parse_seconds(&header, LIVE_TIME, &mut measurement);
    let real_time = parse_seconds(&header, REAL_TIME, &mut measurement);
    if let Some(start) = header_value(&header, START_TIME).filter(|v| !v.is_empty()) {
        match parse_time(start) {
            Some(t) => measurement.set_start_time(Some(t)),
            None => {
                warn!("Unreadable MCA start time {start:?}");
                measurement.add_parse_warning(format!("Unreadable start time {start:?}"));
            }
        }
    }
    if let Some(serial) = header_value(&header, SERIAL_NUMBER) {
        file.set_instrument_id(serial);
    }

    let data_lines = block(&lines, DATA, Some(END)).ok_or_else(|| {
        SpecError::malformed(FORMAT, format!("no {DATA} section closed by {END}"))
    })?;
    let counts = parse_counts(&data_lines)?;
    let n_channels = counts.len();
    measurement.set_gamma_counts(counts, live_time, real_time)?;

    let coefficients = match block(&lines, CALIBRATION, None) {
        Some(cal_lines) => {
            let points = calibration_points(&cal_lines);
            let fitted = fit_line(&points);
            if fitted.is_none() {
                warn!("Could not fit {} MCA calibration points", points.len());
            }
            fitted.map(|c| c.to_vec())
        }
        None => gain
            .filter(|g| *g > 0.0 && *g < 100.0)
            .map(|g| vec![0.0, g]),
    };
    if let Some(coefficients) = coefficients {
        let cal = EnergyCalibration::polynomial(&coefficients, n_channels, &[]);
        if let Err(e) = cal.and_then(|c| measurement.set_energy_calibration(Arc::new(c))) {
            warn!("Ignoring MCA energy calibration {coefficients:?}: {e}");
            measurement.add_parse_warning(format!("Invalid energy calibration: {e}"));
        }
    }

    if let Some(config) = block(&lines, DP5_CONFIGURATION, Some(DP5_CONFIGURATION_END)) {
        measurement.set_remarks(
            config
                .into_iter()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }
    if let Some(status) = block(&lines, DPP_STATUS, Some(DPP_STATUS_END)) {
        for line in status.into_iter().filter(|l| !l.is_empty()) {
            if let Some(serial) = line.strip_prefix(STATUS_SERIAL_NUMBER) {
                if file.instrument_id().len() < 3 {
                    file.set_instrument_id(serial);
                    continue;
                }
            }
            if let Some(model) = line.strip_prefix(STATUS_DEVICE_TYPE) {
                file.set_instrument_model(model);
            } else {
                file.add_remark(line);
            }
        }
    }

    if measurement.has_time_inconsistency() {
        warn!("MCA live time {live_time} exceeds real time {real_time}");
    }
    file.add_measurement(measurement, true)?;
    finish_decoded(file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_fit_line() {
        let [offset, gain] = fit_line(&[(0.0, 1.0), (10.0, 21.0), (20.0, 41.0)]).unwrap();
        assert!((offset - 1.0).abs() < 1e-6);
        assert!((gain - 2.0).abs() < 1e-6);
        assert_eq!(fit_line(&[(4.0, 8.0)]), Some([0.0, 2.0]));
        assert_eq!(fit_line(&[(4.0, 8.0), (4.0, 9.0)]), None);
        assert_eq!(fit_line(&[]), None);
    }

    #[test_log::test]
    fn test_blocks() {
        let lines = ["<<PMCA SPECTRUM>>", "TAG - a", "<<DATA>>", "1", "2", "<<END>>"];
        assert_eq!(block(&lines, MAGIC, None), Some(vec!["TAG - a"]));
        assert_eq!(block(&lines, DATA, Some(END)), Some(vec!["1", "2"]));
        assert_eq!(block(&lines[..5], DATA, Some(END)), None);
        assert_eq!(block(&lines, CALIBRATION, None), None);
        assert_eq!(header_value(&["TAG - a - b"], TAG), Some("a - b"));
    }
}
