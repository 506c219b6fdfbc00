use std::io::Read;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, warn};

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{finish_decoded, new_decoded, parse_floats_lenient, read_all};
use crate::io::SpectrumFileFormat;
use crate::measurement::Measurement;
use crate::spec_file::SpecFile;

use super::{
    section_tag, DATA, DATE_FORMAT, DATE_MEA, ENDRECORD, ENER_FIT, GPS, MCA_CAL, MEAS_TIM,
    NEUTRONS, NEUTRONS_LIVETIME, SPEC_ID, SPEC_REM,
};

const FORMAT: SpectrumFileFormat = SpectrumFileFormat::Spe;

const DATE_FALLBACKS: [&str; 4] = [
    "%m/%d/%Y %H:%M",
    "%d-%b-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

#[derive(Debug)]
struct Section<'a> {
    tag: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> Section<'a> {
    /// The body lines that are not blank
    fn content(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty())
    }

    fn first_floats(&self) -> Vec<f32> {
        self.content()
            .next()
            .map(|l| parse_floats_lenient(l, self.tag))
            .unwrap_or_default()
    }
}

/// Split the text into sections up to the end of the first record
fn sections(text: &str) -> Vec<Section<'_>> {
    let mut out: Vec<Section> = Vec::new();
    for line in text.lines() {
        if let Some((tag, tail)) = section_tag(line) {
            if tag == ENDRECORD {
                break;
            }
            let mut lines = Vec::new();
            if !tail.is_empty() {
                lines.push(tail);
            }
            out.push(Section { tag, lines });
        } else if let Some(current) = out.last_mut() {
            current.lines.push(line);
        }
    }
    out
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    std::iter::once(DATE_FORMAT)
        .chain(DATE_FALLBACKS)
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

const PREALLOCATED_CHANNELS: usize = 1 << 16;

/// Read the channel range line and the counts that follow it. A line that does not parse
/// is skipped with a warning, but two in a row mean this is not count data.
fn parse_counts(section: &Section, measurement: &mut Measurement) -> SpecResult<Vec<f32>> {
    let mut lines = section.content();
    let header = lines
        .next()
        .ok_or_else(|| SpecError::malformed(FORMAT, "the DATA section is empty"))?;
    let range: Vec<i64> = header
        .split_ascii_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect();
    let expected = match range.as_slice() {
        [first, last, ..] if last >= first => last
            .checked_sub(*first)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| usize::try_from(n).ok()),
        _ => None,
    };
    if expected.is_none() {
        warn!("Unexpected SPE channel range {header:?}");
    }

    // The range is only a hint; the data lines decide how many channels there are
    let mut counts = Vec::with_capacity(expected.unwrap_or(1024).min(PREALLOCATED_CHANNELS));
    let mut bad_lines = 0;
    for line in lines {
        let mut parsed = Vec::new();
        let ok = line.split_ascii_whitespace().all(|token| match token.parse::<f32>() {
            Ok(v) => {
                parsed.push(v);
                true
            }
            Err(_) => false,
        });
        if ok {
            bad_lines = 0;
            counts.extend(parsed);
        } else {
            bad_lines += 1;
            if bad_lines > 1 {
                return Err(SpecError::malformed(
                    FORMAT,
                    format!("unreadable channel data near {line:?}"),
                ));
            }
            warn!("Skipping unreadable SPE channel data line {line:?}");
            measurement.add_parse_warning(format!("Skipped channel data line {line:?}"));
        }
    }

    if let Some(expected) = expected {
        if expected != counts.len() {
            debug!(
                "SPE channel range names {expected} channels but {} were read",
                counts.len()
            );
        }
    }
    Ok(counts)
}

/// `MCA_CAL` holds the number of terms, then the terms, often followed by a unit
fn parse_mca_cal(section: &Section) -> Vec<f32> {
    let mut lines = section.content();
    let n_terms = lines
        .next()
        .and_then(|l| l.split_ascii_whitespace().next())
        .and_then(|t| t.parse::<usize>().ok());
    let Some(line) = lines.next() else {
        return Vec::new();
    };
    let mut values: Vec<f32> = line
        .split_ascii_whitespace()
        .take_while(|t| !t.eq_ignore_ascii_case("kev"))
        .filter_map(|t| t.parse().ok())
        .collect();
    if let Some(n) = n_terms {
        values.truncate(n);
    }
    values
}

fn parse_gps(section: &Section, measurement: &mut Measurement, file: &mut SpecFile) {
    let mut latitude = None;
    let mut longitude = None;
    for line in section.content() {
        let (key, value) = line.split_once('=').unwrap_or((line, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "lat" => latitude = value.trim().parse::<f64>().ok(),
            "lon" => longitude = value.trim().parse::<f64>().ok(),
            _ => file.add_remark(line),
        }
    }
    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        measurement.set_position(lat, lon, None);
    }
}

/// Decode an IAEA SPE file. Only the first record is read.
pub fn read_spe<R: Read>(stream: R) -> SpecResult<SpecFile> {
    let data = read_all(stream)?;
    if !super::is_spe(&data) {
        return Err(SpecError::mismatch(FORMAT, "does not start with a $TAG: line"));
    }
    let text = String::from_utf8_lossy(&data);
    let text = text.trim_start_matches('\u{feff}');

    let mut file = new_decoded();
    let mut measurement = Measurement::new();
    let mut counts = None;
    let mut times = None;
    let mut ener_fit = Vec::new();
    let mut mca_cal = Vec::new();
    let mut neutrons = None;
    let mut neutron_live_time = None;
    let mut remarks = Vec::new();

    for section in sections(text) {
        match section.tag {
            SPEC_ID => {
                let lines: Vec<&str> = section.content().collect();
                match lines.as_slice() {
                    [] => {}
                    [title] => measurement.set_title(*title),
                    _ => file.add_remark(lines.join(" ")),
                }
            }
            SPEC_REM => remarks.extend(section.content().map(str::to_string)),
            DATE_MEA => {
                if let Some(line) = section.content().next() {
                    match parse_date(line) {
                        Some(t) => measurement.set_start_time(Some(t)),
                        None => {
                            warn!("Could not parse SPE measurement date {line:?}");
                            measurement.add_parse_warning(format!("Unreadable date {line:?}"));
                        }
                    }
                }
            }
            MEAS_TIM => match section.first_floats().as_slice() {
                [live, real, ..] => times = Some((*live, *real)),
                [live] => times = Some((*live, *live)),
                [] => warn!("SPE MEAS_TIM section without times"),
            },
            DATA => counts = Some(parse_counts(&section, &mut measurement)?),
            ENER_FIT => ener_fit = section.first_floats(),
            MCA_CAL => mca_cal = parse_mca_cal(&section),
            GPS => parse_gps(&section, &mut measurement, &mut file),
            NEUTRONS => {
                neutrons = Some(
                    section
                        .content()
                        .flat_map(|l| parse_floats_lenient(l, NEUTRONS))
                        .collect::<Vec<_>>(),
                )
            }
            NEUTRONS_LIVETIME => neutron_live_time = section.first_floats().first().copied(),
            other => debug!("Skipping SPE section {other}"),
        }
    }

    let counts = counts.ok_or_else(|| SpecError::malformed(FORMAT, "no DATA section"))?;
    let (live_time, mut real_time) = times.unwrap_or((0.0, 0.0));
    if real_time <= f32::EPSILON {
        real_time = live_time;
    }
    let n_channels = counts.len();
    measurement.set_gamma_counts(counts, live_time, real_time)?;
    measurement.set_remarks(remarks);
    if let Some(neutrons) = neutrons {
        measurement.set_neutron_counts(neutrons, neutron_live_time.unwrap_or(real_time));
    }

    let coefficients = if mca_cal.len() >= 2 { mca_cal } else { ener_fit };
    if coefficients.iter().any(|c| *c != 0.0) && n_channels > 1 {
        let cal = EnergyCalibration::polynomial(&coefficients, n_channels, &[]);
        match cal.and_then(|c| measurement.set_energy_calibration(Arc::new(c))) {
            Ok(()) => {}
            Err(e) => {
                warn!("Ignoring SPE energy calibration {coefficients:?}: {e}");
                measurement.add_parse_warning(format!("Invalid energy calibration: {e}"));
            }
        }
    }

    if measurement.has_time_inconsistency() {
        warn!("SPE live time {live_time} exceeds real time {real_time}");
    }
    file.add_measurement(measurement, true)?;
    finish_decoded(file)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_sections() {
        let text = "$SPEC_ID:\nA\n\n$DATA: 0 1\n4\n5\n$ENDRECORD:\n$DATA:\n0 0\n9\n";
        let found = sections(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(found[1].content().collect::<Vec<_>>(), vec!["0 1", "4", "5"]);
    }

    #[test_log::test]
    fn test_mca_cal() {
        let section = Section {
            tag: MCA_CAL,
            lines: vec!["3", "1.5E+000 2.0E-001 0.0E+000 keV"],
        };
        assert_eq!(parse_mca_cal(&section), vec![1.5, 0.2, 0.0]);
    }

    #[test_log::test]
    fn test_bad_data_lines() {
        let mut m = Measurement::new();
        let section = Section {
            tag: DATA,
            lines: vec!["0 3", "1 2", "garbage", "3 4"],
        };
        assert_eq!(parse_counts(&section, &mut m).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.parse_warnings().len(), 1);

        let section = Section {
            tag: DATA,
            lines: vec!["0 3", "1 2", "garbage", "more garbage", "3 4"],
        };
        assert!(parse_counts(&section, &mut m).is_err());
    }

    #[test_log::test]
    fn test_dates() {
        assert!(parse_date("07/23/2018 13:05:00").is_some());
        assert!(parse_date("23-Jul-2018 13:05:00").is_some());
        assert!(parse_date("2018-07-23 13:05:00").is_some());
        assert!(parse_date("sometime").is_none());
    }
}
