use std::io::{BufWriter, Write};

use crate::error::{SpecError, SpecResult};
use crate::io::utils::{format_count, single_record};
use crate::spec_file::SpecFile;

use super::{
    CALIBRATION, DATA, DATE_FORMAT, DESCRIPTION, DP5_CONFIGURATION, DP5_CONFIGURATION_END,
    DPP_STATUS, DPP_STATUS_END, END, GAIN, LIVE_TIME, MAGIC, REAL_TIME, SERIAL_NUMBER,
    START_TIME, STATUS_DEVICE_TYPE, TAG, TAG_REMARK,
};

const ENDLINE: &str = "\r\n";

fn fold(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn header<W: Write>(handle: &mut W, key: &str, value: &str) -> SpecResult<()> {
    write!(handle, "{key} - {}{ENDLINE}", fold(value))?;
    Ok(())
}

/// Encode the sum of the selected measurements as an Amptek MCA file.
///
/// The calibration is written as two points at the lower edges of the first and last
/// channels, so only its linear part survives.
pub fn write_mca<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let record = single_record(file, samples, detectors)?;
    let counts = record
        .gamma_counts()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| {
            SpecError::EncodeError("MCA files need at least two gamma channels".to_string())
        })?;
    let tag = file
        .remarks()
        .iter()
        .find_map(|r| r.strip_prefix(TAG_REMARK))
        .unwrap_or_default();
    let calibration = record.energy_calibration();

    let mut handle = BufWriter::new(stream);
    write!(handle, "{MAGIC}{ENDLINE}")?;
    header(&mut handle, TAG, tag)?;
    header(&mut handle, DESCRIPTION, record.title())?;
    if let Some(cal) = calibration {
        let gain = cal.lower_energy(1) - cal.lower_energy(0);
        header(&mut handle, GAIN, &gain.to_string())?;
    }
    header(&mut handle, LIVE_TIME, &record.live_time().to_string())?;
    header(&mut handle, REAL_TIME, &record.real_time().to_string())?;
    if let Some(start) = record.start_time() {
        header(&mut handle, START_TIME, &start.format(DATE_FORMAT).to_string())?;
    }
    if !file.instrument_id().is_empty() {
        header(&mut handle, SERIAL_NUMBER, file.instrument_id())?;
    }

    if let Some(cal) = calibration {
        let last = counts.len() - 1;
        write!(handle, "{CALIBRATION}{ENDLINE}LABEL - keV{ENDLINE}")?;
        write!(handle, "0 {}{ENDLINE}", cal.lower_energy(0))?;
        write!(handle, "{last} {}{ENDLINE}", cal.lower_energy(last))?;
    }

    write!(handle, "{DATA}{ENDLINE}")?;
    for c in counts {
        write!(handle, "{}{ENDLINE}", format_count(*c))?;
    }
    write!(handle, "{END}{ENDLINE}")?;

    if !record.remarks().is_empty() {
        write!(handle, "{DP5_CONFIGURATION}{ENDLINE}")?;
        for remark in record.remarks() {
            write!(handle, "{}{ENDLINE}", fold(remark))?;
        }
        write!(handle, "{DP5_CONFIGURATION_END}{ENDLINE}")?;
    }

    let status: Vec<String> = (!file.instrument_model().is_empty())
        .then(|| format!("{STATUS_DEVICE_TYPE}{}", file.instrument_model()))
        .into_iter()
        .chain(
            file.remarks()
                .iter()
                .filter(|r| !r.starts_with(TAG_REMARK) && !r.trim().is_empty())
                .cloned(),
        )
        .collect();
    if !status.is_empty() {
        write!(handle, "{DPP_STATUS}{ENDLINE}")?;
        for line in status {
            write!(handle, "{}{ENDLINE}", fold(&line))?;
        }
        write!(handle, "{DPP_STATUS_END}{ENDLINE}")?;
    }
    handle.flush()?;
    Ok(())
}
