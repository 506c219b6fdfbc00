use std::io::{BufWriter, Write};

use crate::calibration::EnergyCalType;
use crate::error::{SpecError, SpecResult};
use crate::io::utils::{format_count, single_record};
use crate::spec_file::SpecFile;

use super::{
    DATA, DATE_FORMAT, DATE_MEA, ENDRECORD, ENER_FIT, GPS, MCA_CAL, MEAS_TIM, NEUTRONS,
    NEUTRONS_LIVETIME, SPEC_ID, SPEC_REM,
};

const ENDLINE: &str = "\r\n";

struct SpeWriter<W: Write> {
    handle: BufWriter<W>,
}

impl<W: Write> SpeWriter<W> {
    fn tag(&mut self, tag: &str) -> SpecResult<()> {
        write!(self.handle, "${tag}:{ENDLINE}")?;
        Ok(())
    }

    /// Write one body line, folding any line breaks so the text cannot open a section
    fn line(&mut self, text: &str) -> SpecResult<()> {
        let text = text.replace(['\r', '\n'], " ");
        write!(self.handle, "{text}{ENDLINE}")?;
        Ok(())
    }

    fn section<'a, I: IntoIterator<Item = &'a str>>(&mut self, tag: &str, lines: I) -> SpecResult<()> {
        self.tag(tag)?;
        for line in lines {
            self.line(line)?;
        }
        Ok(())
    }
}

/// Encode the sum of the selected measurements as an IAEA SPE file.
///
/// The calibration is written as a polynomial in both `ENER_FIT` and `MCA_CAL`; lower
/// channel energy calibrations have no SPE form and are left out.
pub fn write_spe<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let record = single_record(file, samples, detectors)?;
    let counts = record
        .gamma_counts()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SpecError::EncodeError("SPE files need gamma counts".to_string()))?;

    let mut writer = SpeWriter {
        handle: BufWriter::new(stream),
    };
    writer.section(SPEC_ID, [record.title()])?;

    let remarks: Vec<&str> = file
        .remarks()
        .iter()
        .chain(record.remarks())
        .map(String::as_str)
        .filter(|r| !r.trim().is_empty())
        .collect();
    if !remarks.is_empty() {
        writer.section(SPEC_REM, remarks)?;
    }

    if let Some(start) = record.start_time() {
        let stamp = start.format(DATE_FORMAT).to_string();
        writer.section(DATE_MEA, [stamp.as_str()])?;
    }
    let times = format!("{:.5} {:.5}", record.live_time(), record.real_time());
    writer.section(MEAS_TIM, [times.as_str()])?;

    writer.tag(DATA)?;
    writer.line(&format!("0 {}", counts.len() - 1))?;
    for c in counts {
        writer.line(&format_count(*c))?;
    }

    let polynomial = record
        .energy_calibration()
        .filter(|cal| cal.kind() != EnergyCalType::LowerChannelEdge)
        .and_then(|cal| match cal.to_polynomial() {
            Ok(p) => Some(p.coefficients().to_vec()),
            Err(e) => {
                log::warn!("Leaving the energy calibration out of the SPE file: {e}");
                None
            }
        });
    if let Some(coefficients) = polynomial {
        let mut fit: Vec<f32> = coefficients.iter().copied().take(2).collect();
        fit.resize(2, 0.0);
        let fit = fit.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
        writer.section(ENER_FIT, [fit.as_str()])?;

        let terms = coefficients
            .iter()
            .map(|c| format!("{c:E}"))
            .collect::<Vec<_>>()
            .join(" ");
        let n_terms = coefficients.len().to_string();
        let terms = format!("{terms} keV");
        writer.section(MCA_CAL, [n_terms.as_str(), terms.as_str()])?;
    }

    if let Some(position) = record.position() {
        let lat = format!("Lat={}", position.latitude);
        let lon = format!("Lon={}", position.longitude);
        writer.section(GPS, [lat.as_str(), lon.as_str()])?;
    }

    if record.contained_neutron() {
        let neutrons = record
            .neutron_counts()
            .iter()
            .map(|c| format_count(*c))
            .collect::<Vec<_>>()
            .join(" ");
        writer.section(NEUTRONS, [neutrons.as_str()])?;
        let live = record.neutron_live_time().to_string();
        writer.section(NEUTRONS_LIVETIME, [live.as_str()])?;
    }

    writer.tag(ENDRECORD)?;
    writer.handle.flush()?;
    Ok(())
}
