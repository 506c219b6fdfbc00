use std::io::{BufWriter, Write};

use log::debug;

use crate::error::{SpecError, SpecResult};
use crate::io::utils::format_count;
use crate::spec_file::SpecFile;

const ENDLINE: &str = "\r\n";

/// Write each selected measurement as a block of `Energy, Data` rows, or `Channel, Data`
/// rows when it has no calibration, followed by a blank line.
///
/// Only counts and channel energies are kept. Measurements without gamma counts are
/// skipped.
pub fn write_csv<W: Write, D: AsRef<str>>(
    file: &SpecFile,
    samples: &[i32],
    detectors: &[D],
    stream: W,
) -> SpecResult<()> {
    let selected = file.select_for_encode(samples, detectors)?;
    let mut handle = BufWriter::new(stream);
    let mut written = 0;
    for m in selected.iter().filter_map(|id| file.measurement(*id)) {
        let Some(counts) = m.gamma_counts().filter(|c| !c.is_empty()) else {
            debug!(
                "Skipping {}:{} without gamma counts",
                m.sample_number(),
                m.detector_name()
            );
            continue;
        };
        match m.energy_calibration() {
            Some(cal) if cal.num_channels() >= counts.len() => {
                write!(handle, "Energy, Data{ENDLINE}")?;
                for (i, c) in counts.iter().enumerate() {
                    write!(handle, "{},{}{ENDLINE}", cal.lower_energy(i), format_count(*c))?;
                }
            }
            _ => {
                write!(handle, "Channel, Data{ENDLINE}")?;
                for (i, c) in counts.iter().enumerate() {
                    write!(handle, "{i},{}{ENDLINE}", format_count(*c))?;
                }
            }
        }
        write!(handle, "{ENDLINE}")?;
        written += 1;
    }
    if written == 0 {
        return Err(SpecError::EncodeError(
            "none of the selected measurements have gamma counts".to_string(),
        ));
    }
    handle.flush()?;
    Ok(())
}
