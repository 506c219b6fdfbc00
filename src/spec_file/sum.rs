use std::sync::Arc;

use log::debug;

use crate::calibration::{rebin, EnergyCalibration};
use crate::error::{SpecError, SpecResult};
use crate::measurement::Measurement;
use crate::meta::{OccupancyStatus, SourceType};
use crate::spec_file::container::SpecFile;

/// The value shared by every item, or `fallback` when they disagree
fn consensus<T: PartialEq + Clone>(mut items: impl Iterator<Item = T>, fallback: T) -> T {
    match items.next() {
        Some(first) => {
            if items.all(|x| x == first) {
                first
            } else {
                fallback
            }
        }
        None => fallback,
    }
}

impl SpecFile {
    /// Combine the measurements whose sample number is in `samples` and whose detector is in
    /// `detectors` into one new measurement. An empty filter matches everything.
    ///
    /// The gamma spectra are summed channel by channel on the calibration of the first
    /// selected gamma measurement in container order; spectra with a different calibration
    /// are rebinned onto it first with [`rebin`]. Live and real times are summed, neutron
    /// counts are summed per tube and the start time is the earliest one. The result has no
    /// detector name or sample number and is not added to the container.
    ///
    /// Fails with [`SpecError::EmptySelection`] when nothing matches.
    pub fn sum_measurements<D: AsRef<str>>(
        &self,
        samples: &[i32],
        detectors: &[D],
    ) -> SpecResult<Measurement> {
        let selected: Vec<&Measurement> = self
            .select_measurements(samples, detectors)
            .into_iter()
            .filter_map(|id| self.measurement(id))
            .collect();
        if selected.is_empty() {
            return Err(SpecError::EmptySelection);
        }

        let reference: Option<Arc<EnergyCalibration>> = selected
            .iter()
            .filter(|m| m.gamma_counts().is_some_and(|c| !c.is_empty()))
            .find_map(|m| m.energy_calibration().cloned());
        let channel_count = reference
            .as_ref()
            .map(|c| c.num_channels())
            .or_else(|| selected.iter().find_map(|m| m.gamma_counts().map(|c| c.len())));

        let mut gamma: Option<Vec<f64>> = channel_count.map(|n| vec![0.0; n]);
        let mut neutrons: Vec<f32> = Vec::new();
        let mut live_time = 0.0f32;
        let mut real_time = 0.0f32;
        let mut neutron_live_time = 0.0f32;
        let mut n_rebinned = 0usize;

        for m in selected.iter() {
            live_time += m.live_time();
            real_time += m.real_time();
            if let (Some(acc), Some(counts)) = (gamma.as_mut(), m.gamma_counts()) {
                let rebinned;
                let counts = match (reference.as_ref(), m.energy_calibration()) {
                    (Some(reference), Some(cal)) if !reference.is_compatible(cal) => {
                        n_rebinned += 1;
                        rebinned = rebin(counts, cal, reference)?;
                        rebinned.as_slice()
                    }
                    _ => counts,
                };
                if counts.len() != acc.len() {
                    return Err(SpecError::DimensionMismatch {
                        expected: acc.len(),
                        actual: counts.len(),
                    });
                }
                for (a, c) in acc.iter_mut().zip(counts) {
                    *a += *c as f64;
                }
            }
            if m.contained_neutron() {
                if neutrons.len() < m.neutron_counts().len() {
                    neutrons.resize(m.neutron_counts().len(), 0.0);
                }
                for (a, c) in neutrons.iter_mut().zip(m.neutron_counts()) {
                    *a += *c;
                }
                neutron_live_time += m.neutron_live_time();
            }
        }
        if n_rebinned > 0 {
            debug!("Rebinned {n_rebinned} spectra onto a common calibration before summing");
        }

        let mut result = Measurement::new();
        if let Some(acc) = gamma {
            result.set_gamma_counts(
                acc.into_iter().map(|v| v as f32).collect(),
                live_time,
                real_time,
            )?;
            if let Some(reference) = reference {
                result.set_energy_calibration(reference)?;
            }
        } else {
            result.set_live_time(live_time);
            result.set_real_time(real_time);
        }
        if !neutrons.is_empty() {
            result.set_neutron_counts(neutrons, neutron_live_time);
        }
        result.set_start_time(selected.iter().filter_map(|m| m.start_time()).min());
        result.set_source_type(consensus(
            selected.iter().map(|m| m.source_type().clone()),
            SourceType::Unknown,
        ));
        result.set_occupancy_status(consensus(
            selected.iter().map(|m| m.occupancy_status().clone()),
            OccupancyStatus::Unknown,
        ));
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::NaiveDate;

    use crate::spec_file::CleanupOptions;

    fn frf_record(sample: i32, detector: &str, counts: Vec<f32>) -> SpecResult<Measurement> {
        let mut m = Measurement::new();
        m.set_gamma_counts(counts, 10.0, 15.0)?;
        let cal = EnergyCalibration::full_range_fraction(
            &[0.0, 3000.0],
            10,
            &[(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)],
        )?;
        m.set_energy_calibration(Arc::new(cal))?;
        m.set_sample_number(sample);
        m.set_detector_name(detector);
        Ok(m)
    }

    fn example_file() -> SpecResult<SpecFile> {
        let mut file = SpecFile::new();
        let mut first = frf_record(
            1,
            "Aa1",
            vec![0.0, 1.1, 2.0, 3.0, 4.0, 5.9, 6.0, 7.0, 8.0, 9.0],
        )?;
        first.set_start_time(
            NaiveDate::from_ymd_opt(2022, 8, 26)
                .and_then(|d| d.and_hms_opt(0, 5, 23)),
        );
        first.set_source_type(SourceType::Foreground);
        file.add_measurement(first, false)?;
        let mut second = frf_record(
            2,
            "Aa1",
            vec![5.0, 2.1, 6.0, 1.0, 9.0, 5.2, 2.0, 1.0, 0.0, 10.0],
        )?;
        second.set_start_time(
            NaiveDate::from_ymd_opt(2022, 8, 25)
                .and_then(|d| d.and_hms_opt(23, 0, 0)),
        );
        second.set_neutron_counts(vec![120.0], 59.9);
        file.add_measurement(second, false)?;
        Ok(file)
    }

    #[test_log::test]
    fn test_sum_two_samples() -> SpecResult<()> {
        let file = example_file()?;
        let sum = file.sum_measurements(&[1, 2], &["Aa1"])?;
        assert_eq!(sum.live_time(), 20.0);
        assert_eq!(sum.real_time(), 30.0);
        let expected = [5.0, 3.2, 8.0, 4.0, 13.0, 11.1, 8.0, 8.0, 8.0, 19.0];
        for (a, b) in sum.gamma_counts().unwrap().iter().zip(expected) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(sum.detector_name(), "");
        assert_eq!(sum.sample_number(), 0);
        assert_eq!(sum.neutron_counts(), &[120.0]);
        assert_eq!(sum.source_type(), &SourceType::Unknown);
        assert_eq!(
            sum.start_time(),
            NaiveDate::from_ymd_opt(2022, 8, 25).and_then(|d| d.and_hms_opt(23, 0, 0))
        );
        assert_eq!(
            sum.energy_calibration(),
            file.measurement_at(0).unwrap().energy_calibration()
        );
        Ok(())
    }

    #[test_log::test]
    fn test_empty_selection() -> SpecResult<()> {
        let file = example_file()?;
        let err = file.sum_measurements(&[3], &["Aa1"]).unwrap_err();
        assert!(matches!(err, SpecError::EmptySelection));
        let err = file.sum_measurements(&[1], &["Zz9"]).unwrap_err();
        assert!(matches!(err, SpecError::EmptySelection));
        Ok(())
    }

    #[test_log::test]
    fn test_commutative_and_additive() -> SpecResult<()> {
        let mut file = SpecFile::new();
        let names = ["Aa1", "Aa2", "Ba1", "Ba2"];
        for (i, name) in names.iter().enumerate() {
            let counts = (0..10).map(|c| (c * (i + 1)) as f32 + 0.5).collect();
            file.add_measurement(frf_record(1, name, counts)?, true)?;
        }
        file.cleanup(CleanupOptions::empty())?;

        let forward = file.sum_measurements(&[1], &["Aa1", "Ba2"])?;
        let backward = file.sum_measurements(&[1], &["Ba2", "Aa1"])?;
        assert_eq!(forward, backward);

        let left = file.sum_measurements(&[], &["Aa1", "Aa2"])?;
        let right = file.sum_measurements(&[], &["Ba1", "Ba2"])?;
        let all = file.sum_measurements::<&str>(&[], &[])?;

        let mut combined = SpecFile::new();
        let mut l = left.clone();
        l.set_detector_name("left");
        let mut r = right.clone();
        r.set_detector_name("right");
        combined.add_measurement(l, false)?;
        combined.add_measurement(r, false)?;
        let of_sums = combined.sum_measurements::<&str>(&[], &[])?;

        for (a, b) in of_sums
            .gamma_counts()
            .unwrap()
            .iter()
            .zip(all.gamma_counts().unwrap())
        {
            assert!((a - b).abs() < 1e-4);
        }
        assert_eq!(of_sums.live_time(), all.live_time());
        Ok(())
    }

    #[test_log::test]
    fn test_sum_rebins_mismatched() -> SpecResult<()> {
        let mut file = SpecFile::new();
        let mut a = Measurement::new();
        a.set_gamma_counts(vec![1.0; 4], 1.0, 1.0)?;
        a.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(&[0.0, 10.0], 4, &[])?))?;
        a.set_detector_name("A");
        let mut b = Measurement::new();
        b.set_gamma_counts(vec![2.0; 8], 1.0, 1.0)?;
        b.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(&[0.0, 5.0], 8, &[])?))?;
        b.set_detector_name("B");
        file.add_measurement(a, false)?;
        file.add_measurement(b, false)?;
        let sum = file.sum_measurements::<&str>(&[], &[])?;
        assert_eq!(sum.gamma_counts().unwrap(), &[5.0, 5.0, 5.0, 5.0]);
        Ok(())
    }
}
