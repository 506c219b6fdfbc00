use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::calibration::{rebin, EnergyCalibration};
use crate::error::SpecResult;
use crate::spec_file::container::{MeasurementId, SpecFile};
use crate::spec_file::flags::{CleanupOptions, FileProperties};

impl SpecFile {
    /// Re-establish the container's invariants and rebuild every derived index.
    ///
    /// In order, this:
    /// 1. renumbers measurements whose sample number and detector collide, when
    ///    [`CleanupOptions::AUTO_RENUMBER`] is set,
    /// 2. sorts measurements by sample number and detector, or by start time with
    ///    [`CleanupOptions::REORDER_BY_TIME`], unless [`CleanupOptions::PRESERVE_ORDER`] is set,
    /// 3. gives gamma spectra without a calibration a default linear calibration spanning
    ///    0 to 3 MeV,
    /// 4. shares equal calibrations between measurements,
    /// 5. rebins every gamma spectrum onto the first one's calibration, when
    ///    [`CleanupOptions::REBIN_TO_COMMON`] is set,
    /// 6. recomputes sample numbers, detector names, sums, mean position and
    ///    [`FileProperties`].
    ///
    /// Running it again with the same options changes nothing. No spectrum or calibration
    /// is replaced until every one of them has been prepared successfully.
    pub fn cleanup(&mut self, options: CleanupOptions) -> SpecResult<()> {
        if options.contains(CleanupOptions::AUTO_RENUMBER) {
            self.renumber_collisions();
        }
        self.update_detector_order();
        if !options.contains(CleanupOptions::PRESERVE_ORDER) {
            self.sort_measurements(options.contains(CleanupOptions::REORDER_BY_TIME));
        }

        let spectra = self.prepare_spectra(options)?;
        self.calibrations.clear();
        for (id, counts, cal) in spectra {
            let cal = self.intern_calibration(&cal);
            if let Some(Some(m)) = self.slots.get_mut(id.0) {
                match counts {
                    Some(counts) => m.replace_spectrum(counts, cal),
                    None => m.set_energy_calibration(cal)?,
                }
            }
        }

        self.recalculate_indices();
        debug!(
            "Cleaned up {} measurements over {} samples and {} detectors",
            self.num_measurements(),
            self.sample_numbers.len(),
            self.detector_names.len()
        );
        Ok(())
    }

    /// Work out the calibration, and for rebinning the new counts, of every gamma spectrum
    /// without touching the container
    #[allow(clippy::type_complexity)]
    fn prepare_spectra(
        &self,
        options: CleanupOptions,
    ) -> SpecResult<Vec<(MeasurementId, Option<Vec<f32>>, Arc<EnergyCalibration>)>> {
        let mut calibrated = Vec::new();
        for id in self.order.iter().copied() {
            let Some(m) = self.measurement(id) else {
                continue;
            };
            let Some(counts) = m.gamma_counts() else {
                continue;
            };
            if counts.is_empty() {
                continue;
            }
            let cal = match m.energy_calibration() {
                Some(cal) => cal.clone(),
                None => Arc::new(EnergyCalibration::default_for_channels(counts.len())?),
            };
            calibrated.push((id, cal));
        }

        let reference = calibrated.first().map(|(_, cal)| cal.clone());
        let mut spectra = Vec::with_capacity(calibrated.len());
        for (id, cal) in calibrated {
            match reference.as_ref() {
                Some(reference)
                    if options.contains(CleanupOptions::REBIN_TO_COMMON)
                        && !reference.is_compatible(&cal) =>
                {
                    let counts = self
                        .measurement(id)
                        .and_then(|m| m.gamma_counts())
                        .unwrap_or_default();
                    let rebinned = rebin(counts, &cal, reference)?;
                    spectra.push((id, Some(rebinned), reference.clone()));
                }
                _ => spectra.push((id, None, cal)),
            }
        }
        Ok(spectra)
    }

    fn renumber_collisions(&mut self) {
        let mut seen: HashSet<(i32, String)> = HashSet::new();
        let mut max_sample: HashMap<String, i32> = HashMap::new();
        for m in self.measurements() {
            let entry = max_sample
                .entry(m.detector_name().to_string())
                .or_insert(m.sample_number());
            *entry = (*entry).max(m.sample_number());
        }
        for id in self.order.clone() {
            let Some(Some(m)) = self.slots.get_mut(id.0) else {
                continue;
            };
            let key = (m.sample_number(), m.detector_name().to_string());
            if seen.contains(&key) {
                let next = max_sample.entry(key.1.clone()).or_insert(key.0);
                *next += 1;
                debug!(
                    "Renumbering {:?} sample {} to {}",
                    key.1, key.0, *next
                );
                m.set_sample_number(*next);
                seen.insert((*next, key.1));
            } else {
                seen.insert(key);
            }
        }
    }

    /// Drop detector names no longer in use and append new ones in the order they are
    /// first seen, keeping the relative order of names already known
    fn update_detector_order(&mut self) {
        let present: HashSet<&str> = self.measurements().map(|m| m.detector_name()).collect();
        let mut names: Vec<String> = self
            .detector_names
            .iter()
            .filter(|n| present.contains(n.as_str()))
            .cloned()
            .collect();
        for m in self.measurements() {
            if !names.iter().any(|n| n == m.detector_name()) {
                names.push(m.detector_name().to_string());
            }
        }
        self.detector_names = names;
    }

    fn sort_measurements(&mut self, by_time: bool) {
        let rank: HashMap<&str, usize> = self
            .detector_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut keyed: Vec<_> = self
            .order
            .iter()
            .filter_map(|id| {
                self.measurement(*id).map(|m| {
                    (
                        m.start_time(),
                        m.sample_number(),
                        rank.get(m.detector_name()).copied().unwrap_or(usize::MAX),
                        *id,
                    )
                })
            })
            .collect();
        keyed.sort_by(|a, b| {
            let by_sample = a.1.cmp(&b.1).then(a.2.cmp(&b.2));
            if by_time {
                // Unset start times sort last
                let by_start = match (a.0, b.0) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                by_start.then(by_sample)
            } else {
                by_sample
            }
        });
        self.order = keyed.into_iter().map(|k| k.3).collect();
    }

    /// Rebuild sample numbers, detector names, the record lookup, sums, mean position and
    /// properties from the current measurements, without reordering or recalibrating
    pub(crate) fn recalculate_indices(&mut self) {
        self.update_detector_order();

        let mut sample_numbers = BTreeSet::new();
        let mut gamma_names: Vec<String> = Vec::new();
        let mut neutron_names: Vec<String> = Vec::new();
        let mut record_index = HashMap::new();
        let mut gamma_count_sum = 0.0;
        let mut neutron_counts_sum = 0.0;
        let mut gamma_live_time = 0.0f32;
        let mut gamma_real_time = 0.0f32;
        let mut properties = FileProperties::empty();
        let (mut lat_sum, mut lon_sum, mut n_gps) = (0.0, 0.0, 0usize);
        let mut first_cal: Option<&Arc<EnergyCalibration>> = None;
        let mut common_binning = true;
        let mut channel_count: Option<usize> = None;
        let mut previous_time = None;
        let mut previous_sample = None;

        for id in self.order.iter().copied() {
            let Some(m) = self.measurement(id) else {
                continue;
            };
            sample_numbers.insert(m.sample_number());
            record_index.insert((m.sample_number(), m.detector_name().to_string()), id);

            if let Some(counts) = m.gamma_counts() {
                if !gamma_names.iter().any(|n| n == m.detector_name()) {
                    gamma_names.push(m.detector_name().to_string());
                }
                gamma_count_sum += m.gamma_count_sum();
                gamma_live_time += m.live_time();
                gamma_real_time += m.real_time();
                match channel_count {
                    Some(n) if n != counts.len() => {
                        properties |= FileProperties::MIXED_CHANNEL_COUNTS
                    }
                    None => channel_count = Some(counts.len()),
                    _ => {}
                }
                match (first_cal, m.energy_calibration()) {
                    (None, Some(cal)) => first_cal = Some(cal),
                    (Some(first), Some(cal)) if !first.is_compatible(cal) => {
                        common_binning = false
                    }
                    (_, None) => common_binning = false,
                    _ => {}
                }
            }
            if m.contained_neutron() {
                if !neutron_names.iter().any(|n| n == m.detector_name()) {
                    neutron_names.push(m.detector_name().to_string());
                }
                neutron_counts_sum += m.neutron_counts_sum();
                properties |= FileProperties::HAS_NEUTRONS;
            }
            if m.has_gps_info() {
                if let Some(p) = m.position() {
                    lat_sum += p.latitude;
                    lon_sum += p.longitude;
                    n_gps += 1;
                }
            }
            if m.has_time_inconsistency() {
                properties |= FileProperties::HAS_TIME_INCONSISTENCY;
            }
            if let Some(t) = m.start_time() {
                if previous_time.is_some_and(|p| p > t) {
                    properties |= FileProperties::NOT_TIME_SORTED;
                }
                previous_time = Some(t);
            }
            if previous_sample.is_some_and(|p| p > m.sample_number()) {
                properties |= FileProperties::NOT_SAMPLE_SORTED;
            }
            previous_sample = Some(m.sample_number());
        }
        if common_binning && first_cal.is_some() {
            properties |= FileProperties::HAS_COMMON_BINNING;
        }
        if n_gps > 0 {
            properties |= FileProperties::HAS_GPS_INFO;
            self.mean_latitude = Some(lat_sum / n_gps as f64);
            self.mean_longitude = Some(lon_sum / n_gps as f64);
        } else {
            self.mean_latitude = None;
            self.mean_longitude = None;
        }

        // Keep name lists in first-seen detector order
        let order_of = |names: Vec<String>| -> Vec<String> {
            self.detector_names
                .iter()
                .filter(|n| names.contains(n))
                .cloned()
                .collect()
        };
        let gamma_detector_names = order_of(gamma_names);
        let neutron_detector_names = order_of(neutron_names);

        self.sample_numbers = sample_numbers;
        self.gamma_detector_names = gamma_detector_names;
        self.neutron_detector_names = neutron_detector_names;
        self.record_index = record_index;
        self.gamma_count_sum = gamma_count_sum;
        self.neutron_counts_sum = neutron_counts_sum;
        self.gamma_live_time = gamma_live_time;
        self.gamma_real_time = gamma_real_time;
        self.properties = properties;
    }
}
