//! A single spectroscopic acquisition: one detector over one time interval.
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::calibration::EnergyCalibration;
use crate::error::{SpecError, SpecResult};
use crate::meta::{OccupancyStatus, SourceType};

/// A geographic position and the time it was recorded
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub time: Option<NaiveDateTime>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, time: Option<NaiveDateTime>) -> Self {
        Self {
            latitude,
            longitude,
            time,
        }
    }

    /// Whether the coordinates are in range and not the all-zero placeholder many
    /// instruments write when they have no fix
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// One spectrum from one detector, with the neutron counts and descriptive metadata
/// recorded alongside it.
///
/// Setters enforce the local invariants between counts and calibration. Once a measurement
/// has been added to a [`SpecFile`](crate::spec_file::SpecFile) it can only be changed through
/// the container, which keeps its derived indices up to date.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    gamma_counts: Option<Vec<f32>>,
    live_time: f32,
    real_time: f32,
    neutron_counts: Vec<f32>,
    neutron_live_time: f32,
    start_time: Option<NaiveDateTime>,
    detector_name: String,
    sample_number: i32,
    source_type: SourceType,
    occupied: OccupancyStatus,
    title: String,
    remarks: Vec<String>,
    position: Option<Position>,
    energy_calibration: Option<Arc<EnergyCalibration>>,
    parse_warnings: Vec<String>,
}

impl Measurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gamma_counts(&self) -> Option<&[f32]> {
        self.gamma_counts.as_deref()
    }

    pub fn live_time(&self) -> f32 {
        self.live_time
    }

    pub fn real_time(&self) -> f32 {
        self.real_time
    }

    pub fn neutron_counts(&self) -> &[f32] {
        &self.neutron_counts
    }

    pub fn neutron_live_time(&self) -> f32 {
        self.neutron_live_time
    }

    pub fn contained_neutron(&self) -> bool {
        !self.neutron_counts.is_empty()
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.start_time
    }

    pub fn detector_name(&self) -> &str {
        &self.detector_name
    }

    pub fn sample_number(&self) -> i32 {
        self.sample_number
    }

    pub fn source_type(&self) -> &SourceType {
        &self.source_type
    }

    pub fn occupancy_status(&self) -> &OccupancyStatus {
        &self.occupied
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn remarks(&self) -> &[String] {
        &self.remarks
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_gps_info(&self) -> bool {
        self.position.as_ref().is_some_and(|p| p.is_valid())
    }

    pub fn energy_calibration(&self) -> Option<&Arc<EnergyCalibration>> {
        self.energy_calibration.as_ref()
    }

    /// Notes about fields a decoder could only partially recover
    pub fn parse_warnings(&self) -> &[String] {
        &self.parse_warnings
    }

    /// Live time exceeding real time is physically impossible but tolerated
    pub fn has_time_inconsistency(&self) -> bool {
        self.live_time > self.real_time * (1.0 + f32::EPSILON) && self.real_time > 0.0
    }

    /// Replace the gamma counts together with the live and real time they were
    /// accumulated over.
    ///
    /// Fails with [`SpecError::DimensionMismatch`] when an energy calibration is attached
    /// and covers a different number of channels.
    pub fn set_gamma_counts(
        &mut self,
        counts: Vec<f32>,
        live_time: f32,
        real_time: f32,
    ) -> SpecResult<()> {
        if let Some(cal) = self.energy_calibration.as_ref() {
            if cal.num_channels() != counts.len() {
                return Err(SpecError::DimensionMismatch {
                    expected: cal.num_channels(),
                    actual: counts.len(),
                });
            }
        }
        self.gamma_counts = Some(counts);
        self.live_time = live_time;
        self.real_time = real_time;
        Ok(())
    }

    /// Remove the gamma spectrum, and with it the energy calibration
    pub fn clear_gamma_counts(&mut self) {
        self.gamma_counts = None;
        self.energy_calibration = None;
    }

    /// Attach a calibration. Fails with [`SpecError::ChannelCountMismatch`] when gamma
    /// counts are present and their length differs from the calibration's channel count.
    pub fn set_energy_calibration(&mut self, cal: Arc<EnergyCalibration>) -> SpecResult<()> {
        if let Some(counts) = self.gamma_counts.as_ref() {
            if counts.len() != cal.num_channels() {
                return Err(SpecError::ChannelCountMismatch {
                    expected: counts.len(),
                    actual: cal.num_channels(),
                });
            }
        }
        self.energy_calibration = Some(cal);
        Ok(())
    }

    pub fn set_live_time(&mut self, live_time: f32) {
        self.live_time = live_time;
    }

    pub fn set_real_time(&mut self, real_time: f32) {
        self.real_time = real_time;
    }

    pub fn set_neutron_counts(&mut self, counts: Vec<f32>, live_time: f32) {
        self.neutron_counts = counts;
        self.neutron_live_time = live_time;
    }

    pub fn set_position(&mut self, latitude: f64, longitude: f64, time: Option<NaiveDateTime>) {
        self.position = Some(Position::new(latitude, longitude, time));
    }

    pub fn clear_position(&mut self) {
        self.position = None;
    }

    pub fn set_start_time(&mut self, start_time: Option<NaiveDateTime>) {
        self.start_time = start_time;
    }

    pub fn set_remarks(&mut self, remarks: Vec<String>) {
        self.remarks = remarks;
    }

    pub fn set_source_type(&mut self, source_type: SourceType) {
        self.source_type = source_type;
    }

    pub fn set_detector_name<S: Into<String>>(&mut self, name: S) {
        self.detector_name = name.into();
    }

    pub fn set_sample_number(&mut self, sample_number: i32) {
        self.sample_number = sample_number;
    }

    pub fn set_title<S: Into<String>>(&mut self, title: S) {
        self.title = title.into();
    }

    pub fn set_occupancy_status(&mut self, status: OccupancyStatus) {
        self.occupied = status;
    }

    pub(crate) fn add_parse_warning<S: Into<String>>(&mut self, warning: S) {
        self.parse_warnings.push(warning.into());
    }

    /// Replace counts and calibration together, used when rebinning onto a new calibration
    pub(crate) fn replace_spectrum(&mut self, counts: Vec<f32>, cal: Arc<EnergyCalibration>) {
        self.gamma_counts = Some(counts);
        self.energy_calibration = Some(cal);
    }

    pub fn num_gamma_channels(&self) -> usize {
        self.gamma_counts.as_ref().map(|c| c.len()).unwrap_or_default()
    }

    pub fn gamma_count_sum(&self) -> f64 {
        self.gamma_counts
            .as_ref()
            .map(|c| c.iter().map(|v| *v as f64).sum())
            .unwrap_or_default()
    }

    pub fn neutron_counts_sum(&self) -> f64 {
        self.neutron_counts.iter().map(|v| *v as f64).sum()
    }

    fn channel_energies(&self) -> Option<&[f64]> {
        match (self.gamma_counts.as_ref(), self.energy_calibration.as_ref()) {
            (Some(counts), Some(cal)) if counts.len() == cal.num_channels() => {
                Some(cal.channel_energies())
            }
            _ => None,
        }
    }

    /// The channel whose energy range contains `energy`. Energies below the first channel
    /// map to channel 0 and energies past the last channel map to the last channel.
    pub fn find_gamma_channel(&self, energy: f64) -> Option<usize> {
        let energies = self.channel_energies()?;
        let last = energies.len() - 2;
        // The upper bound so an energy on a lower edge belongs to that channel
        let pos = energies.partition_point(|e| *e <= energy);
        if pos == 0 {
            Some(0)
        } else {
            Some((pos - 1).min(last))
        }
    }

    pub fn gamma_channel_content(&self, channel: usize) -> f32 {
        self.gamma_counts
            .as_ref()
            .and_then(|c| c.get(channel).copied())
            .unwrap_or_default()
    }

    pub fn gamma_channel_lower(&self, channel: usize) -> Option<f64> {
        let energies = self.channel_energies()?;
        if channel + 1 < energies.len() {
            Some(energies[channel])
        } else {
            None
        }
    }

    pub fn gamma_channel_upper(&self, channel: usize) -> Option<f64> {
        let energies = self.channel_energies()?;
        energies.get(channel + 1).copied()
    }

    pub fn gamma_channel_center(&self, channel: usize) -> Option<f64> {
        Some(0.5 * (self.gamma_channel_lower(channel)? + self.gamma_channel_upper(channel)?))
    }

    pub fn gamma_channel_width(&self, channel: usize) -> Option<f64> {
        Some(self.gamma_channel_upper(channel)? - self.gamma_channel_lower(channel)?)
    }

    pub fn gamma_energy_min(&self) -> Option<f64> {
        self.channel_energies().map(|e| e[0])
    }

    pub fn gamma_energy_max(&self) -> Option<f64> {
        self.channel_energies().and_then(|e| e.last().copied())
    }

    /// Sum of the counts in channels `start..=end`. Reversed bounds are swapped and `end`
    /// is clamped to the last channel.
    pub fn gamma_channels_sum(&self, start: usize, end: usize) -> f64 {
        let counts = match self.gamma_counts.as_ref() {
            Some(c) if !c.is_empty() => c,
            _ => return 0.0,
        };
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        if start >= counts.len() {
            return 0.0;
        }
        let end = end.min(counts.len() - 1);
        counts[start..=end].iter().map(|v| *v as f64).sum()
    }

    /// Counts between two energies.
    ///
    /// The bounds are clamped to the calibrated energy range. The channels containing each
    /// bound contribute the fraction of their width that lies inside the interval, and every
    /// channel in between contributes fully.
    pub fn gamma_integral(&self, lower_energy: f64, upper_energy: f64) -> f64 {
        let (energies, counts) = match (self.channel_energies(), self.gamma_counts.as_ref()) {
            (Some(e), Some(c)) if !c.is_empty() => (e, c),
            _ => return 0.0,
        };
        let n = counts.len();
        let (min_e, max_e) = (energies[0], energies[n]);
        let mut lower = lower_energy.max(min_e).min(max_e);
        let mut upper = upper_energy.max(min_e).min(max_e);
        if lower == upper {
            return 0.0;
        }
        if lower > upper {
            std::mem::swap(&mut lower, &mut upper);
        }

        let find = |e: f64| {
            let pos = energies.partition_point(|x| *x <= e);
            pos.saturating_sub(1).min(n - 1)
        };
        let lower_channel = find(lower);
        let upper_channel = find(upper);

        let lower_width = energies[lower_channel + 1] - energies[lower_channel];
        if lower_channel == upper_channel {
            return (upper - lower) / lower_width * counts[lower_channel] as f64;
        }

        let mut sum = (energies[lower_channel + 1] - lower) / lower_width
            * counts[lower_channel] as f64;
        let upper_width = energies[upper_channel + 1] - energies[upper_channel];
        sum += (upper - energies[upper_channel]) / upper_width * counts[upper_channel] as f64;
        for c in &counts[lower_channel + 1..upper_channel] {
            sum += *c as f64;
        }
        sum
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use chrono::NaiveDate;

    fn example_measurement() -> SpecResult<Measurement> {
        let mut m = Measurement::new();
        m.set_gamma_counts(
            vec![0.0, 1.1, 2.0, 3.0, 4.0, 5.9, 6.0, 7.0, 8.0, 9.0],
            10.0,
            15.0,
        )?;
        let cal = EnergyCalibration::full_range_fraction(
            &[0.0, 3000.0],
            10,
            &[(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)],
        )?;
        m.set_energy_calibration(Arc::new(cal))?;
        m.set_detector_name("Aa1");
        m.set_sample_number(1);
        Ok(m)
    }

    #[test_log::test]
    fn test_example_record() -> SpecResult<()> {
        let m = example_measurement()?;
        assert_eq!(m.gamma_channel_lower(0), Some(0.0));
        assert!((m.gamma_channel_upper(9).unwrap() - 3000.0).abs() < 1e-6);
        assert!((m.gamma_count_sum() - 46.0).abs() < 1e-4);
        assert_eq!(m.num_gamma_channels(), 10);
        assert_eq!(m.gamma_channel_content(5), 5.9);
        assert_eq!(m.gamma_channel_content(50), 0.0);
        assert!(!m.has_time_inconsistency());
        Ok(())
    }

    #[test_log::test]
    fn test_channel_sums() -> SpecResult<()> {
        let m = example_measurement()?;
        let counts = m.gamma_counts().unwrap();
        for lo in 0..10 {
            for hi in lo..10 {
                let expected: f64 = counts[lo..=hi].iter().map(|v| *v as f64).sum();
                assert!((m.gamma_channels_sum(lo, hi) - expected).abs() < 1e-9);
            }
        }
        assert_eq!(m.gamma_channels_sum(8, 2), m.gamma_channels_sum(2, 8));
        assert!((m.gamma_channels_sum(7, 100) - 24.0).abs() < 1e-9);
        assert_eq!(m.gamma_channels_sum(12, 100), 0.0);
        Ok(())
    }

    #[test_log::test]
    fn test_gamma_integral_interpolates() -> SpecResult<()> {
        let mut m = Measurement::new();
        m.set_gamma_counts(vec![10.0, 20.0, 30.0, 40.0], 1.0, 1.0)?;
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(&[0.0, 10.0], 4, &[])?))?;
        // a quarter of channel 0 is [7.5, 10)
        assert!((m.gamma_integral(7.5, 10.0) - 2.5).abs() < 1e-9);
        // half of channel 1, all of channel 2, a quarter of channel 3
        assert!((m.gamma_integral(15.0, 32.5) - (10.0 + 30.0 + 10.0)).abs() < 1e-9);
        assert!((m.gamma_integral(32.5, 15.0) - 50.0).abs() < 1e-9);
        // within a single channel
        assert!((m.gamma_integral(21.0, 23.0) - 6.0).abs() < 1e-9);
        assert!((m.gamma_integral(-100.0, 1000.0) - 100.0).abs() < 1e-9);
        assert_eq!(m.gamma_integral(5.0, 5.0), 0.0);

        let mut single = Measurement::new();
        single.set_gamma_counts(vec![8.0], 1.0, 1.0)?;
        let cal = EnergyCalibration::polynomial(&[0.0, 10.0], 1, &[])?;
        single.set_energy_calibration(Arc::new(cal))?;
        assert!((single.gamma_integral(2.5, 5.0) - 2.0).abs() < 1e-9);
        assert!((single.gamma_integral(-1.0, 20.0) - 8.0).abs() < 1e-9);
        Ok(())
    }

    #[test_log::test]
    fn test_find_channel() -> SpecResult<()> {
        let mut m = Measurement::new();
        m.set_gamma_counts(vec![1.0; 4], 1.0, 1.0)?;
        assert_eq!(m.find_gamma_channel(5.0), None);
        m.set_energy_calibration(Arc::new(EnergyCalibration::polynomial(&[0.0, 10.0], 4, &[])?))?;
        assert_eq!(m.find_gamma_channel(-3.0), Some(0));
        assert_eq!(m.find_gamma_channel(10.0), Some(1));
        assert_eq!(m.find_gamma_channel(39.9), Some(3));
        assert_eq!(m.find_gamma_channel(400.0), Some(3));
        assert_eq!(m.gamma_channel_center(2), Some(25.0));
        assert_eq!(m.gamma_channel_width(2), Some(10.0));
        Ok(())
    }

    #[test_log::test]
    fn test_setter_validation() -> SpecResult<()> {
        let mut m = example_measurement()?;
        let err = m.set_gamma_counts(vec![1.0; 4], 1.0, 2.0).unwrap_err();
        assert!(matches!(err, SpecError::DimensionMismatch { expected: 10, actual: 4 }));
        assert_eq!(m.num_gamma_channels(), 10);

        let wrong = Arc::new(EnergyCalibration::polynomial(&[0.0, 3.0], 1024, &[])?);
        let err = m.set_energy_calibration(wrong).unwrap_err();
        assert!(matches!(err, SpecError::ChannelCountMismatch { expected: 10, actual: 1024 }));

        let mut neutron_only = Measurement::new();
        neutron_only.set_neutron_counts(vec![120.0], 59.9);
        neutron_only.set_live_time(60.0);
        neutron_only.set_real_time(59.0);
        assert!(neutron_only.contained_neutron());
        assert!(neutron_only.has_time_inconsistency());
        assert_eq!(neutron_only.gamma_count_sum(), 0.0);

        let when = NaiveDate::from_ymd_opt(2022, 8, 26)
            .unwrap()
            .and_hms_opt(0, 5, 23)
            .unwrap();
        neutron_only.set_position(37.6762183189832, -121.70622613299014, Some(when));
        assert!(neutron_only.has_gps_info());
        Ok(())
    }
}
