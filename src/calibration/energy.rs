use std::fmt::Display;

use crate::calibration::deviation::DeviationCorrection;
use crate::error::{SpecError, SpecResult};

/// The functional form of an [`EnergyCalibration`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnergyCalType {
    /// `E(ch) = Σ cᵢ·chⁱ`
    #[default]
    Polynomial,
    /// `E(x) = C0 + C1·x + C2·x² + C3·x³ + C4 / (1 + 60·x)` with `x = ch / n`
    FullRangeFraction,
    /// Explicit lower edge energy for every channel, plus the upper edge of the last
    LowerChannelEdge,
}

impl Display for EnergyCalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Convert full range fraction coefficients to polynomial coefficients for `channel_count`
/// channels. The `C4` low energy term has no polynomial equivalent and is dropped.
pub fn frf_to_polynomial(coefficients: &[f32], channel_count: usize) -> Vec<f32> {
    let n = channel_count as f64;
    coefficients
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, c)| (*c as f64 / n.powi(i as i32)) as f32)
        .collect()
}

/// Convert polynomial coefficients to full range fraction coefficients for `channel_count`
/// channels. Terms beyond the cubic are dropped.
pub fn polynomial_to_frf(coefficients: &[f32], channel_count: usize) -> Vec<f32> {
    let n = channel_count as f64;
    coefficients
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, c)| (*c as f64 * n.powi(i as i32)) as f32)
        .collect()
}

fn strip_trailing_zeros(coefficients: &[f32]) -> Vec<f32> {
    let end = coefficients
        .iter()
        .rposition(|c| *c != 0.0)
        .map(|i| i + 1)
        .unwrap_or(0);
    coefficients[..end].to_vec()
}

/// A mapping between channel index and energy for a fixed number of channels.
///
/// The lower edge energy of every channel (and the upper edge of the last one) is computed
/// once at construction, with any deviation pair correction already applied, so edge lookups
/// are constant time. Equality compares the defining values (kind, coefficients, channel count
/// and deviation pairs) and never object identity.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "CalibrationOptions", into = "CalibrationOptions")
)]
pub struct EnergyCalibration {
    kind: EnergyCalType,
    coefficients: Vec<f32>,
    deviation_pairs: Vec<(f32, f32)>,
    channel_count: usize,
    correction: DeviationCorrection,
    channel_energies: Vec<f64>,
}

impl PartialEq for EnergyCalibration {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.channel_count == other.channel_count
            && self.coefficients == other.coefficients
            && self.deviation_pairs == other.deviation_pairs
    }
}

impl EnergyCalibration {
    /// Create a polynomial calibration, `E(ch) = Σ cᵢ·chⁱ`
    pub fn polynomial(
        coefficients: &[f32],
        channel_count: usize,
        deviation_pairs: &[(f32, f32)],
    ) -> SpecResult<Self> {
        Self::from_equation(
            EnergyCalType::Polynomial,
            coefficients,
            channel_count,
            deviation_pairs,
        )
    }

    /// Create a full range fraction calibration. At most five coefficients are used.
    pub fn full_range_fraction(
        coefficients: &[f32],
        channel_count: usize,
        deviation_pairs: &[(f32, f32)],
    ) -> SpecResult<Self> {
        if coefficients.len() > 5 && coefficients[5..].iter().any(|c| *c != 0.0) {
            return Err(SpecError::InvalidCalibration(format!(
                "full range fraction calibrations take at most 5 coefficients, got {}",
                coefficients.len()
            )));
        }
        Self::from_equation(
            EnergyCalType::FullRangeFraction,
            coefficients,
            channel_count,
            deviation_pairs,
        )
    }

    /// Create a calibration from explicit channel lower edge energies.
    ///
    /// `energies` may hold `channel_count + 1` values, in which case the last is the upper
    /// edge of the final channel, or exactly `channel_count` values, in which case that upper
    /// edge is extrapolated from the width of the final channel.
    pub fn lower_channel_energy(channel_count: usize, energies: &[f32]) -> SpecResult<Self> {
        if channel_count < 1 {
            return Err(SpecError::InvalidCalibration(
                "a calibration needs at least one channel".to_string(),
            ));
        }
        let mut energies = energies.to_vec();
        if energies.len() == channel_count && channel_count >= 2 {
            let n = energies.len();
            energies.push(2.0 * energies[n - 1] - energies[n - 2]);
        }
        if energies.len() != channel_count + 1 {
            return Err(SpecError::InvalidCalibration(format!(
                "expected {} or {} lower channel energies for {} channels, got {}",
                channel_count,
                channel_count + 1,
                channel_count,
                energies.len()
            )));
        }
        let channel_energies: Vec<f64> = energies.iter().map(|e| *e as f64).collect();
        Self::check_monotonic(&channel_energies)?;
        Ok(Self {
            kind: EnergyCalType::LowerChannelEdge,
            coefficients: energies,
            deviation_pairs: Vec::new(),
            channel_count,
            correction: DeviationCorrection::default(),
            channel_energies,
        })
    }

    fn from_equation(
        kind: EnergyCalType,
        coefficients: &[f32],
        channel_count: usize,
        deviation_pairs: &[(f32, f32)],
    ) -> SpecResult<Self> {
        if channel_count < 1 {
            return Err(SpecError::InvalidCalibration(
                "a calibration needs at least one channel".to_string(),
            ));
        }
        let coefficients = strip_trailing_zeros(coefficients);
        if coefficients.len() < 2 {
            return Err(SpecError::InvalidCalibration(format!(
                "a {kind} calibration needs at least two non-zero coefficients"
            )));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(SpecError::InvalidCalibration(format!(
                "{kind} coefficients must be finite: {coefficients:?}"
            )));
        }
        let correction = DeviationCorrection::new(deviation_pairs)?;
        let mut this = Self {
            kind,
            coefficients,
            deviation_pairs: deviation_pairs.to_vec(),
            channel_count,
            correction,
            channel_energies: Vec::new(),
        };
        this.channel_energies = (0..=channel_count)
            .map(|i| this.energy_for_channel(i as f64))
            .collect();
        Self::check_monotonic(&this.channel_energies)?;
        Ok(this)
    }

    fn check_monotonic(energies: &[f64]) -> SpecResult<()> {
        for (i, w) in energies.windows(2).enumerate() {
            if !(w[0] < w[1]) {
                return Err(SpecError::InvalidCalibration(format!(
                    "channel energies must increase, channel {} spans {} to {} keV",
                    i, w[0], w[1]
                )));
            }
        }
        Ok(())
    }

    /// Return a copy of this calibration with `pairs` replacing any existing deviation pairs
    pub fn with_deviation_pairs(&self, pairs: &[(f32, f32)]) -> SpecResult<Self> {
        match self.kind {
            EnergyCalType::LowerChannelEdge => {
                if pairs.is_empty() {
                    Ok(self.clone())
                } else {
                    Err(SpecError::InvalidCalibration(
                        "deviation pairs cannot be applied to lower channel energy calibrations"
                            .to_string(),
                    ))
                }
            }
            kind => Self::from_equation(kind, &self.coefficients, self.channel_count, pairs),
        }
    }

    pub fn kind(&self) -> EnergyCalType {
        self.kind
    }

    /// The defining coefficients. For [`EnergyCalType::LowerChannelEdge`] these are the
    /// `channel_count + 1` edge energies.
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    pub fn deviation_pairs(&self) -> &[(f32, f32)] {
        &self.deviation_pairs
    }

    pub fn num_channels(&self) -> usize {
        self.channel_count
    }

    /// The lower edge energy of every channel followed by the upper edge of the last channel
    pub fn channel_energies(&self) -> &[f64] {
        &self.channel_energies
    }

    /// Whether `other` describes the same channel to energy mapping, so spectra calibrated
    /// by either can be added channel by channel without rebinning
    pub fn is_compatible(&self, other: &Self) -> bool {
        self == other
    }

    fn base_energy(&self, channel: f64) -> f64 {
        match self.kind {
            EnergyCalType::Polynomial => {
                let mut acc = 0.0;
                for c in self.coefficients.iter().rev() {
                    acc = acc * channel + *c as f64;
                }
                acc
            }
            EnergyCalType::FullRangeFraction => {
                let x = channel / self.channel_count as f64;
                let c = |i: usize| self.coefficients.get(i).copied().unwrap_or(0.0) as f64;
                let mut e = c(0) + x * (c(1) + x * (c(2) + x * c(3)));
                if c(4) != 0.0 {
                    e += c(4) / (1.0 + 60.0 * x);
                }
                e
            }
            EnergyCalType::LowerChannelEdge => {
                let edges = &self.channel_energies;
                let last = self.channel_count - 1;
                let i = (channel.floor().max(0.0) as usize).min(last);
                edges[i] + (channel - i as f64) * (edges[i + 1] - edges[i])
            }
        }
    }

    /// Convert a, possibly fractional, channel number to an energy
    pub fn energy_for_channel(&self, channel: f64) -> f64 {
        let e = self.base_energy(channel);
        if self.correction.is_empty() {
            e
        } else {
            self.correction.apply(e)
        }
    }

    /// The energy of the lower edge of `channel`. Channels past the end are extrapolated.
    pub fn lower_energy(&self, channel: usize) -> f64 {
        match self.channel_energies.get(channel) {
            Some(e) => *e,
            None => self.energy_for_channel(channel as f64),
        }
    }

    pub fn upper_energy(&self, channel: usize) -> f64 {
        self.lower_energy(channel + 1)
    }

    /// Solve the base equation directly when it is linear in channel
    fn linear_inverse(&self, energy: f64) -> Option<f64> {
        let c = &self.coefficients;
        match self.kind {
            EnergyCalType::Polynomial if c.len() == 2 => {
                let base = self.correction.invert(energy);
                Some((base - c[0] as f64) / c[1] as f64)
            }
            EnergyCalType::FullRangeFraction if c.len() == 2 => {
                let base = self.correction.invert(energy);
                let x = (base - c[0] as f64) / c[1] as f64;
                Some(x * self.channel_count as f64)
            }
            _ => None,
        }
    }

    /// Convert an energy to a, possibly fractional, channel number.
    ///
    /// Energies outside of the calibrated range are extrapolated linearly from the width of
    /// the first or last channel, unless the calibration is linear in channel, in which case
    /// the equation is solved exactly everywhere.
    pub fn channel_for_energy(&self, energy: f64) -> f64 {
        if let Some(channel) = self.linear_inverse(energy) {
            return channel;
        }
        let edges = &self.channel_energies;
        let n = self.channel_count;
        if energy <= edges[0] {
            return (energy - edges[0]) / (edges[1] - edges[0]);
        }
        if energy >= edges[n] {
            return n as f64 + (energy - edges[n]) / (edges[n] - edges[n - 1]);
        }
        let i = edges.partition_point(|e| *e <= energy) - 1;
        let (lo_e, hi_e) = (edges[i], edges[i + 1]);
        if self.kind == EnergyCalType::LowerChannelEdge {
            return i as f64 + (energy - lo_e) / (hi_e - lo_e);
        }

        // The curve is strictly increasing on [i, i + 1] so the root is bracketed.
        let (mut lo, mut hi) = (i as f64, (i + 1) as f64);
        let (mut f_lo, mut f_hi) = (lo_e - energy, hi_e - energy);
        let mut x = lo + (hi - lo) * (-f_lo) / (f_hi - f_lo);
        for _ in 0..100 {
            let fx = self.energy_for_channel(x) - energy;
            if fx.abs() <= 1e-12 * energy.abs().max(1.0) {
                break;
            }
            if fx < 0.0 {
                lo = x;
                f_lo = fx;
            } else {
                hi = x;
                f_hi = fx;
            }
            if hi - lo < 1e-13 {
                break;
            }
            let secant = lo + (hi - lo) * (-f_lo) / (f_hi - f_lo);
            let mid = 0.5 * (lo + hi);
            // Fall back to bisection when the secant step stalls against one end
            x = if secant > lo && secant < hi && (secant - mid).abs() < 0.5 * (hi - lo) * 0.9 {
                secant
            } else {
                mid
            };
        }
        x
    }

    /// Express this calibration in polynomial form
    pub fn to_polynomial(&self) -> SpecResult<Self> {
        match self.kind {
            EnergyCalType::Polynomial => Ok(self.clone()),
            EnergyCalType::FullRangeFraction => {
                if self.coefficients.get(4).copied().unwrap_or(0.0) != 0.0 {
                    return Err(SpecError::InvalidCalibration(
                        "the low energy term of a full range fraction calibration has no polynomial form"
                            .to_string(),
                    ));
                }
                Self::polynomial(
                    &frf_to_polynomial(&self.coefficients, self.channel_count),
                    self.channel_count,
                    &self.deviation_pairs,
                )
            }
            EnergyCalType::LowerChannelEdge => Err(SpecError::InvalidCalibration(
                "lower channel energy calibrations have no polynomial form".to_string(),
            )),
        }
    }

    /// Express this calibration in full range fraction form
    pub fn to_full_range_fraction(&self) -> SpecResult<Self> {
        match self.kind {
            EnergyCalType::FullRangeFraction => Ok(self.clone()),
            EnergyCalType::Polynomial => {
                if self.coefficients.len() > 4 {
                    return Err(SpecError::InvalidCalibration(format!(
                        "a polynomial of degree {} has no full range fraction form",
                        self.coefficients.len() - 1
                    )));
                }
                Self::full_range_fraction(
                    &polynomial_to_frf(&self.coefficients, self.channel_count),
                    self.channel_count,
                    &self.deviation_pairs,
                )
            }
            EnergyCalType::LowerChannelEdge => Err(SpecError::InvalidCalibration(
                "lower channel energy calibrations have no full range fraction form".to_string(),
            )),
        }
    }

    /// The calibration assigned to gamma spectra that arrive without one
    pub fn default_for_channels(channel_count: usize) -> SpecResult<Self> {
        let width = 3000.0 / (channel_count.saturating_sub(1).max(1) as f32);
        Self::polynomial(&[0.0, width], channel_count, &[])
    }
}

/// The recognized options for building an [`EnergyCalibration`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationOptions {
    pub kind: EnergyCalType,
    /// Equation coefficients, or edge energies for [`EnergyCalType::LowerChannelEdge`]
    pub coefficients: Vec<f32>,
    pub channel_count: usize,
    pub deviation_pairs: Vec<(f32, f32)>,
}

impl CalibrationOptions {
    pub fn new(kind: EnergyCalType, coefficients: Vec<f32>, channel_count: usize) -> Self {
        Self {
            kind,
            coefficients,
            channel_count,
            deviation_pairs: Vec::new(),
        }
    }

    pub fn with_deviation_pairs(mut self, pairs: Vec<(f32, f32)>) -> Self {
        self.deviation_pairs = pairs;
        self
    }

    pub fn build(&self) -> SpecResult<EnergyCalibration> {
        match self.kind {
            EnergyCalType::Polynomial => EnergyCalibration::polynomial(
                &self.coefficients,
                self.channel_count,
                &self.deviation_pairs,
            ),
            EnergyCalType::FullRangeFraction => EnergyCalibration::full_range_fraction(
                &self.coefficients,
                self.channel_count,
                &self.deviation_pairs,
            ),
            EnergyCalType::LowerChannelEdge => {
                let cal =
                    EnergyCalibration::lower_channel_energy(self.channel_count, &self.coefficients)?;
                cal.with_deviation_pairs(&self.deviation_pairs)
            }
        }
    }
}

impl From<EnergyCalibration> for CalibrationOptions {
    fn from(value: EnergyCalibration) -> Self {
        Self {
            kind: value.kind,
            coefficients: value.coefficients,
            channel_count: value.channel_count,
            deviation_pairs: value.deviation_pairs,
        }
    }
}

impl TryFrom<CalibrationOptions> for EnergyCalibration {
    type Error = SpecError;

    fn try_from(value: CalibrationOptions) -> Result<Self, Self::Error> {
        value.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_polynomial_round_trip() -> SpecResult<()> {
        let cal = EnergyCalibration::polynomial(&[-2.5, 2.93, 0.0004, 0.0], 1024, &[])?;
        assert_eq!(cal.coefficients().len(), 3);
        for c in [0.0, 1.0, 17.25, 512.0, 1000.5, 1023.0] {
            let e = cal.energy_for_channel(c);
            let back = cal.channel_for_energy(e);
            assert!((back - c).abs() < 1e-6, "{c} -> {e} -> {back}");
        }
        Ok(())
    }

    #[test_log::test]
    fn test_frf_round_trip() -> SpecResult<()> {
        let cal = EnergyCalibration::full_range_fraction(&[1.0, 3000.0, 12.0, -3.0, 2.0], 512, &[])?;
        for c in 0..512 {
            let c = c as f64 + 0.3;
            let back = cal.channel_for_energy(cal.energy_for_channel(c));
            assert!((back - c).abs() < 1e-6, "{c} != {back}");
        }
        let linear = EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 10, &[])?;
        assert!((linear.energy_for_channel(5.0) - 1500.0).abs() < 1e-9);
        assert!((linear.channel_for_energy(1500.0) - 5.0).abs() < 1e-9);
        Ok(())
    }

    #[test_log::test]
    fn test_deviation_pairs_applied_both_ways() -> SpecResult<()> {
        let pairs = [(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)];
        let cal = EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 10, &pairs)?;
        assert_eq!(cal.lower_energy(0), 0.0);
        assert!((cal.upper_energy(9) - 3000.0).abs() < 1e-6);
        // 300 keV uncorrected sits between the 100 and 1460 keV knots
        let expected_offset = -10.0 + (300.0 - 100.0) * 25.0 / 1360.0;
        assert!((cal.lower_energy(1) - (300.0 + expected_offset)).abs() < 1e-9);
        for c in [0.0, 0.5, 3.3, 9.99, 10.0] {
            let back = cal.channel_for_energy(cal.energy_for_channel(c));
            assert!((back - c).abs() < 1e-9);
        }

        let quad = EnergyCalibration::polynomial(&[0.0, 3.0, 0.0001], 1024, &pairs)?;
        for c in [2.0, 100.0, 450.5, 1023.0] {
            let back = quad.channel_for_energy(quad.energy_for_channel(c));
            assert!((back - c).abs() < 1e-6);
        }
        Ok(())
    }

    #[test_log::test]
    fn test_lower_channel_energy() -> SpecResult<()> {
        let cal = EnergyCalibration::lower_channel_energy(4, &[0.0, 10.0, 25.0, 45.0])?;
        assert_eq!(cal.channel_energies(), &[0.0, 10.0, 25.0, 45.0, 65.0]);
        assert!((cal.energy_for_channel(1.5) - 17.5).abs() < 1e-9);
        assert!((cal.channel_for_energy(17.5) - 1.5).abs() < 1e-9);
        assert!((cal.channel_for_energy(75.0) - 4.5).abs() < 1e-9);

        let err = EnergyCalibration::lower_channel_energy(3, &[0.0, 10.0, 5.0, 20.0]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCalibration(_)));
        let err = EnergyCalibration::lower_channel_energy(3, &[0.0, 10.0]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCalibration(_)));
        Ok(())
    }

    #[test_log::test]
    fn test_invalid_calibrations() {
        assert!(EnergyCalibration::polynomial(&[0.0, 3.0], 0, &[]).is_err());
        assert!(EnergyCalibration::polynomial(&[5.0], 16, &[]).is_err());
        assert!(EnergyCalibration::polynomial(&[0.0, -3.0], 16, &[]).is_err());
        assert!(EnergyCalibration::polynomial(&[0.0, 3.0], 16, &[(500.0, 1.0), (100.0, 2.0)]).is_err());
    }

    #[test_log::test]
    fn test_equality_by_value() -> SpecResult<()> {
        let a = EnergyCalibration::polynomial(&[0.0, 3.0], 1024, &[])?;
        let b = EnergyCalibration::polynomial(&[0.0, 3.0, 0.0], 1024, &[])?;
        let c = EnergyCalibration::polynomial(&[0.0, 3.0], 512, &[])?;
        let d = EnergyCalibration::full_range_fraction(&[0.0, 3072.0], 1024, &[])?;
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
        assert!(!a.is_compatible(&d));
        let converted = d.to_polynomial()?;
        assert_eq!(converted, a);
        assert_eq!(a.to_full_range_fraction()?, d);
        Ok(())
    }

    #[test_log::test]
    fn test_options() -> SpecResult<()> {
        let opts = CalibrationOptions::new(EnergyCalType::FullRangeFraction, vec![0.0, 3000.0], 10)
            .with_deviation_pairs(vec![(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)]);
        let cal: EnergyCalibration = opts.clone().try_into()?;
        assert_eq!(cal.kind(), EnergyCalType::FullRangeFraction);
        assert_eq!(cal.deviation_pairs().len(), 3);
        let lce = CalibrationOptions::new(EnergyCalType::LowerChannelEdge, vec![0.0, 1.0, 2.0], 2)
            .with_deviation_pairs(vec![(1.0, 0.1)]);
        assert!(lce.build().is_err());
        Ok(())
    }
}
