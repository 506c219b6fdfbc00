use crate::calibration::energy::EnergyCalibration;
use crate::error::{SpecError, SpecResult};

/// Cumulative counts as a function of energy, treating the counts of each channel as
/// uniformly spread over the channel's energy width.
struct CumulativeCounts<'a> {
    edges: &'a [f64],
    cumulative: Vec<f64>,
}

impl<'a> CumulativeCounts<'a> {
    fn new(counts: &[f32], edges: &'a [f64]) -> Self {
        let mut cumulative = Vec::with_capacity(counts.len() + 1);
        let mut acc = 0.0f64;
        cumulative.push(acc);
        for c in counts {
            acc += *c as f64;
            cumulative.push(acc);
        }
        Self { edges, cumulative }
    }

    fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    fn at(&self, energy: f64) -> f64 {
        let edges = self.edges;
        let n = edges.len() - 1;
        if energy <= edges[0] {
            return 0.0;
        }
        if energy >= edges[n] {
            return self.total();
        }
        let i = edges.partition_point(|e| *e <= energy) - 1;
        let frac = (energy - edges[i]) / (edges[i + 1] - edges[i]);
        self.cumulative[i] + frac * (self.cumulative[i + 1] - self.cumulative[i])
    }
}

/// Resample `counts`, calibrated by `from`, onto the channels of `to`.
///
/// Each target channel receives the counts of the source spectrum that fall within its
/// energy range, with source channels contributing in proportion to their overlap. Counts
/// below the first target channel are added to it and counts above the last target channel
/// are added to that one, so the total number of counts is preserved.
pub fn rebin(
    counts: &[f32],
    from: &EnergyCalibration,
    to: &EnergyCalibration,
) -> SpecResult<Vec<f32>> {
    if counts.len() != from.num_channels() {
        return Err(SpecError::DimensionMismatch {
            expected: from.num_channels(),
            actual: counts.len(),
        });
    }
    if from.is_compatible(to) {
        return Ok(counts.to_vec());
    }
    let source = CumulativeCounts::new(counts, from.channel_energies());
    let target_edges = to.channel_energies();
    let m = to.num_channels();

    let mut result = Vec::with_capacity(m);
    let mut previous = 0.0;
    for k in 0..m {
        let upper = if k + 1 == m {
            source.total()
        } else {
            source.at(target_edges[k + 1])
        };
        result.push((upper - previous) as f32);
        previous = upper;
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_rebin_conserves_counts() -> SpecResult<()> {
        let from = EnergyCalibration::polynomial(&[0.0, 10.0], 8, &[])?;
        let to = EnergyCalibration::polynomial(&[5.0, 20.0], 4, &[])?;
        let counts = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let rebinned = rebin(&counts, &from, &to)?;
        assert_eq!(rebinned.len(), 4);
        // target channel 0 spans [5, 25): everything below 25 keV lands in it
        assert!((rebinned[0] - (1.0 + 2.0 + 1.5)).abs() < 1e-6);
        assert!((rebinned[1] - (1.5 + 4.0 + 2.5)).abs() < 1e-6);
        let total: f32 = rebinned.iter().sum();
        assert!((total - 36.0).abs() < 1e-5);
        Ok(())
    }

    #[test_log::test]
    fn test_rebin_identity() -> SpecResult<()> {
        let cal = EnergyCalibration::full_range_fraction(&[0.0, 3000.0], 4, &[])?;
        let counts = [1.5, 0.0, 2.0, 7.0];
        assert_eq!(rebin(&counts, &cal, &cal)?, counts.to_vec());
        assert!(rebin(&counts[..3], &cal, &cal).is_err());
        Ok(())
    }
}
