use crate::error::{SpecError, SpecResult};

/// A piecewise-linear energy offset built from deviation pairs.
///
/// Each knot is `(uncorrected energy, offset)`. The corrected energy for an uncorrected
/// energy `e` is `e + offset(e)`, where the offset is linearly interpolated between the
/// neighboring knots and held constant beyond the first and last knot. When the first
/// pair lies above zero, an implicit `(0, 0)` knot anchors the curve at the origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviationCorrection {
    knots: Vec<(f64, f64)>,
}

impl DeviationCorrection {
    pub fn new(pairs: &[(f32, f32)]) -> SpecResult<Self> {
        if pairs.is_empty() {
            return Ok(Self::default());
        }
        for (i, w) in pairs.windows(2).enumerate() {
            if !(w[0].0 < w[1].0) {
                return Err(SpecError::InvalidCalibration(format!(
                    "deviation pairs must be sorted by strictly increasing energy, pair {} ({}) follows {}",
                    i + 1,
                    w[1].0,
                    w[0].0
                )));
            }
        }
        if pairs.iter().any(|(e, d)| !e.is_finite() || !d.is_finite()) {
            return Err(SpecError::InvalidCalibration(
                "deviation pairs must be finite".to_string(),
            ));
        }

        let mut knots = Vec::with_capacity(pairs.len() + 1);
        if pairs[0].0 > 0.0 {
            knots.push((0.0, 0.0));
        }
        knots.extend(pairs.iter().map(|(e, d)| (*e as f64, *d as f64)));

        for w in knots.windows(2) {
            if !(w[0].0 + w[0].1 < w[1].0 + w[1].1) {
                return Err(SpecError::InvalidCalibration(format!(
                    "deviation pairs at {} and {} keV would make the energy scale non-monotonic",
                    w[0].0, w[1].0
                )));
            }
        }
        Ok(Self { knots })
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    /// The offset to add to an uncorrected energy
    pub fn offset(&self, energy: f64) -> f64 {
        let knots = &self.knots;
        match knots.len() {
            0 => 0.0,
            1 => knots[0].1,
            n => {
                if energy <= knots[0].0 {
                    return knots[0].1;
                }
                if energy >= knots[n - 1].0 {
                    return knots[n - 1].1;
                }
                let i = knots.partition_point(|(e, _)| *e <= energy) - 1;
                let (x0, d0) = knots[i];
                let (x1, d1) = knots[i + 1];
                d0 + (energy - x0) * (d1 - d0) / (x1 - x0)
            }
        }
    }

    pub fn apply(&self, energy: f64) -> f64 {
        energy + self.offset(energy)
    }

    /// Map a corrected energy back to the uncorrected energy that produces it.
    ///
    /// The correction is piecewise-linear with positive slope in every segment, so this
    /// is exact rather than iterative.
    pub fn invert(&self, corrected: f64) -> f64 {
        let knots = &self.knots;
        match knots.len() {
            0 => corrected,
            1 => corrected - knots[0].1,
            n => {
                let first = knots[0].0 + knots[0].1;
                let last = knots[n - 1].0 + knots[n - 1].1;
                if corrected <= first {
                    return corrected - knots[0].1;
                }
                if corrected >= last {
                    return corrected - knots[n - 1].1;
                }
                let i = knots.partition_point(|(e, d)| *e + *d <= corrected) - 1;
                let (x0, d0) = knots[i];
                let (x1, d1) = knots[i + 1];
                let (y0, y1) = (x0 + d0, x1 + d1);
                x0 + (corrected - y0) * (x1 - x0) / (y1 - y0)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn test_anchor_and_clamp() -> SpecResult<()> {
        let dev = DeviationCorrection::new(&[(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)])?;
        assert_eq!(dev.offset(0.0), 0.0);
        assert!((dev.offset(50.0) + 5.0).abs() < 1e-9);
        assert!((dev.offset(100.0) + 10.0).abs() < 1e-9);
        assert_eq!(dev.offset(3000.0), 0.0);
        assert_eq!(dev.offset(5000.0), 0.0);
        assert_eq!(dev.offset(-20.0), 0.0);
        Ok(())
    }

    #[test_log::test]
    fn test_invert() -> SpecResult<()> {
        let dev = DeviationCorrection::new(&[(100.0, -10.0), (1460.0, 15.0), (3000.0, 0.0)])?;
        for e in [-5.0, 0.0, 12.5, 99.0, 661.7, 1460.0, 2614.5, 3000.0, 3500.0] {
            let back = dev.invert(dev.apply(e));
            assert!((back - e).abs() < 1e-9, "{e} != {back}");
        }
        Ok(())
    }

    #[test_log::test]
    fn test_unsorted_rejected() {
        let err = DeviationCorrection::new(&[(1460.0, 15.0), (100.0, -10.0)]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCalibration(_)));
        let err = DeviationCorrection::new(&[(100.0, 0.0), (110.0, -20.0)]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCalibration(_)));
    }
}
