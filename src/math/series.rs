use serde::{Deserialize, Serialize};

/// A piecewise-linear function of time, defined by samples.
/// Values before the first sample and after the last are held constant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct TimeSeries {
    /// The samples, sorted by time.
    samples: Vec<(f64, f64)>,
}

impl TimeSeries {
    /// Creates a time series from `(time, value)` samples in any order.
    pub fn new(mut samples: Vec<(f64, f64)>) -> Self {
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { samples }
    }

    /// Creates a time series with a constant value.
    pub fn constant(value: f64) -> Self {
        Self {
            samples: vec![(0.0, value)],
        }
    }

    /// Whether the series contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Evaluates the series at time `t`. An empty series evaluates to zero.
    pub fn value_at(&self, t: f64) -> f64 {
        let idx = self.samples.partition_point(|(time, _)| *time <= t);
        match (idx.checked_sub(1).map(|i| self.samples[i]), self.samples.get(idx)) {
            (None, None) => 0.0,
            (Some((_, v)), None) | (None, Some(&(_, v))) => v,
            (Some((t0, v0)), Some(&(t1, v1))) => {
                let f = (t - t0) / (t1 - t0);
                v0 + f * (v1 - v0)
            }
        }
    }
}

impl From<Vec<(f64, f64)>> for TimeSeries {
    fn from(samples: Vec<(f64, f64)>) -> Self {
        Self::new(samples)
    }
}

impl From<TimeSeries> for Vec<(f64, f64)> {
    fn from(series: TimeSeries) -> Self {
        series.samples
    }
}

#[cfg(test)]
mod test {
    use super::TimeSeries;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn interpolates_and_holds() {
        let series = TimeSeries::new(vec![(100.0, 1200.0), (0.0, 600.0), (200.0, 1200.0)]);
        assert_approx_eq!(series.value_at(-5.0), 600.0);
        assert_approx_eq!(series.value_at(0.0), 600.0);
        assert_approx_eq!(series.value_at(50.0), 900.0);
        assert_approx_eq!(series.value_at(150.0), 1200.0);
        assert_approx_eq!(series.value_at(1e6), 1200.0);
    }

    #[test]
    fn empty_series() {
        assert_eq!(TimeSeries::default().value_at(3.0), 0.0);
        assert_approx_eq!(TimeSeries::constant(7.0).value_at(3.0), 7.0);
    }
}
