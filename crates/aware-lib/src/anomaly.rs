//! Anomaly detection over metric time series
//!
//! The detector is a replaceable black box: given one metric's sample
//! series it returns the indices it considers anomalous. The default
//! implementation flags samples deviating from the series mean by more
//! than a configurable number of standard deviations.

/// Minimum samples required before detection is attempted
pub const MIN_SAMPLES: usize = 10;

/// Per-metric anomaly detection over an ordered sample series
pub trait AnomalyDetector: Send + Sync {
    /// Indices of anomalous samples in `series`, ascending
    fn detect(&self, series: &[f64]) -> Vec<usize>;
}

/// Standard-deviation based detector
pub struct ThreeSigmaDetector {
    /// Number of standard deviations beyond which a sample is anomalous
    pub std_dev_threshold: f64,
}

impl ThreeSigmaDetector {
    pub fn new(std_dev_threshold: f64) -> Self {
        Self { std_dev_threshold }
    }
}

impl Default for ThreeSigmaDetector {
    fn default() -> Self {
        Self { std_dev_threshold: 3.0 }
    }
}

impl AnomalyDetector for ThreeSigmaDetector {
    fn detect(&self, series: &[f64]) -> Vec<usize> {
        if series.len() < MIN_SAMPLES {
            return Vec::new();
        }

        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev < f64::EPSILON {
            return Vec::new();
        }

        series
            .iter()
            .enumerate()
            .filter(|(_, v)| ((*v - mean) / std_dev).abs() > self.std_dev_threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_series_skipped() {
        let detector = ThreeSigmaDetector::default();
        assert!(detector.detect(&[1.0; 5]).is_empty());
    }

    #[test]
    fn test_constant_series_has_no_anomalies() {
        let detector = ThreeSigmaDetector::default();
        assert!(detector.detect(&[7.0; 20]).is_empty());
    }

    #[test]
    fn test_outlier_is_flagged() {
        let mut series: Vec<f64> = (0..30).map(|i| 10.0 + (i % 3) as f64 * 0.1).collect();
        series[17] = 500.0;

        let detector = ThreeSigmaDetector::new(3.0);
        let anomalies = detector.detect(&series);
        assert_eq!(anomalies, vec![17]);
    }

    #[test]
    fn test_threshold_controls_sensitivity() {
        let mut series: Vec<f64> = (0..30).map(|i| 10.0 + (i % 5) as f64).collect();
        series[9] = 25.0;

        let strict = ThreeSigmaDetector::new(1.5);
        let lenient = ThreeSigmaDetector::new(6.0);
        assert!(strict.detect(&series).contains(&9));
        assert!(lenient.detect(&series).is_empty());
    }
}
