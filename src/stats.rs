//! Sample statistics for current readings.

/// Arithmetic mean of a sample set.
///
/// Returns `NaN` for an empty slice; callers record statistics only for
/// non-empty blocks.
pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation around a known mean.
pub fn stdev(samples: &[f64], mean: f64) -> f64 {
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_uniform_samples() {
        let samples = [2.0, 2.0, 2.0, 2.0];
        assert_eq!(mean(&samples), 2.0);
        assert_eq!(stdev(&samples, 2.0), 0.0);
    }

    #[test]
    fn stdev_of_symmetric_spread() {
        let samples = [1.0, 3.0];
        let m = mean(&samples);
        assert_eq!(m, 2.0);
        assert_eq!(stdev(&samples, m), 1.0);
    }

    #[test]
    fn stdev_matches_population_formula() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&samples);
        assert_eq!(m, 5.0);
        assert!((stdev(&samples, m) - 2.0).abs() < 1e-12);
    }
}
