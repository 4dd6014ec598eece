// Heuristic window scorer
// Stands in for a trained model: fast, high-frequency activity relative to a
// window's own amplitude scores high.

use neurogram_core::Oracle;

/// Configuration for the logistic mapping from feature to probability
#[derive(Debug, Clone)]
pub struct LineLengthConfig {
    /// Normalized line length at which the score is 0.5
    pub midpoint: f64,
    /// Slope of the logistic curve
    pub steepness: f64,
}

impl Default for LineLengthConfig {
    fn default() -> Self {
        Self {
            midpoint: 1.0,
            steepness: 6.0,
        }
    }
}

/// Scores windows by normalized line length.
///
/// For each channel the mean absolute first difference is divided by the
/// channel's standard deviation; channels without variance are ignored. The
/// channel average goes through a logistic curve.
#[derive(Debug, Clone, Default)]
pub struct LineLengthOracle {
    config: LineLengthConfig,
}

impl LineLengthOracle {
    pub fn with_config(config: LineLengthConfig) -> Self {
        Self { config }
    }

    fn channel_feature(samples: &[f64]) -> Option<f64> {
        if samples.len() < 2 {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        if !(std > f64::EPSILON) {
            return None;
        }

        let line_length = samples
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .sum::<f64>()
            / (n - 1.0);

        Some(line_length / std)
    }
}

impl Oracle for LineLengthOracle {
    fn score(&self, window: &[Vec<f64>]) -> f64 {
        let features: Vec<f64> = window
            .iter()
            .filter_map(|channel| Self::channel_feature(channel))
            .collect();
        if features.is_empty() {
            return 0.0;
        }

        let feature = features.iter().sum::<f64>() / features.len() as f64;
        1.0 / (1.0 + (-self.config.steepness * (feature - self.config.midpoint)).exp())
    }
}
