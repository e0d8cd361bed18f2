use crate::sampler::LogitsFilter;

/// Scales all logits by dividing by a temperature value.
///
/// Higher temperatures produce more uniform distributions (more random),
/// while lower temperatures sharpen the distribution (more deterministic).
pub struct TemperatureFilter {
    temperature: f32,
}

impl TemperatureFilter {
    /// Create a new temperature filter with the given temperature.
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl LogitsFilter for TemperatureFilter {
    fn name(&self) -> &str {
        "temperature"
    }

    fn apply(&self, row: &mut [f32]) {
        if self.temperature == 1.0 {
            return;
        }
        for logit in row.iter_mut() {
            *logit /= self.temperature;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scales_logits() {
        let mut row = vec![-1.2, 0.0, 2.8];
        TemperatureFilter::new(1.4).apply(&mut row);
        assert_relative_eq!(row[0], -0.857_142_9, epsilon = 1e-6);
        assert_eq!(row[1], 0.0);
        assert_relative_eq!(row[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unit_temperature_is_identity() {
        let mut row = vec![0.3, -7.0];
        TemperatureFilter::new(1.0).apply(&mut row);
        assert_eq!(row, vec![0.3, -7.0]);
    }
}
