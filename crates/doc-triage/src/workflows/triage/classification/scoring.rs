use super::super::domain::Classification;

/// Inclusive confidence range a classification may report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBand {
    pub min: f32,
    pub max: f32,
}

impl ConfidenceBand {
    pub const fn for_classification(classification: Classification) -> Self {
        match classification {
            Classification::Approved => Self { min: 0.9, max: 1.0 },
            Classification::NonBlockingPending => Self { min: 0.5, max: 0.89 },
            Classification::BlockingPending => Self { min: 0.0, max: 0.49 },
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Valid-to-total ratio, weighted and clamped into the band of the verdict.
pub(crate) fn confidence(valid: usize, total: usize, classification: Classification) -> f32 {
    let ratio = if total == 0 {
        0.0
    } else {
        valid as f32 / total as f32
    };

    let weighted = match classification {
        Classification::Approved => ratio,
        Classification::NonBlockingPending => ratio * 0.8,
        Classification::BlockingPending => ratio * 0.6,
    };

    let band = ConfidenceBand::for_classification(classification);
    weighted.clamp(band.min, band.max)
}
