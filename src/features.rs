use crate::models::PerformanceInputs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFeatures {
    pub composite_score: f64,
    pub engagement_index: f64,
}

pub fn derive_features(inputs: &PerformanceInputs) -> DerivedFeatures {
    DerivedFeatures {
        composite_score: (inputs.internal_marks + inputs.assignment_scores + inputs.lab_performance)
            / 3.0,
        engagement_index: inputs.attendance_percentage * inputs.participation_metrics / 100.0,
    }
}
