use std::collections::BTreeMap;

use clap::ValueEnum;

use crate::features::{derive_features, DerivedFeatures};
use crate::models::{Category, PerformanceInputs, PredictionResult};
use crate::recommend::recommendations;

/// Reports treat a prediction at or above this score as at risk.
pub const AT_RISK_THRESHOLD: f64 = 0.6;
/// Cut-off for the at-risk listing.
pub const AT_RISK_LISTING_THRESHOLD: f64 = 0.7;
pub const CRITICAL_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ClassifierPolicy {
    /// Fixed GPA, attendance and composite thresholds.
    #[default]
    Threshold,
    /// Weighted sum of all attributes, bucketed at 85 and 70.
    WeightedSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Critical,
    AtRisk,
    Stable,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::AtRisk => "at risk",
            RiskLevel::Stable => "stable",
        }
    }
}

pub fn risk_level(risk_score: f64) -> RiskLevel {
    if risk_score >= CRITICAL_THRESHOLD {
        RiskLevel::Critical
    } else if risk_score >= AT_RISK_THRESHOLD {
        RiskLevel::AtRisk
    } else {
        RiskLevel::Stable
    }
}

pub fn classify(inputs: &PerformanceInputs, policy: ClassifierPolicy) -> PredictionResult {
    let (category, risk_score) = match policy {
        ClassifierPolicy::Threshold => threshold_bucket(inputs, &derive_features(inputs)),
        ClassifierPolicy::WeightedSum => weighted_bucket(weighted_score(inputs)),
    };

    PredictionResult {
        category,
        risk_score,
        recommendations: recommendations(category, inputs),
        feature_importance: feature_importance(policy),
    }
}

fn threshold_bucket(inputs: &PerformanceInputs, features: &DerivedFeatures) -> (Category, f64) {
    let gpa = inputs.previous_gpa;
    let attendance = inputs.attendance_percentage;
    let composite = features.composite_score;

    if gpa >= 3.5 && attendance >= 90.0 && composite >= 80.0 {
        (Category::High, 0.1)
    } else if gpa >= 2.5 && attendance >= 75.0 && composite >= 60.0 {
        (Category::Medium, 0.4)
    } else {
        (Category::Low, 0.8)
    }
}

pub fn weighted_score(inputs: &PerformanceInputs) -> f64 {
    inputs.attendance_percentage * 0.2
        + inputs.internal_marks * 0.2
        + inputs.assignment_scores * 0.15
        + inputs.lab_performance * 0.15
        + inputs.previous_gpa * 20.0
        + inputs.study_hours * 0.5
        + inputs.participation_metrics * 0.1
}

// Risk is the Low-class share of each bucket's fixed distribution.
fn weighted_bucket(score: f64) -> (Category, f64) {
    if score >= 85.0 {
        (Category::High, 0.1)
    } else if score >= 70.0 {
        (Category::Medium, 0.2)
    } else {
        (Category::Low, 0.7)
    }
}

fn feature_importance(policy: ClassifierPolicy) -> BTreeMap<&'static str, f64> {
    let weights: &[(&'static str, f64)] = match policy {
        ClassifierPolicy::Threshold => &[
            ("previous_gpa", 0.35),
            ("attendance_percentage", 0.28),
            ("study_hours", 0.18),
            ("composite_score", 0.12),
            ("participation_metrics", 0.07),
        ],
        ClassifierPolicy::WeightedSum => &[
            ("attendance_percentage", 0.2),
            ("internal_marks", 0.2),
            ("assignment_scores", 0.15),
            ("lab_performance", 0.15),
            ("previous_gpa", 0.25),
            ("study_hours", 0.05),
            ("participation_metrics", 0.1),
        ],
    };

    weights.iter().copied().collect()
}
