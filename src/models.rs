use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseCategoryError, ValidationError};

pub type SocioFactors = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInputs {
    pub attendance_percentage: f64,
    pub internal_marks: f64,
    pub assignment_scores: f64,
    pub lab_performance: f64,
    pub previous_gpa: f64,
    pub study_hours: f64,
    pub participation_metrics: f64,
}

impl PerformanceInputs {
    /// Checks the ranges the classifier assumes. Callers run this before
    /// anything is persisted or classified.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("attendance_percentage", self.attendance_percentage),
            ("internal_marks", self.internal_marks),
            ("assignment_scores", self.assignment_scores),
            ("lab_performance", self.lab_performance),
            ("previous_gpa", self.previous_gpa),
            ("study_hours", self.study_hours),
            ("participation_metrics", self.participation_metrics),
        ];

        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ValidationError::NotFinite { field, value });
            }
            if value < 0.0 {
                return Err(ValidationError::Negative { field, value });
            }
        }

        for (field, value) in [
            ("attendance_percentage", self.attendance_percentage),
            ("participation_metrics", self.participation_metrics),
        ] {
            if value > 100.0 {
                return Err(ValidationError::OutOfPercentRange { field, value });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub enrollment_year: i32,
    pub major: String,
    #[serde(flatten)]
    pub attributes: PerformanceInputs,
    pub socio_academic_factors: SocioFactors,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub enrollment_year: i32,
    pub major: String,
    pub attributes: PerformanceInputs,
    pub socio_academic_factors: SocioFactors,
}

impl NewStudent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Blank("name"));
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::Blank("email"));
        }
        self.attributes.validate()
    }
}

/// Partial profile update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub enrollment_year: Option<i32>,
    pub major: Option<String>,
    pub attendance_percentage: Option<f64>,
    pub internal_marks: Option<f64>,
    pub assignment_scores: Option<f64>,
    pub lab_performance: Option<f64>,
    pub previous_gpa: Option<f64>,
    pub study_hours: Option<f64>,
    pub participation_metrics: Option<f64>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.enrollment_year.is_none()
            && self.major.is_none()
            && self.attendance_percentage.is_none()
            && self.internal_marks.is_none()
            && self.assignment_scores.is_none()
            && self.lab_performance.is_none()
            && self.previous_gpa.is_none()
            && self.study_hours.is_none()
            && self.participation_metrics.is_none()
    }

    /// Returns the record with the patch applied, validated as a whole.
    pub fn apply(&self, current: &StudentRecord) -> Result<StudentRecord, ValidationError> {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::Blank("name"));
            }
            next.name = name.clone();
        }
        if let Some(year) = self.enrollment_year {
            next.enrollment_year = year;
        }
        if let Some(major) = &self.major {
            next.major = major.clone();
        }

        let attrs = &mut next.attributes;
        attrs.attendance_percentage = self
            .attendance_percentage
            .unwrap_or(attrs.attendance_percentage);
        attrs.internal_marks = self.internal_marks.unwrap_or(attrs.internal_marks);
        attrs.assignment_scores = self.assignment_scores.unwrap_or(attrs.assignment_scores);
        attrs.lab_performance = self.lab_performance.unwrap_or(attrs.lab_performance);
        attrs.previous_gpa = self.previous_gpa.unwrap_or(attrs.previous_gpa);
        attrs.study_hours = self.study_hours.unwrap_or(attrs.study_hours);
        attrs.participation_metrics = self
            .participation_metrics
            .unwrap_or(attrs.participation_metrics);
        attrs.validate()?;

        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    High,
    Medium,
    Low,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::High => "High",
            Category::Medium => "Medium",
            Category::Low => "Low",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" => Ok(Category::High),
            "Medium" => Ok(Category::Medium),
            "Low" => Ok(Category::Low),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    #[serde(rename = "predicted_performance")]
    pub category: Category,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    #[serde(rename = "predicted_performance")]
    pub category: Category,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
    pub feature_importance: BTreeMap<&'static str, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PerformanceDistribution {
    pub fn record(&mut self, category: Category) {
        match category {
            Category::High => self.high += 1,
            Category::Medium => self.medium += 1,
            Category::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortTrend {
    pub year: i32,
    pub average_gpa: f64,
    pub attendance_rate: f64,
    pub total_students: usize,
    pub performance_distribution: PerformanceDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtRiskStudent {
    pub student_id: Uuid,
    pub name: String,
    pub email: String,
    pub risk_score: f64,
    #[serde(rename = "predicted_performance")]
    pub category: Category,
    pub gpa: f64,
    pub attendance_percentage: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortComparison {
    pub cohort: String,
    pub average_gpa: f64,
    pub graduation_rate: f64,
    pub total_students: usize,
    pub performance_distribution: PerformanceDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_students: usize,
    pub students_with_predictions: usize,
    pub at_risk_students: usize,
    pub high_performers: usize,
    pub average_risk_score: f64,
}
