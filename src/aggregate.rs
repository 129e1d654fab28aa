use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::models::{
    AtRiskStudent, Category, CohortComparison, CohortTrend, DashboardStats,
    PerformanceDistribution, PredictionRecord, StudentRecord,
};
use crate::risk::{AT_RISK_LISTING_THRESHOLD, AT_RISK_THRESHOLD};

/// Latest prediction per student, built once per report.
pub struct PredictionIndex<'a> {
    latest: HashMap<Uuid, &'a PredictionRecord>,
}

impl<'a> PredictionIndex<'a> {
    /// The newest `created_at` wins; on equal timestamps the record later
    /// in `predictions` wins.
    pub fn latest(predictions: &'a [PredictionRecord]) -> Self {
        let mut latest: HashMap<Uuid, &'a PredictionRecord> = HashMap::new();

        for prediction in predictions {
            latest
                .entry(prediction.student_id)
                .and_modify(|current| {
                    if prediction.created_at >= current.created_at {
                        *current = prediction;
                    }
                })
                .or_insert(prediction);
        }

        Self { latest }
    }

    pub fn get(&self, student_id: &Uuid) -> Option<&'a PredictionRecord> {
        self.latest.get(student_id).copied()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }
}

#[derive(Default)]
struct CohortTotals {
    students: usize,
    gpa: f64,
    attendance: f64,
    distribution: PerformanceDistribution,
}

impl CohortTotals {
    fn mean(&self, total: f64) -> f64 {
        if self.students == 0 {
            0.0
        } else {
            total / self.students as f64
        }
    }
}

fn group_by_year(
    students: &[StudentRecord],
    index: &PredictionIndex<'_>,
) -> BTreeMap<i32, CohortTotals> {
    let mut cohorts: BTreeMap<i32, CohortTotals> = BTreeMap::new();

    for student in students {
        let entry = cohorts.entry(student.enrollment_year).or_default();
        entry.students += 1;
        entry.gpa += student.attributes.previous_gpa;
        entry.attendance += student.attributes.attendance_percentage;

        if let Some(prediction) = index.get(&student.id) {
            entry.distribution.record(prediction.category);
        }
    }

    cohorts
}

pub fn performance_trends(
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
) -> Vec<CohortTrend> {
    let index = PredictionIndex::latest(predictions);

    group_by_year(students, &index)
        .into_iter()
        .map(|(year, totals)| CohortTrend {
            year,
            average_gpa: round_to(totals.mean(totals.gpa), 2),
            attendance_rate: round_to(totals.mean(totals.attendance), 1),
            total_students: totals.students,
            performance_distribution: totals.distribution,
        })
        .collect()
}

pub fn at_risk_students(
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
) -> Vec<AtRiskStudent> {
    let index = PredictionIndex::latest(predictions);

    let mut rows: Vec<AtRiskStudent> = students
        .iter()
        .filter_map(|student| {
            let prediction = index.get(&student.id)?;
            if prediction.risk_score < AT_RISK_LISTING_THRESHOLD {
                return None;
            }
            Some(AtRiskStudent {
                student_id: student.id,
                name: student.name.clone(),
                email: student.email.clone(),
                risk_score: prediction.risk_score,
                category: prediction.category,
                gpa: student.attributes.previous_gpa,
                attendance_percentage: student.attributes.attendance_percentage,
                recommendations: prediction.recommendations.clone(),
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

/// The `limit` highest-risk rows of [`at_risk_students`].
pub fn top_at_risk(
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
    limit: usize,
) -> Vec<AtRiskStudent> {
    let mut rows = at_risk_students(students, predictions);
    rows.truncate(limit);
    rows
}

pub fn graduation_rate(distribution: &PerformanceDistribution, total_students: usize) -> f64 {
    if total_students == 0 {
        return 0.0;
    }
    let on_track = (distribution.high + distribution.medium) as f64;
    let rate = 75.0 + 20.0 * on_track / total_students as f64;
    round_to(rate.min(95.0), 1)
}

pub fn cohort_comparison(
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
) -> Vec<CohortComparison> {
    let index = PredictionIndex::latest(predictions);

    group_by_year(students, &index)
        .into_iter()
        .map(|(year, totals)| CohortComparison {
            cohort: year.to_string(),
            average_gpa: round_to(totals.mean(totals.gpa), 2),
            graduation_rate: graduation_rate(&totals.distribution, totals.students),
            total_students: totals.students,
            performance_distribution: totals.distribution,
        })
        .collect()
}

pub fn dashboard_stats(
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
) -> DashboardStats {
    let index = PredictionIndex::latest(predictions);
    let mut stats = DashboardStats {
        total_students: students.len(),
        ..DashboardStats::default()
    };
    let mut risk_total = 0.0;

    for prediction in students.iter().filter_map(|s| index.get(&s.id)) {
        stats.students_with_predictions += 1;
        risk_total += prediction.risk_score;
        if prediction.risk_score >= AT_RISK_THRESHOLD {
            stats.at_risk_students += 1;
        }
        if prediction.category == Category::High {
            stats.high_performers += 1;
        }
    }

    if stats.students_with_predictions > 0 {
        stats.average_risk_score =
            round_to(risk_total / stats.students_with_predictions as f64, 2);
    }
    stats
}

/// Rounds the exact stored value to `places` decimals. Exact ties go to
/// the even digit.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::models::{PerformanceInputs, SocioFactors};

    fn student(year: i32, gpa: f64, attendance: f64) -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            name: format!("Student {year}"),
            email: format!("{}@university.edu", Uuid::new_v4()),
            enrollment_year: year,
            major: "Computer Science".to_string(),
            attributes: PerformanceInputs {
                attendance_percentage: attendance,
                internal_marks: 70.0,
                assignment_scores: 70.0,
                lab_performance: 70.0,
                previous_gpa: gpa,
                study_hours: 20.0,
                participation_metrics: 75.0,
            },
            socio_academic_factors: SocioFactors::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn prediction(student: &StudentRecord, category: Category, risk_score: f64) -> PredictionRecord {
        PredictionRecord {
            id: Uuid::new_v4(),
            student_id: student.id,
            category,
            risk_score,
            recommendations: vec!["Schedule a meeting".to_string()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_input_yields_empty_reports() {
        assert!(performance_trends(&[], &[]).is_empty());
        assert!(at_risk_students(&[], &[]).is_empty());
        assert!(cohort_comparison(&[], &[]).is_empty());
        assert_eq!(dashboard_stats(&[], &[]), DashboardStats::default());
    }

    #[test]
    fn trends_average_per_year() {
        let students = vec![student(2022, 3.2, 85.5), student(2022, 3.6, 92.0)];
        let predictions = vec![
            prediction(&students[0], Category::Medium, 0.4),
            prediction(&students[1], Category::High, 0.1),
        ];

        let trends = performance_trends(&students, &predictions);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].year, 2022);
        assert_eq!(trends[0].average_gpa, 3.4);
        assert_eq!(trends[0].attendance_rate, 88.8);
        assert_eq!(trends[0].total_students, 2);
        assert_eq!(
            trends[0].performance_distribution,
            PerformanceDistribution {
                high: 1,
                medium: 1,
                low: 0
            }
        );
    }

    #[test]
    fn trends_are_sorted_by_year_and_count_only_matched_predictions() {
        let students = vec![
            student(2024, 3.0, 80.0),
            student(2021, 2.0, 70.0),
            student(2023, 3.5, 90.0),
        ];
        let predictions = vec![prediction(&students[1], Category::Low, 0.8)];

        let trends = performance_trends(&students, &predictions);
        let years: Vec<i32> = trends.iter().map(|t| t.year).collect();
        assert_eq!(years, vec![2021, 2023, 2024]);
        assert_eq!(trends[0].performance_distribution.low, 1);
        assert_eq!(
            trends[2].performance_distribution,
            PerformanceDistribution::default()
        );
    }

    #[test]
    fn latest_prediction_wins() {
        let students = vec![student(2022, 2.0, 60.0)];
        let mut old = prediction(&students[0], Category::Low, 0.8);
        old.created_at = Utc::now() - Duration::days(10);
        let new = prediction(&students[0], Category::Medium, 0.4);

        // Order in the input must not matter.
        let predictions = vec![new.clone(), old];
        let index = PredictionIndex::latest(&predictions);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&students[0].id).map(|p| p.id), Some(new.id));
        assert!(at_risk_students(&students, &predictions).is_empty());
    }

    #[test]
    fn equal_timestamps_prefer_later_record() {
        let students = vec![student(2022, 2.0, 60.0)];
        let first = prediction(&students[0], Category::Low, 0.8);
        let mut second = prediction(&students[0], Category::Medium, 0.4);
        second.created_at = first.created_at;

        let predictions = vec![first, second.clone()];
        let index = PredictionIndex::latest(&predictions);
        assert_eq!(index.get(&students[0].id).map(|p| p.id), Some(second.id));
    }

    #[test]
    fn at_risk_threshold_is_inclusive_and_sorted() {
        let students = vec![
            student(2022, 2.0, 60.0),
            student(2022, 2.1, 61.0),
            student(2023, 1.5, 40.0),
            student(2023, 1.8, 50.0),
        ];
        let predictions = vec![
            prediction(&students[0], Category::Medium, 0.69),
            prediction(&students[1], Category::Low, 0.70),
            prediction(&students[2], Category::Low, 0.8),
            prediction(&students[3], Category::Low, 0.8),
        ];

        let rows = at_risk_students(&students, &predictions);
        let ids: Vec<Uuid> = rows.iter().map(|r| r.student_id).collect();
        assert_eq!(ids, vec![students[2].id, students[3].id, students[1].id]);
        assert_eq!(rows[2].risk_score, 0.70);
        assert_eq!(rows[0].recommendations, vec!["Schedule a meeting"]);
    }

    #[test]
    fn top_at_risk_keeps_highest_scores() {
        let students = vec![
            student(2022, 2.0, 60.0),
            student(2022, 1.5, 40.0),
            student(2023, 1.8, 50.0),
        ];
        let predictions = vec![
            prediction(&students[0], Category::Low, 0.7),
            prediction(&students[1], Category::Low, 0.9),
            prediction(&students[2], Category::Low, 0.8),
        ];

        let rows = top_at_risk(&students, &predictions, 2);
        let ids: Vec<Uuid> = rows.iter().map(|r| r.student_id).collect();
        assert_eq!(ids, vec![students[1].id, students[2].id]);
        assert!(top_at_risk(&students, &predictions, 0).is_empty());
        assert_eq!(top_at_risk(&students, &predictions, 10).len(), 3);
    }

    #[test]
    fn graduation_rate_matches_heuristic() {
        let students: Vec<StudentRecord> = (0..10).map(|_| student(2021, 3.0, 85.0)).collect();
        let categories = [
            Category::High,
            Category::High,
            Category::High,
            Category::High,
            Category::Medium,
            Category::Medium,
            Category::Medium,
            Category::Low,
            Category::Low,
            Category::Low,
        ];
        let predictions: Vec<PredictionRecord> = students
            .iter()
            .zip(categories)
            .map(|(s, c)| prediction(s, c, 0.4))
            .collect();

        let comparison = cohort_comparison(&students, &predictions);
        assert_eq!(comparison.len(), 1);
        assert_eq!(comparison[0].cohort, "2021");
        assert_eq!(comparison[0].graduation_rate, 89.0);
        assert_eq!(comparison[0].average_gpa, 3.0);
        assert_eq!(comparison[0].total_students, 10);
    }

    #[test]
    fn graduation_rate_is_capped_and_zero_safe() {
        let all_high = PerformanceDistribution {
            high: 4,
            medium: 0,
            low: 0,
        };
        assert_eq!(graduation_rate(&all_high, 4), 95.0);
        assert_eq!(graduation_rate(&PerformanceDistribution::default(), 0), 0.0);
        assert_eq!(graduation_rate(&PerformanceDistribution::default(), 3), 75.0);
    }

    #[test]
    fn dashboard_counts_latest_predictions() {
        let students = vec![
            student(2022, 3.8, 95.0),
            student(2022, 2.0, 60.0),
            student(2023, 3.0, 80.0),
        ];
        let predictions = vec![
            prediction(&students[0], Category::High, 0.1),
            prediction(&students[1], Category::Low, 0.8),
        ];

        let stats = dashboard_stats(&students, &predictions);
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.students_with_predictions, 2);
        assert_eq!(stats.at_risk_students, 1);
        assert_eq!(stats.high_performers, 1);
        assert_eq!(stats.average_risk_score, 0.45);
    }

    #[test]
    fn rounding_follows_stored_decimal_value() {
        assert_eq!(round_to(88.75, 1), 88.8);
        assert_eq!(round_to(3.4000000000000004, 2), 3.4);
        assert_eq!(round_to(2.0 / 3.0, 2), 0.67);
        // 1.115 is stored as 1.11499999...
        assert_eq!(round_to(1.115, 2), 1.11);
    }

    #[test]
    fn average_gpa_just_below_midpoint_rounds_down() {
        let students = vec![student(2024, 1.0, 70.0), student(2024, 1.09, 70.0)];
        let trends = performance_trends(&students, &[]);
        assert_eq!(trends[0].average_gpa, 1.04);

        let comparison = cohort_comparison(&students, &[]);
        assert_eq!(comparison[0].average_gpa, 1.04);
    }
}
