use std::fmt::Write;

use chrono::NaiveDate;

use crate::aggregate;
use crate::models::{PredictionRecord, StudentRecord};
use crate::risk;

pub fn build_report(
    scope: Option<&str>,
    generated_on: NaiveDate,
    students: &[StudentRecord],
    predictions: &[PredictionRecord],
) -> String {
    let stats = aggregate::dashboard_stats(students, predictions);
    let trends = aggregate::performance_trends(students, predictions);
    let comparison = aggregate::cohort_comparison(students, predictions);
    let at_risk = aggregate::top_at_risk(students, predictions, 10);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all cohorts");

    let _ = writeln!(output, "# Student Performance Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Students: {}", stats.total_students);
    let _ = writeln!(
        output,
        "- With predictions: {}",
        stats.students_with_predictions
    );
    let _ = writeln!(output, "- At risk: {}", stats.at_risk_students);
    let _ = writeln!(output, "- High performers: {}", stats.high_performers);
    let _ = writeln!(
        output,
        "- Average risk score: {:.2}",
        stats.average_risk_score
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Trends");

    if trends.is_empty() {
        let _ = writeln!(output, "No students recorded.");
    } else {
        for trend in trends.iter() {
            let dist = &trend.performance_distribution;
            let _ = writeln!(
                output,
                "- {}: {} students, avg GPA {:.2}, attendance {:.1}% (high {}, medium {}, low {})",
                trend.year,
                trend.total_students,
                trend.average_gpa,
                trend.attendance_rate,
                dist.high,
                dist.medium,
                dist.low
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Comparison");

    if comparison.is_empty() {
        let _ = writeln!(output, "No cohorts recorded.");
    } else {
        for cohort in comparison.iter() {
            let _ = writeln!(
                output,
                "- {}: avg GPA {:.2}, estimated graduation rate {:.1}%",
                cohort.cohort, cohort.average_gpa, cohort.graduation_rate
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Students");

    if at_risk.is_empty() {
        let _ = writeln!(output, "No at-risk students recorded.");
    } else {
        for row in at_risk.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) risk {:.2} [{}], GPA {:.2}, attendance {:.1}%",
                row.name,
                row.email,
                row.risk_score,
                risk::risk_level(row.risk_score).label(),
                row.gpa,
                row.attendance_percentage
            );
            if let Some(first) = row.recommendations.first() {
                let _ = writeln!(output, "  - {}", first);
            }
        }
    }

    output
}
