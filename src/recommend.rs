use crate::models::{Category, PerformanceInputs};

pub const IMPROVE_ATTENDANCE: &str = "Improve attendance by attending all classes regularly.";
pub const INCREASE_STUDY_HOURS: &str = "Increase study hours to at least 20 hours per week.";
pub const FOCUS_CORE_SUBJECTS: &str = "Focus on improving grades in core subjects.";
pub const MEET_ADVISOR: &str = "Schedule a meeting with academic advisor for personalized guidance.";
pub const MAINTAIN_HABITS: &str = "Maintain current study habits and attendance.";
pub const JOIN_STUDY_GROUPS: &str = "Consider joining study groups for peer learning.";
pub const EXCELLENT: &str = "Excellent performance! Keep up the good work.";
pub const LEADERSHIP: &str = "Consider leadership roles or advanced courses.";

/// Advisory lines for a classification. Order is part of the output contract.
pub fn recommendations(category: Category, inputs: &PerformanceInputs) -> Vec<String> {
    let lines: Vec<&str> = match category {
        Category::Low => {
            let mut lines = Vec::with_capacity(4);
            if inputs.attendance_percentage < 75.0 {
                lines.push(IMPROVE_ATTENDANCE);
            }
            if inputs.study_hours < 20.0 {
                lines.push(INCREASE_STUDY_HOURS);
            }
            if inputs.previous_gpa < 3.0 {
                lines.push(FOCUS_CORE_SUBJECTS);
            }
            lines.push(MEET_ADVISOR);
            lines
        }
        Category::Medium => vec![MAINTAIN_HABITS, JOIN_STUDY_GROUPS],
        Category::High => vec![EXCELLENT, LEADERSHIP],
    };

    lines.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn struggling() -> PerformanceInputs {
        PerformanceInputs {
            attendance_percentage: 60.0,
            internal_marks: 50.0,
            assignment_scores: 55.0,
            lab_performance: 52.0,
            previous_gpa: 2.1,
            study_hours: 8.0,
            participation_metrics: 40.0,
        }
    }

    #[test]
    fn low_emits_every_triggered_guard_in_order() {
        let lines = recommendations(Category::Low, &struggling());
        assert_eq!(
            lines,
            vec![
                IMPROVE_ATTENDANCE,
                INCREASE_STUDY_HOURS,
                FOCUS_CORE_SUBJECTS,
                MEET_ADVISOR
            ]
        );
    }

    #[test]
    fn low_always_ends_with_advisor_meeting() {
        let mut inputs = struggling();
        inputs.attendance_percentage = 75.0;
        inputs.study_hours = 20.0;
        inputs.previous_gpa = 3.0;

        assert_eq!(recommendations(Category::Low, &inputs), vec![MEET_ADVISOR]);

        inputs.study_hours = 19.5;
        assert_eq!(
            recommendations(Category::Low, &inputs),
            vec![INCREASE_STUDY_HOURS, MEET_ADVISOR]
        );
    }

    #[test]
    fn medium_and_high_are_fixed() {
        let inputs = struggling();
        assert_eq!(
            recommendations(Category::Medium, &inputs),
            vec![MAINTAIN_HABITS, JOIN_STUDY_GROUPS]
        );
        assert_eq!(
            recommendations(Category::High, &inputs),
            vec![
                "Excellent performance! Keep up the good work.",
                "Consider leadership roles or advanced courses."
            ]
        );
        assert_eq!(
            recommendations(Category::High, &inputs),
            recommendations(Category::High, &inputs)
        );
    }
}
