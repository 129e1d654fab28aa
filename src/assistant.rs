//! Question answering over student data, backed by an Ollama server.
//!
//! Intent detection and context building are local and synchronous; only
//! the generation call leaves the process.

use std::fmt::Write;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::error::AssistantError;
use crate::models::{PredictionRecord, StudentRecord};

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub base_url: String,
    pub model: String,
    /// How long a reachability probe result is trusted.
    pub availability_ttl: Duration,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "phi3:3.8b".to_string(),
            availability_ttl: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Student,
    Admin,
    Risk,
    Recommend,
    General,
}

pub fn analyze_intent(message: &str) -> Intent {
    let message = message.to_lowercase();
    let words: Vec<&str> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = |needle: &str| words.iter().any(|w| *w == needle);

    if has_word("my") || has_word("me") {
        Intent::Student
    } else if ["how many", "total", "average", "overall"]
        .iter()
        .any(|phrase| message.contains(phrase))
    {
        Intent::Admin
    } else if message.contains("risk") {
        Intent::Risk
    } else if ["recommend", "improve", "suggest"]
        .iter()
        .any(|k| message.contains(k))
    {
        Intent::Recommend
    } else {
        Intent::General
    }
}

/// Data gathered for one question.
#[derive(Debug, Clone)]
pub enum AssistantData {
    Student {
        student: StudentRecord,
        prediction: Option<PredictionRecord>,
    },
    Cohort {
        students: Vec<StudentRecord>,
        predictions: Vec<PredictionRecord>,
    },
    Empty,
}

impl AssistantData {
    pub fn sources(&self) -> Vec<String> {
        let names: &[&str] = match self {
            AssistantData::Student {
                prediction: Some(_),
                ..
            } => &["student", "prediction"],
            AssistantData::Student { .. } => &["student"],
            AssistantData::Cohort { .. } => &["students", "predictions"],
            AssistantData::Empty => &[],
        };
        names.iter().map(|n| n.to_string()).collect()
    }
}

pub fn build_context(data: &AssistantData) -> String {
    let mut ctx = String::from("STUDENT DATABASE DATA:\n");

    match data {
        AssistantData::Student {
            student,
            prediction,
        } => {
            let a = &student.attributes;
            let _ = writeln!(ctx, "GPA: {}", a.previous_gpa);
            let _ = writeln!(ctx, "Attendance: {}%", a.attendance_percentage);
            let _ = writeln!(ctx, "Study Hours: {}/week", a.study_hours);
            let _ = writeln!(ctx, "Internal Marks: {}", a.internal_marks);
            let _ = writeln!(ctx, "Assignments: {}", a.assignment_scores);
            let _ = writeln!(ctx, "Lab: {}", a.lab_performance);
            if let Some(p) = prediction {
                let _ = writeln!(ctx, "Risk Score: {}", p.risk_score);
                let _ = writeln!(ctx, "Performance: {}", p.category);
            }
        }
        AssistantData::Cohort {
            students,
            predictions,
        } => {
            let stats = aggregate::dashboard_stats(students, predictions);
            let average_gpa = if students.is_empty() {
                0.0
            } else {
                students
                    .iter()
                    .map(|s| s.attributes.previous_gpa)
                    .sum::<f64>()
                    / students.len() as f64
            };
            let _ = writeln!(ctx, "Total Students: {}", stats.total_students);
            let _ = writeln!(ctx, "Average GPA: {:.2}", average_gpa);
            let _ = writeln!(ctx, "At Risk Students: {}", stats.at_risk_students);
        }
        AssistantData::Empty => {}
    }

    ctx
}

pub fn follow_ups(intent: Intent) -> Vec<String> {
    let questions: &[&str] = match intent {
        Intent::Student => &[
            "Why is my risk score high?",
            "How can I improve my GPA?",
            "Which factor affects me most?",
        ],
        Intent::Admin => &[
            "Show high risk students",
            "Performance by major",
            "Attendance vs GPA",
        ],
        _ => &["Ask another performance question"],
    };
    questions.iter().map(|q| q.to_string()).collect()
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a student performance assistant.\n\
         Answer ONLY from the data below.\n\
         If data is missing, say so.\n\n\
         {context}\n\
         Question: {question}\n\n\
         Answer briefly in bullet points.\n"
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub confidence: f64,
    pub data_sources: Vec<String>,
    pub follow_up_questions: Vec<String>,
    pub explanation: Option<String>,
}

pub fn compose_reply(intent: Intent, data: &AssistantData, response: String) -> ChatReply {
    let data_sources = data.sources();
    let confidence = if data_sources.is_empty() { 0.6 } else { 0.9 };

    ChatReply {
        response,
        confidence,
        data_sources,
        follow_up_questions: follow_ups(intent),
        explanation: (confidence <= 0.85).then(|| "Limited data available".to_string()),
    }
}

/// Last reachability probe result, refreshed once older than the TTL.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    last: Option<(bool, Instant)>,
}

impl Availability {
    pub fn cached(&self, now: Instant, ttl: Duration) -> Option<bool> {
        match self.last {
            Some((available, checked_at)) if now.duration_since(checked_at) < ttl => {
                Some(available)
            }
            _ => None,
        }
    }

    pub fn record(&mut self, available: bool, now: Instant) {
        self.last = Some((available, now));
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    top_k: u32,
    repeat_penalty: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

pub struct OllamaClient {
    config: AssistantConfig,
    http: reqwest::Client,
    availability: Availability,
}

impl OllamaClient {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            availability: Availability::default(),
        }
    }

    pub async fn is_available(&mut self) -> bool {
        let now = Instant::now();
        if let Some(available) = self.availability.cached(now, self.config.availability_ttl) {
            return available;
        }

        let url = format!("{}/api/tags", self.config.base_url);
        let available = match self
            .http
            .get(&url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "ollama probe failed");
                false
            }
        };

        if !available {
            warn!(url = %url, "ollama is not reachable");
        }
        self.availability.record(available, now);
        available
    }

    pub async fn generate(&mut self, prompt: &str) -> Result<String, AssistantError> {
        if !self.is_available().await {
            return Err(AssistantError::Unavailable(self.config.base_url.clone()));
        }

        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.3,
                num_predict: 200,
                top_k: 20,
                repeat_penalty: 1.1,
            },
        };

        info!(model = %self.config.model, "sending question to ollama");
        let response = self
            .http
            .post(format!("{}/api/generate", self.config.base_url))
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AssistantError::Status(response.status()));
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed
            .response
            .unwrap_or_else(|| "No response generated.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::{Category, PerformanceInputs, SocioFactors};

    fn student() -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            name: "Jane Smith".to_string(),
            email: "jane.smith@university.edu".to_string(),
            enrollment_year: 2022,
            major: "Data Science".to_string(),
            attributes: PerformanceInputs {
                attendance_percentage: 92.0,
                internal_marks: 88.0,
                assignment_scores: 85.0,
                lab_performance: 87.0,
                previous_gpa: 3.6,
                study_hours: 30.0,
                participation_metrics: 95.0,
            },
            socio_academic_factors: SocioFactors::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn intent_prefers_personal_questions() {
        assert_eq!(analyze_intent("What is my GPA?"), Intent::Student);
        assert_eq!(analyze_intent("Tell me about risk"), Intent::Student);
        assert_eq!(analyze_intent("How many students are enrolled?"), Intent::Admin);
        assert_eq!(analyze_intent("Who is at risk"), Intent::Risk);
        assert_eq!(analyze_intent("Recommend something"), Intent::Recommend);
        assert_eq!(analyze_intent("Hello there"), Intent::General);
    }

    #[test]
    fn short_keywords_match_whole_words_only() {
        // "me" inside "recommend" and "my" inside "academy" are not personal.
        assert_eq!(analyze_intent("recommend courses"), Intent::Recommend);
        assert_eq!(analyze_intent("academy news"), Intent::General);
    }

    #[test]
    fn student_context_includes_prediction() {
        let student = student();
        let prediction = PredictionRecord {
            id: Uuid::new_v4(),
            student_id: student.id,
            category: Category::High,
            risk_score: 0.1,
            recommendations: Vec::new(),
            created_at: Utc::now(),
        };
        let data = AssistantData::Student {
            student,
            prediction: Some(prediction),
        };

        let ctx = build_context(&data);
        assert!(ctx.contains("GPA: 3.6\n"));
        assert!(ctx.contains("Attendance: 92%\n"));
        assert!(ctx.contains("Risk Score: 0.1\n"));
        assert!(ctx.contains("Performance: High\n"));
        assert_eq!(data.sources(), vec!["student", "prediction"]);
    }

    #[test]
    fn cohort_context_handles_empty_sets() {
        let data = AssistantData::Cohort {
            students: Vec::new(),
            predictions: Vec::new(),
        };
        let ctx = build_context(&data);
        assert!(ctx.contains("Total Students: 0"));
        assert!(ctx.contains("Average GPA: 0.00"));
    }

    #[test]
    fn reply_confidence_tracks_gathered_data() {
        let reply = compose_reply(Intent::General, &AssistantData::Empty, "ok".to_string());
        assert_eq!(reply.confidence, 0.6);
        assert_eq!(reply.explanation.as_deref(), Some("Limited data available"));
        assert_eq!(reply.follow_up_questions, vec!["Ask another performance question"]);

        let data = AssistantData::Student {
            student: student(),
            prediction: None,
        };
        let reply = compose_reply(Intent::Student, &data, "ok".to_string());
        assert_eq!(reply.confidence, 0.9);
        assert!(reply.explanation.is_none());
        assert_eq!(reply.follow_up_questions.len(), 3);
    }

    #[test]
    fn availability_expires_after_ttl() {
        let ttl = Duration::from_secs(60);
        let start = Instant::now();
        let mut availability = Availability::default();
        assert_eq!(availability.cached(start, ttl), None);

        availability.record(false, start);
        assert_eq!(availability.cached(start + Duration::from_secs(30), ttl), Some(false));
        assert_eq!(availability.cached(start + Duration::from_secs(60), ttl), None);
    }

    #[test]
    fn prompt_wraps_context_and_question() {
        let prompt = build_prompt("Who needs help?", "STUDENT DATABASE DATA:\n");
        assert!(prompt.starts_with("You are a student performance assistant."));
        assert!(prompt.contains("Question: Who needs help?"));
    }
}
