use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod assistant;
mod db;
mod error;
mod features;
mod models;
mod recommend;
mod report;
mod risk;

use crate::assistant::{AssistantConfig, AssistantData, OllamaClient};
use crate::models::{
    NewStudent, PerformanceInputs, PredictionResult, SocioFactors, StudentRecord, StudentUpdate,
};
use crate::risk::ClassifierPolicy;

#[derive(Parser)]
#[command(name = "student-performance")]
#[command(about = "Student performance tracking, risk classification and cohort reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students
    Seed,
    /// Import or refresh students from a CSV file and classify them
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Store the students without recording predictions
        #[arg(long)]
        no_classify: bool,
        #[arg(long, value_enum, default_value_t = ClassifierPolicy::Threshold)]
        policy: ClassifierPolicy,
    },
    /// Register one student and record its first prediction
    AddStudent(AddArgs),
    /// List students page by page
    Students {
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Update a student profile and record a fresh prediction
    UpdateStudent(UpdateArgs),
    /// Delete a student and its prediction history
    DeleteStudent {
        #[arg(long)]
        email: String,
    },
    /// Classify students and store the predictions
    #[command(group(
        ArgGroup::new("target")
            .args(["email", "all", "missing"])
            .required(true)
            .multiple(false)
    ))]
    Classify {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        all: bool,
        /// Only students without any prediction yet
        #[arg(long)]
        missing: bool,
        #[arg(long, value_enum, default_value_t = ClassifierPolicy::Threshold)]
        policy: ClassifierPolicy,
    },
    /// Show every prediction recorded for a student, newest first
    History {
        #[arg(long)]
        email: String,
        #[arg(long)]
        json: bool,
    },
    /// Averages and category mix per enrollment year
    Trends {
        #[arg(long)]
        json: bool,
    },
    /// Students whose latest risk score is 0.7 or higher
    AtRisk {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Compare enrollment cohorts with an estimated graduation rate
    Cohorts {
        #[arg(long)]
        json: bool,
    },
    /// Headline counts across all students
    Dashboard {
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        /// Restrict the report to one enrollment year
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Ask the assistant a question about student performance
    Ask(AskArgs),
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    enrollment_year: i32,
    #[arg(long)]
    major: String,
    #[arg(long)]
    attendance: f64,
    #[arg(long)]
    internal_marks: f64,
    #[arg(long)]
    assignment_scores: f64,
    #[arg(long)]
    lab_performance: f64,
    #[arg(long)]
    gpa: f64,
    #[arg(long)]
    study_hours: f64,
    #[arg(long)]
    participation: f64,
    /// Socio-academic factors as a JSON object
    #[arg(long)]
    factors: Option<String>,
    #[arg(long)]
    no_classify: bool,
    #[arg(long, value_enum, default_value_t = ClassifierPolicy::Threshold)]
    policy: ClassifierPolicy,
}

impl AddArgs {
    fn to_new_student(&self) -> anyhow::Result<NewStudent> {
        let socio_academic_factors = match self.factors.as_deref() {
            Some(raw) => serde_json::from_str::<SocioFactors>(raw)
                .context("--factors must be a JSON object")?,
            None => SocioFactors::new(),
        };
        let student = NewStudent {
            name: self.name.clone(),
            email: self.email.clone(),
            enrollment_year: self.enrollment_year,
            major: self.major.clone(),
            attributes: PerformanceInputs {
                attendance_percentage: self.attendance,
                internal_marks: self.internal_marks,
                assignment_scores: self.assignment_scores,
                lab_performance: self.lab_performance,
                previous_gpa: self.gpa,
                study_hours: self.study_hours,
                participation_metrics: self.participation,
            },
            socio_academic_factors,
        };
        student.validate()?;
        Ok(student)
    }
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    enrollment_year: Option<i32>,
    #[arg(long)]
    major: Option<String>,
    #[arg(long)]
    attendance: Option<f64>,
    #[arg(long)]
    internal_marks: Option<f64>,
    #[arg(long)]
    assignment_scores: Option<f64>,
    #[arg(long)]
    lab_performance: Option<f64>,
    #[arg(long)]
    gpa: Option<f64>,
    #[arg(long)]
    study_hours: Option<f64>,
    #[arg(long)]
    participation: Option<f64>,
    #[arg(long, value_enum, default_value_t = ClassifierPolicy::Threshold)]
    policy: ClassifierPolicy,
}

impl UpdateArgs {
    fn to_update(&self) -> StudentUpdate {
        StudentUpdate {
            name: self.name.clone(),
            enrollment_year: self.enrollment_year,
            major: self.major.clone(),
            attendance_percentage: self.attendance,
            internal_marks: self.internal_marks,
            assignment_scores: self.assignment_scores,
            lab_performance: self.lab_performance,
            previous_gpa: self.gpa,
            study_hours: self.study_hours,
            participation_metrics: self.participation,
        }
    }
}

#[derive(Args)]
struct AskArgs {
    #[arg(long)]
    message: String,
    /// Answer from this student's own record
    #[arg(long)]
    email: Option<String>,
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    ollama_url: String,
    #[arg(long, env = "OLLAMA_MODEL", default_value = "phi3:3.8b")]
    ollama_model: String,
    #[arg(long, default_value_t = 60)]
    availability_ttl_secs: u64,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("student_performance_tracker=info,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let ids = db::seed(&pool).await?;
            println!("Seeded {} students.", ids.len());
        }
        Commands::Import {
            csv,
            no_classify,
            policy,
        } => {
            let ids = db::import_students_csv(&pool, &csv).await?;
            println!("Imported {} students from {}.", ids.len(), csv.display());
            if !no_classify {
                let students = db::fetch_all_students(&pool).await?;
                let imported: Vec<&StudentRecord> =
                    students.iter().filter(|s| ids.contains(&s.id)).collect();
                for student in &imported {
                    classify_and_store(&pool, student, policy).await?;
                }
                println!("Classified {} students.", imported.len());
            }
        }
        Commands::AddStudent(args) => {
            let new_student = args.to_new_student()?;
            db::upsert_student(&pool, &new_student).await?;
            let student = db::fetch_student_by_email(&pool, &new_student.email)
                .await?
                .with_context(|| format!("student {} was not stored", new_student.email))?;
            println!("Registered {}.", student.email);
            if !args.no_classify {
                let result = classify_and_store(&pool, &student, args.policy).await?;
                print_prediction(&student, &result);
            }
        }
        Commands::Students { skip, limit, json } => {
            let students = db::fetch_students(&pool, skip, limit).await?;
            if json {
                print_json(&students)?;
            } else if students.is_empty() {
                println!("No students found.");
            } else {
                for s in &students {
                    println!(
                        "- {} ({}, {} {}) GPA {:.2}, attendance {:.1}%",
                        s.name,
                        s.email,
                        s.major,
                        s.enrollment_year,
                        s.attributes.previous_gpa,
                        s.attributes.attendance_percentage
                    );
                }
            }
        }
        Commands::UpdateStudent(args) => {
            let update = args.to_update();
            if update.is_empty() {
                bail!("nothing to update for {}", args.email);
            }
            let student = db::update_student(&pool, &args.email, &update)
                .await?
                .with_context(|| format!("no student with email {}", args.email))?;
            let result = classify_and_store(&pool, &student, args.policy).await?;
            println!("Updated {}.", student.email);
            print_prediction(&student, &result);
        }
        Commands::DeleteStudent { email } => {
            if !db::delete_student(&pool, &email).await? {
                bail!("no student with email {email}");
            }
            println!("Deleted {email}.");
        }
        Commands::Classify {
            email,
            all: _,
            missing,
            policy,
        } => {
            let targets = match email {
                Some(email) => vec![db::fetch_student_by_email(&pool, &email)
                    .await?
                    .with_context(|| format!("no student with email {email}"))?],
                None if missing => {
                    let students = db::fetch_all_students(&pool).await?;
                    let predictions = db::fetch_all_predictions(&pool).await?;
                    let index = aggregate::PredictionIndex::latest(&predictions);
                    info!(
                        students = students.len(),
                        with_predictions = index.len(),
                        "checking for missing predictions"
                    );
                    students
                        .iter()
                        .filter(|s| index.get(&s.id).is_none())
                        .cloned()
                        .collect()
                }
                None => db::fetch_all_students(&pool).await?,
            };

            if targets.is_empty() {
                println!("No students to classify.");
                return Ok(());
            }

            for student in &targets {
                let result = classify_and_store(&pool, student, policy).await?;
                print_prediction(student, &result);
            }
        }
        Commands::History { email, json } => {
            let student = db::fetch_student_by_email(&pool, &email)
                .await?
                .with_context(|| format!("no student with email {email}"))?;
            let history = db::fetch_predictions_for_student(&pool, student.id).await?;
            if json {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("No predictions recorded for {email}.");
            } else {
                for p in &history {
                    println!(
                        "- {} {} (risk {:.2})",
                        p.created_at.format("%Y-%m-%d %H:%M"),
                        p.category,
                        p.risk_score
                    );
                }
            }
        }
        Commands::Trends { json } => {
            let (students, predictions) = load_all(&pool).await?;
            let trends = aggregate::performance_trends(&students, &predictions);
            if json {
                print_json(&trends)?;
            } else if trends.is_empty() {
                println!("No students found.");
            } else {
                for t in &trends {
                    let d = &t.performance_distribution;
                    println!(
                        "- {}: {} students, avg GPA {:.2}, attendance {:.1}% (high {}, medium {}, low {})",
                        t.year, t.total_students, t.average_gpa, t.attendance_rate, d.high, d.medium, d.low
                    );
                }
            }
        }
        Commands::AtRisk { limit, json } => {
            let (students, predictions) = load_all(&pool).await?;
            let rows = aggregate::top_at_risk(&students, &predictions, limit);
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No at-risk students.");
            } else {
                println!("Students at risk:");
                for r in &rows {
                    println!(
                        "- {} ({}) risk {:.2} [{}], GPA {:.2}, attendance {:.1}%",
                        r.name,
                        r.email,
                        r.risk_score,
                        risk::risk_level(r.risk_score).label(),
                        r.gpa,
                        r.attendance_percentage
                    );
                }
            }
        }
        Commands::Cohorts { json } => {
            let (students, predictions) = load_all(&pool).await?;
            let comparison = aggregate::cohort_comparison(&students, &predictions);
            if json {
                print_json(&comparison)?;
            } else if comparison.is_empty() {
                println!("No cohorts found.");
            } else {
                for c in &comparison {
                    println!(
                        "- {}: {} students, avg GPA {:.2}, estimated graduation rate {:.1}%",
                        c.cohort, c.total_students, c.average_gpa, c.graduation_rate
                    );
                }
            }
        }
        Commands::Dashboard { json } => {
            let (students, predictions) = load_all(&pool).await?;
            let stats = aggregate::dashboard_stats(&students, &predictions);
            if json {
                print_json(&stats)?;
            } else {
                println!("Students: {}", stats.total_students);
                println!("With predictions: {}", stats.students_with_predictions);
                println!("At risk: {}", stats.at_risk_students);
                println!("High performers: {}", stats.high_performers);
                println!("Average risk score: {:.2}", stats.average_risk_score);
            }
        }
        Commands::Report { year, out } => {
            let (mut students, predictions) = load_all(&pool).await?;
            if let Some(year) = year {
                students.retain(|s| s.enrollment_year == year);
            }
            let scope = year.map(|y| y.to_string());
            let report = report::build_report(
                scope.as_deref(),
                chrono::Utc::now().date_naive(),
                &students,
                &predictions,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Ask(args) => {
            let intent = assistant::analyze_intent(&args.message);
            let data = gather_assistant_data(&pool, intent, args.email.as_deref()).await?;
            let prompt = assistant::build_prompt(&args.message, &assistant::build_context(&data));

            let mut client = OllamaClient::new(AssistantConfig {
                base_url: args.ollama_url.trim_end_matches('/').to_string(),
                model: args.ollama_model.clone(),
                availability_ttl: Duration::from_secs(args.availability_ttl_secs),
                ..AssistantConfig::default()
            });
            let answer = client.generate(&prompt).await?;
            let reply = assistant::compose_reply(intent, &data, answer);

            if args.json {
                print_json(&reply)?;
            } else {
                println!("{}", reply.response.trim());
                if let Some(explanation) = &reply.explanation {
                    println!("({explanation})");
                }
                println!();
                println!("You could also ask:");
                for q in &reply.follow_up_questions {
                    println!("- {q}");
                }
            }
        }
    }

    Ok(())
}

async fn classify_and_store(
    pool: &PgPool,
    student: &StudentRecord,
    policy: ClassifierPolicy,
) -> anyhow::Result<PredictionResult> {
    student
        .attributes
        .validate()
        .with_context(|| format!("stored attributes for {} are invalid", student.email))?;
    let result = risk::classify(&student.attributes, policy);
    let id = db::persist_prediction(pool, student.id, &result).await?;
    info!(
        email = %student.email,
        prediction = %id,
        category = %result.category,
        risk = result.risk_score,
        "prediction recorded"
    );
    Ok(result)
}

async fn load_all(
    pool: &PgPool,
) -> anyhow::Result<(Vec<StudentRecord>, Vec<models::PredictionRecord>)> {
    let students = db::fetch_all_students(pool).await?;
    let predictions = db::fetch_all_predictions(pool).await?;
    Ok((students, predictions))
}

async fn gather_assistant_data(
    pool: &PgPool,
    intent: assistant::Intent,
    email: Option<&str>,
) -> anyhow::Result<AssistantData> {
    if intent == assistant::Intent::Student {
        let Some(email) = email else {
            warn!("personal question without --email, answering without student data");
            return Ok(AssistantData::Empty);
        };
        let Some(student) = db::fetch_student_by_email(pool, email).await? else {
            bail!("no student with email {email}");
        };
        let prediction = db::fetch_predictions_for_student(pool, student.id)
            .await?
            .into_iter()
            .next();
        return Ok(AssistantData::Student {
            student,
            prediction,
        });
    }

    let (students, predictions) = load_all(pool).await?;
    Ok(AssistantData::Cohort {
        students,
        predictions,
    })
}

fn print_prediction(student: &StudentRecord, result: &PredictionResult) {
    println!(
        "{} ({}): {} performance, risk {:.2}",
        student.name, student.email, result.category, result.risk_score
    );
    for line in &result.recommendations {
        println!("  - {line}");
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
