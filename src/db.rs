use std::io::Read;

use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    NewStudent, PerformanceInputs, PredictionRecord, PredictionResult, SocioFactors,
    StudentRecord, StudentUpdate,
};

const STUDENT_COLUMNS: &str = "id, full_name, email, enrollment_year, major, \
     attendance_percentage, internal_marks, assignment_scores, lab_performance, \
     previous_gpa, study_hours, participation_metrics, socio_academic_factors, \
     created_at, updated_at";

const PREDICTION_COLUMNS: &str =
    "id, student_id, predicted_performance, risk_score, recommendations, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn factors(pairs: &[(&str, &str)]) -> SocioFactors {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect()
}

pub fn sample_students() -> Vec<NewStudent> {
    let rows = [
        (
            "John Doe",
            "john.doe@university.edu",
            "Computer Science",
            2022,
            [85.5, 78.0, 82.0, 80.0, 3.2, 25.0, 90.0],
            ("medium", "college"),
        ),
        (
            "Jane Smith",
            "jane.smith@university.edu",
            "Data Science",
            2022,
            [92.0, 88.0, 85.0, 87.0, 3.6, 30.0, 95.0],
            ("high", "graduate"),
        ),
        (
            "Bob Johnson",
            "bob.johnson@university.edu",
            "Information Technology",
            2023,
            [75.0, 65.0, 70.0, 68.0, 2.8, 18.0, 75.0],
            ("low", "high_school"),
        ),
        (
            "Alice Brown",
            "alice.brown@university.edu",
            "Software Engineering",
            2021,
            [88.0, 82.0, 84.0, 83.0, 3.4, 28.0, 88.0],
            ("medium", "college"),
        ),
        (
            "Charlie Wilson",
            "charlie.wilson@university.edu",
            "Computer Science",
            2023,
            [78.0, 72.0, 75.0, 74.0, 3.0, 22.0, 82.0],
            ("medium", "college"),
        ),
    ];

    rows.into_iter()
        .map(|(name, email, major, year, v, (income, parents))| NewStudent {
            name: name.to_string(),
            email: email.to_string(),
            enrollment_year: year,
            major: major.to_string(),
            attributes: PerformanceInputs {
                attendance_percentage: v[0],
                internal_marks: v[1],
                assignment_scores: v[2],
                lab_performance: v[3],
                previous_gpa: v[4],
                study_hours: v[5],
                participation_metrics: v[6],
            },
            socio_academic_factors: factors(&[
                ("family_income", income),
                ("parent_education", parents),
            ]),
        })
        .collect()
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Vec<Uuid>> {
    let mut ids = Vec::new();
    for student in sample_students() {
        ids.push(upsert_student(pool, &student).await?);
    }
    Ok(ids)
}

/// Inserts a student or refreshes the profile of an existing email.
pub async fn upsert_student(pool: &PgPool, student: &NewStudent) -> anyhow::Result<Uuid> {
    student
        .validate()
        .with_context(|| format!("invalid student {}", student.email))?;
    let a = &student.attributes;

    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO student_performance.students
        (id, full_name, email, enrollment_year, major, attendance_percentage,
         internal_marks, assignment_scores, lab_performance, previous_gpa,
         study_hours, participation_metrics, socio_academic_factors)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            enrollment_year = EXCLUDED.enrollment_year,
            major = EXCLUDED.major,
            attendance_percentage = EXCLUDED.attendance_percentage,
            internal_marks = EXCLUDED.internal_marks,
            assignment_scores = EXCLUDED.assignment_scores,
            lab_performance = EXCLUDED.lab_performance,
            previous_gpa = EXCLUDED.previous_gpa,
            study_hours = EXCLUDED.study_hours,
            participation_metrics = EXCLUDED.participation_metrics,
            socio_academic_factors = EXCLUDED.socio_academic_factors,
            updated_at = now()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&student.name)
    .bind(&student.email)
    .bind(student.enrollment_year)
    .bind(&student.major)
    .bind(a.attendance_percentage)
    .bind(a.internal_marks)
    .bind(a.assignment_scores)
    .bind(a.lab_performance)
    .bind(a.previous_gpa)
    .bind(a.study_hours)
    .bind(a.participation_metrics)
    .bind(Json(&student.socio_academic_factors))
    .fetch_one(pool)
    .await?
    .get("id");

    debug!(email = %student.email, %id, "student stored");
    Ok(id)
}

fn student_from_row(row: &PgRow) -> StudentRecord {
    let factors: Json<SocioFactors> = row.get("socio_academic_factors");
    StudentRecord {
        id: row.get("id"),
        name: row.get("full_name"),
        email: row.get("email"),
        enrollment_year: row.get("enrollment_year"),
        major: row.get("major"),
        attributes: PerformanceInputs {
            attendance_percentage: row.get("attendance_percentage"),
            internal_marks: row.get("internal_marks"),
            assignment_scores: row.get("assignment_scores"),
            lab_performance: row.get("lab_performance"),
            previous_gpa: row.get("previous_gpa"),
            study_hours: row.get("study_hours"),
            participation_metrics: row.get("participation_metrics"),
        },
        socio_academic_factors: factors.0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn prediction_from_row(row: &PgRow) -> anyhow::Result<PredictionRecord> {
    let category: String = row.get("predicted_performance");
    let recommendations: Json<Vec<String>> = row.get("recommendations");
    Ok(PredictionRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        category: category.parse()?,
        risk_score: row.get("risk_score"),
        recommendations: recommendations.0,
        created_at: row.get("created_at"),
    })
}

pub async fn fetch_all_students(pool: &PgPool) -> anyhow::Result<Vec<StudentRecord>> {
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_performance.students \
         ORDER BY enrollment_year, created_at, id"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(student_from_row).collect())
}

pub async fn fetch_students(
    pool: &PgPool,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<StudentRecord>> {
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_performance.students \
         ORDER BY created_at, id OFFSET $1 LIMIT $2"
    );
    let rows = sqlx::query(&query)
        .bind(skip.max(0))
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(student_from_row).collect())
}

pub async fn fetch_student_by_email(
    pool: &PgPool,
    email: &str,
) -> anyhow::Result<Option<StudentRecord>> {
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_performance.students WHERE email = $1"
    );
    let row = sqlx::query(&query).bind(email).fetch_optional(pool).await?;
    Ok(row.as_ref().map(student_from_row))
}

pub async fn update_student(
    pool: &PgPool,
    email: &str,
    update: &StudentUpdate,
) -> anyhow::Result<Option<StudentRecord>> {
    let Some(current) = fetch_student_by_email(pool, email).await? else {
        return Ok(None);
    };
    let next = update
        .apply(&current)
        .with_context(|| format!("invalid update for {email}"))?;
    let a = &next.attributes;

    let query = format!(
        r#"
        UPDATE student_performance.students
        SET full_name = $2, enrollment_year = $3, major = $4,
            attendance_percentage = $5, internal_marks = $6, assignment_scores = $7,
            lab_performance = $8, previous_gpa = $9, study_hours = $10,
            participation_metrics = $11, updated_at = $12
        WHERE id = $1
        RETURNING {STUDENT_COLUMNS}
        "#
    );
    let row = sqlx::query(&query)
        .bind(next.id)
        .bind(&next.name)
        .bind(next.enrollment_year)
        .bind(&next.major)
        .bind(a.attendance_percentage)
        .bind(a.internal_marks)
        .bind(a.assignment_scores)
        .bind(a.lab_performance)
        .bind(a.previous_gpa)
        .bind(a.study_hours)
        .bind(a.participation_metrics)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

    Ok(Some(student_from_row(&row)))
}

/// Removes the student and its prediction history. Returns false if the
/// email is unknown.
pub async fn delete_student(pool: &PgPool, email: &str) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    let id: Option<Uuid> = sqlx::query(
        "DELETE FROM student_performance.students WHERE email = $1 RETURNING id",
    )
    .bind(email)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| row.get("id"));

    let Some(id) = id else {
        return Ok(false);
    };

    let removed = sqlx::query("DELETE FROM student_performance.predictions WHERE student_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;

    info!(%email, predictions = removed, "student deleted");
    Ok(true)
}

pub async fn fetch_all_predictions(pool: &PgPool) -> anyhow::Result<Vec<PredictionRecord>> {
    let query = format!(
        "SELECT {PREDICTION_COLUMNS} FROM student_performance.predictions \
         ORDER BY created_at, id"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(prediction_from_row).collect()
}

pub async fn fetch_predictions_for_student(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<PredictionRecord>> {
    let query = format!(
        "SELECT {PREDICTION_COLUMNS} FROM student_performance.predictions \
         WHERE student_id = $1 ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query(&query).bind(student_id).fetch_all(pool).await?;
    rows.iter().map(prediction_from_row).collect()
}

pub async fn persist_prediction(
    pool: &PgPool,
    student_id: Uuid,
    result: &PredictionResult,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO student_performance.predictions
        (id, student_id, predicted_performance, risk_score, recommendations)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(student_id)
    .bind(result.category.as_str())
    .bind(result.risk_score)
    .bind(Json(&result.recommendations))
    .execute(pool)
    .await?;

    debug!(%student_id, %id, category = %result.category, "prediction stored");
    Ok(id)
}

#[derive(serde::Deserialize)]
struct CsvRow {
    name: String,
    email: String,
    enrollment_year: i32,
    major: String,
    attendance_percentage: f64,
    internal_marks: f64,
    assignment_scores: f64,
    lab_performance: f64,
    previous_gpa: f64,
    study_hours: f64,
    participation_metrics: f64,
    socio_academic_factors: Option<String>,
}

/// Parses and validates every row before anything is written.
pub fn parse_students_csv<R: Read>(input: R) -> anyhow::Result<Vec<NewStudent>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut students = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed CSV row {}", line + 1))?;
        let socio_academic_factors = match row.socio_academic_factors.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).with_context(|| {
                    format!("row {}: socio_academic_factors is not a JSON object", line + 1)
                })?
            }
            _ => SocioFactors::new(),
        };

        let student = NewStudent {
            name: row.name,
            email: row.email,
            enrollment_year: row.enrollment_year,
            major: row.major,
            attributes: PerformanceInputs {
                attendance_percentage: row.attendance_percentage,
                internal_marks: row.internal_marks,
                assignment_scores: row.assignment_scores,
                lab_performance: row.lab_performance,
                previous_gpa: row.previous_gpa,
                study_hours: row.study_hours,
                participation_metrics: row.participation_metrics,
            },
            socio_academic_factors,
        };
        student
            .validate()
            .with_context(|| format!("row {} ({})", line + 1, student.email))?;
        students.push(student);
    }

    Ok(students)
}

pub async fn import_students_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<Vec<Uuid>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let students = parse_students_csv(file)?;

    let mut ids = Vec::with_capacity(students.len());
    for student in &students {
        ids.push(upsert_student(pool, student).await?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "name,email,enrollment_year,major,attendance_percentage,internal_marks,\
assignment_scores,lab_performance,previous_gpa,study_hours,participation_metrics,socio_academic_factors\n";

    #[test]
    fn sample_students_are_valid() {
        let students = sample_students();
        assert_eq!(students.len(), 5);
        for student in &students {
            assert!(student.validate().is_ok(), "{}", student.email);
        }
        assert_eq!(
            students[0].socio_academic_factors["family_income"],
            serde_json::json!("medium")
        );
    }

    #[test]
    fn csv_rows_become_students() {
        let data = format!(
            "{HEADER}Dana Cruz,dana@university.edu,2024,Mathematics,81,74,79,77,3.1,21,70,\"{{\"\"first_generation\"\": true}}\"\n\
             Eli Park,eli@university.edu,2023,Physics,66,58,61,55,2.4,12,40,\n"
        );

        let students = parse_students_csv(data.as_bytes()).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].enrollment_year, 2024);
        assert_eq!(
            students[0].socio_academic_factors["first_generation"],
            serde_json::json!(true)
        );
        assert_eq!(students[1].attributes.study_hours, 12.0);
        assert!(students[1].socio_academic_factors.is_empty());
    }

    #[test]
    fn csv_rejects_out_of_range_attendance() {
        let data = format!(
            "{HEADER}Dana Cruz,dana@university.edu,2024,Mathematics,181,74,79,77,3.1,21,70,\n"
        );
        let err = parse_students_csv(data.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("attendance_percentage must be between 0 and 100"));
    }

    #[test]
    fn csv_rejects_non_object_factors() {
        let data = format!(
            "{HEADER}Dana Cruz,dana@university.edu,2024,Mathematics,81,74,79,77,3.1,21,70,[1]\n"
        );
        assert!(parse_students_csv(data.as_bytes()).is_err());
    }
}
