use crate::scoresheet::{ParsedScoreSheet, StudentScoreRecord};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Caller-supplied exam metadata for one upload.
#[derive(Debug, Clone)]
pub struct NewExam {
    pub title: String,
    pub grade: String,
    pub class_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub exam_id: String,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub exam_id: String,
    pub title: String,
    pub grade: String,
    pub class_number: String,
    pub created_at: String,
    pub subject_list: Vec<String>,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentExamResult {
    pub exam_id: String,
    pub title: String,
    pub grade: String,
    pub class_number: String,
    pub created_at: String,
    pub subject_list: Vec<String>,
    pub record: StudentScoreRecord,
}

struct ExamRow {
    id: String,
    title: String,
    grade: String,
    class_number: String,
    subject_list: String,
    created_at: String,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Persist one exam and its whole roster in a single transaction.
///
/// The exam row is written inside the same transaction as the children, so a
/// rejected student row leaves neither the exam nor any of its results.
/// The returned count is the number of distinct student ids written.
pub fn ingest(conn: &Connection, exam: &NewExam, sheet: &ParsedScoreSheet) -> Result<IngestOutcome> {
    let title = exam.title.trim();
    if title.is_empty() {
        return Err(StoreError::InvalidInput("title must not be empty".into()));
    }

    let exam_id = Uuid::new_v4().to_string();
    let subject_list = serde_json::to_string(&sheet.subject_list)?;

    // Dropping the transaction on any early return rolls it back.
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO exams(id, title, grade, class_number, subject_list, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            title,
            &exam.grade,
            &exam.class_number,
            &subject_list,
            now_timestamp(),
        ),
    )?;

    // A repeated roll number keeps the last row for that student.
    let mut written: HashSet<&str> = HashSet::new();
    {
        let mut ins = tx.prepare(
            "INSERT INTO exam_results(exam_id, student_id, number, name, scores)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id) DO UPDATE SET
               number = excluded.number,
               name = excluded.name,
               scores = excluded.scores",
        )?;
        for s in &sheet.students {
            let scores = serde_json::to_string(&s.scores)?;
            ins.execute((&exam_id, &s.student_id, &s.number, &s.name, &scores))?;
            written.insert(s.student_id.as_str());
        }
    }
    tx.commit()?;

    if written.len() < sheet.students.len() {
        warn!(
            exam_id = %exam_id,
            rows = sheet.students.len(),
            unique = written.len(),
            "repeated student ids in sheet; later rows replaced earlier ones"
        );
    }
    info!(
        exam_id = %exam_id,
        students = written.len(),
        subjects = sheet.subject_list.len(),
        "exam ingested"
    );
    Ok(IngestOutcome {
        exam_id,
        student_count: written.len(),
    })
}

fn list_exam_rows(conn: &Connection) -> Result<Vec<ExamRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, grade, class_number, subject_list, created_at
         FROM exams
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ExamRow {
                id: row.get(0)?,
                title: row.get(1)?,
                grade: row.get(2)?,
                class_number: row.get(3)?,
                subject_list: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn probe_result(
    conn: &Connection,
    exam_id: &str,
    student_id: &str,
) -> Result<Option<StudentScoreRecord>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT number, name, scores FROM exam_results
             WHERE exam_id = ? AND student_id = ?",
            [exam_id, student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((number, name, scores)) = row else {
        return Ok(None);
    };
    Ok(Some(StudentScoreRecord {
        student_id: student_id.to_string(),
        number,
        name,
        scores: serde_json::from_str(&scores)?,
    }))
}

/// Every stored result for `student_id`, newest exam first.
///
/// A failing probe for one exam counts as "not in that exam"; only a failed
/// enumeration is reported.
pub fn fetch_for_student(conn: &Connection, student_id: &str) -> Result<Vec<StudentExamResult>> {
    let exams = list_exam_rows(conn)?;
    let mut out = Vec::new();
    for exam in exams {
        let record = match probe_result(conn, &exam.id, student_id) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => {
                warn!(exam_id = %exam.id, student_id, error = %e, "result probe failed; treating as absent");
                continue;
            }
        };
        let subject_list = match serde_json::from_str::<Vec<String>>(&exam.subject_list) {
            Ok(v) => v,
            Err(e) => {
                warn!(exam_id = %exam.id, error = %e, "unreadable subject list; skipping exam");
                continue;
            }
        };
        out.push(StudentExamResult {
            exam_id: exam.id,
            title: exam.title,
            grade: exam.grade,
            class_number: exam.class_number,
            created_at: exam.created_at,
            subject_list,
            record,
        });
    }
    Ok(out)
}

/// All exams newest first. An exam whose stored subject list cannot be read is
/// logged and left out.
pub fn list_exams(conn: &Connection) -> Result<Vec<ExamSummary>> {
    let exams = list_exam_rows(conn)?;
    let mut count_stmt = conn.prepare("SELECT COUNT(*) FROM exam_results WHERE exam_id = ?")?;
    let mut out = Vec::with_capacity(exams.len());
    for exam in exams {
        let subject_list = match serde_json::from_str::<Vec<String>>(&exam.subject_list) {
            Ok(v) => v,
            Err(e) => {
                warn!(exam_id = %exam.id, error = %e, "unreadable subject list; skipping exam");
                continue;
            }
        };
        let student_count: i64 = count_stmt.query_row([&exam.id], |r| r.get(0))?;
        out.push(ExamSummary {
            subject_list,
            exam_id: exam.id,
            title: exam.title,
            grade: exam.grade,
            class_number: exam.class_number,
            created_at: exam.created_at,
            student_count,
        });
    }
    Ok(out)
}

/// Remove an exam and all of its results. Returns the number of results removed.
pub fn delete_exam(conn: &Connection, exam_id: &str) -> Result<usize> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [exam_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::NotFound(format!("exam {exam_id}")));
    }

    // Children first (no ON DELETE CASCADE).
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM exam_results WHERE exam_id = ?", [exam_id])?;
    tx.execute("DELETE FROM exams WHERE id = ?", [exam_id])?;
    tx.commit()?;

    info!(exam_id, removed, "exam deleted");
    Ok(removed)
}
