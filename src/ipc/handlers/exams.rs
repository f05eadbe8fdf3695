use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::scoresheet::{self, ParsedScoreSheet};
use crate::store::{self, NewExam};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

/// Either inline `text` or a `path` to an export file.
fn sheet_text(req: &Request) -> Result<String, serde_json::Value> {
    if let Some(text) = req.params.get("text").and_then(|v| v.as_str()) {
        return Ok(text.to_string());
    }
    let Some(path) = req.str_param("path").filter(|p| !p.is_empty()).map(PathBuf::from) else {
        return Err(err(&req.id, "bad_params", "missing text or path", None));
    };
    scoresheet::read_score_sheet_file(&path).map_err(|e| {
        err(
            &req.id,
            "read_failed",
            e.to_string(),
            Some(json!({ "path": path.to_string_lossy() })),
        )
    })
}

fn parse_from_params(req: &Request) -> Result<ParsedScoreSheet, serde_json::Value> {
    let Some(grade) = req.str_param("grade") else {
        return Err(err(&req.id, "bad_params", "missing grade", None));
    };
    let Some(class_number) = req.str_param("classNumber") else {
        return Err(err(&req.id, "bad_params", "missing classNumber", None));
    };
    let text = sheet_text(req)?;
    Ok(scoresheet::parse_score_sheet(&text, &grade, &class_number))
}

fn handle_exams_preview(_state: &mut AppState, req: &Request) -> serde_json::Value {
    match parse_from_params(req) {
        Ok(sheet) => ok(&req.id, json!(sheet)),
        Err(resp) => resp,
    }
}

fn handle_exams_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let title = match req.str_param("title") {
        Some(v) if !v.is_empty() => v,
        _ => return err(&req.id, "bad_params", "title must not be empty", None),
    };
    let sheet = match parse_from_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if sheet.header_line.is_none() {
        warn!(title = %title, "no header row found; ingesting an empty sheet");
    }

    let exam = NewExam {
        title,
        grade: sheet.grade.clone(),
        class_number: sheet.class_number.clone(),
    };
    match store::ingest(conn, &exam, &sheet) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "examId": outcome.exam_id,
                "studentCount": outcome.student_count,
                "subjectList": sheet.subject_list,
                "headerFound": sheet.header_line.is_some(),
                "ignoredLines": sheet.ignored_lines,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "exam ingestion failed");
            store_err(&req.id, "ingest_failed", &e)
        }
    }
}

fn handle_exams_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };
    let student_id = match req.str_param("studentId") {
        Some(v) if !v.is_empty() => v,
        _ => return err(&req.id, "bad_params", "missing studentId", None),
    };
    match store::fetch_for_student(conn, &student_id) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => store_err(&req.id, "db_query_failed", &e),
    }
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "exams": [] }));
    };
    match store::list_exams(conn) {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => store_err(&req.id, "db_query_failed", &e),
    }
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(exam_id) = req.str_param("examId") else {
        return err(&req.id, "bad_params", "missing examId", None);
    };
    match store::delete_exam(conn, &exam_id) {
        Ok(removed) => ok(
            &req.id,
            json!({ "examId": exam_id, "removedResults": removed }),
        ),
        Err(e) => store_err(&req.id, "db_delete_failed", &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.preview" => Some(handle_exams_preview(state, req)),
        "exams.upload" => Some(handle_exams_upload(state, req)),
        "exams.forStudent" => Some(handle_exams_for_student(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.delete" => Some(handle_exams_delete(state, req)),
        _ => None,
    }
}
