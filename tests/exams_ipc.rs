use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const SHEET: &str = "이름,,,국어,영어
번호,이름,,국어,영어
1,김철수,,90,85
,,성취도,A,B
2,이영희,,70,95
";

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_scoresheetd");
    let mut child = Command::new(exe)
        .env_remove("SCORESHEETD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scoresheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn upload_then_fetch_student_history() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "exams.upload",
        json!({ "title": "중간", "grade": "1", "classNumber": "3", "text": SHEET }),
    );
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exams.preview",
        json!({ "grade": "1", "classNumber": "3", "text": SHEET }),
    );
    assert_eq!(preview["subjectList"], json!(["국어", "영어"]));
    assert_eq!(preview["students"][0]["studentId"], json!("10301"));
    assert_eq!(
        preview["students"][0]["scores"]["국어"],
        json!({ "raw": "90", "achievement": "A" })
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "exams.list", json!({}));
    assert_eq!(listed["exams"], json!([]));

    let up1 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.upload",
        json!({ "title": "1학기 중간", "grade": "1", "classNumber": "3", "text": SHEET }),
    );
    assert_eq!(up1["studentCount"], json!(2));
    assert_eq!(up1["headerFound"], json!(true));

    let up2 = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "exams.upload",
        json!({
            "title": "1학기 기말",
            "grade": "1",
            "classNumber": "3",
            "text": "번호,이름,,수학\n2,이영희,,100\n"
        }),
    );
    assert_eq!(up2["studentCount"], json!(1));

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exams.forStudent",
        json!({ "studentId": "10302" }),
    );
    let results = mine["results"].as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["title"], json!("1학기 기말"));
    assert_eq!(results[0]["subjectList"], json!(["수학"]));
    assert_eq!(results[1]["examId"], up1["examId"]);
    assert_eq!(results[1]["record"]["name"], json!("이영희"));

    let only_first = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "exams.forStudent",
        json!({ "studentId": "10301" }),
    );
    assert_eq!(only_first["results"].as_array().map(|a| a.len()), Some(1));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "exams.delete",
        json!({ "examId": up1["examId"] }),
    );
    assert_eq!(deleted["removedResults"], json!(2));
    let listed = request_ok(&mut stdin, &mut reader, "11", "exams.list", json!({}));
    assert_eq!(listed["exams"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn upload_failures_are_reported_distinctly() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );

    let dup = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.upload",
        json!({
            "title": "중복",
            "grade": "1",
            "classNumber": "3",
            "text": "번호,이름,,국어\n1,가,,1\n2,나,,2\n2,나,,3\n"
        }),
    );
    assert_eq!(dup["studentCount"], json!(2));

    // Reject every child row from outside the sidecar.
    let side = rusqlite::Connection::open(workspace.path().join("scoresheet.sqlite3"))
        .expect("open workspace db");
    side.execute_batch(
        "CREATE TRIGGER reject_results BEFORE INSERT ON exam_results
         BEGIN
           SELECT RAISE(ABORT, 'rejected by test trigger');
         END;",
    )
    .expect("create trigger");
    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "exams.upload",
        json!({ "title": "실패", "grade": "1", "classNumber": "3", "text": SHEET }),
    );
    assert_eq!(error_code(&failed), Some("ingest_failed"));
    let listed = request_ok(&mut stdin, &mut reader, "3a", "exams.list", json!({}));
    assert_eq!(listed["exams"].as_array().map(|a| a.len()), Some(1));
    side.execute_batch("DROP TRIGGER reject_results;")
        .expect("drop trigger");

    let blank_title = request(
        &mut stdin,
        &mut reader,
        "4",
        "exams.upload",
        json!({ "title": " ", "grade": "1", "classNumber": "3", "text": "" }),
    );
    assert_eq!(error_code(&blank_title), Some("bad_params"));

    let missing_source = request(
        &mut stdin,
        &mut reader,
        "5",
        "exams.upload",
        json!({ "title": "x", "grade": "1", "classNumber": "3" }),
    );
    assert_eq!(error_code(&missing_source), Some("bad_params"));

    let unreadable = request(
        &mut stdin,
        &mut reader,
        "6",
        "exams.upload",
        json!({
            "title": "x",
            "grade": "1",
            "classNumber": "3",
            "path": workspace.path().join("missing.csv").to_string_lossy()
        }),
    );
    assert_eq!(error_code(&unreadable), Some("read_failed"));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "exams.upload",
        json!({ "title": "빈 파일", "grade": "1", "classNumber": "3", "text": "" }),
    );
    assert_eq!(empty["studentCount"], json!(0));
    assert_eq!(empty["headerFound"], json!(false));

    let unknown = request(&mut stdin, &mut reader, "8", "exams.bogus", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));
}

#[test]
fn upload_reads_sheet_from_path() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let sheet_path = workspace.path().join("scores.csv");
    let (encoded, _, _) = encoding_rs::EUC_KR.encode(SHEET);
    std::fs::write(&sheet_path, &encoded).expect("write sheet");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let up = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.upload",
        json!({
            "title": "파일 업로드",
            "grade": "1",
            "classNumber": "3",
            "path": sheet_path.to_string_lossy()
        }),
    );
    assert_eq!(up["studentCount"], json!(2));
    assert_eq!(up["subjectList"], json!(["국어", "영어"]));
}
