use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "scoresheet.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            grade TEXT NOT NULL,
            class_number TEXT NOT NULL,
            subject_list TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_created ON exams(created_at)",
        [],
    )?;

    // One row per student per exam; the composite key rejects duplicate
    // roll numbers inside a single sheet.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            number TEXT NOT NULL,
            name TEXT NOT NULL,
            scores TEXT NOT NULL,
            PRIMARY KEY(exam_id, student_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_student ON exam_results(student_id)",
        [],
    )?;

    Ok(conn)
}
