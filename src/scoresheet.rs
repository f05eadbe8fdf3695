use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// First-column label of the header row in school-record exports.
pub const HEADER_MARKER: &str = "번호";

/// Columns 0..3 are number, name and row label; subjects start here.
const FIRST_SUBJECT_COL: usize = 3;
const LABEL_COL: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_str: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etc: Option<String>,
}

impl SubjectScore {
    fn slot_mut(&mut self, key: AttributeKey) -> &mut Option<String> {
        match key {
            AttributeKey::Achievement => &mut self.achievement,
            AttributeKey::Rank => &mut self.rank,
            AttributeKey::RankStr => &mut self.rank_str,
            AttributeKey::TotalCount => &mut self.total_count,
            AttributeKey::Etc => &mut self.etc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentScoreRecord {
    pub student_id: String,
    pub number: String,
    pub name: String,
    pub scores: BTreeMap<String, SubjectScore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedScoreSheet {
    pub grade: String,
    pub class_number: String,
    pub subject_list: Vec<String>,
    pub students: Vec<StudentScoreRecord>,
    /// 1-based line of the `번호` header, if one was found.
    pub header_line: Option<usize>,
    /// Non-blank lines after the header that were neither primary nor attribute rows.
    pub ignored_lines: usize,
}

/// Target attribute of a supplementary row, selected by its label column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey {
    Achievement,
    Rank,
    RankStr,
    TotalCount,
    Etc,
}

const ATTRIBUTE_LABELS: &[(&str, AttributeKey)] = &[
    ("성취도", AttributeKey::Achievement),
    ("석차등급", AttributeKey::Rank),
    ("석차", AttributeKey::RankStr),
    ("수강자수", AttributeKey::TotalCount),
];

impl AttributeKey {
    pub fn from_label(label: &str) -> Self {
        ATTRIBUTE_LABELS
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, k)| *k)
            .unwrap_or(AttributeKey::Etc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Header,
    Primary,
    Attribute(AttributeKey),
    Skip,
}

/// Classify one trimmed row given the scan state so far.
pub fn classify_row(fields: &[&str], header_found: bool, student_open: bool) -> RowKind {
    let first = fields.first().copied().unwrap_or("");
    if !header_found {
        return if first == HEADER_MARKER {
            RowKind::Header
        } else {
            RowKind::Skip
        };
    }
    if is_roll_number(first) {
        return RowKind::Primary;
    }
    let label = fields.get(LABEL_COL).copied().unwrap_or("");
    if student_open && !label.is_empty() {
        return RowKind::Attribute(AttributeKey::from_label(label));
    }
    RowKind::Skip
}

/// True when the token is non-empty and parses as a finite number.
pub fn is_roll_number(token: &str) -> bool {
    !token.is_empty()
        && token
            .parse::<f64>()
            .map(|v| v.is_finite())
            .unwrap_or(false)
}

pub fn pad2(s: &str) -> String {
    let n = s.chars().count();
    if n >= 2 {
        s.to_string()
    } else {
        format!("{}{}", "0".repeat(2 - n), s)
    }
}

pub fn derive_student_id(grade: &str, class_number: &str, number: &str) -> String {
    format!("{}{}{}", grade, pad2(class_number), pad2(number))
}

fn cell<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields.get(idx).copied().filter(|s| !s.is_empty())
}

pub fn parse_score_sheet(text: &str, grade: &str, class_number: &str) -> ParsedScoreSheet {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut out = ParsedScoreSheet {
        grade: grade.to_string(),
        class_number: class_number.to_string(),
        ..Default::default()
    };
    let mut open: Option<StudentScoreRecord> = None;

    for (line_no, line) in text.split('\n').enumerate() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let header_found = out.header_line.is_some();

        match classify_row(&fields, header_found, open.is_some()) {
            RowKind::Header => {
                out.subject_list = fields
                    .iter()
                    .skip(FIRST_SUBJECT_COL)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect();
                out.header_line = Some(line_no + 1);
            }
            RowKind::Primary => {
                if let Some(done) = open.take() {
                    out.students.push(done);
                }
                let number = pad2(fields[0]);
                let mut scores = BTreeMap::new();
                for (i, subj) in out.subject_list.iter().enumerate() {
                    let entry: &mut SubjectScore = scores.entry(subj.clone()).or_default();
                    if let Some(v) = cell(&fields, FIRST_SUBJECT_COL + i) {
                        entry.raw = Some(v.to_string());
                    }
                }
                open = Some(StudentScoreRecord {
                    student_id: derive_student_id(grade, class_number, &number),
                    number,
                    name: fields.get(1).copied().unwrap_or("").to_string(),
                    scores,
                });
            }
            RowKind::Attribute(key) => {
                let Some(student) = open.as_mut() else {
                    continue;
                };
                for (i, subj) in out.subject_list.iter().enumerate() {
                    let Some(entry) = student.scores.get_mut(subj) else {
                        continue;
                    };
                    if let Some(v) = cell(&fields, FIRST_SUBJECT_COL + i) {
                        *entry.slot_mut(key) = Some(v.to_string());
                    }
                }
            }
            RowKind::Skip => {
                if header_found && fields.iter().any(|f| !f.is_empty()) {
                    out.ignored_lines += 1;
                }
            }
        }
    }

    if let Some(done) = open.take() {
        out.students.push(done);
    }

    tracing::debug!(
        subjects = out.subject_list.len(),
        students = out.students.len(),
        ignored = out.ignored_lines,
        "parsed score sheet"
    );
    out
}

/// Read an export file as text. NEIS downloads are often EUC-KR rather than UTF-8.
pub fn read_score_sheet_file(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)?;
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(s.to_string());
    }
    let (text, _, had_errors) = encoding_rs::EUC_KR.decode(bytes);
    if had_errors {
        tracing::warn!(path = %path.display(), "score sheet decoded with replacement characters");
    }
    Ok(text.into_owned())
}
