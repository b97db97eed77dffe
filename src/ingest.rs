//! Input sheet ingestion.
//!
//! Sheets are JSON arrays of row objects, as exported from a spreadsheet.
//! Header names vary between exports, so every logical field carries a list
//! of candidate names. Columns are resolved once per sheet and rows come out
//! as typed records; nothing downstream looks at raw headers.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::directory::DirectoryRecord;
use crate::error::IngestError;
use crate::mail::clean_email;

/// One request to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditCandidate {
    pub client_code: String,
    pub client_name: String,
    /// Normalized delegate code (`A123`).
    pub delegate_code: String,
}

const CLIENT_CODE: &[&str] = &["Cod Cliente", "Código Cliente", "Conta", "Codigo Cliente"];
const CLIENT_NAME: &[&str] = &["Nome Cliente", "Cliente", "Nome do Cliente"];
const DELEGATE_CODE: &[&str] = &["Cod Assessor", "Código Assessor", "Codigo Assessor", "Assessor"];

const PRO_CODE: &[&str] = &["Cod Assessor", "Código", "Codigo", "Cod Profissional"];
const PRO_NAME: &[&str] = &["Nome Assessor", "Nome", "Assessor"];
const PRO_EMAIL: &[&str] = &["E-mail", "Email", "Email Profissional", "E-mail Profissional"];
const PRO_LEADER_CODE: &[&str] = &["Cod Lider", "Código Líder", "Codigo Lider", "Cod Supervisor"];
const PRO_LEADER_EMAIL: &[&str] = &[
    "E-mail Líder",
    "Email Lider",
    "E-mail Supervisor",
    "Email Supervisor",
];

/// A loaded sheet: rows plus the column names seen, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl Sheet {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::parse(&name, &content).map_err(|reason| IngestError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse a JSON array of row objects.
    pub fn parse(name: &str, content: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
        let Value::Array(items) = value else {
            return Err("expected a JSON array of rows".into());
        };

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let Value::Object(row) = item else {
                return Err(format!("row {} is not an object", i + 1));
            };
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
            rows.push(row);
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column matching any candidate, candidates tried in order.
    pub fn find_column(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|cand| {
            let wanted = normalize_header(cand);
            self.columns
                .iter()
                .find(|col| normalize_header(col) == wanted)
                .cloned()
        })
    }

    fn cell(row: &Map<String, Value>, column: &str) -> String {
        row.get(column).map(cell_text).unwrap_or_default()
    }
}

/// Text of a cell. Integral numbers lose their `.0`; nulls are empty.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Header comparison key: lowercase, accents folded, only letters and digits.
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Canonical delegate code: integral numbers lose their decimal part,
/// letters are uppercased and an `A` prefix is added when missing.
pub fn normalize_delegate_code(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return String::new();
    }

    let mut code = s.to_string();
    if let Ok(f) = s.replace(',', ".").parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 {
            code = format!("{}", f as i64);
        }
    }

    let code = code.to_uppercase();
    if code.starts_with('A') {
        code
    } else {
        format!("A{code}")
    }
}

fn require(
    sheet: &Sheet,
    fields: &[(&str, &[&str])],
) -> Result<Vec<String>, IngestError> {
    let resolved: Vec<(&str, Option<String>)> = fields
        .iter()
        .map(|(field, candidates)| (*field, sheet.find_column(candidates)))
        .collect();

    if resolved.iter().any(|(_, col)| col.is_none()) {
        let summary = resolved
            .iter()
            .map(|(field, col)| format!("{field}={}", col.as_deref().unwrap_or("None")))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(IngestError::MissingColumns {
            sheet: sheet.name.clone(),
            resolved: summary,
        });
    }

    Ok(resolved.into_iter().filter_map(|(_, col)| col).collect())
}

/// Typed audit candidates. Rows without a delegate code or client code
/// are dropped.
pub fn audit_candidates(sheet: &Sheet) -> Result<Vec<AuditCandidate>, IngestError> {
    let cols = require(
        sheet,
        &[
            ("cod_cliente", CLIENT_CODE),
            ("nome_cliente", CLIENT_NAME),
            ("cod_assessor", DELEGATE_CODE),
        ],
    )?;
    let (c_code, c_name, c_delegate) = (&cols[0], &cols[1], &cols[2]);
    debug!(client_code = %c_code, client_name = %c_name, delegate = %c_delegate, "Audit columns");

    let candidates: Vec<AuditCandidate> = sheet
        .rows
        .iter()
        .filter_map(|row| {
            let client_code = Sheet::cell(row, c_code);
            let delegate_code = normalize_delegate_code(&Sheet::cell(row, c_delegate));
            if delegate_code.is_empty()
                || client_code.is_empty()
                || client_code.eq_ignore_ascii_case("nan")
            {
                return None;
            }
            Some(AuditCandidate {
                client_code,
                client_name: Sheet::cell(row, c_name),
                delegate_code,
            })
        })
        .collect();

    info!(
        sheet = %sheet.name,
        rows = sheet.len(),
        valid = candidates.len(),
        "Audit sheet loaded"
    );
    Ok(candidates)
}

/// Typed directory records. Rows without a code are dropped; duplicates
/// are left for [`crate::directory::InMemoryDirectory`] to collapse.
pub fn directory_records(sheet: &Sheet) -> Result<Vec<DirectoryRecord>, IngestError> {
    let cols = require(
        sheet,
        &[("cod", PRO_CODE), ("nome", PRO_NAME), ("email", PRO_EMAIL)],
    )?;
    let (p_code, p_name, p_email) = (&cols[0], &cols[1], &cols[2]);
    let p_leader_code = sheet.find_column(PRO_LEADER_CODE);
    let p_leader_email = sheet.find_column(PRO_LEADER_EMAIL);

    let records: Vec<DirectoryRecord> = sheet
        .rows
        .iter()
        .filter_map(|row| {
            let code = normalize_delegate_code(&Sheet::cell(row, p_code));
            if code.is_empty() {
                return None;
            }
            let leader_code = p_leader_code
                .as_deref()
                .map(|c| normalize_delegate_code(&Sheet::cell(row, c)))
                .filter(|c| !c.is_empty());
            let leader_email = p_leader_email
                .as_deref()
                .map(|c| clean_email(&Sheet::cell(row, c)))
                .filter(|e| !e.is_empty());
            Some(DirectoryRecord {
                code,
                name: Sheet::cell(row, p_name),
                email: clean_email(&Sheet::cell(row, p_email)),
                leader_code,
                leader_email,
            })
        })
        .collect();

    info!(sheet = %sheet.name, rows = sheet.len(), valid = records.len(), "Directory sheet loaded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn delegate_codes_normalize() {
        assert_eq!(normalize_delegate_code("123"), "A123");
        assert_eq!(normalize_delegate_code("123.0"), "A123");
        assert_eq!(normalize_delegate_code("123,0"), "A123");
        assert_eq!(normalize_delegate_code(" a77 "), "A77");
        assert_eq!(normalize_delegate_code("b5"), "AB5");
        assert_eq!(normalize_delegate_code(""), "");
        assert_eq!(normalize_delegate_code("nan"), "");
    }

    #[test]
    fn headers_match_across_accents_and_punctuation() {
        assert_eq!(normalize_header("Código Líder"), "codigolider");
        assert_eq!(normalize_header("E-mail"), normalize_header("email"));
    }

    #[test]
    fn numeric_cells_lose_trailing_zero() {
        assert_eq!(cell_text(&serde_json::json!(1001.0)), "1001");
        assert_eq!(cell_text(&serde_json::json!(42)), "42");
        assert_eq!(cell_text(&serde_json::json!(1.5)), "1.5");
        assert_eq!(cell_text(&Value::Null), "");
    }

    #[test]
    fn audit_rows_are_typed_and_filtered() {
        let sheet = Sheet::parse(
            "auditoria",
            r#"[
                {"Código Cliente": 1001, "Nome do Cliente": "ACME", "Assessor": 12.0},
                {"Código Cliente": "nan", "Nome do Cliente": "Ghost", "Assessor": "A1"},
                {"Código Cliente": 1002, "Nome do Cliente": "Beta", "Assessor": null}
            ]"#,
        )
        .unwrap();
        let rows = audit_candidates(&sheet).unwrap();
        assert_eq!(
            rows,
            vec![AuditCandidate {
                client_code: "1001".into(),
                client_name: "ACME".into(),
                delegate_code: "A12".into(),
            }]
        );
    }

    #[test]
    fn missing_columns_are_reported() {
        let sheet = Sheet::parse("auditoria", r#"[{"Conta": "1", "Nome": "x"}]"#).unwrap();
        match audit_candidates(&sheet).unwrap_err() {
            IngestError::MissingColumns { sheet, resolved } => {
                assert_eq!(sheet, "auditoria");
                assert!(resolved.contains("cod_cliente=Conta"));
                assert!(resolved.contains("cod_assessor=None"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn directory_rows_carry_leader_fields() {
        let sheet = Sheet::parse(
            "profissionais",
            r#"[
                {"Codigo": "12", "Nome": "Ana", "E-mail": " ana@example.com ", "Cod Lider": 90},
                {"Codigo": "", "Nome": "Nobody", "E-mail": "x@example.com"},
                {"Codigo": "13", "Nome": "Bia", "E-mail": "bia@example.com", "Email Supervisor": "boss@example.com"}
            ]"#,
        )
        .unwrap();
        let records = directory_records(&sheet).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].email, "ana@example.com");
        assert_eq!(records[0].leader_code.as_deref(), Some("A90"));
        assert_eq!(records[1].leader_code, None);
        assert_eq!(records[1].leader_email.as_deref(), Some("boss@example.com"));
    }

    #[test]
    fn load_reports_io_and_parse_errors() {
        let dir = TempDir::new().unwrap();
        let missing = Sheet::load(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(missing, IngestError::Io { .. }));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"not": "an array"}"#).unwrap();
        let bad = Sheet::load(&path).unwrap_err();
        assert!(matches!(bad, IngestError::Parse { .. }));
    }
}
