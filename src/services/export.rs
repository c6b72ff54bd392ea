//! CSV and spreadsheet rendering of warehouse rows.

use rust_xlsxwriter::{Format, Workbook};
use serde_json::{Number, Value};

use crate::{error::AppError, models::dataset::Row};

/// Excel's limit on worksheet name length.
const MAX_SHEET_NAME_LEN: usize = 31;

/// Largest integer magnitude an `f64` cell holds without rounding (2^53).
const MAX_EXACT_INTEGER: u64 = 1 << 53;

const ILLEGAL_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Render rows as CSV.
///
/// The header row comes from the first row's keys. Fields containing a comma,
/// quote, CR or LF are quoted with embedded quotes doubled. Nulls become empty
/// fields. No rows renders as an empty document.
pub fn rows_to_csv(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };

    let headers: Vec<&String> = first.keys().collect();
    let mut out = String::new();

    let header_line: Vec<String> = headers.iter().map(|h| escape_csv_field(h)).collect();
    out.push_str(&header_line.join(","));
    out.push('\n');

    for row in rows {
        let fields: Vec<String> = headers
            .iter()
            .map(|h| escape_csv_field(&cell_text(row.get(h.as_str()))))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Make a table name acceptable as a worksheet name.
///
/// Drops `[ ] : * ? / \`, trims leading and trailing apostrophes and truncates to
/// 31 characters. An empty result falls back to `Sheet`.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !ILLEGAL_SHEET_CHARS.contains(c))
        .collect();
    let truncated: String = cleaned
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    let trimmed = truncated.trim_end_matches('\'').to_string();

    if trimmed.is_empty() {
        "Sheet".to_string()
    } else {
        trimmed
    }
}

/// Render one worksheet per `(table name, rows)` pair into an `.xlsx` file.
///
/// Sheet names are sanitized and made unique (case-insensitively) with a
/// numeric suffix.
pub fn rows_to_xlsx(sheets: &[(String, Vec<Row>)]) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let mut used_names: Vec<String> = Vec::with_capacity(sheets.len());

    for (table, rows) in sheets {
        let name = unique_sheet_name(&sanitize_sheet_name(table), &used_names);
        used_names.push(name.to_lowercase());

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&name)?;

        let Some(first) = rows.first() else {
            continue;
        };
        let headers: Vec<&String> = first.keys().collect();

        for (col, header) in headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, header.as_str(), &header_format)?;
        }

        for (index, row) in rows.iter().enumerate() {
            let row_num = (index + 1) as u32;
            for (col, header) in headers.iter().enumerate() {
                let col = col as u16;
                match row.get(header.as_str()) {
                    None | Some(Value::Null) => {}
                    Some(Value::Number(n)) => match exact_f64(n) {
                        Some(f) => {
                            worksheet.write_number(row_num, col, f)?;
                        }
                        None => {
                            worksheet.write_string(row_num, col, n.to_string())?;
                        }
                    },
                    Some(Value::Bool(b)) => {
                        worksheet.write_boolean(row_num, col, *b)?;
                    }
                    Some(Value::String(s)) => {
                        worksheet.write_string(row_num, col, s.as_str())?;
                    }
                    Some(other) => {
                        worksheet.write_string(row_num, col, other.to_string())?;
                    }
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Numeric cell value, or `None` when the number would lose precision as an
/// `f64` and must be written as text instead.
fn exact_f64(n: &Number) -> Option<f64> {
    if let Some(i) = n.as_i64() {
        return (i.unsigned_abs() <= MAX_EXACT_INTEGER).then_some(i as f64);
    }
    if let Some(u) = n.as_u64() {
        return (u <= MAX_EXACT_INTEGER).then_some(u as f64);
    }
    n.as_f64()
}

fn unique_sheet_name(base: &str, used_lowercase: &[String]) -> String {
    if !used_lowercase.contains(&base.to_lowercase()) {
        return base.to_string();
    }

    let mut suffix = 2;
    loop {
        let tag = format!("_{suffix}");
        let stem: String = base
            .chars()
            .take(MAX_SHEET_NAME_LEN - tag.len())
            .collect();
        let candidate = format!("{stem}{tag}");
        if !used_lowercase.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        suffix += 1;
    }
}
