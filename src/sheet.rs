use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::NaiveDateTime;
use thiserror::Error;

/// A cell as it comes off the sheet, before any field typing. Workbook
/// readers distinguish real date cells and numeric cells; CSV yields text.
#[derive(Clone, Debug, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl RawCell {
    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// First row of the file plus the data rows, positionally aligned.
pub struct Sheet {
    pub header: Vec<RawCell>,
    pub rows: Vec<Vec<RawCell>>,
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot open workbook: {0}")]
    Workbook(String),
    #[error("file has no header row")]
    NoHeader,
}

pub fn load_sheet(path: &Path) -> Result<Sheet, SheetError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        load_csv(path)
    } else {
        load_workbook(path)
    }
}

fn load_csv(path: &Path) -> Result<Sheet, SheetError> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return Err(SheetError::NoHeader);
    };
    if header_line.trim().is_empty() {
        return Err(SheetError::NoHeader);
    }

    let header = parse_csv_record(header_line)
        .into_iter()
        .map(text_cell)
        .collect();
    // Blank lines stay in place as empty rows so row numbers keep matching
    // the file; the assembler skips them.
    let rows = lines
        .map(|line| {
            if line.trim().is_empty() {
                Vec::new()
            } else {
                parse_csv_record(line).into_iter().map(text_cell).collect()
            }
        })
        .collect();

    Ok(Sheet { header, rows })
}

fn load_workbook(path: &Path) -> Result<Sheet, SheetError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| SheetError::Workbook(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SheetError::NoHeader)?
        .map_err(|e| SheetError::Workbook(e.to_string()))?;

    let mut rows_iter = range.rows();
    let Some(header_row) = rows_iter.next() else {
        return Err(SheetError::NoHeader);
    };

    let header = header_row.iter().map(raw_cell).collect();
    let rows = rows_iter
        .map(|row| row.iter().map(raw_cell).collect())
        .collect();

    Ok(Sheet { header, rows })
}

fn text_cell(s: String) -> RawCell {
    if s.trim().is_empty() {
        RawCell::Empty
    } else {
        RawCell::Text(s)
    }
}

fn raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::String(s) => text_cell(s.clone()),
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Bool(b) => RawCell::Text(b.to_string()),
        // A date cell with a non-finite serial has no datetime; treat as blank.
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) => RawCell::Date(dt),
            None => RawCell::Empty,
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => text_cell(s.clone()),
        Data::Error(_) => RawCell::Empty,
    }
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_record_handles_quotes_and_embedded_commas() {
        assert_eq!(parse_csv_record("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(
            parse_csv_record("\"Khan, Ali\",7,\"say \"\"hi\"\"\""),
            vec!["Khan, Ali", "7", "say \"hi\""]
        );
        assert_eq!(parse_csv_record("x,,"), vec!["x", "", ""]);
    }

    #[test]
    fn csv_quote_round_trips_through_parse() {
        for s in ["plain", "with,comma", "with \"quote\"", ""] {
            let quoted = csv_quote(s);
            assert_eq!(parse_csv_record(&quoted), vec![s.to_string()]);
        }
    }

    #[test]
    fn load_csv_keeps_blank_lines_positional() {
        let dir = std::env::temp_dir().join(format!("schooldesk-sheet-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("rows.csv");
        std::fs::write(&path, "a,b\n1,2\n\n3,4\n").expect("write csv");

        let sheet = load_sheet(&path).expect("load");
        assert_eq!(sheet.header.len(), 2);
        assert_eq!(sheet.rows.len(), 3);
        assert!(sheet.rows[1].is_empty());
        assert_eq!(sheet.rows[2][0], RawCell::Text("3".to_string()));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_file_is_a_header_error() {
        let dir = std::env::temp_dir().join(format!("schooldesk-sheet-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("empty.csv");
        std::fs::write(&path, "").expect("write csv");

        assert!(matches!(load_sheet(&path), Err(SheetError::NoHeader)));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn workbook_cells_map_to_raw_cells() {
        assert_eq!(raw_cell(&Data::Empty), RawCell::Empty);
        assert_eq!(raw_cell(&Data::String("  ".into())), RawCell::Empty);
        assert_eq!(
            raw_cell(&Data::String("Aisha".into())),
            RawCell::Text("Aisha".to_string())
        );
        assert_eq!(raw_cell(&Data::Int(7)), RawCell::Number(7.0));
        assert_eq!(raw_cell(&Data::Float(45000.0)), RawCell::Number(45000.0));
    }
}
