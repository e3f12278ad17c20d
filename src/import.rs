use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::sheet::{csv_quote, RawCell};

/// Value shape of a canonical student field. Enum-kind fields pass through
/// as text; legality of the value is the record store's call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Date,
    Enum,
}

/// The closed set of student-record attributes a bulk sheet can carry.
/// Header cells resolve into this set through the alias table; anything
/// else is reported as an unmapped column and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StudentField {
    AdmissionNo,
    RollNo,
    ClassId,
    SectionId,
    FirstName,
    LastName,
    Gender,
    DateOfBirth,
    AdmissionDate,
    CategoryId,
    Religion,
    Caste,
    Mobile,
    Email,
    BloodGroup,
    HouseId,
    Height,
    Weight,
    FatherName,
    FatherPhone,
    FatherOccupation,
    MotherName,
    MotherPhone,
    MotherOccupation,
    GuardianName,
    GuardianPhone,
    GuardianEmail,
    GuardianOccupation,
    GuardianRelation,
    CurrentAddress,
    PermanentAddress,
}

impl StudentField {
    pub const ALL: &'static [StudentField] = &[
        StudentField::AdmissionNo,
        StudentField::RollNo,
        StudentField::ClassId,
        StudentField::SectionId,
        StudentField::FirstName,
        StudentField::LastName,
        StudentField::Gender,
        StudentField::DateOfBirth,
        StudentField::AdmissionDate,
        StudentField::CategoryId,
        StudentField::Religion,
        StudentField::Caste,
        StudentField::Mobile,
        StudentField::Email,
        StudentField::BloodGroup,
        StudentField::HouseId,
        StudentField::Height,
        StudentField::Weight,
        StudentField::FatherName,
        StudentField::FatherPhone,
        StudentField::FatherOccupation,
        StudentField::MotherName,
        StudentField::MotherPhone,
        StudentField::MotherOccupation,
        StudentField::GuardianName,
        StudentField::GuardianPhone,
        StudentField::GuardianEmail,
        StudentField::GuardianOccupation,
        StudentField::GuardianRelation,
        StudentField::CurrentAddress,
        StudentField::PermanentAddress,
    ];

    pub fn kind(self) -> FieldKind {
        match self {
            StudentField::RollNo
            | StudentField::ClassId
            | StudentField::SectionId
            | StudentField::CategoryId
            | StudentField::HouseId => FieldKind::Integer,
            StudentField::DateOfBirth | StudentField::AdmissionDate => FieldKind::Date,
            StudentField::Gender | StudentField::BloodGroup => FieldKind::Enum,
            StudentField::AdmissionNo
            | StudentField::FirstName
            | StudentField::LastName
            | StudentField::Religion
            | StudentField::Caste
            | StudentField::Mobile
            | StudentField::Email
            | StudentField::Height
            | StudentField::Weight
            | StudentField::FatherName
            | StudentField::FatherPhone
            | StudentField::FatherOccupation
            | StudentField::MotherName
            | StudentField::MotherPhone
            | StudentField::MotherOccupation
            | StudentField::GuardianName
            | StudentField::GuardianPhone
            | StudentField::GuardianEmail
            | StudentField::GuardianOccupation
            | StudentField::GuardianRelation
            | StudentField::CurrentAddress
            | StudentField::PermanentAddress => FieldKind::Text,
        }
    }

    /// Column name in the students table; also the stable snake_case name
    /// used in diagnostics.
    pub fn column(self) -> &'static str {
        match self {
            StudentField::AdmissionNo => "admission_no",
            StudentField::RollNo => "roll_no",
            StudentField::ClassId => "class_id",
            StudentField::SectionId => "section_id",
            StudentField::FirstName => "first_name",
            StudentField::LastName => "last_name",
            StudentField::Gender => "gender",
            StudentField::DateOfBirth => "date_of_birth",
            StudentField::AdmissionDate => "admission_date",
            StudentField::CategoryId => "category_id",
            StudentField::Religion => "religion",
            StudentField::Caste => "caste",
            StudentField::Mobile => "mobile",
            StudentField::Email => "email",
            StudentField::BloodGroup => "blood_group",
            StudentField::HouseId => "house_id",
            StudentField::Height => "height",
            StudentField::Weight => "weight",
            StudentField::FatherName => "father_name",
            StudentField::FatherPhone => "father_phone",
            StudentField::FatherOccupation => "father_occupation",
            StudentField::MotherName => "mother_name",
            StudentField::MotherPhone => "mother_phone",
            StudentField::MotherOccupation => "mother_occupation",
            StudentField::GuardianName => "guardian_name",
            StudentField::GuardianPhone => "guardian_phone",
            StudentField::GuardianEmail => "guardian_email",
            StudentField::GuardianOccupation => "guardian_occupation",
            StudentField::GuardianRelation => "guardian_relation",
            StudentField::CurrentAddress => "current_address",
            StudentField::PermanentAddress => "permanent_address",
        }
    }

    /// Header label the template generator writes. Must resolve back to the
    /// same field through `normalize_header` + the alias table.
    pub fn label(self) -> &'static str {
        match self {
            StudentField::AdmissionNo => "Admission No",
            StudentField::RollNo => "Roll No",
            StudentField::ClassId => "Class Id",
            StudentField::SectionId => "Section Id",
            StudentField::FirstName => "First Name",
            StudentField::LastName => "Last Name",
            StudentField::Gender => "Gender",
            StudentField::DateOfBirth => "Date of Birth (YYYY-MM-DD)",
            StudentField::AdmissionDate => "Admission Date (YYYY-MM-DD)",
            StudentField::CategoryId => "Category Id",
            StudentField::Religion => "Religion",
            StudentField::Caste => "Caste",
            StudentField::Mobile => "Mobile",
            StudentField::Email => "Email",
            StudentField::BloodGroup => "Blood Group",
            StudentField::HouseId => "House Id",
            StudentField::Height => "Height",
            StudentField::Weight => "Weight",
            StudentField::FatherName => "Father Name",
            StudentField::FatherPhone => "Father Phone",
            StudentField::FatherOccupation => "Father Occupation",
            StudentField::MotherName => "Mother Name",
            StudentField::MotherPhone => "Mother Phone",
            StudentField::MotherOccupation => "Mother Occupation",
            StudentField::GuardianName => "Guardian Name",
            StudentField::GuardianPhone => "Guardian Phone",
            StudentField::GuardianEmail => "Guardian Email",
            StudentField::GuardianOccupation => "Guardian Occupation",
            StudentField::GuardianRelation => "Guardian Relation",
            StudentField::CurrentAddress => "Current Address",
            StudentField::PermanentAddress => "Permanent Address",
        }
    }

    /// Recognized header spellings, already normalized.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            StudentField::AdmissionNo => {
                &["admission no", "admission number", "admission_no", "adm no"]
            }
            StudentField::RollNo => &["roll no", "roll number", "roll_no"],
            StudentField::ClassId => &["class id", "class", "class_id"],
            StudentField::SectionId => &["section id", "section", "section_id"],
            StudentField::FirstName => &["first name", "firstname", "first_name"],
            StudentField::LastName => &["last name", "lastname", "last_name"],
            StudentField::Gender => &["gender", "sex"],
            StudentField::DateOfBirth => {
                &["date of birth", "dob", "birth date", "birthdate", "date_of_birth"]
            }
            StudentField::AdmissionDate => {
                &["admission date", "admission_date", "date of admission"]
            }
            StudentField::CategoryId => &["category id", "category", "category_id"],
            StudentField::Religion => &["religion"],
            StudentField::Caste => &["caste"],
            StudentField::Mobile => &["mobile", "mobile no", "mobile number", "phone"],
            StudentField::Email => &["email", "email address", "e-mail"],
            StudentField::BloodGroup => &["blood group", "blood_group", "bloodgroup"],
            StudentField::HouseId => &["house id", "house", "house_id"],
            StudentField::Height => &["height"],
            StudentField::Weight => &["weight"],
            StudentField::FatherName => {
                &["father name", "father_name", "father's name", "fathers name"]
            }
            StudentField::FatherPhone => &["father phone", "father_phone", "father mobile"],
            StudentField::FatherOccupation => &["father occupation", "father_occupation"],
            StudentField::MotherName => {
                &["mother name", "mother_name", "mother's name", "mothers name"]
            }
            StudentField::MotherPhone => &["mother phone", "mother_phone", "mother mobile"],
            StudentField::MotherOccupation => &["mother occupation", "mother_occupation"],
            StudentField::GuardianName => &["guardian name", "guardian_name"],
            StudentField::GuardianPhone => &["guardian phone", "guardian_phone", "guardian mobile"],
            StudentField::GuardianEmail => &["guardian email", "guardian_email"],
            StudentField::GuardianOccupation => &["guardian occupation", "guardian_occupation"],
            StudentField::GuardianRelation => {
                &["guardian relation", "guardian_relation", "relation"]
            }
            StudentField::CurrentAddress => {
                &["current address", "current_address", "present address"]
            }
            StudentField::PermanentAddress => &["permanent address", "permanent_address"],
        }
    }

    pub fn from_alias(normalized: &str) -> Option<StudentField> {
        StudentField::ALL
            .iter()
            .copied()
            .find(|f| f.aliases().contains(&normalized))
    }
}

/// Every field must carry at least one alias and its template label must
/// resolve back to it. Checked once at startup (debug builds) and by tests.
pub fn alias_table_is_consistent() -> bool {
    StudentField::ALL.iter().all(|f| {
        !f.aliases().is_empty()
            && StudentField::from_alias(&normalize_header(f.label())) == Some(*f)
    })
}

/// Lowercase, trim, and drop a trailing parenthetical annotation such as a
/// format hint. Applied identically when building and querying the alias
/// table; idempotent.
pub fn normalize_header(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some(pos) = s.find('(') {
        s.truncate(pos);
    }
    s.trim().to_string()
}

fn header_text(cell: &RawCell) -> String {
    match cell {
        RawCell::Empty => String::new(),
        RawCell::Text(s) => s.clone(),
        RawCell::Number(n) => format!("{}", n),
        RawCell::Date(dt) => dt.date().format("%Y-%m-%d").to_string(),
    }
}

/// Column index -> canonical field, positionally aligned with the header
/// row. Built once per import, immutable afterward.
pub type ColumnMap = Vec<Option<StudentField>>;

pub fn build_column_map(header: &[RawCell]) -> ColumnMap {
    header
        .iter()
        .map(|cell| StudentField::from_alias(&normalize_header(&header_text(cell))))
        .collect()
}

/// Header texts that resolved to no canonical field. Blank header cells are
/// skipped; there is nothing useful to show for them.
pub fn unmapped_headers(header: &[RawCell], map: &ColumnMap) -> Vec<String> {
    header
        .iter()
        .zip(map.iter())
        .filter(|(cell, field)| field.is_none() && !cell.is_empty())
        .map(|(cell, _)| header_text(cell).trim().to_string())
        .collect()
}

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// Any candidate outside the plausible year window is a failed parse, even
/// when the underlying parser succeeded. Guards against epoch-zero dates
/// from silent misparses.
fn check_year(d: NaiveDate) -> Option<NaiveDate> {
    use chrono::Datelike;
    if d.year() < MIN_YEAR || d.year() > MAX_YEAR {
        None
    } else {
        Some(d)
    }
}

/// Spreadsheet day-count to calendar date. The 1900 date system counts a
/// phantom 1900-02-29, so day-counts past the fake leap day run one high;
/// decrement them against the 1899-12-31 epoch. Day-count 59 lands on
/// 1900-02-28 and 61 on 1900-03-01.
fn day_count_to_date(n: f64) -> Option<NaiveDate> {
    if !n.is_finite() || n <= 0.0 || n >= 100_000.0 {
        return None;
    }
    let mut days = n.trunc() as i64;
    if days >= 60 {
        days -= 1;
    }
    NaiveDate::from_ymd_opt(1899, 12, 31)?.checked_add_signed(Duration::days(days))
}

fn numeric_group(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 {
        return None;
    }
    let year = numeric_group(parts[0])? as i32;
    let month = numeric_group(parts[1])?;
    let day = numeric_group(parts[2])?;
    if parts[1].len() > 2 || parts[2].len() > 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `D/M/YYYY` or `D-M-YYYY`, disambiguated in documented order: a first
/// group over 12 must be the day; else a second group over 12 must be the
/// day; else day-first by convention, falling back to month-first only when
/// the day-first reading is not a real calendar date.
fn parse_slashed_date(s: &str) -> Option<NaiveDate> {
    let sep = if s.contains('/') { '/' } else { '-' };
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 3 || parts[0].len() > 2 || parts[1].len() > 2 || parts[2].len() != 4 {
        return None;
    }
    let first = numeric_group(parts[0])?;
    let second = numeric_group(parts[1])?;
    let year = numeric_group(parts[2])? as i32;

    if first > 12 {
        NaiveDate::from_ymd_opt(year, second, first)
    } else if second > 12 {
        NaiveDate::from_ymd_opt(year, first, second)
    } else {
        NaiveDate::from_ymd_opt(year, second, first)
            .or_else(|| NaiveDate::from_ymd_opt(year, first, second))
    }
}

const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    if let Some(d) = parse_iso_date(s) {
        return Some(d);
    }
    if let Some(d) = parse_slashed_date(s) {
        return Some(d);
    }
    FALLBACK_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// The date disambiguator. Dispatches on the raw cell shape and applies the
/// year window to every branch.
pub fn parse_cell_date(raw: &RawCell) -> Option<NaiveDate> {
    let candidate = match raw {
        RawCell::Empty => None,
        RawCell::Date(dt) => Some(dt.date()),
        RawCell::Number(n) => day_count_to_date(*n),
        RawCell::Text(s) => parse_date_text(s.trim()),
    };
    candidate.and_then(check_year)
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// A typed value ready for the record store. Dates are already normalized
/// to their `YYYY-MM-DD` form.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Date(String),
}

fn cell_text(raw: &RawCell) -> Option<String> {
    let s = match raw {
        RawCell::Empty => return None,
        RawCell::Text(s) => s.trim().to_string(),
        RawCell::Number(n) => format!("{}", n),
        RawCell::Date(dt) => format_date(dt.date()),
    };
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("undefined") {
        None
    } else {
        Some(s)
    }
}

fn cell_integer(raw: &RawCell) -> Option<i64> {
    match raw {
        RawCell::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        RawCell::Text(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Coerce one raw cell into the field's value shape. Never errors: every
/// failure path is "field omitted", leaving validation to the required-field
/// gate and the record store.
pub fn coerce_cell(kind: FieldKind, raw: &RawCell) -> Option<TypedValue> {
    match kind {
        FieldKind::Text | FieldKind::Enum => cell_text(raw).map(TypedValue::Text),
        FieldKind::Integer => cell_integer(raw).map(TypedValue::Integer),
        FieldKind::Date => parse_cell_date(raw).map(|d| TypedValue::Date(format_date(d))),
    }
}

/// One row's data after coercion, prior to submission. `row` is the 1-based
/// sheet row number (header is row 1).
#[derive(Clone, Debug)]
pub struct CandidateRecord {
    pub row: usize,
    pub fields: BTreeMap<StudentField, TypedValue>,
}

impl CandidateRecord {
    pub fn text(&self, field: StudentField) -> Option<&str> {
        match self.fields.get(&field) {
            Some(TypedValue::Text(s)) | Some(TypedValue::Date(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, field: StudentField) -> Option<i64> {
        match self.fields.get(&field) {
            Some(TypedValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RowDiagnostic {
    pub row: usize,
    pub field: Option<&'static str>,
    pub code: &'static str,
    pub message: String,
}

/// Result of running the assembler over a sheet's data rows. Fully blank
/// rows count toward nothing; skipped rows are reported, not submitted.
pub struct AssembledBatch {
    pub rows_total: usize,
    pub records: Vec<CandidateRecord>,
    pub skipped_missing_required: usize,
    pub diagnostics: Vec<RowDiagnostic>,
}

pub fn assemble_rows(map: &ColumnMap, rows: &[Vec<RawCell>]) -> AssembledBatch {
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    let mut rows_total = 0usize;
    let mut skipped = 0usize;

    for (i, row) in rows.iter().enumerate() {
        let sheet_row = i + 2;
        if row.iter().all(|c| c.is_empty()) {
            continue;
        }
        rows_total += 1;

        let mut fields = BTreeMap::new();
        for (col, field) in map.iter().enumerate() {
            let Some(field) = field else { continue };
            let Some(cell) = row.get(col) else { continue };
            if cell.is_empty() {
                continue;
            }
            match coerce_cell(field.kind(), cell) {
                Some(value) => {
                    fields.insert(*field, value);
                }
                None => diagnostics.push(RowDiagnostic {
                    row: sheet_row,
                    field: Some(field.column()),
                    code: "coerce_failed",
                    message: format!("value could not be read as {:?}", field.kind()),
                }),
            }
        }

        let record = CandidateRecord {
            row: sheet_row,
            fields,
        };
        let has_admission = record
            .text(StudentField::AdmissionNo)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        let has_first_name = record
            .text(StudentField::FirstName)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_admission || !has_first_name {
            skipped += 1;
            diagnostics.push(RowDiagnostic {
                row: sheet_row,
                field: None,
                code: "missing_required",
                message: "admission no and first name are required".to_string(),
            });
            continue;
        }

        records.push(record);
    }

    AssembledBatch {
        rows_total,
        records,
        skipped_missing_required: skipped,
        diagnostics,
    }
}

/// Example values for the template's data row; shaped so a round trip
/// through the import pipeline submits cleanly.
fn example_value(field: StudentField) -> &'static str {
    match field {
        StudentField::AdmissionNo => "2024001",
        StudentField::RollNo => "12",
        StudentField::ClassId => "1",
        StudentField::SectionId => "1",
        StudentField::FirstName => "Aarav",
        StudentField::LastName => "Sharma",
        StudentField::Gender => "Male",
        StudentField::DateOfBirth => "2012-04-18",
        StudentField::AdmissionDate => "2024-06-01",
        StudentField::CategoryId => "1",
        StudentField::Religion => "Hindu",
        StudentField::Caste => "General",
        StudentField::Mobile => "9876543210",
        StudentField::Email => "aarav.sharma@example.com",
        StudentField::BloodGroup => "O+",
        StudentField::HouseId => "1",
        StudentField::Height => "142",
        StudentField::Weight => "36",
        StudentField::FatherName => "Rajesh Sharma",
        StudentField::FatherPhone => "9876500001",
        StudentField::FatherOccupation => "Engineer",
        StudentField::MotherName => "Priya Sharma",
        StudentField::MotherPhone => "9876500002",
        StudentField::MotherOccupation => "Teacher",
        StudentField::GuardianName => "Rajesh Sharma",
        StudentField::GuardianPhone => "9876500001",
        StudentField::GuardianEmail => "rajesh.sharma@example.com",
        StudentField::GuardianOccupation => "Engineer",
        StudentField::GuardianRelation => "Father",
        StudentField::CurrentAddress => "12 Lake View Road, Pune",
        StudentField::PermanentAddress => "12 Lake View Road, Pune",
    }
}

/// The downloadable template: canonical header row plus one example record.
/// Feeding this back through the canonicalizer resolves every column.
pub fn template_csv() -> String {
    let header = StudentField::ALL
        .iter()
        .map(|f| csv_quote(f.label()))
        .collect::<Vec<_>>()
        .join(",");
    let example = StudentField::ALL
        .iter()
        .map(|f| csv_quote(example_value(*f)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}\n{}\n", header, example)
}
