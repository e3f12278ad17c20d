use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schooldesk.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Schema creation is separate from open so tests can run against an
/// in-memory connection.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS houses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_no TEXT NOT NULL UNIQUE,
            roll_no INTEGER,
            class_id INTEGER,
            section_id INTEGER,
            first_name TEXT NOT NULL,
            last_name TEXT,
            gender TEXT,
            date_of_birth TEXT,
            admission_date TEXT,
            category_id INTEGER,
            religion TEXT,
            caste TEXT,
            mobile TEXT,
            email TEXT,
            blood_group TEXT,
            house_id INTEGER,
            height TEXT,
            weight TEXT,
            father_name TEXT,
            father_phone TEXT,
            father_occupation TEXT,
            mother_name TEXT,
            mother_phone TEXT,
            mother_occupation TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            guardian_email TEXT,
            guardian_occupation TEXT,
            guardian_relation TEXT,
            current_address TEXT,
            permanent_address TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(category_id) REFERENCES categories(id),
            FOREIGN KEY(house_id) REFERENCES houses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_section ON students(class_id, section_id)",
        [],
    )?;

    Ok(())
}
