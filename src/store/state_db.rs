use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::Result;

/// Run SQLite's `quick_check` against a state database, read-only.
///
/// Used by diagnostics only; migration treats the file as an opaque blob.
pub fn quick_check(path: &Path) -> Result<Vec<String>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare("PRAGMA quick_check")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut problems = Vec::new();
    for row in rows {
        let line = row?;
        if line != "ok" {
            problems.push(line);
        }
    }
    Ok(problems)
}
