//! SQLite persistence for finished kill maps.

use crate::error::{AnalysisError, Result};
use crate::killmap::KillMap;
use crate::model::{Mutant, Outcome, TestCase};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_DB_PATH: &str = "db/killmap.db";

/// One row of the `runs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub id: i64,
    pub created_at: String,
    pub tool_version: String,
    pub mutant_count: usize,
    pub fingerprint: String,
}

/// Makes sure `db_path` holds a database with the expected schema, creating
/// the file and its parent directory when missing.
pub fn check_db(db_path: &Path) -> Result<()> {
    debug!(path = %db_path.display(), "checking database");
    let is_new_db = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let connection = Connection::open(db_path)?;
    if is_new_db {
        create_db(&connection)?;
    } else {
        check_schema(&connection)?;
    }
    Ok(())
}

fn check_schema(connection: &Connection) -> Result<()> {
    let table_columns: Vec<(&str, Vec<&str>)> = vec![
        ("runs", vec!["id", "created_at", "tool_version", "mutant_count", "fingerprint"]),
        ("tests", vec!["run_id", "name", "baseline_failed"]),
        ("outcomes", vec!["run_id", "mutant", "test", "outcome"]),
        ("coverage", vec!["run_id", "mutant"]),
    ];

    for (table, columns) in table_columns {
        let exists: bool = connection.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1;",
            params![table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(AnalysisError::InvalidInput(format!(
                "Database is missing table '{}'",
                table
            )));
        }

        let mut stmt = connection.prepare(&format!("PRAGMA table_info({});", table))?;
        let column_names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;

        for col in columns {
            if !column_names.iter().any(|name| name == col) {
                return Err(AnalysisError::InvalidInput(format!(
                    "Missing column '{}' in table '{}'",
                    col, table
                )));
            }
        }
    }

    debug!("database schema verified");
    Ok(())
}

fn create_db(connection: &Connection) -> Result<()> {
    info!("initializing new database");
    connection.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS runs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at      TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            tool_version    TEXT NOT NULL,
            mutant_count    INTEGER NOT NULL,
            fingerprint     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tests (
            run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            baseline_failed INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (run_id, name)
        );

        CREATE TABLE IF NOT EXISTS outcomes (
            run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            mutant          INTEGER NOT NULL CHECK (mutant > 0),
            test            TEXT NOT NULL,
            outcome         TEXT NOT NULL CHECK (outcome IN ('alive', 'killed')),
            PRIMARY KEY (run_id, mutant, test)
        );

        CREATE TABLE IF NOT EXISTS coverage (
            run_id          INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            mutant          INTEGER NOT NULL CHECK (mutant > 0),
            PRIMARY KEY (run_id, mutant)
        );

        CREATE INDEX IF NOT EXISTS idx_outcomes_killed ON outcomes(run_id, outcome);
        ",
    )?;
    Ok(())
}

/// Stores `kill_map` as a new run and returns its id.
pub fn store_run(db_path: &Path, kill_map: &KillMap) -> Result<i64> {
    info!(path = %db_path.display(), "storing run");
    let mut connection = Connection::open(db_path)?;
    let tx = connection.transaction()?;

    let tool_version = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tx.execute(
        "INSERT INTO runs (tool_version, mutant_count, fingerprint) VALUES (?1, ?2, ?3);",
        params![tool_version, kill_map.mutant_count() as i64, kill_map.fingerprint()],
    )?;
    let run_id = tx.last_insert_rowid();

    {
        let failing = kill_map.failing_baselines();
        let mut insert_test = tx.prepare(
            "INSERT INTO tests (run_id, name, baseline_failed) VALUES (?1, ?2, ?3);",
        )?;
        for test in kill_map.tests() {
            insert_test.execute(params![run_id, test.canonical_name(), failing.contains(&test)])?;
        }

        let mut insert_outcome = tx.prepare(
            "INSERT INTO outcomes (run_id, mutant, test, outcome) VALUES (?1, ?2, ?3, ?4);",
        )?;
        for (order, outcome) in kill_map.entries() {
            insert_outcome.execute(params![
                run_id,
                order.mutant.id(),
                order.test.canonical_name(),
                outcome.as_str()
            ])?;
        }

        let mut insert_covered =
            tx.prepare("INSERT INTO coverage (run_id, mutant) VALUES (?1, ?2);")?;
        for mutant in kill_map.covered_mutants() {
            insert_covered.execute(params![run_id, mutant.id()])?;
        }
    }

    tx.commit()?;
    debug!(run_id, "run stored");
    Ok(run_id)
}

fn mutant_from_db(id: i64) -> Result<Mutant> {
    u32::try_from(id)
        .ok()
        .and_then(Mutant::new)
        .ok_or_else(|| AnalysisError::InvalidInput(format!("Invalid mutant id {} in database", id)))
}

/// Rebuilds the kill map stored under `run_id`.
pub fn load_run(db_path: &Path, run_id: i64) -> Result<KillMap> {
    let connection = Connection::open(db_path)?;

    let mutant_count: i64 = connection
        .query_row(
            "SELECT mutant_count FROM runs WHERE id = ?1;",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(AnalysisError::RunNotFound(run_id))?;

    let mut kill_map = KillMap::with_mutant_count(mutant_count.max(0) as usize);

    let mut stmt = connection.prepare("SELECT name, baseline_failed FROM tests WHERE run_id = ?1;")?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
    })?;
    for row in rows {
        let (name, baseline_failed) = row?;
        let test: TestCase = name.parse()?;
        if baseline_failed {
            kill_map.record_failing_baseline(test.clone());
        }
        kill_map.register_test(test);
    }

    let mut stmt =
        connection.prepare("SELECT mutant, test, outcome FROM outcomes WHERE run_id = ?1;")?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (mutant, test, outcome) = row?;
        let outcome: Outcome = outcome.parse()?;
        kill_map.put(mutant_from_db(mutant)?, test.parse()?, outcome);
    }

    let mut stmt = connection.prepare("SELECT mutant FROM coverage WHERE run_id = ?1;")?;
    let rows = stmt.query_map(params![run_id], |row| row.get::<_, i64>(0))?;
    for row in rows {
        kill_map.record_coverage(mutant_from_db(row?)?);
    }

    debug!(run_id, entries = kill_map.size(), "run loaded");
    Ok(kill_map)
}

/// All stored runs, newest first.
pub fn list_runs(db_path: &Path) -> Result<Vec<RunInfo>> {
    let connection = Connection::open(db_path)?;
    let mut stmt = connection.prepare(
        "SELECT id, created_at, tool_version, mutant_count, fingerprint
         FROM runs ORDER BY id DESC;",
    )?;
    let runs = stmt
        .query_map([], |row| {
            Ok(RunInfo {
                id: row.get(0)?,
                created_at: row.get(1)?,
                tool_version: row.get(2)?,
                mutant_count: row.get::<_, i64>(3)?.max(0) as usize,
                fingerprint: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn m(id: u32) -> Mutant {
        Mutant::new(id).unwrap()
    }

    fn sample() -> KillMap {
        let a = TestCase::new("Suite", "A");
        let b = TestCase::new("Suite", "B");
        let mut map = KillMap::with_mutant_count(3);
        map.register_test(a.clone());
        map.register_test(b.clone());
        map.put(m(1), a.clone(), Outcome::Killed);
        map.put(m(1), b.clone(), Outcome::Alive);
        map.put(m(2), a.clone(), Outcome::Alive);
        map.put(m(2), b.clone(), Outcome::Killed);
        map.put(m(3), a, Outcome::Alive);
        map.put(m(3), b.clone(), Outcome::Alive);
        map.record_coverage(m(1));
        map.record_coverage(m(2));
        map.record_failing_baseline(b);
        map
    }

    #[test]
    fn test_check_db_creates_and_verifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("killmap.db");
        check_db(&path).unwrap();
        assert!(path.exists());
        // Second call goes through schema verification.
        check_db(&path).unwrap();
    }

    #[test]
    fn test_check_db_rejects_foreign_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE runs (id INTEGER PRIMARY KEY);")
            .unwrap();
        assert!(check_db(&path).is_err());
    }

    #[test]
    fn test_store_and_load_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("killmap.db");
        check_db(&path).unwrap();

        let original = sample();
        let first = store_run(&path, &original).unwrap();
        let second = store_run(&path, &KillMap::with_mutant_count(2)).unwrap();
        assert_ne!(first, second);

        let loaded = load_run(&path, first).unwrap();
        assert_eq!(loaded.to_matrix(), original.to_matrix());
        assert_eq!(loaded.covered_mutants(), original.covered_mutants());
        assert_eq!(loaded.failing_baselines(), original.failing_baselines());
        assert_eq!(loaded.fingerprint(), original.fingerprint());

        let empty = load_run(&path, second).unwrap();
        assert_eq!(empty.mutant_count(), 2);
        assert!(empty.is_empty());

        let runs = list_runs(&path).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[1].fingerprint, original.fingerprint());
    }

    #[test]
    fn test_load_unknown_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("killmap.db");
        check_db(&path).unwrap();
        assert!(matches!(load_run(&path, 42), Err(AnalysisError::RunNotFound(42))));
    }
}
