use rusqlite::Connection;

use crate::error::Result;

/// Initialise the task schema in `conn`.
///
/// Log entries live in their own table so an append is a single `INSERT`
/// and concurrent appends within one execution serialize in SQLite.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id                 TEXT    NOT NULL PRIMARY KEY,
            name               TEXT    NOT NULL,
            descr              TEXT,
            definition         TEXT    NOT NULL,   -- YAML source
            trigger            TEXT    NOT NULL,   -- JSON-encoded TriggerSpec
            target             TEXT    NOT NULL,   -- JSON-encoded Target
            params             TEXT    NOT NULL,   -- JSON object
            active             INTEGER NOT NULL DEFAULT 1,
            status             TEXT    NOT NULL DEFAULT 'Pending',
            last_result        TEXT,
            last_activated_at  TEXT,
            last_activated_by  TEXT,
            last_ran_at        TEXT,
            last_ran_by        TEXT,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks (active);

        CREATE TABLE IF NOT EXISTS task_results (
            id        TEXT    NOT NULL PRIMARY KEY,
            task_id   TEXT    NOT NULL,
            status    INTEGER NOT NULL DEFAULT 0,   -- TaskResultStatus code
            ran_by    TEXT    NOT NULL,
            ran_at    TEXT    NOT NULL,
            ended_at  TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_results_task ON task_results (task_id, ran_at);

        CREATE TABLE IF NOT EXISTS task_logs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            result_id  TEXT    NOT NULL,
            time       TEXT    NOT NULL,
            message    TEXT    NOT NULL,
            level      INTEGER NOT NULL DEFAULT 1   -- LogLevel code
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_logs_result ON task_logs (result_id, id);
        ",
    )?;
    Ok(())
}
