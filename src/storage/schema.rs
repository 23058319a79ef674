//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            system TEXT NOT NULL,
            arrival TEXT,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS systems (
            symbol TEXT PRIMARY KEY,
            x INTEGER NOT NULL DEFAULT 0,
            y INTEGER NOT NULL DEFAULT 0,
            closest_faction TEXT,
            distance_from_faction REAL
        );

        CREATE TABLE IF NOT EXISTS locations (
            symbol TEXT PRIMARY KEY,
            system TEXT NOT NULL,
            charted INTEGER NOT NULL DEFAULT 0,
            has_marketplace INTEGER NOT NULL DEFAULT 0,
            has_shipyard INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS market_snapshots (
            id INTEGER PRIMARY KEY,
            waypoint TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS shipyard_snapshots (
            id INTEGER PRIMARY KEY,
            waypoint TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_locations_system ON locations(system);
        CREATE INDEX IF NOT EXISTS idx_agents_system ON agents(system);
        CREATE INDEX IF NOT EXISTS idx_market_waypoint ON market_snapshots(waypoint);
        CREATE INDEX IF NOT EXISTS idx_shipyard_waypoint ON shipyard_snapshots(waypoint);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["agents", "locations", "systems", "market_snapshots", "shipyard_snapshots"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "table {} should start empty", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
