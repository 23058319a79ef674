use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use super::Store;

/// A waypoint and what is known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    pub symbol: String,
    pub system: String,
    pub charted: bool,
    pub has_marketplace: bool,
    pub has_shipyard: bool,
}

impl LocationRecord {
    pub fn uncharted(symbol: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            system: system.into(),
            charted: false,
            has_marketplace: false,
            has_shipyard: false,
        }
    }

    /// Whether a worker still has to visit this location.
    pub fn needs_work(&self) -> bool {
        !self.charted
    }
}

const LOCATION_COLUMNS: &str = "symbol, system, charted, has_marketplace, has_shipyard";

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        symbol: row.get(0)?,
        system: row.get(1)?,
        charted: row.get::<_, i64>(2)? != 0,
        has_marketplace: row.get::<_, i64>(3)? != 0,
        has_shipyard: row.get::<_, i64>(4)? != 0,
    })
}

impl Store {
    pub fn insert_location(&self, location: &LocationRecord) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO locations (symbol, system, charted, has_marketplace, has_shipyard)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    location.symbol,
                    location.system,
                    location.charted as i64,
                    location.has_marketplace as i64,
                    location.has_shipyard as i64,
                ],
            )
        })
        .with_context(|| format!("Failed to insert location {}", location.symbol))?;
        Ok(())
    }

    /// Every known location, ordered by system then symbol.
    pub fn list_locations(&self) -> Result<Vec<LocationRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM locations ORDER BY system, symbol",
                LOCATION_COLUMNS
            ))?;
            let rows = stmt.query_map([], location_from_row)?;
            rows.collect()
        })
    }

    /// Locations of one system that still need a visit, in backlog order.
    pub fn pending_locations(&self, system: &str) -> Result<Vec<LocationRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM locations WHERE system = ?1 AND charted = 0 ORDER BY symbol",
                LOCATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![system], location_from_row)?;
            rows.collect()
        })
    }

    pub fn get_location(&self, symbol: &str) -> Result<Option<LocationRecord>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM locations WHERE symbol = ?1", LOCATION_COLUMNS),
                params![symbol],
                location_from_row,
            )
            .optional()
        })
    }

    /// Set the charted flag. Returns false when the location is unknown.
    pub fn set_location_charted(&self, symbol: &str, charted: bool) -> Result<bool> {
        self.update_location(
            "UPDATE locations SET charted = ?1, updated_at = datetime('now') WHERE symbol = ?2",
            symbol,
            charted,
        )
    }

    pub fn set_location_marketplace(&self, symbol: &str, present: bool) -> Result<bool> {
        self.update_location(
            "UPDATE locations SET has_marketplace = ?1, updated_at = datetime('now') WHERE symbol = ?2",
            symbol,
            present,
        )
    }

    pub fn set_location_shipyard(&self, symbol: &str, present: bool) -> Result<bool> {
        self.update_location(
            "UPDATE locations SET has_shipyard = ?1, updated_at = datetime('now') WHERE symbol = ?2",
            symbol,
            present,
        )
    }

    fn update_location(&self, sql: &str, symbol: &str, flag: bool) -> Result<bool> {
        let changed = self.write(|conn| conn.execute(sql, params![flag as i64, symbol]))?;
        Ok(changed > 0)
    }

    pub fn save_market_snapshot(&self, waypoint: &str, payload: &serde_json::Value) -> Result<()> {
        self.save_snapshot("market_snapshots", waypoint, payload)
    }

    pub fn save_shipyard_snapshot(&self, waypoint: &str, payload: &serde_json::Value) -> Result<()> {
        self.save_snapshot("shipyard_snapshots", waypoint, payload)
    }

    fn save_snapshot(&self, table: &str, waypoint: &str, payload: &serde_json::Value) -> Result<()> {
        let payload_json = serde_json::to_string(payload)?;
        self.write(|conn| {
            conn.execute(
                &format!("INSERT INTO {} (waypoint, payload_json) VALUES (?1, ?2)", table),
                params![waypoint, payload_json],
            )
        })
        .with_context(|| format!("Failed to save {} for {}", table, waypoint))?;
        Ok(())
    }

    pub fn count_snapshots(&self, table: &str, waypoint: &str) -> Result<i64> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE waypoint = ?1", table),
                params![waypoint],
                |row| row.get(0),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        for (symbol, system) in [
            ("X1-AA-B2", "X1-AA"),
            ("X1-AA-A1", "X1-AA"),
            ("X1-BB-C3", "X1-BB"),
        ] {
            store
                .insert_location(&LocationRecord::uncharted(symbol, system))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_pending_locations_filters_by_system_and_flag() {
        let store = seeded();
        let pending = store.pending_locations("X1-AA").unwrap();
        let symbols: Vec<_> = pending.iter().map(|l| l.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["X1-AA-A1", "X1-AA-B2"]);

        assert!(store.set_location_charted("X1-AA-A1", true).unwrap());
        let pending = store.pending_locations("X1-AA").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].symbol, "X1-AA-B2");
    }

    #[test]
    fn test_flags_update_independently() {
        let store = seeded();
        store.set_location_marketplace("X1-BB-C3", true).unwrap();
        store.set_location_shipyard("X1-BB-C3", true).unwrap();

        let loc = store.get_location("X1-BB-C3").unwrap().unwrap();
        assert!(loc.has_marketplace);
        assert!(loc.has_shipyard);
        assert!(!loc.charted);
    }

    #[test]
    fn test_unknown_location_update_reports_false() {
        let store = seeded();
        assert!(!store.set_location_charted("X1-ZZ-Q9", true).unwrap());
    }

    #[test]
    fn test_snapshots_are_appended() {
        let store = seeded();
        let payload = serde_json::json!({"exports": [], "imports": []});
        store.save_market_snapshot("X1-AA-A1", &payload).unwrap();
        store.save_market_snapshot("X1-AA-A1", &payload).unwrap();
        assert_eq!(store.count_snapshots("market_snapshots", "X1-AA-A1").unwrap(), 2);
        assert_eq!(store.count_snapshots("shipyard_snapshots", "X1-AA-A1").unwrap(), 0);
    }
}
