use anyhow::{Context, Result};
use rusqlite::params;

use super::Store;

/// A star system and its nearest faction headquarters.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemRecord {
    pub symbol: String,
    pub x: i64,
    pub y: i64,
    pub closest_faction: Option<String>,
    pub distance_from_faction: Option<f64>,
}

impl Store {
    pub fn insert_system(&self, system: &SystemRecord) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO systems (symbol, x, y, closest_faction, distance_from_faction)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    system.symbol,
                    system.x,
                    system.y,
                    system.closest_faction,
                    system.distance_from_faction,
                ],
            )
        })
        .with_context(|| format!("Failed to insert system {}", system.symbol))?;
        Ok(())
    }

    /// Systems farthest from their faction first; unknown distances last.
    pub fn list_systems_by_distance(&self) -> Result<Vec<SystemRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT symbol, x, y, closest_faction, distance_from_faction FROM systems
                 ORDER BY distance_from_faction IS NULL, distance_from_faction DESC, symbol",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SystemRecord {
                    symbol: row.get(0)?,
                    x: row.get(1)?,
                    y: row.get(2)?,
                    closest_faction: row.get(3)?,
                    distance_from_faction: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(symbol: &str, distance: Option<f64>) -> SystemRecord {
        SystemRecord {
            symbol: symbol.to_string(),
            x: 0,
            y: 0,
            closest_faction: distance.map(|_| "COSMIC".to_string()),
            distance_from_faction: distance,
        }
    }

    #[test]
    fn test_farthest_systems_first() {
        let store = Store::open_in_memory().unwrap();
        store.insert_system(&system("X1-NEAR", Some(10.0))).unwrap();
        store.insert_system(&system("X1-LOST", None)).unwrap();
        store.insert_system(&system("X1-FAR", Some(900.0))).unwrap();

        let order: Vec<_> = store
            .list_systems_by_distance()
            .unwrap()
            .into_iter()
            .map(|s| s.symbol)
            .collect();
        assert_eq!(order, vec!["X1-FAR", "X1-NEAR", "X1-LOST"]);
    }
}
