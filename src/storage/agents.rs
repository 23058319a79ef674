use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::remote::{format_arrival, parse_arrival};

/// A registered agent and its progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: String,
    pub token: String,
    /// Home system; the one system this agent charts.
    pub system: String,
    /// Arrival time of the travel in progress, if any.
    pub arrival: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl Agent {
    pub fn new(id: impl Into<String>, token: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            system: system.into(),
            arrival: None,
            completed: false,
        }
    }
}

const AGENT_COLUMNS: &str = "id, token, system, arrival, completed";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let arrival: Option<String> = row.get(3)?;
    Ok(Agent {
        id: row.get(0)?,
        token: row.get(1)?,
        system: row.get(2)?,
        // An unreadable arrival is treated as no travel in progress.
        arrival: arrival.and_then(|raw| parse_arrival(raw.as_str()).ok()),
        completed: row.get::<_, i64>(4)? != 0,
    })
}

impl Store {
    pub fn insert_agent(&self, agent: &Agent) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO agents (id, token, system, arrival, completed) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent.id,
                    agent.token,
                    agent.system,
                    agent.arrival.as_ref().map(format_arrival),
                    agent.completed as i64,
                ],
            )
        })
        .with_context(|| format!("Failed to insert agent {}", agent.id))?;
        Ok(())
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM agents ORDER BY created_at, id", AGENT_COLUMNS))?;
            let rows = stmt.query_map([], agent_from_row)?;
            rows.collect()
        })
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
                params![id],
                agent_from_row,
            )
            .optional()
        })
    }

    pub fn set_agent_arrival(&self, id: &str, arrival: Option<DateTime<Utc>>) -> Result<()> {
        self.update_agent(
            id,
            "UPDATE agents SET arrival = ?1, updated_at = datetime('now') WHERE id = ?2",
            arrival.as_ref().map(format_arrival),
        )
    }

    pub fn set_agent_completed(&self, id: &str, completed: bool) -> Result<()> {
        self.update_agent(
            id,
            "UPDATE agents SET completed = ?1, updated_at = datetime('now') WHERE id = ?2",
            completed as i64,
        )
    }

    fn update_agent(&self, id: &str, sql: &str, value: impl rusqlite::ToSql) -> Result<()> {
        let changed = self.write(|conn| conn.execute(sql, params![value, id]))?;
        if changed == 0 {
            anyhow::bail!("Agent '{}' not found", id);
        }
        Ok(())
    }
}
