//! Read-only access to a Trac SQLite database.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, Row, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Trac 1.0 switched time columns from seconds to microseconds.
const MICROSECOND_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Type,
    Component,
    Priority,
    Resolution,
}

impl LabelKind {
    pub const ALL: [LabelKind; 4] = [
        LabelKind::Type,
        LabelKind::Component,
        LabelKind::Priority,
        LabelKind::Resolution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Component => "component",
            Self::Priority => "priority",
            Self::Resolution => "resolution",
        }
    }

    fn column(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracMilestone {
    pub name: String,
    pub due: i64,
    pub completed: i64,
    pub description: String,
}

impl TracMilestone {
    pub fn is_completed(&self) -> bool {
        self.completed != 0
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        trac_time_to_utc(self.due)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracLabelValue {
    pub kind: LabelKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TracTicket {
    pub id: i64,
    pub ticket_type: String,
    pub component: String,
    pub priority: String,
    pub resolution: String,
    pub owner: String,
    pub milestone: String,
    pub status: String,
    pub summary: String,
    pub description: String,
}

impl TracTicket {
    pub fn is_closed(&self) -> bool {
        self.status.eq_ignore_ascii_case("closed")
    }

    /// Lowercased label value for `kind`, or `None` when the field is blank.
    pub fn label_value(&self, kind: LabelKind) -> Option<String> {
        let raw = match kind {
            LabelKind::Type => &self.ticket_type,
            LabelKind::Component => &self.component,
            LabelKind::Priority => &self.priority,
            LabelKind::Resolution => &self.resolution,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_lowercase())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracComment {
    pub ticket: i64,
    pub time: i64,
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Paging {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Paging {
    fn sql_limit(self) -> i64 {
        self.limit
            .and_then(|limit| i64::try_from(limit).ok())
            .unwrap_or(-1)
    }

    fn sql_offset(self) -> i64 {
        i64::try_from(self.offset).unwrap_or(i64::MAX)
    }
}

pub struct TracDatabase {
    connection: Connection,
}

impl TracDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Trac database not found: {}", path.display());
        }
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("unable to connect to database {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        debug!(path = %path.display(), "opened trac database");
        Ok(Self { connection })
    }

    pub fn milestones(&self) -> Result<Vec<TracMilestone>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT name, COALESCE(due, 0), COALESCE(completed, 0), COALESCE(description, '')
                FROM milestone ORDER BY due, name",
            )
            .context("failed to prepare milestone query")?;
        let rows = statement
            .query_map([], |row| {
                Ok(TracMilestone {
                    name: row.get(0)?,
                    due: row.get(1)?,
                    completed: row.get(2)?,
                    description: row.get(3)?,
                })
            })
            .context("failed to query milestones")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode milestone row")
    }

    /// Distinct, lowercased values of every label-bearing ticket column.
    pub fn label_values(&self) -> Result<Vec<TracLabelValue>> {
        let mut output = Vec::new();
        for kind in LabelKind::ALL {
            let column = kind.column();
            let sql = format!(
                "SELECT DISTINCT lower({column}) FROM ticket
                WHERE {column} IS NOT NULL AND {column} != '' ORDER BY 1"
            );
            let mut statement = self
                .connection
                .prepare(&sql)
                .with_context(|| format!("failed to prepare {kind} label query"))?;
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))
                .with_context(|| format!("failed to query {kind} labels"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("failed to decode {kind} label row"))?;
            output.extend(names.into_iter().map(|name| TracLabelValue { kind, name }));
        }
        Ok(output)
    }

    pub fn tickets(&self, paging: Paging) -> Result<Vec<TracTicket>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT id, type, component, priority, resolution, owner, milestone, status,
                    summary, description
                FROM ticket ORDER BY id LIMIT ?1 OFFSET ?2",
            )
            .context("failed to prepare ticket query")?;
        let rows = statement
            .query_map(params![paging.sql_limit(), paging.sql_offset()], ticket_from_row)
            .context("failed to query tickets")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode ticket row")
    }

    pub fn comments(&self, paging: Paging) -> Result<Vec<TracComment>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT ticket, time, COALESCE(author, ''), newvalue FROM ticket_change
                WHERE field = 'comment' AND newvalue IS NOT NULL AND newvalue != ''
                ORDER BY ticket, time LIMIT ?1 OFFSET ?2",
            )
            .context("failed to prepare comment query")?;
        let rows = statement
            .query_map(params![paging.sql_limit(), paging.sql_offset()], |row| {
                Ok(TracComment {
                    ticket: row.get(0)?,
                    time: row.get(1)?,
                    author: row.get(2)?,
                    body: row.get(3)?,
                })
            })
            .context("failed to query comments")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode comment row")
    }
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<TracTicket> {
    Ok(TracTicket {
        id: row.get(0)?,
        ticket_type: optional_text(row, 1)?,
        component: optional_text(row, 2)?,
        priority: optional_text(row, 3)?,
        resolution: optional_text(row, 4)?,
        owner: optional_text(row, 5)?,
        milestone: optional_text(row, 6)?,
        status: optional_text(row, 7)?,
        summary: optional_text(row, 8)?,
        description: optional_text(row, 9)?,
    })
}

fn optional_text(row: &Row<'_>, index: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(index)?.unwrap_or_default())
}

/// Interpret a Trac time column (seconds before 1.0, microseconds after).
pub fn trac_time_to_utc(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value > MICROSECOND_THRESHOLD {
        DateTime::from_timestamp_micros(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
