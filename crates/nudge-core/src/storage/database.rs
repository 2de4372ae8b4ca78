//! SQLite-backed persistence.
//!
//! Four tables:
//! - `rules`: the rule catalog
//! - `timing_slots`: Beta parameters keyed by (task_type, context_key, lead_time)
//! - `feedback_log`: append-only feedback records
//! - `user_contexts`: append-only context snapshots for audit
//!
//! Writes hitting a locked database are retried once before surfacing; the
//! in-memory stores are the read path, so the database only needs atomic
//! row updates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::error::DatabaseError;
use crate::rules::{Rule, RuleSource, TriggerCondition};
use crate::timing::{SlotKey, TimingSlot};

use super::data_dir;

/// Transient write failures are retried this many times in total.
const WRITE_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// One row of the feedback log.
#[derive(Debug, Clone)]
pub struct FeedbackEntry {
    pub id: i64,
    pub rule_id: i64,
    pub outcome: String,
    pub context_snapshot: Option<Value>,
    pub chosen_lead_time: u32,
    pub timestamp: DateTime<Utc>,
}

/// Accept/reject tallies for one rule.
#[derive(Debug, Clone)]
pub struct RuleFeedbackCounts {
    pub rule_id: i64,
    pub accepted: u64,
    pub rejected: u64,
}

/// SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at the given path, creating the schema if needed.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        conn.busy_timeout(Duration::from_millis(250))
            .map_err(DatabaseError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open the database at `~/.nudge/nudge.db`.
    pub fn open_default() -> Result<Self, DatabaseError> {
        Self::open(&data_dir().join("nudge.db"))
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS rules (
                    id                INTEGER PRIMARY KEY AUTOINCREMENT,
                    name              TEXT NOT NULL,
                    description       TEXT NOT NULL DEFAULT '',
                    trigger_condition TEXT NOT NULL,
                    weight            REAL NOT NULL,
                    is_active         INTEGER NOT NULL DEFAULT 1,
                    source            TEXT NOT NULL DEFAULT 'user',
                    calendar_event_id TEXT,
                    created_at        TEXT NOT NULL,
                    updated_at        TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS timing_slots (
                    task_type         TEXT NOT NULL,
                    context_key       TEXT NOT NULL,
                    lead_time_minutes INTEGER NOT NULL,
                    alpha             REAL NOT NULL,
                    beta              REAL NOT NULL,
                    total_triggers    INTEGER NOT NULL,
                    last_updated      TEXT NOT NULL,
                    PRIMARY KEY (task_type, context_key, lead_time_minutes)
                );

                CREATE TABLE IF NOT EXISTS feedback_log (
                    id               INTEGER PRIMARY KEY AUTOINCREMENT,
                    rule_id          INTEGER NOT NULL,
                    outcome          TEXT NOT NULL,
                    context_snapshot TEXT,
                    chosen_lead_time INTEGER NOT NULL,
                    timestamp        TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_contexts (
                    id        INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    snapshot  TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(is_active);
                CREATE INDEX IF NOT EXISTS idx_rules_calendar ON rules(calendar_event_id);
                CREATE INDEX IF NOT EXISTS idx_feedback_rule ON feedback_log(rule_id);
                CREATE INDEX IF NOT EXISTS idx_feedback_time ON feedback_log(timestamp);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    fn with_write_retry<T>(
        mut op: impl FnMut() -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(DatabaseError::Locked) if attempt < WRITE_ATTEMPTS => {
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ----- rules -----

    /// Insert a rule, returning the assigned id.
    pub fn insert_rule(&self, rule: &Rule) -> Result<i64, DatabaseError> {
        let trigger = serde_json::to_string(&rule.trigger_condition)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::with_write_retry(|| {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO rules (name, description, trigger_condition, weight, is_active,
                                    source, calendar_event_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rule.name,
                    rule.description,
                    trigger,
                    rule.weight,
                    rule.is_active as i64,
                    source_token(rule.source),
                    rule.calendar_event_id,
                    rule.created_at.to_rfc3339(),
                    rule.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Replace every mutable field of an existing rule.
    pub fn update_rule(&self, rule: &Rule) -> Result<(), DatabaseError> {
        let trigger = serde_json::to_string(&rule.trigger_condition)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::with_write_retry(|| {
            self.conn().execute(
                "UPDATE rules
                 SET name = ?2, description = ?3, trigger_condition = ?4, weight = ?5,
                     is_active = ?6, source = ?7, calendar_event_id = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    rule.id,
                    rule.name,
                    rule.description,
                    trigger,
                    rule.weight,
                    rule.is_active as i64,
                    source_token(rule.source),
                    rule.calendar_event_id,
                    rule.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Persist a weight change.
    pub fn set_rule_weight(
        &self,
        id: i64,
        weight: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        Self::with_write_retry(|| {
            self.conn().execute(
                "UPDATE rules SET weight = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, weight, updated_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Persist an activation change.
    pub fn set_rule_active(
        &self,
        id: i64,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        Self::with_write_retry(|| {
            self.conn().execute(
                "UPDATE rules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, is_active as i64, updated_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Load every rule (active and inactive).
    pub fn load_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, trigger_condition, weight, is_active,
                        source, calendar_event_id, created_at, updated_at
                 FROM rules ORDER BY id",
            )
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .map_err(DatabaseError::from)?;

        let mut rules = Vec::new();
        for row in rows {
            let (id, name, description, trigger, weight, is_active, source, event_id, created, updated) =
                row.map_err(DatabaseError::from)?;
            let trigger_condition: TriggerCondition = serde_json::from_str(&trigger)
                .map_err(|e| DatabaseError::QueryFailed(format!("rule {id} trigger: {e}")))?;
            rules.push(Rule {
                id,
                name,
                description,
                trigger_condition,
                weight,
                is_active: is_active != 0,
                source: parse_source(&source),
                calendar_event_id: event_id,
                created_at: parse_timestamp(id, &created)?,
                updated_at: parse_timestamp(id, &updated)?,
            });
        }
        Ok(rules)
    }

    // ----- timing slots -----

    /// Insert or replace one Beta slot.
    pub fn upsert_slot(&self, key: &SlotKey, slot: &TimingSlot) -> Result<(), DatabaseError> {
        Self::with_write_retry(|| {
            self.conn().execute(
                "INSERT INTO timing_slots
                     (task_type, context_key, lead_time_minutes, alpha, beta, total_triggers, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (task_type, context_key, lead_time_minutes)
                 DO UPDATE SET alpha = ?4, beta = ?5, total_triggers = ?6, last_updated = ?7",
                params![
                    key.task_type,
                    key.context_key,
                    key.lead_time,
                    slot.alpha,
                    slot.beta,
                    slot.total_triggers as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Load every persisted slot.
    pub fn load_slots(&self) -> Result<HashMap<SlotKey, TimingSlot>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT task_type, context_key, lead_time_minutes, alpha, beta, total_triggers
                 FROM timing_slots",
            )
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    SlotKey::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u32,
                    ),
                    TimingSlot {
                        alpha: row.get(3)?,
                        beta: row.get(4)?,
                        total_triggers: row.get::<_, i64>(5)? as u64,
                    },
                ))
            })
            .map_err(DatabaseError::from)?;

        let mut slots = HashMap::new();
        for row in rows {
            let (key, slot) = row.map_err(DatabaseError::from)?;
            slots.insert(key, slot);
        }
        Ok(slots)
    }

    // ----- feedback -----

    /// Persist one feedback application atomically: the rule's new weight,
    /// the slot's new parameters, and the append-only log row.
    pub fn persist_feedback(
        &self,
        rule_id: i64,
        new_weight: f64,
        key: &SlotKey,
        slot: &TimingSlot,
        outcome: &str,
        context_snapshot: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let snapshot_json = context_snapshot.to_string();
        Self::with_write_retry(|| {
            let mut conn = self.conn();
            let tx = conn.transaction().map_err(DatabaseError::from)?;
            tx.execute(
                "UPDATE rules SET weight = ?2, updated_at = ?3 WHERE id = ?1",
                params![rule_id, new_weight, timestamp.to_rfc3339()],
            )?;
            tx.execute(
                "INSERT INTO timing_slots
                     (task_type, context_key, lead_time_minutes, alpha, beta, total_triggers, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (task_type, context_key, lead_time_minutes)
                 DO UPDATE SET alpha = ?4, beta = ?5, total_triggers = ?6, last_updated = ?7",
                params![
                    key.task_type,
                    key.context_key,
                    key.lead_time,
                    slot.alpha,
                    slot.beta,
                    slot.total_triggers as i64,
                    timestamp.to_rfc3339(),
                ],
            )?;
            tx.execute(
                "INSERT INTO feedback_log (rule_id, outcome, context_snapshot, chosen_lead_time, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    rule_id,
                    outcome,
                    snapshot_json,
                    key.lead_time,
                    timestamp.to_rfc3339(),
                ],
            )?;
            tx.commit().map_err(DatabaseError::from)?;
            Ok(())
        })
    }

    /// Recent feedback, newest first.
    pub fn feedback_history(
        &self,
        rule_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<FeedbackEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, rule_id, outcome, context_snapshot, chosen_lead_time, timestamp
                 FROM feedback_log
                 WHERE (?1 IS NULL OR rule_id = ?1)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map(params![rule_id, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)? as u32,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(DatabaseError::from)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, rule_id, outcome, snapshot, lead, timestamp) =
                row.map_err(DatabaseError::from)?;
            entries.push(FeedbackEntry {
                id,
                rule_id,
                outcome,
                context_snapshot: snapshot.and_then(|s| serde_json::from_str(&s).ok()),
                chosen_lead_time: lead,
                timestamp: parse_timestamp(id, &timestamp)?,
            });
        }
        Ok(entries)
    }

    /// Accept/reject tallies grouped by rule.
    pub fn feedback_counts(&self) -> Result<Vec<RuleFeedbackCounts>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT rule_id,
                        SUM(CASE WHEN outcome = 'accept' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN outcome = 'reject' THEN 1 ELSE 0 END)
                 FROM feedback_log GROUP BY rule_id",
            )
            .map_err(DatabaseError::from)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RuleFeedbackCounts {
                    rule_id: row.get(0)?,
                    accepted: row.get::<_, i64>(1)? as u64,
                    rejected: row.get::<_, i64>(2)? as u64,
                })
            })
            .map_err(DatabaseError::from)?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row.map_err(DatabaseError::from)?);
        }
        Ok(counts)
    }

    // ----- audit -----

    /// Append a context snapshot to the audit trail.
    pub fn append_context(
        &self,
        timestamp: DateTime<Utc>,
        snapshot: &Value,
    ) -> Result<(), DatabaseError> {
        let snapshot_json = snapshot.to_string();
        Self::with_write_retry(|| {
            self.conn().execute(
                "INSERT INTO user_contexts (timestamp, snapshot) VALUES (?1, ?2)",
                params![timestamp.to_rfc3339(), snapshot_json],
            )?;
            Ok(())
        })
    }

    /// Number of audited context snapshots.
    pub fn context_count(&self) -> Result<u64, DatabaseError> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM user_contexts", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(DatabaseError::from)
    }
}

fn source_token(source: RuleSource) -> &'static str {
    match source {
        RuleSource::User => "user",
        RuleSource::Calendar => "calendar",
    }
}

fn parse_source(token: &str) -> RuleSource {
    match token {
        "calendar" => RuleSource::Calendar,
        _ => RuleSource::User,
    }
}

fn parse_timestamp(row_id: i64, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::QueryFailed(format!("row {row_id} timestamp: {e}")))
}
