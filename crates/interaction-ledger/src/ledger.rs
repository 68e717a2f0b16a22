//! SQLite-backed interaction ledger

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use mender_core_types::{truncate_chars, Fingerprint, InteractionId, Outcome, SessionId};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::errors::{LedgerError, LedgerResult};
use crate::types::{
    CleanupReport, CorrectionMapping, Interaction, LedgerStats, PageSnapshot, SelectorStat,
    Session,
};
use crate::url_pattern::page_url_pattern;

/// Statistics with fewer attempts than this are not trusted for lookups.
pub const DEFAULT_MIN_ATTEMPTS: u32 = 3;

/// Characters of step text used for the fuzzy correction lookup.
pub const CORRECTION_PREFIX_CHARS: usize = 30;

/// Characters of element text used for similar-interaction lookups.
pub const SIMILAR_TEXT_PREFIX_CHARS: usize = 20;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const TOP_SELECTOR_LIMIT: usize = 10;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        target_url TEXT NOT NULL DEFAULT '',
        steps TEXT NOT NULL DEFAULT '[]',
        successful_steps INTEGER NOT NULL DEFAULT 0,
        failed_steps INTEGER NOT NULL DEFAULT 0,
        corrected_steps INTEGER NOT NULL DEFAULT 0,
        artifact TEXT
    );

    CREATE TABLE IF NOT EXISTS interactions (
        id TEXT PRIMARY KEY,
        session_id TEXT,
        timestamp TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        tag_name TEXT NOT NULL DEFAULT '',
        text TEXT NOT NULL DEFAULT '',
        attributes TEXT NOT NULL DEFAULT '{}',
        bounding_box TEXT,
        selector_used TEXT NOT NULL DEFAULT '',
        strategy TEXT NOT NULL DEFAULT '',
        selectors_tried TEXT NOT NULL DEFAULT '[]',
        page_url TEXT NOT NULL DEFAULT '',
        page_title TEXT NOT NULL DEFAULT '',
        step_text TEXT NOT NULL DEFAULT '',
        action_type TEXT NOT NULL DEFAULT '',
        action_value TEXT,
        outcome TEXT NOT NULL,
        error_message TEXT,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        retries INTEGER NOT NULL DEFAULT 0,
        user_correction TEXT,
        corrected_selector TEXT,
        confidence REAL NOT NULL DEFAULT 0.0
    );

    CREATE INDEX IF NOT EXISTS idx_interactions_fingerprint ON interactions(fingerprint);
    CREATE INDEX IF NOT EXISTS idx_interactions_session ON interactions(session_id);
    CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp);

    CREATE TABLE IF NOT EXISTS selector_stats (
        fingerprint TEXT NOT NULL,
        selector TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        successes INTEGER NOT NULL DEFAULT 0,
        success_rate REAL NOT NULL DEFAULT 0.0,
        avg_duration_ms REAL NOT NULL DEFAULT 0.0,
        last_used TEXT NOT NULL,
        PRIMARY KEY (fingerprint, selector)
    );

    CREATE TABLE IF NOT EXISTS correction_mappings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        original_step TEXT NOT NULL,
        page_url_pattern TEXT NOT NULL DEFAULT '',
        corrected_selector TEXT NOT NULL,
        user_correction TEXT NOT NULL,
        times_applied INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_applied TEXT NOT NULL,
        UNIQUE (original_step, page_url_pattern)
    );

    CREATE TABLE IF NOT EXISTS page_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        step_index INTEGER NOT NULL,
        page_url TEXT NOT NULL DEFAULT '',
        dom_snapshot TEXT NOT NULL DEFAULT '',
        screenshot_base64 TEXT,
        taken_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_snapshots_session ON page_snapshots(session_id);
";

const SESSION_COLUMNS: &str = "id, started_at, ended_at, target_url, steps, successful_steps, \
     failed_steps, corrected_steps, artifact";

const INTERACTION_COLUMNS: &str = "id, timestamp, fingerprint, tag_name, text, attributes, \
     bounding_box, selector_used, strategy, selectors_tried, page_url, page_title, step_text, \
     action_type, action_value, outcome, error_message, duration_ms, retries, user_correction, \
     corrected_selector, confidence";

const STAT_COLUMNS: &str =
    "fingerprint, selector, attempts, successes, success_rate, avg_duration_ms, last_used";

const CORRECTION_COLUMNS: &str = "id, original_step, page_url_pattern, corrected_selector, \
     user_correction, times_applied, created_at, last_applied";

/// Durable store of sessions, interactions, selector statistics and corrections.
///
/// Writes are serialized through one connection per ledger; several ledgers may
/// share a database file thanks to WAL mode and a busy timeout.
pub struct InteractionLedger {
    conn: Mutex<Connection>,
}

impl InteractionLedger {
    /// Open (or create) a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened interaction ledger");
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory ledger (useful for tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &Connection) -> LedgerResult<()> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ---- sessions ----

    pub fn create_session(&self, session: &Session) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, started_at, ended_at, target_url, steps,
                 successful_steps, failed_steps, corrected_steps, artifact)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id.as_str(),
                format_time(&session.started_at),
                session.ended_at.as_ref().map(format_time),
                session.target_url,
                serde_json::to_string(&session.steps)?,
                session.successful_steps,
                session.failed_steps,
                session.corrected_steps,
                session.artifact,
            ],
        )?;
        debug!(session_id = %session.id, steps = session.steps.len(), "Session created");
        Ok(())
    }

    /// Persist counters, end time and artifact of an existing session.
    pub fn update_session(&self, session: &Session) -> LedgerResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET ended_at = ?2, target_url = ?3, steps = ?4,
                 successful_steps = ?5, failed_steps = ?6, corrected_steps = ?7, artifact = ?8
             WHERE id = ?1",
            params![
                session.id.as_str(),
                session.ended_at.as_ref().map(format_time),
                session.target_url,
                serde_json::to_string(&session.steps)?,
                session.successful_steps,
                session.failed_steps,
                session.corrected_steps,
                session.artifact,
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    pub fn get_session(&self, id: &SessionId) -> LedgerResult<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.as_str()],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Most recent sessions first.
    pub fn list_sessions(&self, limit: usize) -> LedgerResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- interactions ----

    /// Append an interaction and fold it into the aggregate tables.
    ///
    /// The interaction insert, the selector statistic upsert and the optional
    /// correction upsert commit together or not at all.
    pub fn record_interaction(
        &self,
        interaction: &Interaction,
        session_id: Option<&SessionId>,
    ) -> LedgerResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let timestamp = format_time(&interaction.timestamp);

        tx.execute(
            &format!(
                "INSERT INTO interactions (session_id, {INTERACTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
            ),
            params![
                session_id.map(SessionId::as_str),
                interaction.id.as_str(),
                timestamp,
                interaction.fingerprint.as_str(),
                interaction.tag_name,
                interaction.text,
                serde_json::to_string(&interaction.attributes)?,
                interaction
                    .bounding_box
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                interaction.selector_used,
                interaction.strategy,
                serde_json::to_string(&interaction.selectors_tried)?,
                interaction.page_url,
                interaction.page_title,
                interaction.step_text,
                interaction.action_type,
                interaction.action_value,
                interaction.outcome.as_str(),
                interaction.error_message,
                interaction.duration_ms as i64,
                interaction.retries,
                interaction.user_correction,
                interaction.corrected_selector,
                interaction.confidence,
            ],
        )?;

        if !interaction.selector_used.is_empty() {
            let success = u32::from(interaction.outcome.is_success());
            tx.execute(
                "INSERT INTO selector_stats
                     (fingerprint, selector, attempts, successes, success_rate, avg_duration_ms, last_used)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
                 ON CONFLICT(fingerprint, selector) DO UPDATE SET
                     attempts = attempts + 1,
                     successes = successes + excluded.successes,
                     success_rate = CAST(successes + excluded.successes AS REAL) / (attempts + 1),
                     avg_duration_ms = (avg_duration_ms * attempts + excluded.avg_duration_ms) / (attempts + 1),
                     last_used = excluded.last_used",
                params![
                    interaction.fingerprint.as_str(),
                    interaction.selector_used,
                    success,
                    f64::from(success),
                    interaction.duration_ms as f64,
                    timestamp,
                ],
            )?;
        }

        if interaction.carries_correction() {
            tx.execute(
                "INSERT INTO correction_mappings
                     (original_step, page_url_pattern, corrected_selector, user_correction,
                      times_applied, created_at, last_applied)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 ON CONFLICT(original_step, page_url_pattern) DO UPDATE SET
                     times_applied = times_applied + 1,
                     corrected_selector = excluded.corrected_selector,
                     user_correction = excluded.user_correction,
                     last_applied = excluded.last_applied",
                params![
                    interaction.step_text.trim(),
                    page_url_pattern(&interaction.page_url),
                    interaction.corrected_selector,
                    interaction.user_correction,
                    timestamp,
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            fingerprint = %interaction.fingerprint,
            selector = %interaction.selector_used,
            outcome = %interaction.outcome,
            "Interaction recorded"
        );
        Ok(())
    }

    /// Interactions of one session in execution order.
    pub fn get_session_interactions(&self, session_id: &SessionId) -> LedgerResult<Vec<Interaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions
             WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![session_id.as_str()], interaction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Recent successful interactions on elements with the same tag and similar text.
    pub fn find_similar_interactions(
        &self,
        tag_name: &str,
        text: &str,
        limit: usize,
    ) -> LedgerResult<Vec<Interaction>> {
        let pattern = format!(
            "%{}%",
            escape_like(truncate_chars(text.trim(), SIMILAR_TEXT_PREFIX_CHARS))
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions
             WHERE tag_name = ?1 AND text LIKE ?2 ESCAPE '\\' AND outcome = ?3
             ORDER BY timestamp DESC LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                tag_name.to_ascii_lowercase(),
                pattern,
                Outcome::Success.as_str(),
                limit as i64
            ],
            interaction_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- selector statistics ----

    /// Best trusted selector for an element, if any has at least `min_attempts`.
    pub fn best_selector(
        &self,
        fingerprint: &Fingerprint,
        min_attempts: u32,
    ) -> LedgerResult<Option<SelectorStat>> {
        let conn = self.conn.lock();
        let stat = conn
            .query_row(
                &format!(
                    "SELECT {STAT_COLUMNS} FROM selector_stats
                     WHERE fingerprint = ?1 AND attempts >= ?2
                     ORDER BY success_rate DESC, attempts DESC, last_used DESC LIMIT 1"
                ),
                params![fingerprint.as_str(), min_attempts],
                stat_from_row,
            )
            .optional()?;
        Ok(stat)
    }

    /// Every selector statistic recorded for an element, best first.
    pub fn selector_history(&self, fingerprint: &Fingerprint) -> LedgerResult<Vec<SelectorStat>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STAT_COLUMNS} FROM selector_stats
             WHERE fingerprint = ?1 ORDER BY success_rate DESC, attempts DESC"
        ))?;
        let rows = stmt.query_map(params![fingerprint.as_str()], stat_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- corrections ----

    /// Look up a learned correction for a step.
    ///
    /// Exact step text wins; otherwise any mapping whose step contains the first
    /// 30 characters of `step_text`. Mappings for the same page pattern are
    /// preferred, then the most applied.
    pub fn find_correction(
        &self,
        step_text: &str,
        page_url: Option<&str>,
    ) -> LedgerResult<Option<CorrectionMapping>> {
        let step = step_text.trim();
        if step.is_empty() {
            return Ok(None);
        }
        let pattern = page_url.map(page_url_pattern).unwrap_or_default();
        let conn = self.conn.lock();

        let exact = conn
            .query_row(
                &format!(
                    "SELECT {CORRECTION_COLUMNS} FROM correction_mappings
                     WHERE original_step = ?1
                     ORDER BY (page_url_pattern = ?2) DESC, times_applied DESC, last_applied DESC
                     LIMIT 1"
                ),
                params![step, pattern],
                correction_from_row,
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }

        let like = format!(
            "%{}%",
            escape_like(truncate_chars(step, CORRECTION_PREFIX_CHARS))
        );
        let fuzzy = conn
            .query_row(
                &format!(
                    "SELECT {CORRECTION_COLUMNS} FROM correction_mappings
                     WHERE original_step LIKE ?1 ESCAPE '\\'
                     ORDER BY (page_url_pattern = ?2) DESC, times_applied DESC, last_applied DESC
                     LIMIT 1"
                ),
                params![like, pattern],
                correction_from_row,
            )
            .optional()?;
        Ok(fuzzy)
    }

    // ---- snapshots ----

    pub fn save_page_snapshot(&self, snapshot: &PageSnapshot) -> LedgerResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO page_snapshots
                 (session_id, step_index, page_url, dom_snapshot, screenshot_base64, taken_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.session_id.as_str(),
                snapshot.step_index as i64,
                snapshot.page_url,
                snapshot.dom_snapshot,
                snapshot.screenshot_base64,
                format_time(&snapshot.taken_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn page_snapshots(&self, session_id: &SessionId) -> LedgerResult<Vec<PageSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, step_index, page_url, dom_snapshot, screenshot_base64, taken_at
             FROM page_snapshots WHERE session_id = ?1 ORDER BY step_index ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| {
            Ok(PageSnapshot {
                session_id: SessionId(row.get(0)?),
                step_index: row.get::<_, i64>(1)?.max(0) as usize,
                page_url: row.get(2)?,
                dom_snapshot: row.get(3)?,
                screenshot_base64: row.get(4)?,
                taken_at: parse_time(5, row.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- maintenance ----

    pub fn stats(&self) -> LedgerResult<LedgerStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> rusqlite::Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
        };

        let total_sessions = count("SELECT COUNT(*) FROM sessions")?;
        let total_interactions = count("SELECT COUNT(*) FROM interactions")?;
        let successful_interactions = count(
            "SELECT COUNT(*) FROM interactions WHERE outcome IN ('success', 'corrected')",
        )?;
        let distinct_elements = count("SELECT COUNT(DISTINCT fingerprint) FROM interactions")?;
        let tracked_selectors = count("SELECT COUNT(*) FROM selector_stats")?;
        let correction_mappings = count("SELECT COUNT(*) FROM correction_mappings")?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {STAT_COLUMNS} FROM selector_stats
             ORDER BY attempts DESC, success_rate DESC LIMIT ?1"
        ))?;
        let top_selectors = stmt
            .query_map(params![TOP_SELECTOR_LIMIT as i64], stat_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let success_rate = if total_interactions == 0 {
            0.0
        } else {
            successful_interactions as f64 / total_interactions as f64
        };

        Ok(LedgerStats {
            total_sessions,
            total_interactions,
            successful_interactions,
            success_rate,
            distinct_elements,
            tracked_selectors,
            correction_mappings,
            top_selectors,
        })
    }

    /// Delete interactions, snapshots and sessions older than `retention`.
    ///
    /// Selector statistics and correction mappings are aggregates and survive.
    pub fn cleanup_old_data(&self, retention: chrono::Duration) -> LedgerResult<CleanupReport> {
        let cutoff = format_time(&(Utc::now() - retention));
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let interactions =
            tx.execute("DELETE FROM interactions WHERE timestamp <= ?1", params![cutoff])?;
        let snapshots =
            tx.execute("DELETE FROM page_snapshots WHERE taken_at <= ?1", params![cutoff])?;
        let sessions =
            tx.execute("DELETE FROM sessions WHERE started_at <= ?1", params![cutoff])?;
        tx.commit()?;

        let report = CleanupReport {
            interactions,
            snapshots,
            sessions,
        };
        info!(
            cutoff = %cutoff,
            interactions = report.interactions,
            snapshots = report.snapshots,
            sessions = report.sessions,
            "Ledger cleanup finished"
        );
        Ok(report)
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

/// Escape LIKE wildcards so user text matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let ended_at: Option<String> = row.get(2)?;
    let steps: String = row.get(4)?;
    Ok(Session {
        id: SessionId(row.get(0)?),
        started_at: parse_time(1, row.get(1)?)?,
        ended_at: ended_at.map(|raw| parse_time(2, raw)).transpose()?,
        target_url: row.get(3)?,
        steps: parse_json(4, &steps)?,
        successful_steps: row.get(5)?,
        failed_steps: row.get(6)?,
        corrected_steps: row.get(7)?,
        artifact: row.get(8)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let attributes: String = row.get(5)?;
    let bounding_box: Option<String> = row.get(6)?;
    let selectors_tried: String = row.get(9)?;
    let outcome: String = row.get(15)?;
    Ok(Interaction {
        id: InteractionId(row.get(0)?),
        timestamp: parse_time(1, row.get(1)?)?,
        fingerprint: Fingerprint::from(row.get::<_, String>(2)?),
        tag_name: row.get(3)?,
        text: row.get(4)?,
        attributes: parse_json(5, &attributes)?,
        bounding_box: bounding_box
            .as_deref()
            .map(|raw| parse_json(6, raw))
            .transpose()?,
        selector_used: row.get(7)?,
        strategy: row.get(8)?,
        selectors_tried: parse_json(9, &selectors_tried)?,
        page_url: row.get(10)?,
        page_title: row.get(11)?,
        step_text: row.get(12)?,
        action_type: row.get(13)?,
        action_value: row.get(14)?,
        outcome: outcome.parse::<Outcome>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(err))
        })?,
        error_message: row.get(16)?,
        duration_ms: row.get::<_, i64>(17)?.max(0) as u64,
        retries: row.get(18)?,
        user_correction: row.get(19)?,
        corrected_selector: row.get(20)?,
        confidence: row.get(21)?,
    })
}

fn stat_from_row(row: &Row<'_>) -> rusqlite::Result<SelectorStat> {
    Ok(SelectorStat {
        fingerprint: Fingerprint::from(row.get::<_, String>(0)?),
        selector: row.get(1)?,
        attempts: row.get(2)?,
        successes: row.get(3)?,
        success_rate: row.get(4)?,
        avg_duration_ms: row.get(5)?,
        last_used: parse_time(6, row.get(6)?)?,
    })
}

fn correction_from_row(row: &Row<'_>) -> rusqlite::Result<CorrectionMapping> {
    Ok(CorrectionMapping {
        id: row.get(0)?,
        original_step: row.get(1)?,
        page_url_pattern: row.get(2)?,
        corrected_selector: row.get(3)?,
        user_correction: row.get(4)?,
        times_applied: row.get(5)?,
        created_at: parse_time(6, row.get(6)?)?,
        last_applied: parse_time(7, row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core_types::ElementDescriptor;

    fn login_button() -> ElementDescriptor {
        ElementDescriptor::new("button")
            .with_text("Login")
            .with_attr("data-testid", "login-btn")
    }

    fn interaction(selector: &str, outcome: Outcome) -> Interaction {
        Interaction::new(&login_button(), selector, "Click the Login button", outcome)
            .with_page("https://shop.example.com/account/login", "Login")
            .with_duration(100)
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_session_round_trip() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let mut session = Session::new("https://example.com", vec!["open".into(), "click".into()]);
        ledger.create_session(&session).unwrap();

        session.successful_steps = 2;
        session.ended_at = Some(Utc::now());
        session.artifact = Some("Feature: login".into());
        ledger.update_session(&session).unwrap();

        let loaded = ledger.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.steps, session.steps);
        assert_eq!(loaded.successful_steps, 2);
        assert_eq!(loaded.artifact.as_deref(), Some("Feature: login"));
        assert!(loaded.is_finished());
    }

    #[test]
    fn test_update_missing_session_is_not_found() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let session = Session::new("https://example.com", Vec::new());
        let err = ledger.update_session(&session).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_stat_rate_tracks_successes() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let outcomes = [
            Outcome::Success,
            Outcome::Failure,
            Outcome::Success,
            Outcome::Corrected,
            Outcome::Timeout,
        ];
        for outcome in outcomes {
            ledger
                .record_interaction(&interaction("[data-testid=\"login-btn\"]", outcome), None)
                .unwrap();
        }

        let history = ledger
            .selector_history(&Fingerprint::of(&login_button()))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempts, 5);
        assert_eq!(history[0].successes, 3);
        assert!((history[0].success_rate - 0.6).abs() < 1e-9);
        assert!((history[0].avg_duration_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_selector_requires_min_attempts() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let fingerprint = Fingerprint::of(&login_button());
        for _ in 0..2 {
            ledger
                .record_interaction(&interaction("#login", Outcome::Success), None)
                .unwrap();
        }
        assert!(ledger
            .best_selector(&fingerprint, DEFAULT_MIN_ATTEMPTS)
            .unwrap()
            .is_none());

        ledger
            .record_interaction(&interaction("#login", Outcome::Success), None)
            .unwrap();
        let best = ledger
            .best_selector(&fingerprint, DEFAULT_MIN_ATTEMPTS)
            .unwrap()
            .unwrap();
        assert_eq!(best.selector, "#login");
        assert_eq!(best.attempts, 3);
    }

    #[test]
    fn test_empty_selector_skips_statistics() {
        let ledger = InteractionLedger::in_memory().unwrap();
        ledger
            .record_interaction(&interaction("", Outcome::Failure), None)
            .unwrap();
        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_interactions, 1);
        assert_eq!(stats.tracked_selectors, 0);
    }

    #[test]
    fn test_correction_exact_and_fuzzy_lookup() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let corrected = interaction("text=\"Sign In\"", Outcome::Corrected)
            .with_correction("click the Sign In button", Some("text=\"Sign In\"".into()));
        ledger.record_interaction(&corrected, None).unwrap();

        let exact = ledger
            .find_correction("Click the Login button", Some("https://shop.example.com/account/login"))
            .unwrap()
            .unwrap();
        assert_eq!(exact.times_applied, 1);
        assert_eq!(exact.corrected_selector, "text=\"Sign In\"");
        assert_eq!(exact.page_url_pattern, "shop.example.com/account/login");

        ledger.record_interaction(&corrected, None).unwrap();
        let fuzzy = ledger
            .find_correction("click the login button", None)
            .unwrap()
            .unwrap();
        assert_eq!(fuzzy.times_applied, 2);

        assert!(ledger.find_correction("Scroll down", None).unwrap().is_none());
        assert!(ledger.find_correction("   ", None).unwrap().is_none());
    }

    #[test]
    fn test_correction_step_is_stored_trimmed() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let mut corrected = interaction("#submit", Outcome::Corrected)
            .with_correction("click Submit", Some("#submit".into()));
        corrected.step_text = "  Press the big green button on the checkout form \n".into();
        ledger.record_interaction(&corrected, None).unwrap();
        ledger.record_interaction(&corrected, None).unwrap();

        let mapping = ledger
            .find_correction("Press the big green button on the checkout form", None)
            .unwrap()
            .unwrap();
        assert_eq!(mapping.original_step, "Press the big green button on the checkout form");
        assert_eq!(mapping.times_applied, 2);
        assert_eq!(ledger.stats().unwrap().correction_mappings, 1);
    }

    #[test]
    fn test_similar_interactions_only_successes() {
        let ledger = InteractionLedger::in_memory().unwrap();
        ledger
            .record_interaction(&interaction("#login", Outcome::Success), None)
            .unwrap();
        ledger
            .record_interaction(&interaction("#broken", Outcome::Failure), None)
            .unwrap();

        let similar = ledger.find_similar_interactions("BUTTON", "Login", 10).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].selector_used, "#login");
        assert_eq!(similar[0].attributes.get("data-testid").map(String::as_str), Some("login-btn"));
    }

    #[test]
    fn test_cleanup_zero_window_keeps_aggregates() {
        let ledger = InteractionLedger::in_memory().unwrap();
        let session = Session::new("https://example.com", vec!["click".into()]);
        ledger.create_session(&session).unwrap();
        for _ in 0..3 {
            ledger
                .record_interaction(&interaction("#login", Outcome::Success), Some(&session.id))
                .unwrap();
        }
        ledger
            .save_page_snapshot(&PageSnapshot {
                session_id: session.id.clone(),
                step_index: 0,
                page_url: "https://example.com".into(),
                dom_snapshot: "<html></html>".into(),
                screenshot_base64: None,
                taken_at: Utc::now(),
            })
            .unwrap();

        let report = ledger.cleanup_old_data(chrono::Duration::zero()).unwrap();
        assert_eq!(report.interactions, 3);
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.sessions, 1);

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_interactions, 0);
        assert_eq!(stats.tracked_selectors, 1);
        assert!(ledger
            .best_selector(&Fingerprint::of(&login_button()), DEFAULT_MIN_ATTEMPTS)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_cleanup_keeps_recent_rows() {
        let ledger = InteractionLedger::in_memory().unwrap();
        ledger
            .record_interaction(&interaction("#login", Outcome::Success), None)
            .unwrap();
        let report = ledger.cleanup_old_data(chrono::Duration::days(30)).unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(ledger.stats().unwrap().total_interactions, 1);
    }
}
