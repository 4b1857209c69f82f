use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::models::{BookingSlots, ChatTurn, Offer, Session};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SESSION_COLUMNS: &str = "id, caller, history, property_name, city, location_attempts, booking, offers, language, voice_name, closed, created_at, updated_at";

fn format_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_time(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

struct SessionRow {
    id: String,
    caller: Option<String>,
    history: String,
    property_name: Option<String>,
    city: Option<String>,
    location_attempts: u32,
    booking: String,
    offers: String,
    language: String,
    voice_name: String,
    closed: bool,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            caller: row.get(1)?,
            history: row.get(2)?,
            property_name: row.get(3)?,
            city: row.get(4)?,
            location_attempts: row.get(5)?,
            booking: row.get(6)?,
            offers: row.get(7)?,
            language: row.get(8)?,
            voice_name: row.get(9)?,
            closed: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_session(self) -> anyhow::Result<Session> {
        let history: Vec<ChatTurn> = serde_json::from_str(&self.history)?;
        let booking: BookingSlots = serde_json::from_str(&self.booking).unwrap_or_else(|e| {
            tracing::warn!(session = %self.id, error = %e, "unreadable booking slots, starting over");
            BookingSlots::default()
        });
        let offers: Vec<Offer> = serde_json::from_str(&self.offers).unwrap_or_else(|e| {
            tracing::warn!(session = %self.id, error = %e, "unreadable offers, dropping them");
            Vec::new()
        });

        Ok(Session {
            id: self.id,
            caller: self.caller,
            history,
            property_name: self.property_name,
            city: self.city,
            location_attempts: self.location_attempts,
            booking,
            offers,
            language: self.language,
            voice_name: self.voice_name,
            closed: self.closed,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
        })
    }
}

// ── Sessions ──

pub fn get_session(conn: &Connection, id: &str) -> anyhow::Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;

    match stmt.query_row(params![id], SessionRow::from_row) {
        Ok(row) => Ok(Some(row.into_session()?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, caller, history, property_name, city, location_attempts, booking, offers, language, voice_name, closed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            session.id,
            session.caller,
            serde_json::to_string(&session.history)?,
            session.property_name,
            session.city,
            session.location_attempts,
            serde_json::to_string(&session.booking)?,
            serde_json::to_string(&session.offers)?,
            session.language,
            session.voice_name,
            session.closed,
            format_time(&session.created_at),
            format_time(&session.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    let updated = conn.execute(
        "UPDATE sessions SET
           history = ?2,
           property_name = ?3,
           city = ?4,
           location_attempts = ?5,
           booking = ?6,
           offers = ?7,
           language = ?8,
           voice_name = ?9,
           closed = ?10,
           updated_at = ?11
         WHERE id = ?1",
        params![
            session.id,
            serde_json::to_string(&session.history)?,
            session.property_name,
            session.city,
            session.location_attempts,
            serde_json::to_string(&session.booking)?,
            serde_json::to_string(&session.offers)?,
            session.language,
            session.voice_name,
            session.closed,
            format_time(&session.updated_at),
        ],
    )?;
    anyhow::ensure!(updated == 1, "session {} does not exist", session.id);
    Ok(())
}

/// Sessions opened by `caller` after `since`.
pub fn count_recent_calls(
    conn: &Connection,
    caller: &str,
    since: NaiveDateTime,
) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE caller = ?1 AND created_at > ?2",
        params![caller, format_time(&since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Newest sessions first.
pub fn list_sessions(conn: &Connection, limit: i64, offset: i64) -> anyhow::Result<Vec<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit, offset], SessionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SessionRow::into_session).collect()
}
