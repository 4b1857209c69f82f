//! CSV export of stored calls for offline analysis.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoff;
use rusqlite::{Connection, ErrorCode};

use crate::db::queries;
use crate::models::{Role, Session};

const PAGE_SIZE: i64 = 200;

pub const CONVERSATION_HEADER: &[&str] = &[
    "conversation_id",
    "caller",
    "property",
    "language",
    "state",
    "user_turns",
    "booking_error",
    "created_at",
    "updated_at",
];

pub const MESSAGE_HEADER: &[&str] = &["conversation_id", "position", "role", "content"];

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_row<W: Write>(out: &mut W, fields: &[&str]) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{line}")
}

/// Busy or locked stores are worth retrying, anything else is not.
fn is_busy(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Read every stored session page by page, backing off while a live
/// server holds the write lock.
pub async fn load_all_sessions(
    db: Arc<Mutex<Connection>>,
    max_wait: Duration,
) -> anyhow::Result<Vec<Session>> {
    let db = &db;
    let mut sessions = Vec::new();
    let mut offset: i64 = 0;

    loop {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(max_wait),
            ..Default::default()
        };
        let page = retry(backoff, || async move {
            let conn = db
                .lock()
                .map_err(|_| backoff::Error::permanent(anyhow::anyhow!("database mutex poisoned")))?;
            queries::list_sessions(&conn, PAGE_SIZE, offset).map_err(|e| {
                if is_busy(&e) {
                    tracing::warn!(offset, error = %e, "session store busy, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        let fetched = page.len() as i64;
        sessions.extend(page);
        if fetched < PAGE_SIZE {
            break;
        }
        offset += fetched;
    }

    Ok(sessions)
}

/// One row per call into `conversations`, one row per spoken turn into `messages`.
pub fn write_report<C: Write, M: Write>(
    sessions: &[Session],
    conversations: &mut C,
    messages: &mut M,
) -> std::io::Result<()> {
    write_row(conversations, CONVERSATION_HEADER)?;
    write_row(messages, MESSAGE_HEADER)?;

    for session in sessions {
        let user_turns = session.user_turns().to_string();
        let created_at = session.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let updated_at = session.updated_at.format("%Y-%m-%d %H:%M:%S").to_string();
        write_row(
            conversations,
            &[
                &session.id,
                session.caller.as_deref().unwrap_or(""),
                session.property_name.as_deref().unwrap_or(""),
                &session.language,
                session.state().as_str(),
                &user_turns,
                session.booking.error.as_deref().unwrap_or(""),
                &created_at,
                &updated_at,
            ],
        )?;

        let spoken = session
            .history
            .iter()
            .filter(|t| matches!(t.role, Role::User | Role::Assistant));
        for (position, turn) in spoken.enumerate() {
            write_row(
                messages,
                &[&session.id, &position.to_string(), turn.role.as_str(), &turn.content],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::ChatTurn;
    use chrono::Utc;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_report_rows() {
        let mut session = Session::new("c1", Some("+4989".into()), "de-DE", "v", Utc::now().naive_utc());
        session.history = vec![
            ChatTurn::system("prompt"),
            ChatTurn::assistant("Hallo"),
            ChatTurn::user("Zimmer, bitte"),
        ];

        let mut conversations = Vec::new();
        let mut messages = Vec::new();
        write_report(&[session], &mut conversations, &mut messages).unwrap();

        let conversations = String::from_utf8(conversations).unwrap();
        let messages = String::from_utf8(messages).unwrap();
        assert_eq!(conversations.lines().count(), 2);
        assert!(conversations.lines().nth(1).unwrap().starts_with("c1,+4989,,de-DE,normal,1,"));
        assert_eq!(messages.lines().count(), 3);
        assert_eq!(messages.lines().nth(2).unwrap(), "c1,1,user,\"Zimmer, bitte\"");
    }

    #[tokio::test]
    async fn test_load_all_sessions_pages() {
        let conn = db::init_db(":memory:").unwrap();
        let now = Utc::now().naive_utc();
        for i in 0..(PAGE_SIZE + 5) {
            let s = Session::new(&format!("c{i}"), None, "de-DE", "v", now);
            queries::insert_session(&conn, &s).unwrap();
        }
        let sessions = load_all_sessions(Arc::new(Mutex::new(conn)), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sessions.len() as i64, PAGE_SIZE + 5);
    }
}
