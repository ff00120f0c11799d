//! SQLite-backed [`CustomerStore`].
//!
//! List-valued fields (encodings, purchase history) are stored as JSON
//! text; timestamps as RFC 3339 UTC strings. Busy/locked databases and a
//! closed connection surface as [`StoreError::Unavailable`].

use crate::{CustomerDocument, CustomerStore, QueryField, StoreError, VisitUpdate};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kiosk_core::Emotion;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tokio_rusqlite::Connection;

/// How long SQLite waits on a lock before reporting SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS customers (
        id               TEXT PRIMARY KEY NOT NULL,
        name             TEXT NOT NULL,
        phone_number     TEXT,
        encodings        TEXT NOT NULL DEFAULT '[]',
        purchase_history TEXT NOT NULL DEFAULT '[]',
        last_visit       TEXT,
        last_emotion     TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(name);
    CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers(phone_number);
";

const SELECT_COLUMNS: &str =
    "SELECT id, name, phone_number, encodings, purchase_history, last_visit, last_emotion FROM customers";

/// Row as read from SQLite, before JSON and timestamp decoding.
struct RawRow {
    id: String,
    name: String,
    phone_number: Option<String>,
    encodings: String,
    purchase_history: String,
    last_visit: Option<String>,
    last_emotion: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            phone_number: row.get(2)?,
            encodings: row.get(3)?,
            purchase_history: row.get(4)?,
            last_visit: row.get(5)?,
            last_emotion: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CustomerDocument, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let encodings = serde_json::from_str(&self.encodings)
            .map_err(|e| corrupt(format!("encodings: {e}")))?;
        let purchase_history = serde_json::from_str(&self.purchase_history)
            .map_err(|e| corrupt(format!("purchase_history: {e}")))?;
        let last_visit = self
            .last_visit
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| corrupt(format!("last_visit: {e}")))?
            .map(|t| t.with_timezone(&Utc));

        Ok(CustomerDocument {
            last_emotion: self.last_emotion.as_deref().map(Emotion::parse),
            id: self.id,
            name: self.name,
            phone_number: self.phone_number,
            encodings,
            purchase_history,
            last_visit,
        })
    }
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn classify_sqlite(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn classify(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Unavailable("database connection closed".into())
        }
        tokio_rusqlite::Error::Rusqlite(e) => classify_sqlite(e),
        other => StoreError::Backend(other.to_string()),
    }
}

fn column(field: QueryField) -> &'static str {
    match field {
        QueryField::Name => "name",
        QueryField::PhoneNumber => "phone_number",
        QueryField::LastEmotion => "last_emotion",
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path).await.map_err(classify)?;
        tracing::info!(path = %path.display(), "customer store opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(classify)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(classify)?;
        Ok(Self { conn })
    }

    /// Run a multi-row select. Rows that fail to decode are logged and
    /// skipped so one bad document cannot hide the rest.
    async fn query(
        &self,
        sql: String,
        arg: Option<String>,
    ) -> Result<Vec<CustomerDocument>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = match arg {
                    Some(value) => stmt
                        .query_map(params![value], RawRow::from_row)?
                        .collect::<Result<Vec<_>, _>>()?,
                    None => stmt
                        .query_map([], RawRow::from_row)?
                        .collect::<Result<Vec<_>, _>>()?,
                };
                Ok(rows)
            })
            .await
            .map_err(classify)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(doc) => docs.push(doc),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable customer document"),
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl CustomerStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<CustomerDocument>, StoreError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                        params![id],
                        RawRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(classify)?;

        row.map(RawRow::decode).transpose()
    }

    async fn find_by(
        &self,
        field: QueryField,
        value: &str,
    ) -> Result<Vec<CustomerDocument>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {} = ?1 ORDER BY rowid", column(field));
        self.query(sql, Some(value.to_string())).await
    }

    async fn list(&self) -> Result<Vec<CustomerDocument>, StoreError> {
        self.query(format!("{SELECT_COLUMNS} ORDER BY rowid"), None).await
    }

    async fn record_visit(&self, id: &str, update: &VisitUpdate) -> Result<(), StoreError> {
        let key = id.to_string();
        let last_visit = format_timestamp(&update.last_visit);
        let last_emotion = update.last_emotion.as_str();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE customers SET last_visit = ?2, last_emotion = ?3 WHERE id = ?1",
                    params![key, last_visit, last_emotion],
                )?;
                Ok(n)
            })
            .await
            .map_err(classify)?;

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn clear_visit(&self, id: &str) -> Result<(), StoreError> {
        let key = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE customers SET last_visit = NULL, last_emotion = NULL WHERE id = ?1",
                    params![key],
                )?;
                Ok(n)
            })
            .await
            .map_err(classify)?;

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn upsert(&self, doc: &CustomerDocument) -> Result<(), StoreError> {
        let encodings = serde_json::to_string(&doc.encodings)
            .map_err(|e| StoreError::Backend(format!("encode encodings: {e}")))?;
        let history = serde_json::to_string(&doc.purchase_history)
            .map_err(|e| StoreError::Backend(format!("encode purchase_history: {e}")))?;
        let id = doc.id.clone();
        let name = doc.name.clone();
        let phone = doc.phone_number.clone();
        let last_visit = doc.last_visit.as_ref().map(format_timestamp);
        let last_emotion = doc.last_emotion.map(|e| e.as_str());

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO customers
                        (id, name, phone_number, encodings, purchase_history, last_visit, last_emotion)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        phone_number = excluded.phone_number,
                        encodings = excluded.encodings,
                        purchase_history = excluded.purchase_history,
                        last_visit = COALESCE(excluded.last_visit, customers.last_visit),
                        last_emotion = COALESCE(excluded.last_emotion, customers.last_emotion)",
                    params![id, name, phone, encodings, history, last_visit, last_emotion],
                )?;
                Ok(())
            })
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kiosk_core::PurchaseItem;

    fn doc(id: &str, name: &str, phone: Option<&str>) -> CustomerDocument {
        CustomerDocument {
            id: id.into(),
            name: name.into(),
            phone_number: phone.map(String::from),
            encodings: vec![vec![0.1, 0.2, 0.3]],
            purchase_history: vec![PurchaseItem {
                item: "Milk".into(),
                price: 2.5,
                time: Some("2025-01-02".into()),
            }],
            last_visit: None,
            last_emotion: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let alice = doc("c1", "Alice", Some("+15550001"));
        store.upsert(&alice).await.unwrap();

        let loaded = store.get("c1").await.unwrap().unwrap();
        assert_eq!(loaded, alice);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for (id, name) in [("z", "Zed"), ("a", "Ann"), ("m", "Mo")] {
            store.upsert(&doc(id, name, None)).await.unwrap();
        }
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_record_visit_is_partial_update() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert(&doc("c1", "Alice", Some("+1555"))).await.unwrap();

        let when = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        store
            .record_visit("c1", &VisitUpdate { last_visit: when, last_emotion: Emotion::Happy })
            .await
            .unwrap();

        let loaded = store.get("c1").await.unwrap().unwrap();
        assert_eq!(loaded.last_visit, Some(when));
        assert_eq!(loaded.last_emotion, Some(Emotion::Happy));
        assert_eq!(loaded.phone_number.as_deref(), Some("+1555"));
        assert_eq!(loaded.purchase_history.len(), 1);
    }

    #[tokio::test]
    async fn test_record_visit_unknown_customer() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store
            .record_visit(
                "ghost",
                &VisitUpdate {
                    last_visit: Utc::now(),
                    last_emotion: Emotion::Sad,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_reimport_keeps_visit_fields_and_clear_resets() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert(&doc("c1", "Alice", None)).await.unwrap();
        let when = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        store
            .record_visit("c1", &VisitUpdate { last_visit: when, last_emotion: Emotion::Neutral })
            .await
            .unwrap();

        store.upsert(&doc("c1", "Alice B.", None)).await.unwrap();
        let loaded = store.get("c1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Alice B.");
        assert_eq!(loaded.last_visit, Some(when));

        store.clear_visit("c1").await.unwrap();
        let cleared = store.get("c1").await.unwrap().unwrap();
        assert_eq!(cleared.last_visit, None);
        assert_eq!(cleared.last_emotion, None);
    }

    #[tokio::test]
    async fn test_find_by_exact_field() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert(&doc("c1", "Alice", Some("+1"))).await.unwrap();
        store.upsert(&doc("c2", "Bob", Some("+2"))).await.unwrap();
        store
            .record_visit(
                "c2",
                &VisitUpdate {
                    last_visit: Utc::now(),
                    last_emotion: Emotion::Angry,
                },
            )
            .await
            .unwrap();

        let by_phone = store.find_by(QueryField::PhoneNumber, "+1").await.unwrap();
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].id, "c1");

        let by_emotion = store.find_by(QueryField::LastEmotion, "angry").await.unwrap();
        assert_eq!(by_emotion.len(), 1);
        assert_eq!(by_emotion[0].id, "c2");

        assert!(store.find_by(QueryField::Name, "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_encodings_reported() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .conn
            .call(|conn| {
                conn.execute(
                    "INSERT INTO customers (id, name, encodings) VALUES ('bad', 'Bad', 'not json')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "bad"));
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_documents() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .conn
            .call(|conn| {
                conn.execute_batch(
                    "INSERT INTO customers (id, name, encodings) VALUES ('good', 'Good', '[[0.1,0.2]]');
                     INSERT INTO customers (id, name, encodings) VALUES ('bad', 'Bad', 'not json');
                     INSERT INTO customers (id, name, encodings, last_visit)
                         VALUES ('late', 'Late', '[[0.3,0.4]]', 'yesterday');",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let docs = store.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "good");
        assert_eq!(docs[0].encodings, vec![vec![0.1, 0.2]]);

        // Single-record reads stay strict.
        assert!(store.get("bad").await.is_err());
        assert!(store.get("late").await.is_err());
    }

    #[test]
    fn test_busy_and_locked_are_transient() {
        let failure = |code| rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None);

        let busy = failure(rusqlite::ffi::SQLITE_BUSY);
        assert!(classify_sqlite(busy).is_transient());

        let locked = failure(rusqlite::ffi::SQLITE_LOCKED);
        assert!(classify_sqlite(locked).is_transient());

        assert!(!classify_sqlite(rusqlite::Error::QueryReturnedNoRows).is_transient());
        assert!(classify(tokio_rusqlite::Error::ConnectionClosed).is_transient());
    }
}
