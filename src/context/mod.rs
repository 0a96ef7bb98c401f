//! Conversation Context Store
//!
//! Per-session memory: a bounded turn history, the single `LastResult` used
//! for ordinal and referential follow-ups, and the topic entities most
//! recently observed.
//!
//! Sessions are handed out as `Arc<Mutex<Session>>`. Holding the lock for the
//! whole turn is what keeps turns of one session in arrival order.

mod entities;
mod journal;

pub use entities::{derive_entities, EntityKind, TopicEntities};
pub use journal::ConversationJournal;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::database::{QueryRows, Row};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("There is no item {requested} in the last result (it has {available} items).")]
    NoSuchOrdinal { requested: usize, available: usize },
}

/// One completed exchange. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub assistant_text: String,
    pub sql: Option<String>,
    pub columns: Option<Vec<String>>,
    pub rows: Option<Vec<Row>>,
    pub extracted_entities: TopicEntities,
    pub intent_tag: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub turn_index: usize,
}

impl Turn {
    /// A turn without data; `turn_index` is assigned on append
    pub fn text(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
            sql: None,
            columns: None,
            rows: None,
            extracted_entities: TopicEntities::default(),
            intent_tag: None,
            timestamp: Utc::now(),
            turn_index: 0,
        }
    }
}

/// A rendered row keyed by column, with its 1-based position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedItem {
    pub display_index: usize,
    pub values: BTreeMap<String, Value>,
}

impl DisplayedItem {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    /// Cell as display text; null and missing are `None`
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// The rows produced by the most recent data-returning turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastResult {
    pub question: String,
    pub sql: String,
    pub columns: Vec<String>,
    /// Bounded by the display cap
    pub rows: Vec<Row>,
    pub total_row_count: usize,
    pub displayed_items: Vec<DisplayedItem>,
}

impl LastResult {
    pub fn new(question: impl Into<String>, sql: impl Into<String>, data: QueryRows, cap: usize) -> Self {
        let total_row_count = data.rows.len();
        let rows: Vec<Row> = data.rows.into_iter().take(cap).collect();
        let displayed_items = rows
            .iter()
            .enumerate()
            .map(|(i, row)| DisplayedItem {
                display_index: i + 1,
                values: data
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect(),
            })
            .collect();

        Self {
            question: question.into(),
            sql: sql.into(),
            columns: data.columns,
            rows,
            total_row_count,
            displayed_items,
        }
    }

    pub fn as_query_rows(&self) -> QueryRows {
        QueryRows::new(self.columns.clone(), self.rows.clone())
    }

    pub fn is_truncated(&self) -> bool {
        self.total_row_count > self.rows.len()
    }
}

/// Memory for one conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    turns: VecDeque<Turn>,
    last_result: Option<LastResult>,
    entities: TopicEntities,
    history_window: usize,
    display_cap: usize,
    next_turn_index: usize,
}

impl Session {
    pub fn new(id: impl Into<String>, history_window: usize, display_cap: usize) -> Self {
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            last_result: None,
            entities: TopicEntities::default(),
            history_window: history_window.max(1),
            display_cap: display_cap.max(1),
            next_turn_index: 1,
        }
    }

    pub fn append_turn(&mut self, mut turn: Turn) {
        turn.turn_index = self.next_turn_index;
        self.next_turn_index += 1;
        self.turns.push_back(turn);
        while self.turns.len() > self.history_window {
            self.turns.pop_front();
        }
    }

    /// Replace the last result and re-derive topic entities from it
    pub fn record_result(&mut self, last_result: LastResult) {
        let derived = derive_entities(&last_result.columns, &last_result.rows);
        self.entities.merge(derived);
        self.last_result = Some(last_result);
    }

    /// Most recent `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).collect()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn last_result(&self) -> Option<&LastResult> {
        self.last_result.as_ref()
    }

    pub fn item_by_ordinal(&self, i: usize) -> Result<&DisplayedItem, ContextError> {
        let items = self
            .last_result
            .as_ref()
            .map(|r| r.displayed_items.as_slice())
            .unwrap_or_default();
        if i == 0 || i > items.len() {
            return Err(ContextError::NoSuchOrdinal {
                requested: i,
                available: items.len(),
            });
        }
        Ok(&items[i - 1])
    }

    pub fn entities(&self) -> &TopicEntities {
        &self.entities
    }

    /// Bind entities mentioned by the user (slots of a matched intent)
    pub fn note_entities(&mut self, entities: TopicEntities) {
        self.entities.merge(entities);
    }

    pub fn display_cap(&self) -> usize {
        self.display_cap
    }
}

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct StoredSession {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
}

/// All live sessions
///
/// Creating a session sweeps the store: sessions idle past the TTL go, then
/// the least recently used ones while the store is full. A session whose
/// handle is held by a running turn is never swept.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    history_window: usize,
    display_cap: usize,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(history_window: usize, display_cap: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_window,
            display_cap,
            idle_ttl: DEFAULT_IDLE_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    pub fn with_limits(mut self, idle_ttl: Duration, max_sessions: usize) -> Self {
        self.idle_ttl = idle_ttl;
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Get or create the session with this id
    pub async fn session(&self, id: &str) -> Arc<Mutex<Session>> {
        let now = Instant::now();
        if let Some(stored) = self.sessions.write().await.get_mut(id) {
            stored.last_used = now;
            return stored.session.clone();
        }

        self.sweep(now).await;
        let mut sessions = self.sessions.write().await;
        let stored = sessions.entry(id.to_string()).or_insert_with(|| StoredSession {
            session: Arc::new(Mutex::new(Session::new(
                id,
                self.history_window,
                self.display_cap,
            ))),
            last_used: now,
        });
        stored.last_used = now;
        stored.session.clone()
    }

    async fn sweep(&self, now: Instant) {
        let victims: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut idle: Vec<(&String, Instant)> = sessions
                .iter()
                .filter(|(_, stored)| Arc::strong_count(&stored.session) == 1)
                .map(|(id, stored)| (id, stored.last_used))
                .collect();
            idle.sort_by_key(|(_, last_used)| *last_used);
            // room for the session about to be created
            let excess = (sessions.len() + 1).saturating_sub(self.max_sessions);
            idle.into_iter()
                .enumerate()
                .filter(|(i, (_, last_used))| {
                    *i < excess || now.duration_since(*last_used) >= self.idle_ttl
                })
                .map(|(_, (id, _))| id.clone())
                .collect()
        };
        for id in &victims {
            self.remove(id).await;
        }
        if !victims.is_empty() {
            debug!(evicted = victims.len(), "idle sessions swept");
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn vehicles(n: usize) -> QueryRows {
        QueryRows::new(
            vec!["reg_no".to_string(), "plant_name".to_string()],
            (1..=n)
                .map(|i| vec![json!(format!("WB{:02}A{:04}", i, i)), json!("Kolkata")])
                .collect(),
        )
    }

    #[test]
    fn test_ordinal_lookup() {
        let mut session = Session::new("s1", 20, 50);
        session.record_result(LastResult::new("list vehicles", "SELECT 1", vehicles(10), 50));

        let third = session.item_by_ordinal(3).unwrap();
        assert_eq!(third.display_index, 3);
        assert_eq!(third.text("reg_no").as_deref(), Some("WB03A0003"));

        assert_eq!(
            session.item_by_ordinal(11),
            Err(ContextError::NoSuchOrdinal {
                requested: 11,
                available: 10
            })
        );
        assert!(session.item_by_ordinal(0).is_err());
    }

    #[test]
    fn test_display_cap_bounds_indexing() {
        let mut session = Session::new("s1", 20, 50);
        session.record_result(LastResult::new("list", "SELECT 1", vehicles(120), 50));
        let last = session.last_result().unwrap();
        assert_eq!(last.total_row_count, 120);
        assert_eq!(last.displayed_items.len(), 50);
        assert!(last.is_truncated());
        assert!(session.item_by_ordinal(51).is_err());
    }

    #[test]
    fn test_history_window_drops_oldest() {
        let mut session = Session::new("s1", 3, 50);
        for i in 0..5 {
            session.append_turn(Turn::text(format!("q{}", i), "a"));
        }
        let recent = session.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].user_text, "q2");
        assert_eq!(recent[2].turn_index, 5);
    }

    #[test]
    fn test_record_result_overwrites_previous() {
        let mut session = Session::new("s1", 20, 50);
        session.record_result(LastResult::new("first", "SELECT 1", vehicles(4), 50));
        session.record_result(LastResult::new("second", "SELECT 2", vehicles(2), 50));
        let last = session.last_result().unwrap();
        assert_eq!(last.question, "second");
        assert_eq!(last.displayed_items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_swept_on_new_session() {
        let store = SessionStore::new(20, 50).with_limits(Duration::from_secs(60), 100);
        store.session("old").await.lock().await.append_turn(Turn::text("hi", "hello"));
        tokio::time::advance(Duration::from_secs(30)).await;
        store.session("recent").await;
        tokio::time::advance(Duration::from_secs(45)).await;

        store.session("new").await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.session("old").await.lock().await.turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_drops_least_recently_used() {
        let store = SessionStore::new(20, 50).with_limits(Duration::from_secs(3600), 2);
        store.session("a").await.lock().await.append_turn(Turn::text("hi", "hello"));
        tokio::time::advance(Duration::from_secs(1)).await;
        store.session("b").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        store.session("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;

        store.session("c").await;
        assert_eq!(store.len().await, 2);
        assert_eq!(store.session("a").await.lock().await.turn_count(), 1);

        // a session held by a running turn survives the sweep
        let held = store.session("c").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        store.session("d").await;
        assert!(store.remove("c").await);
        drop(held);
        assert!(!store.remove("a").await);
    }

    #[tokio::test]
    async fn test_store_returns_same_session() {
        let store = SessionStore::new(20, 50);
        let a = store.session("abc").await;
        a.lock().await.append_turn(Turn::text("hi", "hello"));
        let b = store.session("abc").await;
        assert_eq!(b.lock().await.turn_count(), 1);
        assert_eq!(store.len().await, 1);
    }

    proptest! {
        #[test]
        fn prop_display_index_matches_position(n in 0usize..80, cap in 1usize..60) {
            let result = LastResult::new("q", "SELECT 1", vehicles(n), cap);
            prop_assert_eq!(result.displayed_items.len(), n.min(cap));
            for (i, item) in result.displayed_items.iter().enumerate() {
                prop_assert_eq!(item.display_index, i + 1);
                prop_assert_eq!(item.get("reg_no"), result.rows[i].first());
            }
        }
    }
}
