//! Paginated, cursor-based document sources.
//!
//! A [`ScrollSource`] hands out pages behind a server-side cursor that holds
//! resources until released. Callers must release every cursor they open,
//! whatever happens in between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ScrollError;

/// Filter applied when opening a cursor.
#[derive(Debug, Clone, Default)]
pub struct ScrollQuery {
    /// Source-specific index or collection name.
    pub index: Option<String>,
    /// Only items where this field is present and non-empty.
    pub required_field: Option<String>,
}

impl ScrollQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_required_field(mut self, field: impl Into<String>) -> Self {
        self.required_field = Some(field.into());
        self
    }
}

/// Opaque server-side cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollCursor {
    pub id: String,
    pub keep_alive: Duration,
}

/// One page of items plus the cursor to continue from.
#[derive(Debug, Clone)]
pub struct ScrollPage<T> {
    pub items: Vec<T>,
    pub cursor: ScrollCursor,
    /// Total matches reported by the source, when it knows.
    pub approx_total: Option<u64>,
}

impl<T> ScrollPage<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A paginated source read through a cursor.
#[async_trait]
pub trait ScrollSource: Send + Sync {
    type Item: Send + Sync + 'static;

    /// Opens a cursor and returns the first page.
    async fn open_cursor(
        &self,
        query: &ScrollQuery,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage<Self::Item>, ScrollError>;

    /// Returns the next page; an empty page means the cursor is exhausted.
    async fn next_page(&self, cursor: &ScrollCursor) -> Result<ScrollPage<Self::Item>, ScrollError>;

    /// Frees the cursor's server-side resources.
    async fn release(&self, cursor: &ScrollCursor) -> Result<(), ScrollError>;
}

struct OpenCursor {
    position: usize,
    page_size: usize,
    matches: Vec<usize>,
}

/// In-process source over a fixed set of JSON documents.
///
/// Used by the CLI to scroll a JSONL export and by tests. Counts releases so
/// callers can verify cursor hygiene.
pub struct MemoryScrollSource {
    documents: Vec<Value>,
    cursors: Mutex<HashMap<String, OpenCursor>>,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryScrollSource {
    pub fn new(documents: Vec<Value>) -> Self {
        Self {
            documents,
            cursors: Mutex::new(HashMap::new()),
            opened: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Parses one JSON document per non-blank line.
    pub fn from_jsonl(text: &str) -> Result<Self, serde_json::Error> {
        let documents = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<Value>, _>>()?;
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of cursors opened so far.
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of successful releases so far.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of cursors opened but not yet released.
    pub fn open_cursor_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, OpenCursor>> {
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_page(&self, cursor_id: &str, keep_alive: Duration) -> Result<ScrollPage<Value>, ScrollError> {
        let mut cursors = self.lock();
        let open = cursors
            .get_mut(cursor_id)
            .ok_or_else(|| ScrollError::UnknownCursor(cursor_id.to_string()))?;

        let end = (open.position + open.page_size).min(open.matches.len());
        let items = open.matches[open.position..end]
            .iter()
            .map(|&i| self.documents[i].clone())
            .collect();
        open.position = end;

        Ok(ScrollPage {
            items,
            cursor: ScrollCursor {
                id: cursor_id.to_string(),
                keep_alive,
            },
            approx_total: Some(open.matches.len() as u64),
        })
    }
}

fn has_field(document: &Value, field: &str) -> bool {
    match document.get(field) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

#[async_trait]
impl ScrollSource for MemoryScrollSource {
    type Item = Value;

    async fn open_cursor(
        &self,
        query: &ScrollQuery,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage<Value>, ScrollError> {
        if page_size == 0 {
            return Err(ScrollError::OpenFailed("page size must be positive".to_string()));
        }

        let matches = self
            .documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| {
                query
                    .required_field
                    .as_deref()
                    .map_or(true, |field| has_field(doc, field))
            })
            .map(|(i, _)| i)
            .collect();

        let id = Uuid::new_v4().to_string();
        self.lock().insert(
            id.clone(),
            OpenCursor {
                position: 0,
                page_size,
                matches,
            },
        );
        self.opened.fetch_add(1, Ordering::SeqCst);

        self.take_page(&id, keep_alive)
    }

    async fn next_page(&self, cursor: &ScrollCursor) -> Result<ScrollPage<Value>, ScrollError> {
        self.take_page(&cursor.id, cursor.keep_alive)
    }

    async fn release(&self, cursor: &ScrollCursor) -> Result<(), ScrollError> {
        if self.lock().remove(&cursor.id).is_none() {
            return Err(ScrollError::ReleaseFailed {
                cursor: cursor.id.clone(),
                reason: "cursor not open".to_string(),
            });
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
