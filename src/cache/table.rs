//! Shared Table Module
//!
//! A bounded, concurrently accessible table of fixed-width rows. Each row
//! holds `{cache_key, content, use_num, expire_at}`. Single-row reads and
//! writes are atomic; nothing coordinates across rows.
//!
//! The table never truncates: a key or payload wider than its column is
//! refused, and an insert into a full table is refused until a row is freed.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{CacheError, Result};

/// Width of the row-key column, in bytes.
pub const KEY_WIDTH: usize = 63;

// == Row ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub cache_key: String,
    pub content: String,
    /// Successful reads since the row was first created
    pub use_num: i64,
    /// Unix timestamp (seconds) after which the row is dead
    pub expire_at: i64,
}

impl Row {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_at <= now
    }
}

// == Insert Outcome ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Stored,
    /// The key already has a row (conditional inserts only)
    Occupied,
    /// Every row is taken
    Full,
    /// Key or content is wider than its column
    TooWide,
}

// == Shared Table ==
#[derive(Debug)]
pub struct SharedTable {
    name: String,
    capacity: usize,
    content_width: usize,
    rows: DashMap<String, Row>,
    used: AtomicUsize,
}

impl SharedTable {
    pub fn new(name: impl Into<String>, capacity: usize, content_width: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            content_width,
            rows: DashMap::with_capacity(capacity),
            used: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn content_width(&self) -> usize {
        self.content_width
    }

    pub fn len(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `content` fits the content column.
    pub fn fits(&self, content: &str) -> bool {
        content.len() <= self.content_width
    }

    // == Slot Accounting ==
    fn reserve(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| used.checked_sub(1));
    }

    // == Reads ==
    pub fn get(&self, key: &str) -> Option<Row> {
        self.rows.get(key).map(|row| row.clone())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Copies every row. Rows written during the scan may or may not appear.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.iter().map(|row| row.value().clone()).collect()
    }

    /// Key of the row with the lowest usage counter.
    pub fn least_used(&self) -> Option<String> {
        self.rows
            .iter()
            .min_by_key(|row| row.use_num)
            .map(|row| row.key().clone())
    }

    // == Writes ==
    /// Writes a row, keeping the usage counter of any row it replaces.
    pub fn set(&self, key: &str, content: &str, expire_at: i64) -> Insert {
        if key.len() > KEY_WIDTH || !self.fits(content) {
            return Insert::TooWide;
        }

        match self.rows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                row.content = content.to_string();
                row.expire_at = expire_at;
                Insert::Stored
            }
            Entry::Vacant(vacant) => {
                if !self.reserve() {
                    return Insert::Full;
                }
                vacant.insert(Row {
                    cache_key: key.to_string(),
                    content: content.to_string(),
                    use_num: 0,
                    expire_at,
                });
                Insert::Stored
            }
        }
    }

    /// Writes a row only if `key` has none. The check and the write are one
    /// atomic step.
    pub fn insert_new(&self, key: &str, content: &str, expire_at: i64) -> Insert {
        if key.len() > KEY_WIDTH || !self.fits(content) {
            return Insert::TooWide;
        }

        match self.rows.entry(key.to_string()) {
            Entry::Occupied(_) => Insert::Occupied,
            Entry::Vacant(vacant) => {
                if !self.reserve() {
                    return Insert::Full;
                }
                vacant.insert(Row {
                    cache_key: key.to_string(),
                    content: content.to_string(),
                    use_num: 0,
                    expire_at,
                });
                Insert::Stored
            }
        }
    }

    pub fn del(&self, key: &str) -> bool {
        match self.rows.remove(key) {
            Some(_) => {
                self.release();
                true
            }
            None => false,
        }
    }

    /// Removes the row only while it is still expired at `now`.
    pub fn del_expired(&self, key: &str, now: i64) -> bool {
        match self.rows.remove_if(key, |_, row| row.is_expired(now)) {
            Some(_) => {
                self.release();
                true
            }
            None => false,
        }
    }

    /// Bumps the usage counter, returning the new count.
    pub fn incr_use(&self, key: &str) -> Option<i64> {
        self.rows.get_mut(key).map(|mut row| {
            row.use_num += 1;
            row.use_num
        })
    }

    pub fn set_expire_at(&self, key: &str, expire_at: i64) -> bool {
        match self.rows.get_mut(key) {
            Some(mut row) => {
                row.expire_at = expire_at;
                true
            }
            None => false,
        }
    }

    // == Counters ==
    /// Adds `delta` to an integer row, creating it at `delta` when absent.
    ///
    /// Returns `Ok(None)` when the row would have to be created but the table
    /// is full. Non-integer content is an error and is left untouched.
    pub fn incr_content(&self, key: &str, delta: i64, expire_at: i64) -> Result<Option<i64>> {
        if key.len() > KEY_WIDTH {
            return Err(CacheError::InvalidRequest(format!(
                "key wider than {} bytes: {}",
                KEY_WIDTH, key
            )));
        }

        match self.rows.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                let next = row
                    .content
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|current| current.checked_add(delta))
                    .ok_or_else(|| CacheError::NotInteger(key.to_string()))?;
                row.content = next.to_string();
                row.expire_at = expire_at;
                Ok(Some(next))
            }
            Entry::Vacant(vacant) => {
                if !self.reserve() {
                    return Ok(None);
                }
                vacant.insert(Row {
                    cache_key: key.to_string(),
                    content: delta.to_string(),
                    use_num: 0,
                    expire_at,
                });
                Ok(Some(delta))
            }
        }
    }

    pub fn clear(&self) {
        self.rows.clear();
        self.used.store(0, Ordering::SeqCst);
    }
}
