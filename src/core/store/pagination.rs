use serde::Deserialize;

use super::error::{StoreError, StoreResult};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

/// Keyset pagination request shared by every list endpoint. The ordering key
/// must be unique (primary key or UUIDv7 id) so pages are unambiguous.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: Option<usize>,
}

/// One page of results, always in descending key order regardless of the
/// browse direction that produced it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub first: Option<String>,
    pub last: Option<String>,
}

/// Validated fetch plan derived from a `PageRequest`.
///
/// Default and `after` browsing order descending and filter `key < after`;
/// `before` browsing orders ascending, filters `key > before`, and the fetched
/// slice is reversed before returning so item order stays descending.
#[derive(Debug, Clone)]
pub struct PagePlan {
    limit: usize,
    backward: bool,
    bound: Option<String>,
}

impl PagePlan {
    pub fn from_request(req: &PageRequest) -> StoreResult<Self> {
        if req.after.is_some() && req.before.is_some() {
            return Err(StoreError::bad_request(
                "after and before cursors are mutually exclusive",
            ));
        }
        let limit = req.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let backward = req.before.is_some();
        let bound = req.before.clone().or_else(|| req.after.clone());
        Ok(Self {
            limit,
            backward,
            bound,
        })
    }

    /// SQL fragment filtering past the cursor, e.g. `" AND id < ?"`.
    /// Empty when no cursor was supplied.
    pub fn cursor_filter(&self, column: &str) -> String {
        match (&self.bound, self.backward) {
            (Some(_), false) => format!(" AND {column} < ?"),
            (Some(_), true) => format!(" AND {column} > ?"),
            (None, _) => String::new(),
        }
    }

    pub fn bound(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub fn order_sql(&self) -> &'static str {
        if self.backward { "ASC" } else { "DESC" }
    }

    /// One extra row beyond the page, used to compute `has_more`.
    pub fn fetch_limit(&self) -> i64 {
        (self.limit + 1) as i64
    }

    /// Shape fetched rows into a `Page`: trim the probe row, restore
    /// descending order for backward fetches, and record boundary keys.
    pub fn into_page<T>(self, mut rows: Vec<T>, key: impl Fn(&T) -> String) -> Page<T> {
        let has_more = rows.len() > self.limit;
        if has_more {
            rows.truncate(self.limit);
        }
        if self.backward {
            rows.reverse();
        }
        let first = rows.first().map(&key);
        let last = rows.last().map(&key);
        Page {
            items: rows,
            has_more,
            first,
            last,
        }
    }
}
