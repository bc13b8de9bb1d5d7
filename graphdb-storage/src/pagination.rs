//! Pagination contract shared by every adapter.

use serde::{Deserialize, Serialize};

/// Maximum page size honored by the cloud adapter.
pub const CLOUD_MAX_PAGE_SIZE: usize = 5000;

/// Opaque pagination request. `cursor` takes precedence over `offset` when
/// both are supplied; local adapters may use the numeric offset form, cloud
/// adapters use the `"<shardIndex>:<nativePageToken>"` cursor form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: Option<String>,
    pub offset: Option<usize>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
            offset: None,
        }
    }
}

/// A single page of results, generic over the item type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty(total_count: u64) -> Self {
        Self {
            items: Vec::new(),
            total_count,
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Cloud cursor: which shard (0-based index into `00..=ff`) and the native
/// continuation token inside that shard, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCursor {
    pub shard_index: usize,
    pub native_token: Option<String>,
}

impl CloudCursor {
    pub fn start() -> Self {
        Self {
            shard_index: 0,
            native_token: None,
        }
    }

    pub fn encode(&self) -> String {
        match &self.native_token {
            Some(tok) => format!("{}:{}", self.shard_index, tok),
            None => format!("{}:", self.shard_index),
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (idx, tok) = raw.split_once(':')?;
        let shard_index = idx.parse().ok()?;
        let native_token = if tok.is_empty() {
            None
        } else {
            Some(tok.to_string())
        };
        Some(Self {
            shard_index,
            native_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_cursor_round_trips() {
        let cursor = CloudCursor {
            shard_index: 12,
            native_token: Some("tok-abc".into()),
        };
        let encoded = cursor.encode();
        assert_eq!(encoded, "12:tok-abc");
        assert_eq!(CloudCursor::decode(&encoded), Some(cursor));
    }

    #[test]
    fn cloud_cursor_with_no_native_token_round_trips() {
        let cursor = CloudCursor::start();
        let encoded = cursor.encode();
        assert_eq!(CloudCursor::decode(&encoded), Some(cursor));
    }

    #[test]
    fn malformed_cursor_fails_to_decode() {
        assert_eq!(CloudCursor::decode("not-a-cursor"), None);
    }
}
