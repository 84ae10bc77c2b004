use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Defines a typed `redb-bincode` table as a module with `Key`, `Value` and
/// a `TABLE` definition.
#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// Seconds since the unix epoch.
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        )
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn to_offset_date_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(i64::try_from(self.0).ok()?).ok()
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_offset_date_time().and_then(|dt| dt.format(&Rfc3339).ok()) {
            Some(s) => f.write_str(&s),
            None => write!(f, "@{}", self.0),
        }
    }
}

/// One article that was successfully posted.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedRecord {
    pub id: u64,
    /// Canonical article link, unique across the whole ledger
    pub url: String,
    pub title: Option<String>,
    /// Id the social network assigned to the post
    pub external_post_id: String,
    pub published_at: Timestamp,
    /// Text that went out with the post
    pub post_text: Option<String>,
}

def_table! {
    /// Published articles, keyed by an auto-incrementing id
    published_articles: u64 => PublishedRecord
}

def_table! {
    /// Unique index: article url to `published_articles` id
    published_articles_urls: String => u64
}

def_table! {
    /// Last id handed out for `published_articles`
    published_articles_seq: () => u64
}
