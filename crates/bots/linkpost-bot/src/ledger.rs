//! Durable record of every article that was already posted.
//!
//! The ledger is the only state shared between runs. Each operation opens
//! the database file, runs a single transaction and closes it again, so a
//! crash can lose at most the operation in flight.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

use crate::tables::{
    PublishedRecord, Timestamp, published_articles, published_articles_seq,
    published_articles_urls,
};

const LOG_TARGET: &str = "linkpost::ledger";

pub const LEDGER_FILE_NAME: &str = "published.redb";
pub const BACKUP_DIR_NAME: &str = "backups";
/// Number of backup copies kept around
pub const BACKUP_RETENTION: usize = 5;

const BACKUP_PREFIX: &str = "published_";
const BACKUP_SUFFIX: &str = ".redb";

#[derive(Debug, Snafu)]
pub enum LedgerError {
    #[snafu(display("Failed to create ledger directory {}", path.display()))]
    CreateDir {
        source: io::Error,
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to access ledger file {}", path.display()))]
    Access {
        source: io::Error,
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to open ledger database"))]
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Article url already recorded in the ledger: {url}"))]
    DuplicateUrl {
        url: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Ledger id sequence exhausted"))]
    Overflow,
    #[snafu(display("Ledger backup failed at {}", path.display()))]
    Backup {
        source: io::Error,
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    backup_dir: PathBuf,
}

impl Ledger {
    /// Ledger stored as [`LEDGER_FILE_NAME`] in `data_dir`, with backups in
    /// its [`BACKUP_DIR_NAME`] subdirectory.
    pub fn new(data_dir: &Path) -> Self {
        Self::at(
            data_dir.join(LEDGER_FILE_NAME),
            data_dir.join(BACKUP_DIR_NAME),
        )
    }

    pub fn at(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Whether the database file was created already. Unlike a missing file,
    /// an unreadable directory is an error.
    pub async fn exists(&self) -> LedgerResult<bool> {
        tokio::fs::try_exists(&self.path)
            .await
            .context(AccessSnafu { path: &self.path })
    }

    /// Create the database file and its tables if they don't exist yet.
    ///
    /// Safe to call on every run.
    pub async fn init(&self) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(CreateDirSnafu { path: parent })?;
        }

        self.write_with(|tx| {
            let _records_table = tx.open_table(&published_articles::TABLE)?;
            let _urls_table = tx.open_table(&published_articles_urls::TABLE)?;
            let _seq_table = tx.open_table(&published_articles_seq::TABLE)?;
            Ok(())
        })
        .await?;

        debug!(target: LOG_TARGET, path = %self.path.display(), "Ledger ready");
        Ok(())
    }

    /// Every url ever recorded, including ones from earlier runs.
    pub async fn known_urls(&self) -> LedgerResult<BTreeSet<String>> {
        self.read_with(|tx| {
            let urls_table = tx.open_table(&published_articles_urls::TABLE)?;
            let mut urls = BTreeSet::new();

            for result in urls_table.range::<String>(..)? {
                let (key, _value) = result?;
                urls.insert(key.value());
            }

            Ok(urls)
        })
        .await
    }

    /// Insert a new record for `url`.
    ///
    /// Fails with [`LedgerError::DuplicateUrl`] if `url` was recorded
    /// before. The check and the insert happen in one write transaction.
    pub async fn record(
        &self,
        url: &str,
        title: Option<&str>,
        external_post_id: &str,
        post_text: Option<&str>,
    ) -> LedgerResult<PublishedRecord> {
        let url = url.to_owned();
        self.write_with(move |tx| {
            let mut records_table = tx.open_table(&published_articles::TABLE)?;
            let mut urls_table = tx.open_table(&published_articles_urls::TABLE)?;
            let mut seq_table = tx.open_table(&published_articles_seq::TABLE)?;

            if let Some(existing) = urls_table.get(&url)? {
                warn!(
                    target: LOG_TARGET,
                    url = %url,
                    existing_id = existing.value(),
                    "Refusing to record an already recorded url"
                );
                return DuplicateUrlSnafu { url }.fail();
            }

            let id = seq_table
                .get(&())?
                .map(|last| last.value())
                .unwrap_or_default()
                .checked_add(1)
                .context(OverflowSnafu)?;

            let record = PublishedRecord {
                id,
                url: url.clone(),
                title: title.map(ToOwned::to_owned),
                external_post_id: external_post_id.to_owned(),
                published_at: Timestamp::now(),
                post_text: post_text.map(ToOwned::to_owned),
            };

            records_table.insert(&id, &record)?;
            urls_table.insert(&url, &id)?;
            seq_table.insert(&(), &id)?;

            info!(
                target: LOG_TARGET,
                id,
                url = %record.url,
                external_post_id = %record.external_post_id,
                "Recorded published article"
            );
            Ok(record)
        })
        .await
    }

    /// All records, oldest first.
    pub async fn records(&self) -> LedgerResult<Vec<PublishedRecord>> {
        self.read_with(|tx| {
            let records_table = tx.open_table(&published_articles::TABLE)?;
            let mut records = Vec::new();

            for result in records_table.range::<u64>(..)? {
                let (_key, value) = result?;
                records.push(value.value());
            }

            Ok(records)
        })
        .await
    }

    /// Texts of the most recent posts, newest first.
    pub async fn recent_post_texts(&self, limit: usize) -> LedgerResult<Vec<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .rev()
            .filter_map(|record| record.post_text)
            .take(limit)
            .collect())
    }

    /// Copy the database file into the backup directory and prune all but
    /// the [`BACKUP_RETENTION`] most recent copies.
    ///
    /// Returns the path of the new copy, or `None` if there was no ledger
    /// file to copy.
    pub async fn backup(&self) -> LedgerResult<Option<PathBuf>> {
        self.backup_at(OffsetDateTime::now_utc()).await
    }

    pub async fn backup_at(&self, now: OffsetDateTime) -> LedgerResult<Option<PathBuf>> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .context(BackupSnafu { path: &self.path })?
        {
            debug!(target: LOG_TARGET, path = %self.path.display(), "No ledger file to back up");
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .context(BackupSnafu {
                path: &self.backup_dir,
            })?;

        let backup_path = self.backup_dir.join(backup_file_name(now));
        tokio::fs::copy(&self.path, &backup_path)
            .await
            .context(BackupSnafu { path: &backup_path })?;
        info!(target: LOG_TARGET, path = %backup_path.display(), "Ledger backup created");

        self.prune_backups().await?;

        Ok(Some(backup_path))
    }

    /// Existing backup files, newest first.
    pub async fn list_backups(&self) -> LedgerResult<Vec<PathBuf>> {
        let mut backups = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(backups),
            Err(err) => {
                return Err(err).context(BackupSnafu {
                    path: &self.backup_dir,
                });
            }
        };

        while let Some(entry) = entries.next_entry().await.context(BackupSnafu {
            path: &self.backup_dir,
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
                backups.push(entry.path());
            }
        }

        // Names embed a zero-padded timestamp, so lexical order is age order
        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    async fn prune_backups(&self) -> LedgerResult<()> {
        for old in self.list_backups().await?.into_iter().skip(BACKUP_RETENTION) {
            tokio::fs::remove_file(&old)
                .await
                .context(BackupSnafu { path: &old })?;
            debug!(target: LOG_TARGET, path = %old.display(), "Removed old ledger backup");
        }
        Ok(())
    }

    fn open(&self) -> LedgerResult<redb_bincode::Database> {
        redb_bincode::Database::create(&self.path).context(DatabaseSnafu)
    }

    async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        tokio::task::block_in_place(|| {
            let db = self.open()?;
            let dbtx = db.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        tokio::task::block_in_place(|| {
            let db = self.open()?;
            let dbtx = db.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }
}

fn backup_file_name(now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]_[subsecond digits:6]"
        ))
        .unwrap_or_else(|_| now.unix_timestamp_nanos().to_string());
    format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use linkpost_util_error::BoxedErrorResult;
    use tempfile::{TempDir, tempdir};
    use time::Duration;
    use time::macros::datetime;

    use super::*;

    async fn temp_ledger() -> BoxedErrorResult<(TempDir, Ledger)> {
        let dir = tempdir()?;
        let ledger = Ledger::new(dir.path());
        ledger.init().await?;
        Ok((dir, ledger))
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn record_twice_fails_with_duplicate_url() -> BoxedErrorResult<()> {
        let (_dir, ledger) = temp_ledger().await?;

        ledger
            .record("https://example.com/a", Some("A"), "p1", None)
            .await?;
        let second = ledger
            .record("https://example.com/a", Some("A again"), "p2", None)
            .await;

        assert!(matches!(second, Err(LedgerError::DuplicateUrl { ref url, .. }) if url == "https://example.com/a"));

        let known = ledger.known_urls().await?;
        assert_eq!(known.len(), 1);
        assert!(known.contains("https://example.com/a"));

        let records = ledger.records().await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_post_id, "p1");
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn records_survive_reopening() -> BoxedErrorResult<()> {
        let (dir, ledger) = temp_ledger().await?;
        ledger.record("a", None, "p1", Some("first post")).await?;
        drop(ledger);

        let reopened = Ledger::new(dir.path());
        reopened.init().await?;
        reopened.init().await?;

        assert_eq!(
            reopened.known_urls().await?,
            BTreeSet::from(["a".to_owned()])
        );
        let record = reopened.record("b", Some("B"), "p2", None).await?;
        assert_eq!(record.id, 2);
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn urls_are_matched_exactly() -> BoxedErrorResult<()> {
        let (_dir, ledger) = temp_ledger().await?;

        ledger.record("https://example.com/a", None, "p1", None).await?;
        ledger.record("https://example.com/a/", None, "p2", None).await?;
        ledger.record("HTTPS://example.com/a", None, "p3", None).await?;

        assert_eq!(ledger.known_urls().await?.len(), 3);
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn recent_post_texts_are_newest_first() -> BoxedErrorResult<()> {
        let (_dir, ledger) = temp_ledger().await?;

        ledger.record("a", None, "p1", Some("one")).await?;
        ledger.record("b", None, "p2", None).await?;
        ledger.record("c", None, "p3", Some("three")).await?;
        ledger.record("d", None, "p4", Some("four")).await?;

        assert_eq!(ledger.recent_post_texts(2).await?, vec!["four", "three"]);
        assert_eq!(
            ledger.recent_post_texts(10).await?,
            vec!["four", "three", "one"]
        );
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn backup_keeps_most_recent_copies() -> BoxedErrorResult<()> {
        let (_dir, ledger) = temp_ledger().await?;
        let start = datetime!(2026-01-01 12:00:00 UTC);

        let mut created = Vec::new();
        for i in 0..(BACKUP_RETENTION as i64 + 3) {
            let path = ledger
                .backup_at(start + Duration::seconds(i))
                .await?
                .expect("ledger file exists");
            created.push(path);
        }

        let remaining = ledger.list_backups().await?;
        assert_eq!(remaining.len(), BACKUP_RETENTION);

        let expected: Vec<_> = created.iter().rev().take(BACKUP_RETENTION).cloned().collect();
        assert_eq!(remaining, expected);
        for old in &created[..3] {
            assert!(!old.exists());
        }
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn backup_keeps_everything_below_retention() -> BoxedErrorResult<()> {
        let (_dir, ledger) = temp_ledger().await?;
        let start = datetime!(2026-01-01 12:00:00 UTC);

        for i in 0..2 {
            ledger.backup_at(start + Duration::minutes(i)).await?;
        }

        assert_eq!(ledger.list_backups().await?.len(), 2);
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn backup_copy_contains_records() -> BoxedErrorResult<()> {
        let (dir, ledger) = temp_ledger().await?;
        ledger.record("a", Some("A"), "p1", None).await?;

        let backup = ledger.backup().await?.expect("ledger file exists");

        let copy = Ledger::at(backup, dir.path().join("unused"));
        assert!(copy.known_urls().await?.contains("a"));
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn exists_only_after_init() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let ledger = Ledger::new(dir.path());

        assert!(!ledger.exists().await?);
        ledger.init().await?;
        assert!(ledger.exists().await?);
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn exists_fails_when_path_is_blocked() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"")?;
        // A regular file where the data directory should be
        let ledger = Ledger::new(&blocker);

        assert!(matches!(
            ledger.exists().await,
            Err(LedgerError::Access { .. })
        ));
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn backup_without_ledger_file_is_noop() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let ledger = Ledger::new(dir.path());

        assert_eq!(ledger.backup().await?, None);
        assert!(ledger.list_backups().await?.is_empty());
        Ok(())
    }

    #[test]
    fn backup_file_names_sort_by_time() {
        let earlier = backup_file_name(datetime!(2026-01-02 09:59:59.5 UTC));
        let later = backup_file_name(datetime!(2026-01-02 10:00:00 UTC));

        assert_eq!(earlier, "published_20260102_095959_500000.redb");
        assert!(earlier < later);
    }
}
