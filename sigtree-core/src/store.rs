//! Local content-addressed cache
//!
//! redb database shared by concurrent verification sessions. Tables:
//! - links: hex LinkId → link record bytes
//! - roots: root seqno → root record bytes
//! - meta: string key → value bytes (holds the HEAD root pointer)
//!
//! Writes are content-addressed and idempotent; rewriting the same key with
//! identical bytes is a no-op, rewriting it with different bytes is refused.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use sigtree_model::{LinkId, Seqno};
use thiserror::Error;

const LINKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("links");
const ROOTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("roots");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Key in the meta table holding the most recently accepted root seqno.
const META_HEAD: &str = "head_root_seqno";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("conflicting content for key {key}")]
    Corrupt { key: String },
}

/// Persistent cache of verified links and accepted roots.
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Open or create the cache at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        // Ensure tables exist so reads never trip over a missing table.
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(LINKS_TABLE)?;
            write_txn.open_table(ROOTS_TABLE)?;
            write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store a link record under its id.
    pub fn put_link(&self, id: &LinkId, bytes: &[u8]) -> Result<(), StoreError> {
        let key = id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LINKS_TABLE)?;
            // Copy the existing value out so the read guard is dropped
            // before the table is written.
            let existing = table.get(key.as_str())?.map(|g| g.value().to_vec());
            match existing {
                Some(current) => {
                    if current != bytes {
                        return Err(StoreError::Corrupt { key });
                    }
                }
                None => {
                    table.insert(key.as_str(), bytes)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_link(&self, id: &LinkId) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LINKS_TABLE)?;
        Ok(table.get(id.to_string().as_str())?.map(|g| g.value().to_vec()))
    }

    /// Store a root record keyed by its seqno.
    pub fn put_root(&self, seqno: Seqno, bytes: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ROOTS_TABLE)?;
            let existing = table.get(seqno.0)?.map(|g| g.value().to_vec());
            match existing {
                Some(current) => {
                    if current != bytes {
                        return Err(StoreError::Corrupt {
                            key: format!("root:{}", seqno),
                        });
                    }
                }
                None => {
                    table.insert(seqno.0, bytes)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_root(&self, seqno: Seqno) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ROOTS_TABLE)?;
        Ok(table.get(seqno.0)?.map(|g| g.value().to_vec()))
    }

    /// The HEAD pointer: seqno of the most recently accepted root.
    pub fn head_root_seqno(&self) -> Result<Option<Seqno>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        let Some(guard) = table.get(META_HEAD)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = guard
            .value()
            .try_into()
            .map_err(|_| StoreError::Corrupt {
                key: META_HEAD.to_string(),
            })?;
        Ok(Some(Seqno(u64::from_be_bytes(bytes))))
    }

    /// Advance the HEAD pointer. Never moves backwards.
    pub fn set_head_root_seqno(&self, seqno: Seqno) -> Result<(), StoreError> {
        let current = self.head_root_seqno()?;
        if current.map_or(false, |cur| seqno < cur) {
            return Ok(());
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(META_HEAD, seqno.0.to_be_bytes().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
