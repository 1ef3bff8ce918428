//! Typed record tables over redb.
//!
//! Each entity type owns one table whose rows are JSON-encoded records of a
//! single type. Encoding and decoding live here, so the per-entity wrappers
//! deal only in their record type and the domain rules on top of it
//! (duplicate slugs, TTLs, bookkeeping fields).

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub trait RecordStore: Send + Sync {
    /// The table backing this store.
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    /// The record type rows decode to.
    type Record: Serialize + DeserializeOwned;

    fn db(&self) -> &Arc<Database>;

    /// Encode and store a record under `key`, overwriting.
    fn write(&self, key: &str, record: &Self::Record) -> Result<()> {
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db().begin_write()?;
        {
            let mut table = txn.open_table(Self::TABLE)?;
            table.insert(key, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Store a record only when `key` is absent, in one write transaction.
    ///
    /// Returns `Ok(false)`, leaving the existing row untouched, when the
    /// key is already taken.
    fn insert_new(&self, key: &str, record: &Self::Record) -> Result<bool> {
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db().begin_write()?;
        let fresh = {
            let mut table = txn.open_table(Self::TABLE)?;
            let exists = table.get(key)?.is_some();
            if exists {
                false
            } else {
                table.insert(key, encoded.as_slice())?;
                true
            }
        };
        txn.commit()?;
        Ok(fresh)
    }

    /// Decode the record under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<Self::Record>> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(Self::TABLE)?;
        let Some(row) = table.get(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(row.value())?))
    }

    /// Decode every row, in key order.
    fn scan(&self) -> Result<Vec<Self::Record>> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(Self::TABLE)?;
        let mut records = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    /// Drop the row under `key`; true if it existed.
    fn remove_key(&self, key: &str) -> Result<bool> {
        let txn = self.db().begin_write()?;
        let removed = {
            let mut table = txn.open_table(Self::TABLE)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(Self::TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    fn is_empty(&self) -> Result<bool> {
        let txn = self.db().begin_read()?;
        let table = txn.open_table(Self::TABLE)?;
        Ok(table.iter()?.next().is_none())
    }
}

/// Declare a store struct bound to one table and one record type.
macro_rules! record_store {
    ( $(#[$meta:meta])* $vis:vis struct $name:ident { record: $record:ty, table: $table:literal } ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            db: std::sync::Arc<redb::Database>,
        }

        impl $name {
            /// Open the table, creating it on first use.
            pub fn new(db: std::sync::Arc<redb::Database>) -> anyhow::Result<Self> {
                let txn = db.begin_write()?;
                txn.open_table(<Self as $crate::storage::record::RecordStore>::TABLE)?;
                txn.commit()?;
                Ok(Self { db })
            }
        }

        impl $crate::storage::record::RecordStore for $name {
            const TABLE: redb::TableDefinition<'static, &'static str, &'static [u8]> =
                redb::TableDefinition::new($table);
            type Record = $record;

            fn db(&self) -> &std::sync::Arc<redb::Database> {
                &self.db
            }
        }
    };
}

pub(crate) use record_store;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        body: String,
    }

    record_store! {
        struct NoteStore { record: Note, table: "notes" }
    }

    fn setup() -> (NoteStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (NoteStore::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn records_round_trip_typed() {
        let (store, _tmp) = setup();
        let note = Note { body: "alpha".into() };
        store.write("a", &note).unwrap();
        assert_eq!(store.read("a").unwrap(), Some(note));
        assert!(store.read("missing").unwrap().is_none());
    }

    #[test]
    fn insert_new_refuses_taken_keys() {
        let (store, _tmp) = setup();
        assert!(store.insert_new("a", &Note { body: "first".into() }).unwrap());
        assert!(!store.insert_new("a", &Note { body: "second".into() }).unwrap());
        assert_eq!(store.read("a").unwrap().unwrap().body, "first");
    }

    #[test]
    fn scan_remove_and_emptiness() {
        let (store, _tmp) = setup();
        assert!(store.is_empty().unwrap());

        store.write("a", &Note { body: "one".into() }).unwrap();
        store.write("b", &Note { body: "two".into() }).unwrap();
        assert_eq!(store.scan().unwrap().len(), 2);
        assert!(store.contains("a").unwrap());

        assert!(store.remove_key("a").unwrap());
        assert!(!store.remove_key("a").unwrap());
        assert!(!store.contains("a").unwrap());
        assert!(!store.is_empty().unwrap());
    }
}
