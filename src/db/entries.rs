use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::{EntryFingerprint, IndexGeneration, IndexStatus};
use super::{Store, serialize_vector};
use crate::embedder::EmbeddingVersion;
use crate::error::EngineError;
use crate::records::{ResourceRecord, ResourceType};

const META_MODEL: &str = "embedding_model";
const META_DIMENSIONS: &str = "dimensions";
const META_BUILT_AT: &str = "built_at";

/// Columns consumed by [`record_from_row`], in order.
pub(crate) const RECORD_COLUMNS: &str = "r.subtopic_name, r.resource_name, r.resource_url, \
     r.resource_type, r.foundation_name, r.foundation_url, r.estimated_time";

/// Read a [`ResourceRecord`] from `RECORD_COLUMNS` starting at column `offset`.
pub(crate) fn record_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ResourceRecord> {
    Ok(ResourceRecord {
        subtopic_name: row.get(offset)?,
        resource_name: row.get(offset + 1)?,
        resource_url: row.get(offset + 2)?,
        resource_type: ResourceType::from(row.get::<_, String>(offset + 3)?),
        foundation_name: row.get(offset + 4)?,
        foundation_url: row.get(offset + 5)?,
        estimated_time: row.get(offset + 6)?,
    })
}

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM index_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO index_meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn read_generation(conn: &Connection) -> Result<Option<IndexGeneration>, EngineError> {
    let model = read_meta(conn, META_MODEL)?;
    let dimensions = read_meta(conn, META_DIMENSIONS)?;
    let (Some(model), Some(dimensions)) = (model, dimensions) else {
        return Ok(None);
    };
    let dimensions = dimensions
        .parse::<usize>()
        .map_err(|e| EngineError::Storage(format!("corrupt dimensions metadata: {e}")))?;
    let built_at = read_meta(conn, META_BUILT_AT)?
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Some(IndexGeneration {
        version: EmbeddingVersion { model, dimensions },
        built_at,
    }))
}

impl Store {
    /// The embedding function the stored entries were built with, if any.
    pub fn generation(&self) -> Result<Option<IndexGeneration>, EngineError> {
        let conn = self.pool.get()?;
        read_generation(&conn)
    }

    /// Make the store ready to receive vectors from `version`.
    ///
    /// A different embedding function invalidates every stored vector, so the
    /// index is wiped and recreated in one transaction. Returns `true` when an
    /// existing generation was discarded.
    pub fn prepare_generation(&self, version: &EmbeddingVersion) -> Result<bool, EngineError> {
        let mut conn = self.pool.get()?;
        let current = read_generation(&conn)?;
        if current.as_ref().map(|g| &g.version) == Some(version) {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS vec_resources; DELETE FROM resources;")?;
        tx.execute_batch(&format!(
            "CREATE VIRTUAL TABLE vec_resources USING vec0(embedding FLOAT[{}]);",
            version.dimensions
        ))?;
        write_meta(&tx, META_MODEL, &version.model)?;
        write_meta(&tx, META_DIMENSIONS, &version.dimensions.to_string())?;
        tx.execute("DELETE FROM index_meta WHERE key = ?", params![META_BUILT_AT])?;
        tx.commit()?;

        Ok(current.is_some())
    }

    pub fn mark_built(&self, at: DateTime<Utc>) -> Result<(), EngineError> {
        let conn = self.pool.get()?;
        write_meta(&conn, META_BUILT_AT, &at.to_rfc3339())?;
        Ok(())
    }

    /// Insert or replace the entry `entry_id` atomically.
    ///
    /// Requires a generation prepared with [`Store::prepare_generation`].
    pub fn upsert(
        &self,
        entry_id: &str,
        embedding: &[f32],
        record: &ResourceRecord,
        text_hash: &str,
        embedding_model: &str,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let row_id: i64 = tx.query_row(
            r#"
            INSERT INTO resources (
                entry_id, subtopic_name, resource_name, resource_url, resource_type,
                foundation_name, foundation_url, estimated_time, text_hash,
                embedding_model, indexed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entry_id) DO UPDATE SET
                subtopic_name = excluded.subtopic_name,
                resource_name = excluded.resource_name,
                resource_url = excluded.resource_url,
                resource_type = excluded.resource_type,
                foundation_name = excluded.foundation_name,
                foundation_url = excluded.foundation_url,
                estimated_time = excluded.estimated_time,
                text_hash = excluded.text_hash,
                embedding_model = excluded.embedding_model,
                indexed_at = excluded.indexed_at
            RETURNING id
            "#,
            params![
                entry_id,
                record.subtopic_name,
                record.resource_name,
                record.resource_url,
                record.resource_type.as_str(),
                record.foundation_name,
                record.foundation_url,
                record.estimated_time,
                text_hash,
                embedding_model,
                Utc::now(),
            ],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM vec_resources WHERE rowid = ?", params![row_id])?;
        tx.execute(
            "INSERT INTO vec_resources (rowid, embedding) VALUES (?, ?)",
            params![row_id, serialize_vector(embedding)],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Fingerprints of all stored entries, keyed by entry id.
    pub fn fingerprints(&self) -> Result<HashMap<String, EntryFingerprint>, EngineError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT entry_id, text_hash, embedding_model FROM resources")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                EntryFingerprint {
                    text_hash: row.get(1)?,
                    embedding_model: row.get(2)?,
                },
            ))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (id, fp) = row?;
            out.insert(id, fp);
        }
        Ok(out)
    }

    pub fn entry_ids(&self) -> Result<BTreeSet<String>, EngineError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT entry_id FROM resources")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    pub fn get(&self, entry_id: &str) -> Result<Option<ResourceRecord>, EngineError> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM resources r WHERE r.entry_id = ?"),
                params![entry_id],
                |row| record_from_row(row, 0),
            )
            .optional()?;
        Ok(record)
    }

    /// Delete every entry whose id is not in `keep`. Returns the number removed.
    pub fn prune(&self, keep: &HashSet<String>) -> Result<usize, EngineError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id, entry_id FROM resources")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut stale = Vec::new();
            for row in rows {
                let (id, entry_id) = row?;
                if !keep.contains(&entry_id) {
                    stale.push(id);
                }
            }
            stale
        };

        for id in &stale {
            tx.execute("DELETE FROM vec_resources WHERE rowid = ?", params![id])?;
            tx.execute("DELETE FROM resources WHERE id = ?", params![id])?;
        }

        tx.commit()?;
        Ok(stale.len())
    }

    pub fn status(&self) -> Result<IndexStatus, EngineError> {
        let conn = self.pool.get()?;
        let generation = read_generation(&conn)?;

        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;

        let mut per_foundation = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT foundation_name, COUNT(*) FROM resources GROUP BY foundation_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (foundation, count) = row?;
            per_foundation.insert(foundation, count as usize);
        }

        let sample_resource: Option<String> = conn
            .query_row(
                "SELECT resource_name FROM resources ORDER BY entry_id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(IndexStatus {
            entries: entries as usize,
            embedding_model: generation.as_ref().map(|g| g.version.model.clone()),
            dimensions: generation.as_ref().map(|g| g.version.dimensions),
            built_at: generation.and_then(|g| g.built_at),
            per_foundation,
            sample_resource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::sample_record;

    fn version(model: &str, dimensions: usize) -> EmbeddingVersion {
        EmbeddingVersion {
            model: model.to_string(),
            dimensions,
        }
    }

    fn count(store: &Store, table: &str) -> i64 {
        let conn = store.pool.get().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_generation_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.generation().unwrap().is_none());

        assert!(!store.prepare_generation(&version("m1", 4)).unwrap());
        let generation = store.generation().unwrap().unwrap();
        assert_eq!(generation.version, version("m1", 4));
        assert!(generation.built_at.is_none());

        // Same function: nothing to reset
        assert!(!store.prepare_generation(&version("m1", 4)).unwrap());

        let now = Utc::now();
        store.mark_built(now).unwrap();
        let built = store.generation().unwrap().unwrap().built_at.unwrap();
        assert_eq!(built.timestamp(), now.timestamp());
    }

    #[test]
    fn test_generation_change_wipes_entries() {
        let store = Store::open_in_memory().unwrap();
        store.prepare_generation(&version("m1", 4)).unwrap();
        let record = sample_record("Foundation 2: Cells", "s", "Mitosis");
        store
            .upsert(&record.entry_id(), &[1.0, 0.0, 0.0, 0.0], &record, "h", "m1")
            .unwrap();
        assert_eq!(count(&store, "resources"), 1);

        assert!(store.prepare_generation(&version("m2", 8)).unwrap());
        assert_eq!(count(&store, "resources"), 0);
        assert_eq!(count(&store, "vec_resources"), 0);
        assert_eq!(store.generation().unwrap().unwrap().version.dimensions, 8);

        // New dimensionality is accepted
        store
            .upsert(&record.entry_id(), &[0.5; 8], &record, "h", "m2")
            .unwrap();
        assert_eq!(count(&store, "vec_resources"), 1);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let store = Store::open_in_memory().unwrap();
        store.prepare_generation(&version("m1", 4)).unwrap();

        let mut record = sample_record("Foundation 2: Cells", "Cell cycle", "Mitosis");
        let id = record.entry_id();
        store
            .upsert(&id, &[1.0, 0.0, 0.0, 0.0], &record, "h1", "m1")
            .unwrap();

        record.estimated_time = "7 minutes".to_string();
        store
            .upsert(&id, &[0.0, 1.0, 0.0, 0.0], &record, "h2", "m1")
            .unwrap();

        assert_eq!(count(&store, "resources"), 1);
        assert_eq!(count(&store, "vec_resources"), 1);
        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored, record);

        let fps = store.fingerprints().unwrap();
        assert_eq!(fps[&id].text_hash, "h2");
        assert_eq!(fps[&id].embedding_model, "m1");
    }

    #[test]
    fn test_upsert_without_generation_fails() {
        let store = Store::open_in_memory().unwrap();
        let record = sample_record("Foundation 2: Cells", "s", "Mitosis");
        let err = store
            .upsert(&record.entry_id(), &[1.0; 4], &record, "h", "m1")
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        // the failed transaction left nothing behind
        assert_eq!(count(&store, "resources"), 0);
    }

    #[test]
    fn test_prune() {
        let store = Store::open_in_memory().unwrap();
        store.prepare_generation(&version("m1", 4)).unwrap();
        let a = sample_record("Foundation 2: Cells", "s", "Mitosis");
        let b = sample_record("Foundation 2: Cells", "s", "Meiosis");
        store.upsert(&a.entry_id(), &[1.0; 4], &a, "h", "m1").unwrap();
        store.upsert(&b.entry_id(), &[1.0; 4], &b, "h", "m1").unwrap();

        let keep: HashSet<String> = [a.entry_id()].into_iter().collect();
        assert_eq!(store.prune(&keep).unwrap(), 1);
        assert_eq!(
            store.entry_ids().unwrap(),
            [a.entry_id()].into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(count(&store, "vec_resources"), 1);
        assert_eq!(store.prune(&keep).unwrap(), 0);
    }

    #[test]
    fn test_status() {
        let store = Store::open_in_memory().unwrap();
        let empty = store.status().unwrap();
        assert_eq!(empty.entries, 0);
        assert!(empty.embedding_model.is_none());
        assert!(empty.sample_resource.is_none());

        store.prepare_generation(&version("m1", 4)).unwrap();
        for (foundation, name) in [
            ("Foundation 2: Cells", "Mitosis"),
            ("Foundation 2: Cells", "Meiosis"),
            ("Foundation 1: Biomolecules", "Enzymes"),
        ] {
            let r = sample_record(foundation, "s", name);
            store.upsert(&r.entry_id(), &[1.0; 4], &r, "h", "m1").unwrap();
        }

        let status = store.status().unwrap();
        assert_eq!(status.entries, 3);
        assert_eq!(status.embedding_model.as_deref(), Some("m1"));
        assert_eq!(status.dimensions, Some(4));
        assert_eq!(status.per_foundation["Foundation 2: Cells"], 2);
        assert_eq!(status.per_foundation["Foundation 1: Biomolecules"], 1);
        assert!(status.sample_resource.is_some());
    }
}
