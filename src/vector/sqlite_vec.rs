//! sqlite-vec backed `VectorIndex`.
//!
//! Generalizes `storage/sqlite_vec.rs::SqliteVecStore`'s single
//! `context_id`-partitioned table into a `collection`-partitioned one, with
//! a `work_id` column riding alongside each row for the global
//! chunk-collection metadata filter (§4.3). Vectors are L2-normalized on
//! insert so that vec0's L2 distance converts to cosine similarity via
//! `sim = 1 - dist²/2`, same as the teacher.

#[cfg(feature = "vector-index")]
mod inner {
    use crate::error::VectorIndexError;
    use crate::vector::{VecEntry, VecHit, VectorIndex};
    use rusqlite::Connection;
    use sqlite_vec::sqlite3_vec_init;
    use std::path::Path;
    use std::sync::{Mutex, Once};

    /// Persistent vector index backed by a single sqlite-vec virtual table,
    /// partitioned by collection name.
    pub struct SqliteVecIndex {
        conn: Mutex<Connection>,
        dim: usize,
    }

    fn register_vec_extension() {
        static INIT: Once = Once::new();
        INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        });
    }

    fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
        unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
    }

    fn l2_normalize(v: &mut [f32]) {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }

    impl SqliteVecIndex {
        pub fn open(path: &Path, dim: usize) -> Result<Self, VectorIndexError> {
            register_vec_extension();
            let conn = Connection::open(path)
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            Self::init_connection(conn, dim)
        }

        pub fn open_in_memory(dim: usize) -> Result<Self, VectorIndexError> {
            register_vec_extension();
            let conn = Connection::open_in_memory()
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            Self::init_connection(conn, dim)
        }

        fn init_connection(conn: Connection, dim: usize) -> Result<Self, VectorIndexError> {
            conn.execute_batch("PRAGMA journal_mode=WAL;")
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            let create_sql = format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_entries USING vec0(\
                     collection TEXT PARTITION KEY,\
                     id TEXT,\
                     work_id INTEGER,\
                     document TEXT,\
                     embedding float[{dim}]\
                 )"
            );
            conn.execute_batch(&create_sql)
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            Ok(Self {
                conn: Mutex::new(conn),
                dim,
            })
        }
    }

    impl VectorIndex for SqliteVecIndex {
        fn get_or_create_collection(&self, _name: &str, dim: usize) -> Result<(), VectorIndexError> {
            if dim != self.dim {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: dim,
                });
            }
            Ok(())
        }

        fn upsert(
            &self,
            collection: &str,
            ids: &[String],
            embeddings: &[Vec<f32>],
            documents: &[Option<String>],
            work_ids: &[Option<i64>],
        ) -> Result<(), VectorIndexError> {
            if ids.len() != embeddings.len()
                || ids.len() != documents.len()
                || ids.len() != work_ids.len()
            {
                return Err(VectorIndexError::Upsert(
                    "ids/embeddings/documents/work_ids length mismatch".to_string(),
                ));
            }
            let conn = self.conn.lock().unwrap();
            for (((id, vector), document), work_id) in
                ids.iter().zip(embeddings).zip(documents).zip(work_ids)
            {
                if vector.len() != self.dim {
                    return Err(VectorIndexError::DimensionMismatch {
                        expected: self.dim,
                        actual: vector.len(),
                    });
                }
                let mut normalized = vector.clone();
                l2_normalize(&mut normalized);
                let bytes = f32_slice_as_bytes(&normalized);
                conn.execute(
                    "DELETE FROM vec_entries WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                )
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
                conn.execute(
                    "INSERT INTO vec_entries(collection, id, work_id, document, embedding) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![collection, id, work_id, document, bytes],
                )
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            }
            Ok(())
        }

        fn query(
            &self,
            collection: &str,
            query_embedding: &[f32],
            n_results: usize,
            work_id_filter: Option<i64>,
        ) -> Result<Vec<VecHit>, VectorIndexError> {
            if query_embedding.len() != self.dim {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: self.dim,
                    actual: query_embedding.len(),
                });
            }
            let mut normalized = query_embedding.to_vec();
            l2_normalize(&mut normalized);
            let conn = self.conn.lock().unwrap();
            let bytes = f32_slice_as_bytes(&normalized);

            // Over-fetch from vec0's KNN operator, then filter by work_id in
            // Rust: vec0 partition keys don't compose with extra equality
            // predicates inside the same MATCH query across all driver
            // versions, so the filter is applied post-hoc instead.
            let k = (n_results.max(1) * 4).max(50);
            let mut stmt = conn
                .prepare(
                    "SELECT id, work_id, document, distance \
                     FROM vec_entries \
                     WHERE embedding MATCH ?1 AND collection = ?2 AND k = ?3",
                )
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;

            let rows: Vec<(String, Option<i64>, Option<String>, f32)> = stmt
                .query_map(rusqlite::params![bytes, collection, k as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();

            let mut hits: Vec<VecHit> = rows
                .into_iter()
                .filter(|(_, wid, _, _)| work_id_filter.is_none() || *wid == work_id_filter)
                .map(|(id, _, document, distance)| {
                    let similarity = (1.0 - (distance * distance) / 2.0).clamp(0.0, 1.0);
                    VecHit {
                        id,
                        document,
                        similarity,
                    }
                })
                .collect();
            hits.truncate(n_results);
            Ok(hits)
        }

        fn get(&self, collection: &str, limit: usize) -> Result<Vec<VecEntry>, VectorIndexError> {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT id, work_id, document FROM vec_entries \
                     WHERE collection = ?1 LIMIT ?2",
                )
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![collection, limit as i64], |row| {
                    Ok(VecEntry {
                        id: row.get(0)?,
                        work_id: row.get(1)?,
                        document: row.get(2)?,
                    })
                })
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        }

        fn count(&self, collection: &str) -> Result<usize, VectorIndexError> {
            let conn = self.conn.lock().unwrap();
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vec_entries WHERE collection = ?1",
                    rusqlite::params![collection],
                    |row| row.get(0),
                )
                .map_err(|e| VectorIndexError::Upsert(e.to_string()))?;
            Ok(count as usize)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn upsert_then_count_roundtrips() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            idx.upsert(
                "chunks",
                &["a".to_string()],
                &[vec![0.9, 0.3, 0.1]],
                &[Some("doc a".to_string())],
                &[Some(1)],
            )
            .unwrap();
            assert_eq!(idx.count("chunks").unwrap(), 1);
        }

        #[test]
        fn query_finds_similar_above_dissimilar() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            idx.upsert(
                "chunks",
                &["travel".to_string(), "journey".to_string(), "democracy".to_string()],
                &[
                    vec![0.9, 0.3, 0.1],
                    vec![0.85, 0.35, 0.15],
                    vec![0.1, 0.2, 0.95],
                ],
                &[None, None, None],
                &[Some(1), Some(1), Some(1)],
            )
            .unwrap();

            let hits = idx.query("chunks", &[0.9, 0.3, 0.1], 2, None).unwrap();
            let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
            assert!(ids.contains(&"travel"));
            assert!(ids.contains(&"journey"));
            assert!(!ids.contains(&"democracy"));
        }

        #[test]
        fn query_respects_work_id_filter() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            idx.upsert(
                "chunks",
                &["from-work-1".to_string()],
                &[vec![0.9, 0.3, 0.1]],
                &[None],
                &[Some(1)],
            )
            .unwrap();
            idx.upsert(
                "chunks",
                &["from-work-2".to_string()],
                &[vec![0.9, 0.3, 0.1]],
                &[None],
                &[Some(2)],
            )
            .unwrap();

            let hits = idx.query("chunks", &[0.9, 0.3, 0.1], 10, Some(1)).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].id, "from-work-1");
        }

        #[test]
        fn collections_are_isolated() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            idx.upsert(
                "chunks",
                &["x".to_string()],
                &[vec![0.9, 0.3, 0.1]],
                &[None],
                &[None],
            )
            .unwrap();
            assert_eq!(idx.count("tropes").unwrap(), 0);
            assert_eq!(idx.count("chunks").unwrap(), 1);
        }

        #[test]
        fn dimension_mismatch_is_rejected() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            let err = idx
                .upsert("chunks", &["x".to_string()], &[vec![1.0, 2.0]], &[None], &[None])
                .unwrap_err();
            assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
        }

        #[test]
        fn upsert_replaces_existing_id() {
            let idx = SqliteVecIndex::open_in_memory(3).unwrap();
            idx.upsert(
                "chunks",
                &["a".to_string()],
                &[vec![1.0, 0.0, 0.0]],
                &[Some("v1".to_string())],
                &[None],
            )
            .unwrap();
            idx.upsert(
                "chunks",
                &["a".to_string()],
                &[vec![0.0, 1.0, 0.0]],
                &[Some("v2".to_string())],
                &[None],
            )
            .unwrap();
            assert_eq!(idx.count("chunks").unwrap(), 1);
            let entries = idx.get("chunks", 10).unwrap();
            assert_eq!(entries[0].document.as_deref(), Some("v2"));
        }
    }
}

#[cfg(feature = "vector-index")]
pub use inner::SqliteVecIndex;
