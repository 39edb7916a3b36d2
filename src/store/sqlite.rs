//! SQLite-backed `TropeStore`.
//!
//! Schema init follows `storage/sqlite.rs::SqliteStore::init_schema`'s
//! two-phase approach: create base tables first (compatible with older
//! databases), then migrate in optional columns (`tropes.anti_aliases`,
//! `trope_finding.level`) via `pragma_table_info` introspection, since
//! SQLite has no `ADD COLUMN IF NOT EXISTS`.

use super::traits::{EmbeddingRef, OpenTropeStore, SceneSupport, SupportSelectionRow, TropeFinding, TropeSanityRow, TropeStore};
use crate::candidate::{CandidateSource, TropeCandidate};
use crate::catalog::Trope;
use crate::error::{DataError, Result, TropeMinerError};
use crate::text::{Chapter, ChapterId, Chunk, ChunkId, FindingId, Scene, SceneId, Span, TropeId, Work, WorkId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteTropeStore {
    conn: Mutex<Connection>,
    has_anti_aliases: bool,
    has_level: bool,
}

impl SqliteTropeStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        let has_anti_aliases = Self::has_column(&conn, "tropes", "anti_aliases_json")?;
        let has_level = Self::has_column(&conn, "trope_finding", "level")?;
        Ok(Self {
            conn: Mutex::new(conn),
            has_anti_aliases,
            has_level,
        })
    }

    fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) > 0 FROM pragma_table_info('{table}') WHERE name = ?1");
        Ok(conn.query_row(&sql, params![column], |row| row.get(0))?)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS works (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT,
                raw_text TEXT NOT NULL,
                norm_text TEXT NOT NULL,
                char_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                title TEXT,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chapters_work ON chapters(work_id);

            CREATE TABLE IF NOT EXISTS scenes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
                chapter_id INTEGER REFERENCES chapters(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                heading TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_scenes_work ON scenes(work_id);
            CREATE INDEX IF NOT EXISTS idx_scenes_chapter ON scenes(chapter_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL REFERENCES works(id) ON DELETE CASCADE,
                scene_id INTEGER REFERENCES scenes(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                token_start INTEGER NOT NULL,
                token_end INTEGER NOT NULL,
                text TEXT NOT NULL,
                sha256 TEXT NOT NULL UNIQUE
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_scene ON chunks(scene_id);

            CREATE TABLE IF NOT EXISTS tropes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                summary TEXT NOT NULL,
                aliases_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embedding_ref (
                chunk_id INTEGER NOT NULL,
                collection TEXT NOT NULL,
                model TEXT NOT NULL,
                dim INTEGER NOT NULL,
                vector_id TEXT NOT NULL,
                PRIMARY KEY (chunk_id, collection)
            );

            CREATE TABLE IF NOT EXISTS trope_candidate (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL,
                scene_id INTEGER NOT NULL,
                chunk_id INTEGER NOT NULL,
                trope_id INTEGER NOT NULL,
                surface TEXT,
                alias TEXT,
                start INTEGER NOT NULL,
                end INTEGER NOT NULL,
                source TEXT NOT NULL,
                score REAL NOT NULL,
                UNIQUE (work_id, trope_id, start, end)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_candidate_span
                ON trope_candidate(work_id, trope_id, start, end);
            CREATE INDEX IF NOT EXISTS idx_candidate_scene ON trope_candidate(scene_id);

            CREATE TABLE IF NOT EXISTS scene_support (
                scene_id INTEGER PRIMARY KEY,
                support_ids_json TEXT NOT NULL,
                notes TEXT NOT NULL,
                model TEXT NOT NULL,
                k INTEGER NOT NULL,
                m INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS support_selection (
                scene_id INTEGER NOT NULL,
                chunk_id INTEGER NOT NULL,
                rank INTEGER NOT NULL,
                stage1_score REAL NOT NULL,
                stage2_score REAL NOT NULL,
                picked INTEGER NOT NULL,
                PRIMARY KEY (scene_id, chunk_id)
            );

            CREATE TABLE IF NOT EXISTS trope_sanity (
                scene_id INTEGER NOT NULL,
                trope_id INTEGER NOT NULL,
                lex_ok INTEGER NOT NULL,
                sem_sim REAL NOT NULL,
                weight REAL NOT NULL,
                PRIMARY KEY (scene_id, trope_id)
            );

            CREATE TABLE IF NOT EXISTS trope_finding (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL,
                scene_id INTEGER NOT NULL,
                trope_id INTEGER NOT NULL,
                confidence REAL NOT NULL,
                evidence_start INTEGER NOT NULL,
                evidence_end INTEGER NOT NULL,
                rationale TEXT NOT NULL,
                model TEXT NOT NULL,
                verifier_score REAL,
                verifier_flag TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (work_id, trope_id, evidence_start, evidence_end)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_finding_span
                ON trope_finding(work_id, trope_id, evidence_start, evidence_end);
            CREATE INDEX IF NOT EXISTS idx_finding_scene ON trope_finding(scene_id);

            CREATE TABLE IF NOT EXISTS trope_finding_human (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                finding_id INTEGER NOT NULL REFERENCES trope_finding(id) ON DELETE CASCADE,
                decision TEXT NOT NULL,
                corrected_start INTEGER,
                corrected_end INTEGER,
                corrected_trope_id INTEGER,
                note TEXT,
                reviewer TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;

        Self::migrate_optional_columns(conn)?;

        conn.execute_batch(
            r#"
            CREATE VIEW IF NOT EXISTS v_latest_human AS
            SELECT h.*
            FROM trope_finding_human h
            INNER JOIN (
                SELECT finding_id, MAX(created_at) AS max_created
                FROM trope_finding_human
                GROUP BY finding_id
            ) latest
            ON h.finding_id = latest.finding_id AND h.created_at = latest.max_created;
            "#,
        )?;

        Ok(())
    }

    fn migrate_optional_columns(conn: &Connection) -> Result<()> {
        if !Self::has_column(conn, "tropes", "anti_aliases_json")? {
            conn.execute(
                "ALTER TABLE tropes ADD COLUMN anti_aliases_json TEXT NOT NULL DEFAULT '[]'",
                [],
            )?;
        }
        if !Self::has_column(conn, "trope_finding", "level")? {
            conn.execute("ALTER TABLE trope_finding ADD COLUMN level TEXT", [])?;
        }
        Ok(())
    }
}

fn row_to_chapter(row: &rusqlite::Row) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        id: ChapterId::from(row.get(0)?),
        work_id: WorkId::from(row.get(1)?),
        idx: row.get::<_, i64>(2)? as usize,
        title: row.get(3)?,
        span: Span::new(row.get::<_, i64>(4)? as usize, row.get::<_, i64>(5)? as usize),
    })
}

fn row_to_scene(row: &rusqlite::Row) -> rusqlite::Result<Scene> {
    let chapter_id: Option<i64> = row.get(2)?;
    Ok(Scene {
        id: SceneId::from(row.get(0)?),
        work_id: WorkId::from(row.get(1)?),
        chapter_id: chapter_id.map(ChapterId::from),
        idx: row.get::<_, i64>(3)? as usize,
        span: Span::new(row.get::<_, i64>(4)? as usize, row.get::<_, i64>(5)? as usize),
        heading: row.get(6)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let scene_id: Option<i64> = row.get(2)?;
    Ok(Chunk {
        id: ChunkId::from(row.get(0)?),
        work_id: WorkId::from(row.get(1)?),
        scene_id: scene_id.map(SceneId::from),
        idx: row.get::<_, i64>(3)? as usize,
        span: Span::new(row.get::<_, i64>(4)? as usize, row.get::<_, i64>(5)? as usize),
        token_start: row.get::<_, i64>(6)? as usize,
        token_end: row.get::<_, i64>(7)? as usize,
        text: row.get(8)?,
        sha256: row.get(9)?,
    })
}

impl OpenTropeStore for SqliteTropeStore {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        SqliteTropeStore::open(path)
    }

    fn open_in_memory() -> Result<Self> {
        SqliteTropeStore::open_in_memory()
    }
}

impl TropeStore for SqliteTropeStore {
    fn create_work(&self, title: &str, author: Option<&str>, raw_text: &str, norm_text: &str) -> Result<Work> {
        let char_count = norm_text.chars().count();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO works(title, author, raw_text, norm_text, char_count) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, author, raw_text, norm_text, char_count as i64],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Work {
            id: WorkId::from(id),
            title: title.to_string(),
            author: author.map(String::from),
            raw_text: raw_text.to_string(),
            norm_text: norm_text.to_string(),
            char_count,
        })
    }

    fn get_work(&self, id: WorkId) -> Result<Option<Work>> {
        let conn = self.conn.lock().unwrap();
        let work = conn
            .query_row(
                "SELECT id, title, author, raw_text, norm_text, char_count FROM works WHERE id = ?1",
                params![id.get()],
                |row| {
                    Ok(Work {
                        id: WorkId::from(row.get(0)?),
                        title: row.get(1)?,
                        author: row.get(2)?,
                        raw_text: row.get(3)?,
                        norm_text: row.get(4)?,
                        char_count: row.get::<_, i64>(5)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(work)
    }

    fn insert_chapters(&self, work_id: WorkId, chapters: &[(usize, Option<String>, usize, usize)]) -> Result<Vec<Chapter>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(chapters.len());
        for (idx, title, start, end) in chapters {
            if end <= start {
                return Err(TropeMinerError::Data(DataError::InvertedSpan { start: *start, end: *end }));
            }
            conn.execute(
                "INSERT INTO chapters(work_id, idx, title, char_start, char_end) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![work_id.get(), *idx as i64, title, *start as i64, *end as i64],
            )?;
            out.push(Chapter {
                id: ChapterId::from(conn.last_insert_rowid()),
                work_id,
                idx: *idx,
                title: title.clone(),
                span: Span::new(*start, *end),
            });
        }
        Ok(out)
    }

    fn get_chapters(&self, work_id: WorkId) -> Result<Vec<Chapter>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, work_id, idx, title, char_start, char_end FROM chapters WHERE work_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![work_id.get()], row_to_chapter)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn insert_scenes(
        &self,
        work_id: WorkId,
        chapter_id: Option<ChapterId>,
        scenes: &[(usize, usize, usize, Option<String>)],
    ) -> Result<Vec<Scene>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(scenes.len());
        for (idx, start, end, heading) in scenes {
            if end <= start {
                return Err(TropeMinerError::Data(DataError::InvertedSpan { start: *start, end: *end }));
            }
            conn.execute(
                "INSERT INTO scenes(work_id, chapter_id, idx, char_start, char_end, heading) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![work_id.get(), chapter_id.map(|c| c.get()), *idx as i64, *start as i64, *end as i64, heading],
            )?;
            out.push(Scene {
                id: SceneId::from(conn.last_insert_rowid()),
                work_id,
                chapter_id,
                idx: *idx,
                span: Span::new(*start, *end),
                heading: heading.clone(),
            });
        }
        Ok(out)
    }

    fn get_scenes(&self, work_id: WorkId) -> Result<Vec<Scene>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, work_id, chapter_id, idx, char_start, char_end, heading FROM scenes WHERE work_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![work_id.get()], row_to_scene)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn insert_chunks(&self, work_id: WorkId, scene_id: SceneId, chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::with_capacity(chunks.len());
        for c in chunks {
            if c.span.is_empty() {
                return Err(TropeMinerError::Data(DataError::EmptySpan { start: c.span.start, end: c.span.end }));
            }
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM chunks WHERE sha256 = ?1", params![c.sha256], |row| row.get(0))
                .optional()?;
            let id = if let Some(id) = existing {
                id
            } else {
                conn.execute(
                    "INSERT INTO chunks(work_id, scene_id, idx, char_start, char_end, token_start, token_end, text, sha256) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        work_id.get(),
                        scene_id.get(),
                        c.idx as i64,
                        c.span.start as i64,
                        c.span.end as i64,
                        c.token_start as i64,
                        c.token_end as i64,
                        c.text,
                        c.sha256,
                    ],
                )?;
                conn.last_insert_rowid()
            };
            out.push(Chunk {
                id: ChunkId::from(id),
                work_id,
                scene_id: Some(scene_id),
                idx: c.idx,
                span: c.span,
                token_start: c.token_start,
                token_end: c.token_end,
                text: c.text.clone(),
                sha256: c.sha256.clone(),
            });
        }
        Ok(out)
    }

    fn get_chunks_for_scene(&self, scene_id: SceneId) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, work_id, scene_id, idx, char_start, char_end, token_start, token_end, text, sha256 \
             FROM chunks WHERE scene_id = ?1 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![scene_id.get()], row_to_chunk)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn upsert_trope(&self, trope: &Trope) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let aliases_json = serde_json::to_string(&trope.aliases)?;
        let anti_json = serde_json::to_string(&trope.anti_aliases)?;
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM tropes WHERE id = ?1", params![trope.id.get()], |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            conn.execute(
                "UPDATE tropes SET name = ?2, summary = ?3, aliases_json = ?4, anti_aliases_json = ?5 WHERE id = ?1",
                params![trope.id.get(), trope.name, trope.summary, aliases_json, anti_json],
            )?;
        } else {
            conn.execute(
                "INSERT INTO tropes(id, name, summary, aliases_json, anti_aliases_json) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![trope.id.get(), trope.name, trope.summary, aliases_json, anti_json],
            )?;
        }
        Ok(())
    }

    fn get_trope(&self, id: TropeId) -> Result<Option<Trope>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, summary, aliases_json, anti_aliases_json FROM tropes WHERE id = ?1",
                params![id.get()],
                |row| {
                    let aliases_json: String = row.get(3)?;
                    let anti_json: String = row.get(4)?;
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, aliases_json, anti_json))
                },
            )
            .optional()?;
        Ok(row.map(|(id, name, summary, aliases_json, anti_json)| Trope {
            id: TropeId::from(id),
            name,
            summary,
            aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
            anti_aliases: serde_json::from_str(&anti_json).unwrap_or_default(),
        }))
    }

    fn list_tropes(&self) -> Result<Vec<Trope>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, summary, aliases_json, anti_aliases_json FROM tropes")?;
        let rows = stmt
            .query_map([], |row| {
                let aliases_json: String = row.get(3)?;
                let anti_json: String = row.get(4)?;
                Ok(Trope {
                    id: TropeId::from(row.get(0)?),
                    name: row.get(1)?,
                    summary: row.get(2)?,
                    aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
                    anti_aliases: serde_json::from_str(&anti_json).unwrap_or_default(),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn upsert_embedding_ref(&self, r: &EmbeddingRef) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO embedding_ref(chunk_id, collection, model, dim, vector_id) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(chunk_id, collection) DO UPDATE SET model = excluded.model, dim = excluded.dim, vector_id = excluded.vector_id",
            params![r.chunk_id.get(), r.collection, r.model, r.dim as i64, r.vector_id],
        )?;
        Ok(())
    }

    fn get_embedding_ref(&self, chunk_id: ChunkId, collection: &str) -> Result<Option<EmbeddingRef>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT chunk_id, collection, model, dim, vector_id FROM embedding_ref WHERE chunk_id = ?1 AND collection = ?2",
                params![chunk_id.get(), collection],
                |row| {
                    Ok(EmbeddingRef {
                        chunk_id: ChunkId::from(row.get(0)?),
                        collection: row.get(1)?,
                        model: row.get(2)?,
                        dim: row.get::<_, i64>(3)? as usize,
                        vector_id: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn insert_candidate(&self, candidate: &TropeCandidate) -> Result<()> {
        if candidate.end <= candidate.start {
            return Err(TropeMinerError::Data(DataError::InvertedSpan { start: candidate.start, end: candidate.end }));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO trope_candidate(work_id, scene_id, chunk_id, trope_id, surface, alias, start, end, source, score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                candidate.work_id.get(),
                candidate.scene_id.get(),
                candidate.chunk_id.get(),
                candidate.trope_id.get(),
                candidate.surface,
                candidate.alias,
                candidate.start as i64,
                candidate.end as i64,
                candidate.source.as_str(),
                candidate.score,
            ],
        )?;
        Ok(())
    }

    fn get_candidates_for_scene(&self, scene_id: SceneId) -> Result<Vec<TropeCandidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT work_id, scene_id, chunk_id, trope_id, surface, alias, start, end, source, score \
             FROM trope_candidate WHERE scene_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![scene_id.get()], |row| {
                let source: String = row.get(8)?;
                Ok(TropeCandidate {
                    work_id: WorkId::from(row.get(0)?),
                    scene_id: SceneId::from(row.get(1)?),
                    chunk_id: ChunkId::from(row.get(2)?),
                    trope_id: TropeId::from(row.get(3)?),
                    surface: row.get(4)?,
                    alias: row.get(5)?,
                    start: row.get::<_, i64>(6)? as usize,
                    end: row.get::<_, i64>(7)? as usize,
                    source: if source == "semantic" { CandidateSource::Semantic } else { CandidateSource::Gazetteer },
                    score: row.get(9)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn upsert_scene_support(&self, row: &SceneSupport) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let ids_json = serde_json::to_string(&row.support_ids.iter().map(|c| c.get()).collect::<Vec<_>>())?;
        conn.execute(
            "INSERT INTO scene_support(scene_id, support_ids_json, notes, model, k, m) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(scene_id) DO UPDATE SET support_ids_json = excluded.support_ids_json, notes = excluded.notes, \
             model = excluded.model, k = excluded.k, m = excluded.m",
            params![row.scene_id.get(), ids_json, row.notes, row.model, row.k as i64, row.m as i64],
        )?;
        Ok(())
    }

    fn upsert_support_selection(&self, row: &SupportSelectionRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO support_selection(scene_id, chunk_id, rank, stage1_score, stage2_score, picked) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(scene_id, chunk_id) DO UPDATE SET rank = excluded.rank, stage1_score = excluded.stage1_score, \
             stage2_score = excluded.stage2_score, picked = excluded.picked",
            params![
                row.scene_id.get(),
                row.chunk_id.get(),
                row.rank as i64,
                row.stage1_score,
                row.stage2_score,
                row.picked as i64,
            ],
        )?;
        Ok(())
    }

    fn upsert_trope_sanity(&self, row: &TropeSanityRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trope_sanity(scene_id, trope_id, lex_ok, sem_sim, weight) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(scene_id, trope_id) DO UPDATE SET lex_ok = excluded.lex_ok, sem_sim = excluded.sem_sim, weight = excluded.weight",
            params![row.scene_id.get(), row.trope_id.get(), row.lex_ok as i64, row.sem_sim, row.weight],
        )?;
        Ok(())
    }

    fn upsert_finding(&self, finding: &TropeFinding) -> Result<FindingId> {
        if finding.evidence_end <= finding.evidence_start {
            return Err(TropeMinerError::Data(DataError::InvertedSpan {
                start: finding.evidence_start,
                end: finding.evidence_end,
            }));
        }
        let confidence = finding.confidence.clamp(0.0, 1.0);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trope_finding(work_id, scene_id, trope_id, confidence, evidence_start, evidence_end, rationale, model, verifier_score, verifier_flag, level) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(work_id, trope_id, evidence_start, evidence_end) DO UPDATE SET \
             confidence = excluded.confidence, rationale = excluded.rationale, model = excluded.model, \
             verifier_score = excluded.verifier_score, verifier_flag = excluded.verifier_flag, level = excluded.level",
            params![
                finding.work_id.get(),
                finding.scene_id.get(),
                finding.trope_id.get(),
                confidence,
                finding.evidence_start as i64,
                finding.evidence_end as i64,
                finding.rationale,
                finding.model,
                finding.verifier_score,
                finding.verifier_flag,
                finding.level,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM trope_finding WHERE work_id = ?1 AND trope_id = ?2 AND evidence_start = ?3 AND evidence_end = ?4",
            params![finding.work_id.get(), finding.trope_id.get(), finding.evidence_start as i64, finding.evidence_end as i64],
            |row| row.get(0),
        )?;
        Ok(FindingId::from(id))
    }

    fn get_findings_for_scene(&self, scene_id: SceneId) -> Result<Vec<TropeFinding>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, work_id, scene_id, trope_id, confidence, evidence_start, evidence_end, rationale, model, verifier_score, verifier_flag, level \
             FROM trope_finding WHERE scene_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![scene_id.get()], |row| {
                Ok(TropeFinding {
                    id: FindingId::from(row.get(0)?),
                    work_id: WorkId::from(row.get(1)?),
                    scene_id: SceneId::from(row.get(2)?),
                    trope_id: TropeId::from(row.get(3)?),
                    confidence: row.get(4)?,
                    evidence_start: row.get::<_, i64>(5)? as usize,
                    evidence_end: row.get::<_, i64>(6)? as usize,
                    rationale: row.get(7)?,
                    model: row.get(8)?,
                    verifier_score: row.get(9)?,
                    verifier_flag: row.get(10)?,
                    level: row.get(11)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn update_finding_verifier(
        &self,
        id: FindingId,
        evidence_start: usize,
        evidence_end: usize,
        confidence: f32,
        verifier_score: f32,
        verifier_flag: Option<&str>,
    ) -> Result<()> {
        if evidence_end <= evidence_start {
            return Err(TropeMinerError::Data(DataError::InvertedSpan { start: evidence_start, end: evidence_end }));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE trope_finding SET evidence_start = ?2, evidence_end = ?3, confidence = ?4, verifier_score = ?5, verifier_flag = ?6 WHERE id = ?1",
            params![id.get(), evidence_start as i64, evidence_end as i64, confidence.clamp(0.0, 1.0), verifier_score, verifier_flag],
        )?;
        Ok(())
    }

    fn delete_finding(&self, id: FindingId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM trope_finding WHERE id = ?1", params![id.get()])?;
        Ok(())
    }

    fn has_anti_aliases_column(&self) -> bool {
        self.has_anti_aliases
    }

    fn has_level_column(&self) -> bool {
        self.has_level
    }
}
