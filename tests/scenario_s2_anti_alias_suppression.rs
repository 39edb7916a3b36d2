//! S2: a trope whose defined anti-alias appears in the chunk emits zero
//! candidates, even though the canonical name itself is present.

mod common;

use common::trope;
use trope_miner::config::Config;
use trope_miner::gazetteer::{build_entry, match_chunk};
use trope_miner::text::{ChunkId, SceneId, WorkId};

#[test]
fn anti_whodunit_suppresses_all_candidates() {
    let cfg = Config::default();
    let t = trope(1, "Whodunit", &[], &["anti-whodunit"]);
    let entry = build_entry(&t, &cfg);

    let chunk_text = "This anti-whodunit refuses a solution.";
    let candidates = match_chunk(
        &entry,
        WorkId::from(1),
        SceneId::from(1),
        ChunkId::from(1),
        chunk_text,
        0,
        &cfg,
        cfg.max_per_trope,
    );

    assert!(candidates.is_empty());
}
