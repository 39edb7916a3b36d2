//! S1: a plain lexical mention of a trope's alias is gazetteer-matched and,
//! once judged, produces a finding at or above the configured threshold.

mod common;

use common::trope;
use trope_miner::config::Config;
use trope_miner::gazetteer::{build_entry, match_chunk};
use trope_miner::judge::judge_scene;
use trope_miner::reasoner::MockReasoner;
use trope_miner::rerank::TropeSanity;
use trope_miner::text::{ChunkId, SceneId, TropeId, WorkId};

#[test]
fn bottle_episode_alias_is_gazetteer_matched() {
    let cfg = Config::default();
    let t = trope(1, "Bottle Episode", &["bottle show"], &[]);
    let entry = build_entry(&t, &cfg);

    let chunk_text = "It was, of course, a bottle episode.";
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

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].surface.as_deref(), Some("bottle episode"));
    assert_eq!(candidates[0].trope_id, TropeId::from(1));
}

#[tokio::test]
async fn judge_accepts_finding_at_or_above_threshold() {
    let cfg = Config::default();
    let reasoner = MockReasoner::new().with_default(
        r#"[{"trope_id": 1, "confidence": 0.5, "evidence_char_span": [0, 37], "rationale": "calls itself a bottle episode"}]"#,
    );
    let sanity = vec![TropeSanity {
        trope_id: TropeId::from(1),
        lex_ok: true,
        sem_sim: 1.0,
        weight: 1.0,
    }];

    let findings = judge_scene(
        "prompt",
        &reasoner,
        1000,
        &[TropeId::from(1)],
        &sanity,
        &cfg,
    )
    .await;

    assert_eq!(findings.len(), 1);
    assert!(findings[0].confidence >= cfg.threshold);
}
