//! S3: a scene that evokes a trope purely through imagery, never mentioning
//! any of its surface forms, still carries full sanity weight once the
//! semantic similarity clears `sem_sim_threshold`, and the judge's raw
//! confidence survives untouched.

mod common;

use common::trope;
use trope_miner::config::Config;
use trope_miner::judge::judge_scene;
use trope_miner::reasoner::MockReasoner;
use trope_miner::rerank::compute_sanity;
use trope_miner::text::TropeId;

const SCENE_TEXT: &str =
    "A pale figure drifted through the corridor without a sound, watching from the shadows every night.";

#[test]
fn sanity_weight_stays_full_via_semantic_signal_alone() {
    let cfg = Config::default();
    let t = trope(1, "Vengeful Spirit", &["restless specter"], &[]);

    // cos([1,0], [0.5, 0.866...]) = 0.5, comfortably above sem_sim_threshold
    // (0.36) with neither the name nor the alias present in the text.
    let scene_vec = vec![1.0_f32, 0.0];
    let support_vec = vec![1.0_f32, 0.0];
    let trope_vec = vec![0.5_f32, 0.866_025_4];

    let sanity = compute_sanity(
        SCENE_TEXT,
        "",
        &scene_vec,
        &support_vec,
        &[(&t, trope_vec)],
        &cfg,
    );

    assert!(!sanity[0].lex_ok);
    assert!(sanity[0].sem_sim >= cfg.sem_sim_threshold);
    assert_eq!(sanity[0].weight, 1.0);
}

#[tokio::test]
async fn raw_confidence_is_unchanged_when_weight_is_full() {
    let cfg = Config::default();
    let reasoner = MockReasoner::new().with_default(
        r#"[{"trope_id": 1, "confidence": 0.6, "evidence_char_span": [0, 50], "rationale": "a haunting presence"}]"#,
    );
    let sanity = vec![trope_miner::rerank::TropeSanity {
        trope_id: TropeId::from(1),
        lex_ok: false,
        sem_sim: 0.5,
        weight: 1.0,
    }];

    let findings = judge_scene("prompt", &reasoner, 1000, &[TropeId::from(1)], &sanity, &cfg).await;

    assert_eq!(findings.len(), 1);
    assert!((findings[0].confidence - 0.6).abs() < 1e-6);
    assert!(!findings[0].rationale.contains("prior="));
}
