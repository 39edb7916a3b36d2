//! S4: a negation cue inside the verifier's cue window flags the finding,
//! and under the `Downweight` policy the configured negation factor cuts
//! its confidence.

use trope_miner::config::{Config, VerifierPolicy};
use trope_miner::verifier::{apply_policy, flag_for, VerifierFlag};

#[test]
fn negation_cue_is_detected_and_downweights_confidence() {
    let mut cfg = Config::default();
    cfg.verifier_policy = VerifierPolicy::Downweight;
    cfg.verifier_negation_factor = 0.6;

    let window_text = "...the prophecy was empty: he was never a chosen one after all...";
    let flag = flag_for(window_text, None, 0.9, cfg.threshold);
    assert_eq!(flag, Some(VerifierFlag::NegationCue));

    let (confidence, delete) = apply_policy(0.70, flag, &cfg);
    assert!((confidence - 0.42).abs() < 1e-6);
    assert!(!delete);
}
