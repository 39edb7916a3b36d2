//! S5: a short, mid-sentence evidence span is snapped out to its containing
//! sentence once the snapped window's score beats the original by at least
//! `verifier_min_gain`.

use trope_miner::config::Config;
use trope_miner::verifier::{candidate_windows, choose_best, split_sentences};

const SCENE_TEXT: &str =
    "He walked through the door quietly. It was, of course, a bottle episode entirely by accident. Nothing else happened that day.";

#[test]
fn snapped_sentence_is_adopted_when_gain_clears_min_gain() {
    let cfg = Config::default();
    let orig_start = SCENE_TEXT.find("a bottle ep").expect("fixture text contains the phrase");
    let orig_end = orig_start + 12;

    let candidates = candidate_windows(SCENE_TEXT, orig_start, orig_end, &cfg);
    assert!(candidates.len() >= 2, "expected the original span plus at least one expansion");

    let sentences = split_sentences(SCENE_TEXT);
    let containing_sentence = sentences
        .iter()
        .find(|s| s.start <= orig_start && orig_start < s.end)
        .expect("scene text is non-empty");

    // candidates[0] is always the original span; candidates[1] is the
    // zero-expansion (single containing sentence) window.
    let orig_score = 0.50_f32;
    let snapped_score = 0.58_f32;
    assert!(snapped_score - orig_score >= cfg.verifier_min_gain);

    let scored: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let score = if i == 0 {
                orig_score
            } else if i == 1 {
                snapped_score
            } else {
                0.10
            };
            (*c, score)
        })
        .collect();

    let best = choose_best(&scored, orig_score, cfg.threshold, cfg.verifier_min_gain);

    assert_eq!(best.start, containing_sentence.start);
    assert_eq!(best.end, containing_sentence.end);
    assert!(best.end - best.start <= cfg.verifier_max_chars);
    assert_ne!((best.start, best.end), (orig_start, orig_end));
}
