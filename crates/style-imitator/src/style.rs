//! Style scoring and move selection: pure functions over candidates and a
//! profile, plus the forced-error path that emulates a player's error rate.

use std::collections::HashSet;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::{debug, warn};

use crate::candidate::Candidate;
use crate::decision_log::{DecisionConfig, DecisionRecord, DecisionSink, PickedMove};
use crate::error::ImitatorError;
use crate::profile::StyleProfile;
use crate::tagger::ForcedTagOverride;

/// Upper bound on the forced-error probability.
pub const MAX_ERROR_RATE: f64 = 0.5;

/// Floor for the aggressiveness divisor.
const MIN_AGGRESSIVENESS: f64 = 0.001;

/// Sampling weight for failing candidates without any failure mass.
const FAILURE_EPSILON: f64 = 1e-9;

/// Highest evaluation across all candidates.
pub fn best_eval(candidates: &[Candidate]) -> f64 {
    candidates
        .iter()
        .map(|c| c.eval_cp)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Higher-is-better style score; `-inf` when the candidate drops more than
/// `min_eval_cp` below the best evaluation.
pub fn score<S: AsRef<str>>(tags: &[S], eval_cp: f64, profile: &StyleProfile, best_eval: f64) -> f64 {
    let delta = best_eval - eval_cp;
    let config = &profile.config;
    if delta > config.min_eval_cp {
        return f64::NEG_INFINITY;
    }

    let reward: f64 = tags
        .iter()
        .filter_map(|t| profile.tag_weights.get(t.as_ref()))
        .sum();
    let penalty: f64 = tags
        .iter()
        .filter_map(|t| profile.penalty_tags.get(t.as_ref()))
        .sum();
    let eval_penalty = delta * (config.eval_weight / config.aggressiveness.max(MIN_AGGRESSIVENESS));

    reward - penalty - eval_penalty
}

/// Probability of taking the forced-error path, in `[0, 0.5]`.
///
/// Driven by how much of the player's tag-weight mass sits on failure tags.
pub fn error_rate(profile: &StyleProfile) -> f64 {
    let total_mass: f64 = profile.tag_weights.values().sum();
    if total_mass <= 0.0 || !total_mass.is_finite() {
        return 0.0;
    }

    let failure_mass: f64 = profile
        .failure_tag_set()
        .into_iter()
        .filter_map(|t| profile.tag_weights.get(t))
        .sum();
    if failure_mass <= 0.0 {
        return 0.0;
    }

    let rate = failure_mass / total_mass * profile.config.error_rate_multiplier;
    if rate.is_nan() {
        return 0.0;
    }
    rate.clamp(0.0, MAX_ERROR_RATE)
}

/// Sampling weight of a failing candidate, at most `cap`.
fn failure_weight(
    candidate: &Candidate,
    profile: &StyleProfile,
    failure_tags: &HashSet<&str>,
    cap: f64,
) -> f64 {
    let mass: f64 = candidate
        .tags
        .iter()
        .filter(|t| failure_tags.contains(t.as_str()))
        .map(|t| {
            let base = profile.tag_weights.get(t).copied().unwrap_or(0.0);
            let severity = profile.penalty_tags.get(t).copied().unwrap_or(1.0);
            base * severity
        })
        .sum();
    // NaN and overflow both land inside [epsilon, cap]
    mass.max(FAILURE_EPSILON).min(cap)
}

/// Draw one failing candidate for the forced-error path.
///
/// Weighted by failure mass when the profile has both reward and penalty
/// weights, uniform otherwise.
fn pick_failure<'a, R: Rng + ?Sized>(
    failing: &[&'a Candidate],
    profile: &StyleProfile,
    failure_tags: &HashSet<&str>,
    rng: &mut R,
) -> &'a Candidate {
    if profile.tag_weights.is_empty() || profile.penalty_tags.is_empty() {
        return failing[rng.gen_range(0..failing.len())];
    }

    // Keeps the total finite, which WeightedIndex requires.
    let cap = f64::MAX / (2.0 * failing.len() as f64);
    let weights: Vec<f64> = failing
        .iter()
        .map(|c| failure_weight(c, profile, failure_tags, cap))
        .collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => failing[dist.sample(rng)],
        Err(_) => failing[rng.gen_range(0..failing.len())],
    }
}

/// Outcome of [`StyleSelector::pick`].
#[derive(Debug, Clone)]
pub struct Selection {
    /// The chosen candidate with `style_score` set
    pub candidate: Candidate,
    /// Every candidate with its style score
    pub scored: Vec<Candidate>,
    pub forced_error: bool,
    pub error_rate: f64,
}

/// Picks one candidate per search according to a style profile.
pub struct StyleSelector {
    overrides: Arc<dyn ForcedTagOverride>,
    decisions: Arc<dyn DecisionSink>,
}

impl StyleSelector {
    pub fn new(overrides: Arc<dyn ForcedTagOverride>, decisions: Arc<dyn DecisionSink>) -> Self {
        Self {
            overrides,
            decisions,
        }
    }

    pub fn pick<R: Rng + ?Sized>(
        &self,
        fen: &str,
        candidates: &[Candidate],
        profile: &StyleProfile,
        rng: &mut R,
    ) -> Result<Selection, ImitatorError> {
        if candidates.is_empty() {
            return Err(ImitatorError::EmptyCandidateSet);
        }

        let best = best_eval(candidates);
        let scored: Vec<Candidate> = candidates
            .iter()
            .map(|c| Candidate {
                style_score: Some(score(&c.tags, c.eval_cp, profile, best)),
                ..c.clone()
            })
            .collect();

        let failure_tags = profile.failure_tag_set();
        let failing: Vec<&Candidate> = scored
            .iter()
            .filter(|c| c.style_score != Some(f64::NEG_INFINITY))
            .filter(|c| c.tags.iter().any(|t| failure_tags.contains(t.as_str())))
            .collect();

        let rate = if profile.config.deterministic {
            0.0
        } else {
            error_rate(profile)
        };
        let forced_error = !failing.is_empty() && rate > 0.0 && rng.gen::<f64>() < rate;

        let mut picked = if forced_error {
            pick_failure(&failing, profile, &failure_tags, rng).clone()
        } else {
            top_scored(&scored).clone()
        };

        if let Some(tags) = self.overrides.override_tags(candidates, &picked.move_uci) {
            picked.tags = tags;
        }

        debug!(
            picked = %picked.move_uci,
            style_score = ?picked.style_score,
            forced_error,
            error_rate = rate,
            "Style selection"
        );

        let record = DecisionRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            fen: fen.to_string(),
            profile_name: profile.name.clone(),
            config: DecisionConfig {
                deterministic: profile.config.deterministic,
                error_rate: rate,
            },
            make_error: forced_error,
            picked: PickedMove {
                uci: picked.move_uci.clone(),
                tags: picked.tags.clone(),
                sf_eval: picked.eval_cp,
                style_score: picked.style_score,
            },
            candidates: scored.clone(),
        };
        if let Err(e) = self.decisions.append(&record) {
            warn!(error = %e, "Failed to log move decision");
        }

        Ok(Selection {
            candidate: picked,
            scored,
            forced_error,
            error_rate: rate,
        })
    }
}

/// First candidate with the maximum style score.
fn top_scored(scored: &[Candidate]) -> &Candidate {
    let mut best = &scored[0];
    for candidate in &scored[1..] {
        let s = candidate.style_score.unwrap_or(f64::NEG_INFINITY);
        if s > best.style_score.unwrap_or(f64::NEG_INFINITY) {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision_log::NullDecisionSink;
    use crate::tagger::{ForcedMoveTags, NoOverride};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn selector() -> StyleSelector {
        StyleSelector::new(Arc::new(NoOverride), Arc::new(NullDecisionSink))
    }

    fn profile(weights: &[(&str, f64)], penalties: &[(&str, f64)]) -> StyleProfile {
        StyleProfile {
            name: "test".into(),
            tag_weights: weights.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            penalty_tags: penalties.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<DecisionRecord>>,
    }

    impl DecisionSink for RecordingSink {
        fn append(&self, record: &DecisionRecord) -> Result<(), ImitatorError> {
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl DecisionSink for FailingSink {
        fn append(&self, _record: &DecisionRecord) -> Result<(), ImitatorError> {
            Err(ImitatorError::DecisionLog(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_scenario_single_tagged_candidate() {
        let profile = profile(&[("control_simplify", 5.0)], &[]);
        let candidates = vec![Candidate::new(1, "e2e4", 20.0).with_tags(["control_simplify"])];

        assert_eq!(score(&candidates[0].tags, 20.0, &profile, 20.0), 5.0);

        let mut rng = StdRng::seed_from_u64(1);
        let selection = selector().pick("fen", &candidates, &profile, &mut rng).unwrap();
        assert_eq!(selection.candidate.move_uci, "e2e4");
        assert_eq!(selection.candidate.style_score, Some(5.0));
    }

    #[test]
    fn test_scenario_unacceptable_drop() {
        let profile = profile(&[("sacrifice", 1000.0)], &[]);
        let candidates = vec![
            Candidate::new(1, "a", 0.0),
            Candidate::new(2, "b", -200.0).with_tags(["sacrifice"]),
        ];

        let mut rng = StdRng::seed_from_u64(2);
        let selection = selector().pick("fen", &candidates, &profile, &mut rng).unwrap();
        assert_eq!(selection.scored[1].style_score, Some(f64::NEG_INFINITY));
        assert_eq!(selection.candidate.move_uci, "a");
    }

    #[test]
    fn test_score_is_neg_infinity_only_past_threshold() {
        let profile = profile(&[], &[]);
        assert!((score::<&str>(&[], -150.0, &profile, 0.0) + 0.15).abs() < 1e-9);
        assert_eq!(score::<&str>(&[], -150.5, &profile, 0.0), f64::NEG_INFINITY);
        // Candidate above the best eval is scored normally.
        assert!(score::<&str>(&[], 30.0, &profile, 0.0).is_finite());
    }

    #[test]
    fn test_score_combines_reward_penalty_and_eval() {
        let mut profile = profile(&[("attack", 4.0)], &[("passive", 1.5)]);
        profile.config.aggressiveness = 2.0;
        profile.config.eval_weight = 0.01;
        // 4 - 1.5 - 100 * (0.01 / 2)
        let s = score(&["attack", "passive", "unknown"], -100.0, &profile, 0.0);
        assert!((s - 2.0).abs() < 1e-9);

        profile.config.aggressiveness = 0.0;
        let s = score::<&str>(&[], -1.0, &profile, 0.0);
        assert!((s + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_eval() {
        let candidates = vec![
            Candidate::new(1, "a", -40.0),
            Candidate::new(2, "b", 12.5),
            Candidate::new(3, "c", 3.0),
        ];
        assert_eq!(best_eval(&candidates), 12.5);
    }

    #[test]
    fn test_error_rate_bounds() {
        assert_eq!(error_rate(&profile(&[], &[])), 0.0);
        assert_eq!(error_rate(&profile(&[("a", 0.0)], &[("a", 1.0)])), 0.0);

        // failure mass 1 of 4
        let p = profile(&[("blunder", 1.0), ("solid", 3.0)], &[("blunder", 2.0)]);
        assert!((error_rate(&p) - 0.25).abs() < 1e-12);

        let mut heavy = profile(&[("blunder", 9.0), ("solid", 1.0)], &[("blunder", 2.0)]);
        heavy.config.error_rate_multiplier = 3.0;
        assert_eq!(error_rate(&heavy), MAX_ERROR_RATE);

        heavy.config.error_rate_multiplier = -1.0;
        assert_eq!(error_rate(&heavy), 0.0);
    }

    #[test]
    fn test_error_rate_uses_explicit_failure_tags() {
        let mut p = profile(&[("blunder", 1.0), ("solid", 3.0)], &[("blunder", 2.0)]);
        p.failure_tags = Some(vec!["solid".into()]);
        assert_eq!(error_rate(&p), MAX_ERROR_RATE);
    }

    #[test]
    fn test_empty_candidates_is_an_error() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = selector()
            .pick("fen", &[], &profile(&[], &[]), &mut rng)
            .unwrap_err();
        assert!(matches!(err, ImitatorError::EmptyCandidateSet));
    }

    fn error_prone() -> (StyleProfile, Vec<Candidate>) {
        let p = profile(&[("blunder", 10.0), ("solid", 0.0)], &[("blunder", 1.0)]);
        let candidates = vec![
            Candidate::new(1, "best", 50.0).with_tags(["solid"]),
            Candidate::new(2, "lapse", 40.0).with_tags(["blunder"]),
        ];
        (p, candidates)
    }

    #[test]
    fn test_deterministic_never_forces_error() {
        let (mut p, candidates) = error_prone();
        p.config.deterministic = true;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let selection = selector().pick("fen", &candidates, &p, &mut rng).unwrap();
            assert!(!selection.forced_error);
            assert_eq!(selection.error_rate, 0.0);
        }
    }

    #[test]
    fn test_forced_error_picks_failing_candidate() {
        let (p, candidates) = error_prone();
        assert_eq!(error_rate(&p), MAX_ERROR_RATE);

        let mut forced = 0;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let selection = selector().pick("fen", &candidates, &p, &mut rng).unwrap();
            if selection.forced_error {
                forced += 1;
                assert_eq!(selection.candidate.move_uci, "lapse");
            }
            assert!(candidates
                .iter()
                .any(|c| c.move_uci == selection.candidate.move_uci));
        }
        assert!(forced > 50 && forced < 150, "forced {forced} of 200");
    }

    #[test]
    fn test_unacceptable_candidates_never_forced() {
        let (p, mut candidates) = error_prone();
        candidates[1].eval_cp = -500.0;
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let selection = selector().pick("fen", &candidates, &p, &mut rng).unwrap();
            assert!(!selection.forced_error);
            assert_eq!(selection.candidate.move_uci, "best");
        }
    }

    #[test]
    fn test_huge_failure_weights_still_sample() {
        let p = profile(&[("blunder", 1e200), ("solid", 1.0)], &[("blunder", 1e200)]);
        let candidates = vec![
            Candidate::new(1, "best", 50.0).with_tags(["solid"]),
            Candidate::new(2, "lapse", 40.0).with_tags(["blunder"]),
            Candidate::new(3, "howler", 30.0).with_tags(["blunder"]),
        ];

        let mut forced = 0;
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let selection = selector().pick("fen", &candidates, &p, &mut rng).unwrap();
            if selection.forced_error {
                forced += 1;
                assert_ne!(selection.candidate.move_uci, "best");
            }
        }
        assert!(forced > 0);
    }

    #[test]
    fn test_failure_weight_is_bounded() {
        let p = profile(&[("blunder", 1e200)], &[("blunder", 1e200)]);
        let failure_tags = p.failure_tag_set();
        let candidate = Candidate::new(1, "lapse", 0.0).with_tags(["blunder"]);
        assert_eq!(failure_weight(&candidate, &p, &failure_tags, 10.0), 10.0);

        let untagged = Candidate::new(2, "quiet", 0.0);
        assert_eq!(
            failure_weight(&untagged, &p, &failure_tags, 10.0),
            FAILURE_EPSILON
        );
    }

    #[test]
    fn test_failure_pick_is_uniform_without_penalty_weights() {
        // Explicit failure tags but no penalties: every failing move is equally likely.
        let mut p = profile(&[("blunder", 100.0), ("slip", 0.001)], &[]);
        p.failure_tags = Some(vec!["blunder".into(), "slip".into()]);
        let failure_tags = p.failure_tag_set();
        let heavy = Candidate::new(1, "heavy", 0.0).with_tags(["blunder"]);
        let light = Candidate::new(2, "light", 0.0).with_tags(["slip"]);
        let failing = vec![&heavy, &light];

        let mut rng = StdRng::seed_from_u64(5);
        let light_picks = (0..1000)
            .filter(|_| pick_failure(&failing, &p, &failure_tags, &mut rng).move_uci == "light")
            .count();
        assert!(light_picks > 400 && light_picks < 600, "light picked {light_picks} of 1000");
    }

    #[test]
    fn test_ties_go_to_first_candidate() {
        let p = profile(&[], &[]);
        let candidates = vec![
            Candidate::new(1, "first", 10.0),
            Candidate::new(2, "second", 10.0),
        ];
        let mut rng = StdRng::seed_from_u64(4);
        let selection = selector().pick("fen", &candidates, &p, &mut rng).unwrap();
        assert_eq!(selection.candidate.move_uci, "first");
    }

    #[test]
    fn test_override_and_decision_record() {
        let sink = Arc::new(RecordingSink::default());
        let overrides = Arc::new(ForcedMoveTags::new(vec![(
            "e2e4".to_string(),
            "scripted".to_string(),
        )]));
        let selector = StyleSelector::new(overrides, sink.clone());

        let p = profile(&[("control_simplify", 5.0)], &[]);
        let candidates = vec![
            Candidate::new(1, "e2e4", 20.0).with_tags(["control_simplify"]),
            Candidate::new(2, "d2d4", 15.0),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let selection = selector.pick("start-fen", &candidates, &p, &mut rng).unwrap();
        assert_eq!(selection.candidate.tags, vec!["control_simplify", "scripted"]);

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fen, "start-fen");
        assert_eq!(records[0].picked.uci, "e2e4");
        assert_eq!(records[0].candidates.len(), 2);
        assert!(!records[0].make_error);
    }

    #[test]
    fn test_logging_failure_is_swallowed() {
        let selector = StyleSelector::new(Arc::new(NoOverride), Arc::new(FailingSink));
        let p = profile(&[], &[]);
        let candidates = vec![Candidate::new(1, "e2e4", 0.0)];
        let mut rng = StdRng::seed_from_u64(6);
        assert!(selector.pick("fen", &candidates, &p, &mut rng).is_ok());
    }
}
