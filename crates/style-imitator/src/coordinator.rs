//! One bounded, style-aware search.
//!
//! The coordinator drives the engine for a fixed slice of the think-time
//! budget, collects multi-PV candidates, has them tagged, and lets the style
//! selector choose. Every recoverable failure degrades to the engine's own
//! best move; only engine I/O errors, a missing profile, and an empty
//! candidate set are reported as failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::candidate::{Candidate, SearchResult, SearchTiming, TAGGER_EMPTY};
use crate::config::SearchBudget;
use crate::engine::{parse_bestmove, parse_info, EngineProcess};
use crate::error::ImitatorError;
use crate::position::{opening_move, InitialPosition};
use crate::profile::ProfileCache;
use crate::style::StyleSelector;
use crate::tagger::Tagger;

/// Everything a search needs, built once at startup and shared.
pub struct SearchServices {
    pub engine: Arc<EngineProcess>,
    pub tagger: Arc<dyn Tagger>,
    pub profiles: Arc<ProfileCache>,
    pub selector: StyleSelector,
    pub budget: SearchBudget,
    pub opening_override: bool,
    pub rng: Mutex<StdRng>,
}

/// Parameters of one search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub id: u64,
    pub position_fen: String,
    pub initial_position: InitialPosition,
    pub style_profile_name: String,
    pub multipv_limit: u32,
    pub cancel: CancellationToken,
}

/// A search that could not produce a style-aware result.
#[derive(Debug)]
pub struct SearchFailure {
    pub error: ImitatorError,
    pub engine_best_move: Option<String>,
}

/// Posted once per search on the result channel.
#[derive(Debug)]
pub struct SearchOutcome {
    pub id: u64,
    pub result: Result<SearchResult, SearchFailure>,
}

/// Candidates gathered from one engine search.
#[derive(Debug, Default)]
pub struct Collected {
    pub best_move: Option<String>,
    pub candidates: Vec<Candidate>,
    pub stop_sent: bool,
}

/// Read engine output until `bestmove` or end of stream.
///
/// Keeps the latest info line per multi-PV rank, drops ranks above
/// `multipv_limit`, and sends `stop` once if `cancel` fires mid-read.
pub async fn collect_candidates(
    engine: &EngineProcess,
    multipv_limit: u32,
    cancel: &CancellationToken,
) -> Result<Collected, ImitatorError> {
    let mut seen: BTreeMap<u32, Candidate> = BTreeMap::new();
    let mut collected = Collected::default();

    while let Some(line) = engine.read_line().await? {
        let line = line.trim();
        if line.starts_with("info") {
            if let Some(info) = parse_info(line) {
                if info.multipv <= multipv_limit && !info.pv.is_empty() {
                    let mut candidate = Candidate::new(
                        info.multipv,
                        info.pv[0].clone(),
                        info.score.map(|s| s.to_cp()).unwrap_or(0.0),
                    );
                    candidate.pv = info.pv;
                    candidate
                        .source_metadata
                        .insert("engine_path".into(), engine.label().to_string());
                    seen.insert(info.multipv, candidate);
                }
            }
        } else if let Some(best) = parse_bestmove(line) {
            collected.best_move = best.filter(|m| m != "(none)" && m != "0000");
            break;
        }

        if cancel.is_cancelled() && !collected.stop_sent {
            engine.stop().await?;
            collected.stop_sent = true;
        }
    }

    collected.candidates = seen.into_values().collect();
    if collected.candidates.is_empty() {
        if let Some(best) = &collected.best_move {
            let mut candidate = Candidate::new(1, best.clone(), 0.0);
            candidate
                .source_metadata
                .insert("engine_path".into(), engine.label().to_string());
            collected.candidates.push(candidate);
        }
    }
    Ok(collected)
}

/// Fold tagger output back into the collected candidates.
///
/// Moves and evaluations must come back unchanged; empty tag lists become
/// the `_TAGGER_EMPTY` marker.
fn merge_tags(original: &[Candidate], tagged: Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError> {
    if tagged.len() != original.len() {
        return Err(ImitatorError::Tagging(format!(
            "expected {} tagged candidates, got {}",
            original.len(),
            tagged.len()
        )));
    }
    original
        .iter()
        .zip(tagged)
        .map(|(orig, tagged)| {
            if tagged.move_uci != orig.move_uci || tagged.eval_cp != orig.eval_cp {
                return Err(ImitatorError::Tagging(format!(
                    "tagger changed candidate {} ({}) to {} ({})",
                    orig.move_uci, orig.eval_cp, tagged.move_uci, tagged.eval_cp
                )));
            }
            let tags = if tagged.tags.is_empty() {
                vec![TAGGER_EMPTY.to_string()]
            } else {
                tagged.tags
            };
            Ok(Candidate {
                tags,
                ..orig.clone()
            })
        })
        .collect()
}

/// Runs exactly one search.
pub struct SearchCoordinator {
    services: Arc<SearchServices>,
    request: SearchRequest,
    /// Engine best move, kept where `spawn` can still see it if `run` panics
    engine_best: Arc<Mutex<Option<String>>>,
}

impl SearchCoordinator {
    pub fn new(services: Arc<SearchServices>, request: SearchRequest) -> Self {
        Self {
            services,
            request,
            engine_best: Arc::new(Mutex::new(None)),
        }
    }

    /// Run on a background task and post the outcome to `results`.
    ///
    /// Exactly one outcome is posted per search, even if the search panics.
    pub fn spawn(self, results: mpsc::UnboundedSender<SearchOutcome>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let id = self.request.id;
            let engine_best = Arc::clone(&self.engine_best);
            let result = match tokio::spawn(self.run()).await {
                Ok(result) => result,
                Err(e) => {
                    error!(search_id = id, error = %e, "Search task failed");
                    Err(SearchFailure {
                        error: ImitatorError::SearchAborted(e.to_string()),
                        engine_best_move: engine_best.lock().clone(),
                    })
                }
            };
            if results.send(SearchOutcome { id, result }).is_err() {
                warn!(search_id = id, "Search result dropped, bridge is gone");
            }
        })
    }

    pub async fn run(self) -> Result<SearchResult, SearchFailure> {
        let services = &self.services;
        let request = &self.request;

        if services.opening_override {
            if let Some(mv) = opening_move(&request.position_fen, &request.initial_position) {
                info!(search_id = request.id, opening = mv, "Opening move forced");
                return Ok(SearchResult {
                    final_move: mv.to_string(),
                    style_score: f64::NEG_INFINITY,
                    tags: Vec::new(),
                    engine_best_move: Some(mv.to_string()),
                    fallback_move: Some(mv.to_string()),
                    timing: SearchTiming::default(),
                });
            }
        }

        let budget = services.budget;
        let start = Instant::now();
        let collected = self.search_engine().await.map_err(|error| SearchFailure {
            error,
            engine_best_move: None,
        })?;
        let engine_spent = start.elapsed();
        let remaining = budget.total.saturating_sub(engine_spent);
        let engine_best_move = collected.best_move.clone();
        self.engine_best.lock().clone_from(&engine_best_move);

        if collected.candidates.is_empty() {
            error!(search_id = request.id, "Engine produced no candidates");
            return Err(SearchFailure {
                error: ImitatorError::CollectionFailure,
                engine_best_move,
            });
        }

        let tag_start = Instant::now();
        let tagged = self.tag(&collected.candidates).await;
        let tagger_spent = tag_start.elapsed();
        let used_tagger = tagged.is_ok();

        let selected = match tagged {
            Ok(candidates) => {
                let profile = services
                    .profiles
                    .get(&request.style_profile_name)
                    .map_err(|error| SearchFailure {
                        error,
                        engine_best_move: engine_best_move.clone(),
                    })?;
                let mut rng = services.rng.lock();
                let selection = services
                    .selector
                    .pick(&request.position_fen, &candidates, &profile, &mut *rng)
                    .map_err(|error| SearchFailure {
                        error,
                        engine_best_move: engine_best_move.clone(),
                    })?;
                Some(selection.candidate)
            }
            Err(e) => {
                warn!(
                    search_id = request.id,
                    error = %e,
                    "Tagging failed; falling back to engine best move"
                );
                None
            }
        };

        let timing = SearchTiming {
            engine_spent,
            tagger_spent,
            remaining,
            used_tagger,
            overran_budget: used_tagger && tagger_spent > remaining,
        };
        if timing.overran_budget {
            warn!(
                search_id = request.id,
                tagger_spent = format_secs(tagger_spent),
                remaining = format_secs(remaining),
                "Tagging exceeded remaining budget"
            );
        }
        info!(
            search_id = request.id,
            sf_time = format_secs(budget.engine_slice()),
            spent = format_secs(engine_spent),
            remain = format_secs(remaining),
            used_tagger,
            tagger_spent = format_secs(tagger_spent),
            "Search timing"
        );

        let result = match selected {
            Some(candidate) => SearchResult {
                final_move: candidate.move_uci,
                style_score: candidate.style_score.unwrap_or(f64::NEG_INFINITY),
                tags: candidate.tags,
                engine_best_move: engine_best_move.clone(),
                fallback_move: engine_best_move,
                timing,
            },
            None => SearchResult {
                final_move: engine_best_move
                    .clone()
                    .unwrap_or_else(|| collected.candidates[0].move_uci.clone()),
                style_score: f64::NEG_INFINITY,
                tags: Vec::new(),
                engine_best_move: engine_best_move.clone(),
                fallback_move: engine_best_move,
                timing,
            },
        };
        Ok(result)
    }

    /// Issue the time-bounded search and collect its candidates.
    async fn search_engine(&self) -> Result<Collected, ImitatorError> {
        let engine = &self.services.engine;
        let movetime = self.services.budget.movetime_ms();
        engine
            .send(&format!(
                "setoption name MultiPV value {}",
                self.request.multipv_limit
            ))
            .await?;
        engine.send(&format!("go movetime {movetime}")).await?;
        collect_candidates(engine, self.request.multipv_limit, &self.request.cancel).await
    }

    /// Call the blocking tagger off the async runtime.
    async fn tag(&self, candidates: &[Candidate]) -> Result<Vec<Candidate>, ImitatorError> {
        let tagger = Arc::clone(&self.services.tagger);
        let fen = self.request.position_fen.clone();
        let input = candidates.to_vec();
        let tagged = tokio::task::spawn_blocking(move || tagger.tag(&fen, input))
            .await
            .map_err(|e| ImitatorError::Tagging(format!("tagger task failed: {e}")))??;
        merge_tags(candidates, tagged)
    }
}

fn format_secs(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}
