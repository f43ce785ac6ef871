//! Candidate moves and search results exchanged between the engine, the
//! tagger, and the style selector.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Marker tag used when the tagger produced nothing for a candidate.
pub const TAGGER_EMPTY: &str = "_TAGGER_EMPTY";

/// One proposed move from a multi-PV search.
///
/// Field names on the wire follow the tagger payload format
/// (`multipv`, `uci`, `sf_eval`, `sf_pv`, `engine_meta`, `tags`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "multipv")]
    pub multipv_rank: u32,
    #[serde(rename = "uci")]
    pub move_uci: String,
    /// Centipawns, higher is better for the candidate
    #[serde(rename = "sf_eval", default)]
    pub eval_cp: f64,
    #[serde(rename = "sf_pv", with = "pv_string", default)]
    pub pv: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "engine_meta", default)]
    pub source_metadata: BTreeMap<String, String>,
    /// Set by the style selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_score: Option<f64>,
}

impl Candidate {
    pub fn new(multipv_rank: u32, move_uci: impl Into<String>, eval_cp: f64) -> Self {
        let move_uci = move_uci.into();
        Self {
            multipv_rank,
            pv: vec![move_uci.clone()],
            move_uci,
            eval_cp,
            tags: Vec::new(),
            source_metadata: BTreeMap::new(),
            style_score: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of one search, ready to be reported to the protocol client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub final_move: String,
    /// `-inf` when no style selection took place
    pub style_score: f64,
    pub tags: Vec<String>,
    pub engine_best_move: Option<String>,
    pub fallback_move: Option<String>,
    pub timing: SearchTiming,
}

/// Where the think-time budget went in one search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SearchTiming {
    pub engine_spent: Duration,
    pub tagger_spent: Duration,
    /// Budget left once the engine returned
    pub remaining: Duration,
    pub used_tagger: bool,
    /// Tagging took longer than `remaining`; reported, never enforced
    pub overran_budget: bool,
}

/// The principal variation travels as a single space-separated string.
mod pv_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(pv: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&pv.join(" "))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.split_whitespace().map(str::to_string).collect())
    }
}
