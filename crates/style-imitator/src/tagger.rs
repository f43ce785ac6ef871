//! Boundary to the external rule-based move tagger and the post-selection
//! forced-tag override.

use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::Candidate;
use crate::error::ImitatorError;

/// Attaches style tags to engine candidates.
///
/// Implementations must return one candidate per input candidate and must
/// not change moves or evaluations. Calls are blocking.
pub trait Tagger: Send + Sync {
    fn tag(&self, fen: &str, candidates: Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError>;
}

impl<F> Tagger for F
where
    F: Fn(&str, Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError> + Send + Sync,
{
    fn tag(&self, fen: &str, candidates: Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError> {
        self(fen, candidates)
    }
}

/// Leaves candidates as they are; used when no tagger is configured.
pub struct PassthroughTagger;

impl Tagger for PassthroughTagger {
    fn tag(&self, _fen: &str, candidates: Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError> {
        Ok(candidates)
    }
}

#[derive(Serialize)]
struct TagRequest<'a> {
    fen: &'a str,
    candidates: &'a [Candidate],
}

#[derive(Deserialize)]
struct TagResponse {
    candidates: Vec<Candidate>,
}

/// Runs an external command per search: the JSON payload
/// `{"fen", "candidates"}` goes to its stdin and the tagged payload is read
/// back from its stdout.
pub struct CommandTagger {
    program: String,
    args: Vec<String>,
}

impl CommandTagger {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command_line: &str) -> Result<Self, ImitatorError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ImitatorError::Config("tagger command is empty".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Tagger for CommandTagger {
    fn tag(&self, fen: &str, candidates: Vec<Candidate>) -> Result<Vec<Candidate>, ImitatorError> {
        let payload = serde_json::to_vec(&TagRequest {
            fen,
            candidates: &candidates,
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ImitatorError::Tagging(format!("Failed to spawn {}: {e}", self.program)))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| ImitatorError::Tagging("tagger stdin unavailable".into()))?;
            stdin
                .write_all(&payload)
                .map_err(|e| ImitatorError::Tagging(format!("Failed to write payload: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ImitatorError::Tagging(format!("Failed to read tagger output: {e}")))?;
        if !output.status.success() {
            return Err(ImitatorError::Tagging(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let response: TagResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| ImitatorError::Tagging(format!("Malformed tagger output: {e}")))?;
        debug!(tagged = response.candidates.len(), "Tagger finished");
        Ok(response.candidates)
    }
}

/// Replaces the picked candidate's tags after selection.
pub trait ForcedTagOverride: Send + Sync {
    /// New tags for `picked_move`, or `None` to keep the current ones.
    fn override_tags(&self, candidates: &[Candidate], picked_move: &str) -> Option<Vec<String>>;
}

pub struct NoOverride;

impl ForcedTagOverride for NoOverride {
    fn override_tags(&self, _candidates: &[Candidate], _picked_move: &str) -> Option<Vec<String>> {
        None
    }
}

/// Guarantees a diagnostic tag whenever a given move is returned.
pub struct ForcedMoveTags {
    rules: HashMap<String, String>,
}

impl ForcedMoveTags {
    pub fn new(rules: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ForcedTagOverride for ForcedMoveTags {
    fn override_tags(&self, candidates: &[Candidate], picked_move: &str) -> Option<Vec<String>> {
        let tag = self.rules.get(picked_move)?;
        let mut tags = candidates
            .iter()
            .find(|c| c.move_uci == picked_move)
            .map(|c| c.tags.clone())
            .unwrap_or_default();
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
        Some(tags)
    }
}
