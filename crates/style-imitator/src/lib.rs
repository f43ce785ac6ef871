//! Style-imitating UCI proxy
//!
//! Sits between a UCI client and a general-purpose engine, collects
//! multi-PV candidates under a fixed time budget, tags them, and returns the
//! move that best fits a target player's style profile.

pub mod bridge;
pub mod candidate;
pub mod config;
pub mod coordinator;
pub mod decision_log;
pub mod engine;
pub mod error;
pub mod position;
pub mod profile;
pub mod style;
pub mod tagger;
