//! stylelens - active learning for code authorship style
//!
//! Scores code blocks by how closely they match a user-labeled style,
//! using a weighted SVM with a tree-ensemble and neural-network committee
//! whose disagreement points at the most informative blocks to label next.
//! Before any labels exist, a Kennard-Stone sampler suggests a spread-out
//! starting set.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod models;
pub mod service;
pub mod store;
