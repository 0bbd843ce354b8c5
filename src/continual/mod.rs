//! Continual learning components.
//!
//! This module provides the pieces that fight catastrophic forgetting:
//! - Episodic memory with exemplar selection
//! - Fisher importance for parameter anchoring
//! - A relation co-occurrence graph for candidate resampling
//! - Strategies combining them into one per-task protocol

pub mod clustering;
pub mod fisher;
pub mod graph;
pub mod memory;
pub mod state;
pub mod strategy;
