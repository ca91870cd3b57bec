//! Core search data structures.
//!
//! This module contains the fundamental building blocks:
//! - Vocabulary for id <-> string translation
//! - Hypothesis and HypothesisArena for partial sequences
//! - Beam for bounded, score-ordered hypothesis sets

pub mod beam;
pub mod hypothesis;
pub mod vocab;

pub use beam::Beam;
pub use hypothesis::{Hypothesis, HypothesisArena, NodeId};
pub use vocab::{TokenId, Vocabulary};
