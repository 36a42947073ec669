//! # Grindstone States
//!
//! The directed graph of recognition states and transition actions per
//! application, plus the recognizer that matches captures against it.
//! The graph is pure data: built once from the store at startup, read-only
//! afterwards, safe for unsynchronized concurrent reads.

pub mod graph;
pub mod recognizer;

pub use graph::{PathResult, StateGraph};
pub use recognizer::{StateRecognizer, STATE_KIND};
