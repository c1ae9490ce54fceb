//! Geographic adjacency and domain selection

pub mod adjacency;
pub mod domain;

pub use adjacency::{AdjacencyFile, AdjacencyGraph, AsymmetricEdge};
pub use domain::Domain;
