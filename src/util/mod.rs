//! Small self-contained utilities shared across the engine.

pub mod arena;
pub mod det_rng;

pub use arena::{Arena, ArenaKey};
pub use det_rng::DetRng;
