//! Asset inventory context: fetching, caching, and prompt injection.
//!
//! Responses about infrastructure must be grounded in real inventory, but the
//! context block is only injected when a deterministic heuristic says the
//! request is actually about infrastructure, keeping prompts short.

mod heuristic;
mod provider;
mod types;

pub use heuristic::{extract_host_candidates, should_inject};
pub use provider::{AssetContextProvider, TargetContext, COMPACT_CONTEXT_MAX_LEN};
pub use types::Asset;
