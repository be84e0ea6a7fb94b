//! Tool catalog: profiles, the dual-backend loader, and the lookup index.
//!
//! Profiles are loaded once at startup and indexed three ways (by name, by
//! capability, by intent). The index is immutable after load; a reload builds
//! a replacement and swaps it atomically so in-flight requests keep a
//! consistent view.

mod index;
mod loader;
mod profile;

#[cfg(test)]
pub(crate) use profile::test_profiles;

pub use index::{CatalogDistribution, CatalogIndex, ToolCatalog};
pub use loader::ProfileLoader;
pub use profile::{
    Capability, FeatureVector, IntentTag, InvocationPattern, ToolInput, ToolProfile,
};
