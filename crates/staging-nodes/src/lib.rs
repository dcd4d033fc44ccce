//! Staging Nodes
//!
//! Built-in node kinds for the staging engine. Each kind only describes
//! itself (pins, param schema, categories); processing happens in the live
//! runtime, never here.
//!
//! Every descriptor is submitted with `inventory`, so linking this crate is
//! enough for `NodeCatalog::with_builtins()` to see it. Hosts that also load
//! plugin kinds use [`build_catalog`].
//!
//! # Categories
//!
//! - **Plumbing** (`core::*`): Generic plumbing (readers, writers, pacing, sinks)
//! - **Audio**: Raw audio processing and Opus codecs
//! - **Containers**: Ogg muxing and demuxing
//! - **Transport**: Network peers

pub mod audio;
pub mod containers;
pub mod plumbing;
pub mod setup;
pub mod transport;

pub use audio::*;
pub use containers::*;
pub use plumbing::*;
pub use setup::{build_catalog, plugin_definition};
pub use transport::*;

#[cfg(test)]
mod tests {
    use staging_engine::NodeCatalog;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let catalog = NodeCatalog::with_builtins();
        assert_eq!(catalog.len(), 13, "Expected 13 built-in node kinds");

        // Spot-check known kinds
        assert!(catalog.has_kind("core::passthrough"));
        assert!(catalog.has_kind("audio::gain"));
        assert!(catalog.has_kind("audio::mixer"));
        assert!(catalog.has_kind("audio::opus::encoder"));
        assert!(catalog.has_kind("containers::ogg::demuxer"));
        assert!(catalog.has_kind("transport::moq::peer"));
    }

    #[test]
    fn test_every_kind_has_a_category() {
        let catalog = NodeCatalog::with_builtins();
        for definition in catalog.definitions() {
            assert!(
                !definition.categories.is_empty(),
                "{} has no category",
                definition.kind
            );
            assert!(!definition.description.is_empty(), "{} has no description", definition.kind);
        }
    }
}
