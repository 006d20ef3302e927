//! Asset access seam.
//!
//! The asset registry, texture importer and shader compiler are external
//! collaborators; the frame graph reaches them through [`AssetSource`].
//! The builder resolves sampler declarations through it and the sky /
//! particles nodes pull their companion files (star catalogue, colour
//! table, particle data) the same way.

use std::sync::Arc;

use crate::rhi::{Device, Texture};

/// Read-only access to content the graph references by path or uid.
pub trait AssetSource: Send + Sync {
    /// Loads a texture by asset uid if given, otherwise by path lookup.
    fn load_texture(&self, device: &Device, path: &str, uid: Option<&str>) -> Option<Arc<Texture>>;

    /// Reads a text companion file (e.g. `StarsColor.yaml`).
    fn read_text(&self, path: &str) -> Option<String>;

    /// Reads a binary companion file (e.g. the `BSC5` star catalogue).
    fn read_bytes(&self, path: &str) -> Option<Vec<u8>>;
}

/// Source with no content; every lookup misses and the requesting node
/// applies its absent-resource policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAssetSource;

impl AssetSource for NullAssetSource {
    fn load_texture(&self, _: &Device, _: &str, _: Option<&str>) -> Option<Arc<Texture>> {
        None
    }

    fn read_text(&self, _: &str) -> Option<String> {
        None
    }

    fn read_bytes(&self, _: &str) -> Option<Vec<u8>> {
        None
    }
}
