//! Shader binding sets.
//!
//! A [`ShaderBindingSet`] is a named collection of descriptor-slot
//! bindings: uniform buffers, storage buffers, combined image samplers,
//! sampler arrays and storage images. Sets are patched mid-frame (the
//! light-culling node injects its SSBOs into the scene's lights set, the
//! runtime swaps environment samplers), so the binding table lives behind
//! a lock and the compatibility hash is recomputed on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::resources::{Buffer, Texture, next_resource_id};
use super::types::ResourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    StorageImage,
}

/// One descriptor-slot binding inside a set.
#[derive(Debug)]
pub struct ShaderBinding {
    name: String,
    slot: u32,
    kind: BindingKind,
    storage: RwLock<BindingStorage>,
}

#[derive(Debug, Default)]
struct BindingStorage {
    buffer: Option<Arc<Buffer>>,
    texture: Option<Arc<Texture>>,
    textures: Vec<Arc<Texture>>,
    /// Base row of this binding's slice inside a shared storage arena.
    storage_base_index: u32,
}

impl ShaderBinding {
    fn new(name: &str, slot: u32, kind: BindingKind) -> Self {
        Self {
            name: name.to_owned(),
            slot,
            kind,
            storage: RwLock::new(BindingStorage::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn slot(&self) -> u32 {
        self.slot
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    #[must_use]
    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        self.storage.read().buffer.clone()
    }

    #[must_use]
    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.storage.read().texture.clone()
    }

    #[must_use]
    pub fn textures(&self) -> Vec<Arc<Texture>> {
        self.storage.read().textures.clone()
    }

    /// Whether a resource has been attached yet.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        let storage = self.storage.read();
        storage.buffer.is_some() || storage.texture.is_some() || !storage.textures.is_empty()
    }

    /// First instance row of this binding's slice in the backing SSBO.
    #[must_use]
    pub fn storage_instance_index(&self) -> u32 {
        self.storage.read().storage_base_index
    }

    #[must_use]
    pub fn buffer_offset(&self) -> u64 {
        self.storage.read().buffer.as_ref().map_or(0, |b| b.offset())
    }

    pub fn set_buffer(&self, buffer: Arc<Buffer>) {
        self.storage.write().buffer = Some(buffer);
    }

    pub fn set_texture(&self, texture: Arc<Texture>) {
        self.storage.write().texture = Some(texture);
    }

    pub fn set_textures(&self, textures: Vec<Arc<Texture>>) {
        self.storage.write().textures = textures;
    }

    fn identity(&self) -> (u32, BindingKind, ResourceId) {
        let storage = self.storage.read();
        let resource = storage
            .buffer
            .as_ref()
            .map(|b| b.id())
            .or_else(|| storage.texture.as_ref().map(|t| t.id()))
            .or_else(|| storage.textures.first().map(|t| t.id()))
            .unwrap_or(0);
        (self.slot, self.kind, resource)
    }
}

/// A descriptor collection bound as one unit.
///
/// Two sets with equal compatibility hashes can share a pipeline layout;
/// the hash covers slots, kinds and bound resource identities and must be
/// recomputed after patching (`recalculate_compatibility`).
#[derive(Debug)]
pub struct ShaderBindingSet {
    id: ResourceId,
    bindings: RwLock<Vec<Arc<ShaderBinding>>>,
    compatibility: AtomicU64,
}

impl Default for ShaderBindingSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderBindingSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_resource_id(),
            bindings: RwLock::new(Vec::new()),
            compatibility: AtomicU64::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<ShaderBinding>> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    #[must_use]
    pub fn bindings(&self) -> Vec<Arc<ShaderBinding>> {
        self.bindings.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Finds `name` or creates an unbound binding for it.
    pub fn get_or_add(&self, name: &str, slot: u32, kind: BindingKind) -> Arc<ShaderBinding> {
        if let Some(existing) = self.find(name) {
            return existing;
        }
        let binding = Arc::new(ShaderBinding::new(name, slot, kind));
        self.bindings.write().push(binding.clone());
        self.recalculate_compatibility();
        binding
    }

    /// Attaches a buffer-backed binding, replacing any previous slot
    /// occupant of the same name.
    pub fn add_buffer(
        &self,
        name: &str,
        slot: u32,
        kind: BindingKind,
        buffer: Arc<Buffer>,
    ) -> Arc<ShaderBinding> {
        let binding = self.get_or_add(name, slot, kind);
        binding.set_buffer(buffer);
        self.recalculate_compatibility();
        binding
    }

    pub fn add_sampler(&self, name: &str, slot: u32, texture: Arc<Texture>) -> Arc<ShaderBinding> {
        let binding = self.get_or_add(name, slot, BindingKind::CombinedImageSampler);
        binding.set_texture(texture);
        self.recalculate_compatibility();
        binding
    }

    pub fn add_sampler_array(
        &self,
        name: &str,
        slot: u32,
        textures: Vec<Arc<Texture>>,
    ) -> Arc<ShaderBinding> {
        let binding = self.get_or_add(name, slot, BindingKind::CombinedImageSampler);
        binding.set_textures(textures);
        self.recalculate_compatibility();
        binding
    }

    pub fn add_storage_image(
        &self,
        name: &str,
        slot: u32,
        texture: Arc<Texture>,
    ) -> Arc<ShaderBinding> {
        let binding = self.get_or_add(name, slot, BindingKind::StorageImage);
        binding.set_texture(texture);
        self.recalculate_compatibility();
        binding
    }

    /// Adopts a binding created on another set (light culling shares its
    /// culled-lights SSBO with the scene's lights set this way).
    pub fn adopt(&self, binding: &Arc<ShaderBinding>, name: &str, slot: u32) {
        let adopted = self.get_or_add(name, slot, binding.kind());
        if let Some(buffer) = binding.buffer() {
            adopted.set_buffer(buffer);
        }
        if let Some(texture) = binding.texture() {
            adopted.set_texture(texture);
        }
        self.recalculate_compatibility();
    }

    #[inline]
    #[must_use]
    pub fn compatibility_hash(&self) -> u64 {
        self.compatibility.load(Ordering::Acquire)
    }

    /// Rehashes slots, kinds and resource identities. Must be called after
    /// patching bindings in place.
    pub fn recalculate_compatibility(&self) {
        let mut payload = Vec::new();
        for binding in self.bindings.read().iter() {
            let (slot, kind, resource) = binding.identity();
            payload.extend_from_slice(&slot.to_le_bytes());
            payload.push(match kind {
                BindingKind::UniformBuffer => 0,
                BindingKind::StorageBuffer => 1,
                BindingKind::CombinedImageSampler => 2,
                BindingKind::StorageImage => 3,
            });
            payload.extend_from_slice(&resource.to_le_bytes());
        }
        self.compatibility
            .store(xxhash_rust::xxh3::xxh3_64(&payload), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::types::{BufferUsage, MemoryProperty};

    fn storage_buffer(size: u64) -> Arc<Buffer> {
        Arc::new(Buffer::new(
            size,
            BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        ))
    }

    #[test]
    fn compatibility_changes_when_a_binding_is_patched() {
        let set = ShaderBindingSet::new();
        set.add_buffer("data", 0, BindingKind::StorageBuffer, storage_buffer(64));
        let before = set.compatibility_hash();

        set.add_buffer("data", 0, BindingKind::StorageBuffer, storage_buffer(64));
        assert_ne!(before, set.compatibility_hash());
    }

    #[test]
    fn get_or_add_is_idempotent() {
        let set = ShaderBindingSet::new();
        let a = set.get_or_add("frameData", 0, BindingKind::UniformBuffer);
        let b = set.get_or_add("frameData", 0, BindingKind::UniformBuffer);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn adopt_shares_the_backing_buffer() {
        let owner = ShaderBindingSet::new();
        let buffer = storage_buffer(256);
        let original = owner.add_buffer("culledLights", 0, BindingKind::StorageBuffer, buffer.clone());

        let lights = ShaderBindingSet::new();
        lights.adopt(&original, "culledLights", 1);
        let adopted = lights.find("culledLights").unwrap();
        assert_eq!(adopted.buffer().unwrap().id(), buffer.id());
        assert_eq!(adopted.slot(), 1);
    }
}
