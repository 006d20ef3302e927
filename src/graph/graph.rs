//! The live frame graph.
//!
//! Owns the named resource tables (samplers, render targets, surfaces,
//! scalar values), the ordered node list and the lazily built fullscreen
//! quad. Tables sit behind locks because nodes publish resources while
//! the graph is processing (the environment node writes its cubemaps
//! into the sampler table mid-frame); no lock is held across a recording
//! call.

use std::sync::{Arc, OnceLock};

use glam::Vec4;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::assets::AssetSource;
use crate::rhi::{Device, Mesh, RenderTarget, RhiResource, Surface, VertexLayout};

use super::node::FrameGraphNode;

/// Default chunking budgets; see the runtime. Chosen so that a typical
/// frame splits into a handful of submissions without starving the GPU.
pub const DEFAULT_MAX_GPU_COST: u32 = 4096;
pub const DEFAULT_MAX_RECORDED_COMMANDS: u32 = 512;

/// One slot of the ordered node list.
pub struct NodeSlot {
    pub(crate) node: Mutex<Box<dyn FrameGraphNode>>,
}

impl NodeSlot {
    /// Locks the node for inspection. Safe while another node is being
    /// processed: slots have independent locks.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, Box<dyn FrameGraphNode>> {
        self.node.lock()
    }
}

pub struct FrameGraph {
    device: Arc<Device>,
    assets: Arc<dyn AssetSource>,
    samplers: RwLock<FxHashMap<String, RhiResource>>,
    render_targets: RwLock<FxHashMap<String, Arc<RenderTarget>>>,
    surfaces: RwLock<FxHashMap<String, Arc<Surface>>>,
    values: RwLock<FxHashMap<String, Vec4>>,
    pub(crate) nodes: Vec<NodeSlot>,
    fullscreen_quad: OnceLock<Arc<Mesh>>,
    /// Chunking budget: accumulated GPU cost across both lists.
    pub max_gpu_cost: u32,
    /// Chunking budget: recorded command count across both lists.
    pub max_recorded_commands: u32,
}

impl FrameGraph {
    #[must_use]
    pub fn new(device: Arc<Device>, assets: Arc<dyn AssetSource>) -> Self {
        Self {
            device,
            assets,
            samplers: RwLock::new(FxHashMap::default()),
            render_targets: RwLock::new(FxHashMap::default()),
            surfaces: RwLock::new(FxHashMap::default()),
            values: RwLock::new(FxHashMap::default()),
            nodes: Vec::new(),
            fullscreen_quad: OnceLock::new(),
            max_gpu_cost: DEFAULT_MAX_GPU_COST,
            max_recorded_commands: DEFAULT_MAX_RECORDED_COMMANDS,
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn assets(&self) -> &Arc<dyn AssetSource> {
        &self.assets
    }

    // ── Resource tables ────────────────────────────────────────────────

    pub fn set_sampler(&self, name: &str, sampler: RhiResource) {
        self.samplers.write().insert(name.to_owned(), sampler);
    }

    #[must_use]
    pub fn get_sampler(&self, name: &str) -> Option<RhiResource> {
        self.samplers.read().get(name).cloned()
    }

    pub fn set_render_target(&self, name: &str, target: Arc<RenderTarget>) {
        self.render_targets.write().insert(name.to_owned(), target);
    }

    #[must_use]
    pub fn get_render_target(&self, name: &str) -> Option<Arc<RenderTarget>> {
        self.render_targets.read().get(name).cloned()
    }

    pub fn set_surface(&self, name: &str, surface: Arc<Surface>) {
        self.surfaces.write().insert(name.to_owned(), surface);
    }

    #[must_use]
    pub fn get_surface(&self, name: &str) -> Option<Arc<Surface>> {
        self.surfaces.read().get(name).cloned()
    }

    /// Scalars splat across all four lanes.
    pub fn set_value_scalar(&self, name: &str, value: f32) {
        self.set_value(name, Vec4::splat(value));
    }

    pub fn set_value(&self, name: &str, value: Vec4) {
        self.values.write().insert(name.to_owned(), value);
    }

    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<Vec4> {
        self.values.read().get(name).copied()
    }

    // ── Node list ──────────────────────────────────────────────────────

    pub(crate) fn push_node(&mut self, node: Box<dyn FrameGraphNode>) {
        self.nodes.push(NodeSlot {
            node: Mutex::new(node),
        });
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Linear search for the first node whose tag matches.
    ///
    /// Used rarely at process time to read a sibling's parameters; slots
    /// currently locked (the caller's own) are skipped.
    #[must_use]
    pub fn find_node(&self, tag: &str) -> Option<&NodeSlot> {
        self.nodes.iter().find(|slot| {
            slot.node
                .try_lock()
                .is_some_and(|node| node.params().tag() == Some(tag))
        })
    }

    /// Lazily builds the NDC quad used by fullscreen passes: four
    /// vertices spanning clip space, indices `0 1 2, 2 1 3`.
    #[must_use]
    pub fn fullscreen_quad(&self) -> Arc<Mesh> {
        self.fullscreen_quad
            .get_or_init(|| {
                #[repr(C)]
                #[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
                struct QuadVertex {
                    position: [f32; 3],
                    normal: [f32; 3],
                    texcoord: [f32; 2],
                    color: [f32; 4],
                }

                let mut vertices = [QuadVertex::default(); 4];
                vertices[0].position = [-1.0, -1.0, 0.0];
                vertices[1].position = [1.0, -1.0, 0.0];
                vertices[2].position = [-1.0, 1.0, 0.0];
                vertices[3].position = [1.0, 1.0, 0.0];
                vertices[0].texcoord = [0.0, 0.0];
                vertices[1].texcoord = [1.0, 0.0];
                vertices[2].texcoord = [0.0, 1.0];
                vertices[3].texcoord = [1.0, 1.0];
                let indices: [u32; 6] = [0, 1, 2, 2, 1, 3];

                self.device.create_mesh_with_data(
                    VertexLayout::P3N3UV2C4,
                    bytemuck::cast_slice(&vertices),
                    bytemuck::cast_slice(&indices),
                )
            })
            .clone()
    }

    /// Releases node caches and drops every table. The graph is unusable
    /// afterwards; resources die with their last strong reference.
    pub fn clear(&mut self) {
        for slot in &self.nodes {
            slot.node.lock().clear();
        }
        self.nodes.clear();
        self.samplers.write().clear();
        self.render_targets.write().clear();
        self.surfaces.write().clear();
        self.values.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::NullAssetSource;
    use crate::rhi::DeviceDesc;

    fn empty_graph() -> FrameGraph {
        FrameGraph::new(
            Arc::new(Device::new(DeviceDesc::default())),
            Arc::new(NullAssetSource),
        )
    }

    #[test]
    fn value_table_splats_scalars() {
        let graph = empty_graph();
        graph.set_value_scalar("exposure", 1.5);
        assert_eq!(graph.get_value("exposure"), Some(Vec4::splat(1.5)));
        assert_eq!(graph.get_value("missing"), None);
    }

    #[test]
    fn fullscreen_quad_is_built_once() {
        let graph = empty_graph();
        let first = graph.fullscreen_quad();
        let second = graph.fullscreen_quad();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.index_count(), 6);
    }

    #[test]
    fn absent_lookups_return_none() {
        let graph = empty_graph();
        assert!(graph.get_sampler("g_envCubemap").is_none());
        assert!(graph.get_render_target("BackBuffer").is_none());
        assert!(graph.get_surface("BackBuffer").is_none());
    }
}
