//! Depth-only pre-pass.
//!
//! Renders every proxy matching the node's `Tag` with a generated
//! depth-only material (one per unique vertex layout, cached behind a
//! per-key critical section), packing per-instance rows into a shared
//! SSBO and emitting one indirect draw per batch. Proxies whose material
//! requests a custom depth shader are skipped for now.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};
use log::warn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams, PrepareTask};
use crate::rhi::{
    Buffer, CommandList, Device, DrawCalls, Material, MeshProxy, PrimitiveTopology, RenderState,
    SceneViewSnapshot, ShaderBindingSet, SortingOrder, record_draw_calls, tag_hash,
};

const DEPTH_ONLY_SHADER: &str = "Shaders/DepthOnly.shader";

/// GPU layout of one prepass instance row.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DepthInstanceData {
    pub model: Mat4,
    pub sphere_bounds: Vec4,
    pub material_instance: u32,
    pub is_culled: u32,
    pub _padding: [u32; 2],
}

type DepthMaterialCache = Mutex<FxHashMap<u32, Arc<Material>>>;

struct PreparedDraws {
    draw_calls: DrawCalls<DepthInstanceData>,
    num_meshes: u32,
}

#[derive(Default)]
pub struct DepthPrepassNode {
    params: NodeParams,
    depth_only_materials: Arc<DepthMaterialCache>,
    per_instance_data: Option<Arc<ShaderBindingSet>>,
    per_instance_capacity: u64,
    indirect_buffer: Option<Arc<Buffer>>,
    prepared: Arc<Mutex<Option<PreparedDraws>>>,
}

impl DepthPrepassNode {
    pub const NAME: &'static str = "DepthPrepass";

    #[must_use]
    pub fn sorting_order(&self) -> SortingOrder {
        SortingOrder::parse(self.params.string("Sorting"))
    }

    /// Get-or-create the depth-only material for a vertex layout. The
    /// lock is held only for the critical section, never across
    /// recording.
    fn get_or_add_depth_material(
        cache: &DepthMaterialCache,
        device: &Device,
        layout: crate::rhi::VertexLayout,
    ) -> Arc<Material> {
        let mut materials = cache.lock();
        materials
            .entry(layout.attribute_bits)
            .or_insert_with(|| {
                let shader = device.load_shader(DEPTH_ONLY_SHADER, "");
                let mut state = RenderState::new(true, true, tag_hash("DepthOnly"));
                state.support_multisampling = true;
                device.create_material(
                    layout,
                    PrimitiveTopology::TriangleList,
                    state,
                    shader,
                    None,
                )
            })
            .clone()
    }

    fn build_draw_calls(
        cache: &DepthMaterialCache,
        device: &Device,
        proxies: &[MeshProxy],
        tag: u64,
    ) -> PreparedDraws {
        let mut draw_calls = DrawCalls::default();
        let mut num_meshes = 0u32;

        for proxy in proxies {
            for (i, mesh) in proxy.meshes.iter().enumerate() {
                if proxy.materials.len() <= i {
                    break;
                }
                let scene_material = &proxy.materials[i];

                // Custom depth shaders are not supported yet; those
                // proxies fall through to the main pass only.
                if scene_material.render_state.custom_depth_shader {
                    continue;
                }

                let depth_material =
                    Self::get_or_add_depth_material(cache, device, mesh.vertex_layout);
                if !depth_material.is_depth_ready() {
                    continue;
                }

                if scene_material.render_state.tag != tag {
                    continue;
                }

                draw_calls.insert(
                    &depth_material,
                    mesh,
                    DepthInstanceData {
                        model: proxy.world_matrix,
                        sphere_bounds: proxy.sphere_bounds,
                        material_instance: 0,
                        is_culled: 0,
                        _padding: [0; 2],
                    },
                );
                num_meshes += 1;
            }
        }

        PreparedDraws {
            draw_calls,
            num_meshes,
        }
    }
}

impl FrameGraphNode for DepthPrepassNode {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    /// Batch building is CPU-only and can run on the worker pool before
    /// recording starts.
    fn prepare(
        &mut self,
        graph: &FrameGraph,
        snapshot: &SceneViewSnapshot,
    ) -> Option<PrepareTask> {
        let cache = self.depth_only_materials.clone();
        let device = graph.device().clone();
        let proxies = snapshot.proxies.clone();
        let tag = tag_hash(self.params.string("Tag"));
        let prepared = self.prepared.clone();

        Some(Box::new(move || {
            let draws = Self::build_draw_calls(&cache, &device, &proxies, tag);
            *prepared.lock() = Some(draws);
        }))
    }

    fn process(
        &mut self,
        graph: &FrameGraph,
        transfer: &mut CommandList,
        graphics: &mut CommandList,
        snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();

        let prepared = self.prepared.lock().take().unwrap_or_else(|| {
            Self::build_draw_calls(
                &self.depth_only_materials,
                device,
                &snapshot.proxies,
                tag_hash(self.params.string("Tag")),
            )
        });

        if prepared.num_meshes == 0 {
            return;
        }
        let draw_calls = prepared.draw_calls;

        let row_size = std::mem::size_of::<DepthInstanceData>() as u64;
        let needed = row_size * u64::from(prepared.num_meshes);
        if self
            .per_instance_data
            .as_ref()
            .is_none_or(|_| self.per_instance_capacity < needed)
        {
            let set = device.create_shader_bindings();
            device.add_ssbo_binding(&set, "data", 0, row_size, u64::from(prepared.num_meshes));
            self.per_instance_data = Some(set);
            self.per_instance_capacity = needed;
        }
        let per_instance_data = self.per_instance_data.clone().expect("per-instance set");
        let storage_binding = per_instance_data
            .find("data")
            .expect("per-instance storage binding");

        let (storage_index, rows) =
            draw_calls.pack_instances(storage_binding.storage_instance_index());
        if !rows.is_empty() {
            transfer.update_shader_binding(&storage_binding, 0, bytemuck::cast_slice(&rows));
        }

        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            warn!("DepthPrepass: no depth attachment and no DepthBuffer");
            return;
        };

        graphics.begin_render_pass(
            &[],
            Some(depth.clone()),
            super::full_area(&depth),
            Some(Vec4::ZERO),
            true,
            true,
        );

        let frame_bindings = snapshot.frame_bindings.clone();
        record_draw_calls(
            0,
            draw_calls.num_batches(),
            &draw_calls,
            graphics,
            device,
            |_material| frame_bindings.iter().cloned().chain([per_instance_data.clone()]).collect(),
            &storage_index,
            &mut self.indirect_buffer,
            super::full_area(&depth),
            (
                Vec2::ZERO,
                Vec2::new(depth.extent.x as f32, depth.extent.y as f32),
            ),
        );

        graphics.end_render_pass();
    }

    fn clear(&mut self) {
        self.per_instance_data = None;
        self.per_instance_capacity = 0;
        self.indirect_buffer = None;
        self.prepared.lock().take();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
