//! Cascaded shadow-map pre-pass.
//!
//! Consumes the [`ShadowMapRequest`] list assembled by the lighting
//! system: one request per cascade, in ascending cascade order, each
//! carrying the mesh list the cascade actually needs (geometry covered by
//! a smaller cascade was subtracted at assembly time). Every request gets
//! its own depth-only render pass on its cascade target, drawn through
//! the shared indirect recorder.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    Buffer, CommandList, Device, DrawCalls, Material, PrimitiveTopology, RenderState,
    SceneViewSnapshot, ShaderBindingSet, record_draw_calls, tag_hash,
};

const SHADOW_SHADER: &str = "Shaders/DepthOnly.shader";
const REGION_COLOR: Vec4 = Vec4::new(0.6, 0.9, 0.6, 0.1);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ShadowInstanceData {
    pub model: Mat4,
}

#[derive(Default)]
pub struct ShadowPrepassNode {
    params: NodeParams,
    shadow_materials: Mutex<FxHashMap<u32, Arc<Material>>>,
    per_instance_data: Option<Arc<ShaderBindingSet>>,
    per_instance_capacity: u64,
    indirect_buffers: Vec<Option<Arc<Buffer>>>,
}

impl ShadowPrepassNode {
    pub const NAME: &'static str = "ShadowPrepass";

    fn get_or_add_shadow_material(
        &self,
        device: &Device,
        layout: crate::rhi::VertexLayout,
    ) -> Arc<Material> {
        let mut materials = self.shadow_materials.lock();
        materials
            .entry(layout.attribute_bits)
            .or_insert_with(|| {
                let shader = device.load_shader(SHADOW_SHADER, "");
                let state = RenderState::new(true, true, tag_hash("DepthOnly"));
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
}

impl FrameGraphNode for ShadowPrepassNode {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    fn process(
        &mut self,
        graph: &FrameGraph,
        transfer: &mut CommandList,
        graphics: &mut CommandList,
        snapshot: &SceneViewSnapshot,
    ) {
        if snapshot.shadow_maps_to_update.is_empty() {
            return;
        }
        let device = graph.device();

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        // Build the draw calls of every cascade up front so one SSBO
        // upload covers the whole frame's shadow work.
        let mut requests: Vec<_> = snapshot.shadow_maps_to_update.iter().collect();
        requests.sort_by_key(|request| request.cascade_index);

        let mut cascade_draws: Vec<DrawCalls<ShadowInstanceData>> = Vec::new();
        let mut total_instances = 0u64;
        for request in &requests {
            let mut draw_calls = DrawCalls::default();
            for caster in &request.casters {
                for mesh in &caster.meshes {
                    let material = self.get_or_add_shadow_material(device, mesh.vertex_layout);
                    if !material.is_depth_ready() {
                        continue;
                    }
                    draw_calls.insert(
                        &material,
                        mesh,
                        ShadowInstanceData {
                            model: caster.world_matrix,
                        },
                    );
                    total_instances += 1;
                }
            }
            cascade_draws.push(draw_calls);
        }

        if total_instances == 0 {
            graphics.end_debug_region();
            return;
        }

        let row_size = std::mem::size_of::<ShadowInstanceData>() as u64;
        let needed = row_size * total_instances;
        if self
            .per_instance_data
            .as_ref()
            .is_none_or(|_| self.per_instance_capacity < needed)
        {
            let set = device.create_shader_bindings();
            device.add_ssbo_binding(&set, "data", 0, row_size, total_instances);
            self.per_instance_data = Some(set);
            self.per_instance_capacity = needed;
        }
        let per_instance_data = self.per_instance_data.clone().expect("per-instance set");
        let storage_binding = per_instance_data.find("data").expect("storage binding");

        // Pack all cascades back to back; each remembers its base row.
        let mut all_rows: Vec<ShadowInstanceData> = Vec::with_capacity(total_instances as usize);
        let mut cascade_offsets: Vec<Vec<u32>> = Vec::with_capacity(cascade_draws.len());
        for draw_calls in &cascade_draws {
            let base = storage_binding.storage_instance_index() + all_rows.len() as u32;
            let (storage_index, rows) = draw_calls.pack_instances(base);
            cascade_offsets.push(storage_index);
            all_rows.extend_from_slice(&rows);
        }
        transfer.update_shader_binding(&storage_binding, 0, bytemuck::cast_slice(&all_rows));

        if self.indirect_buffers.len() < cascade_draws.len() {
            self.indirect_buffers.resize(cascade_draws.len(), None);
        }

        let frame_bindings = snapshot.frame_bindings.clone();
        for ((request, draw_calls), (storage_index, indirect_buffer)) in requests
            .iter()
            .zip(&cascade_draws)
            .zip(cascade_offsets.iter().zip(self.indirect_buffers.iter_mut()))
        {
            if draw_calls.is_empty() {
                continue;
            }

            let shadow_map = request.shadow_map.texture().clone();
            graphics.begin_render_pass(
                &[],
                Some(shadow_map.clone()),
                super::full_area(&shadow_map),
                Some(Vec4::ZERO),
                true,
                true,
            );
            record_draw_calls(
                0,
                draw_calls.num_batches(),
                draw_calls,
                graphics,
                device,
                |_material| {
                    frame_bindings
                        .iter()
                        .cloned()
                        .chain([per_instance_data.clone()])
                        .collect()
                },
                storage_index,
                indirect_buffer,
                super::full_area(&shadow_map),
                (
                    Vec2::ZERO,
                    Vec2::new(shadow_map.extent.x as f32, shadow_map.extent.y as f32),
                ),
            );
            graphics.end_render_pass();
        }

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.per_instance_data = None;
        self.per_instance_capacity = 0;
        self.indirect_buffers.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
