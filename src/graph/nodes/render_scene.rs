//! Main scene color pass.
//!
//! Same batching machinery as the depth prepass, but instance rows also
//! carry the material-instance index, the pass binds color and depth
//! without clearing (the prepass already laid depth down), and when
//! enough batches accumulate the draw recording fans out into secondary
//! command lists recorded in parallel over material shards.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, Buffer, CommandList, DrawCalls, ImageLayout, QueueKind, SceneViewSnapshot,
    ShaderBindingSet, SortingOrder, record_draw_calls, tag_hash,
};

/// Batch count above which secondary lists are recorded in parallel.
const PARALLEL_RECORD_THRESHOLD: usize = 8;

/// Upper bound on recording shards; one more range is recorded inline on
/// the primary list.
const MAX_RECORD_SHARDS: usize = 3;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SceneInstanceData {
    pub model: Mat4,
    pub material_instance: u32,
    pub _padding: [u32; 3],
}

#[derive(Default)]
pub struct RenderSceneNode {
    params: NodeParams,
    indirect_buffers: Vec<Option<Arc<Buffer>>>,
}

impl RenderSceneNode {
    pub const NAME: &'static str = "RenderScene";

    #[must_use]
    pub fn sorting_order(&self) -> SortingOrder {
        SortingOrder::parse(self.params.string("Sorting"))
    }
}

impl FrameGraphNode for RenderSceneNode {
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
        let device = graph.device();
        let tag = tag_hash(self.params.string("Tag"));

        // Filter the scene view by tag.
        let mut draw_calls: DrawCalls<SceneInstanceData> = DrawCalls::default();
        let mut num_meshes = 0u32;
        for proxy in &snapshot.proxies {
            for (i, mesh) in proxy.meshes.iter().enumerate() {
                if proxy.materials.len() <= i {
                    break;
                }
                let material = &proxy.materials[i];
                if !material.is_ready() || material.render_state.tag != tag {
                    continue;
                }

                let material_instance = material
                    .bindings
                    .as_ref()
                    .and_then(|b| b.find("material"))
                    .map_or(0, |binding| binding.storage_instance_index());

                draw_calls.insert(
                    material,
                    mesh,
                    SceneInstanceData {
                        model: proxy.world_matrix,
                        material_instance,
                        _padding: [0; 3],
                    },
                );
                num_meshes += 1;
            }
        }

        if num_meshes == 0 {
            return;
        }

        // Fresh per-frame storage for the instance rows.
        let per_instance_data = device.create_shader_bindings();
        let storage_binding = device.add_ssbo_binding(
            &per_instance_data,
            "data",
            0,
            std::mem::size_of::<SceneInstanceData>() as u64,
            u64::from(num_meshes),
        );
        let (storage_index, rows) =
            draw_calls.pack_instances(storage_binding.storage_instance_index());
        transfer.update_shader_binding(&storage_binding, 0, bytemuck::cast_slice(&rows));

        let Some(color) = super::resolve_color(&self.params, graph, "color") else {
            warn!("RenderScene: no color attachment and no BackBuffer");
            return;
        };
        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            warn!("RenderScene: no depth attachment and no DepthBuffer");
            return;
        };

        let frame_bindings = snapshot.frame_bindings.clone();
        let binding_sets = |material: &Arc<crate::rhi::Material>| {
            let mut sets: Vec<Arc<ShaderBindingSet>> = Vec::with_capacity(3);
            sets.extend(frame_bindings.iter().cloned());
            sets.push(per_instance_data.clone());
            sets.extend(material.bindings.iter().cloned());
            sets
        };

        let num_batches = draw_calls.num_batches();
        let num_shards = if num_batches > PARALLEL_RECORD_THRESHOLD {
            std::thread::available_parallelism()
                .map_or(1, |parallelism| parallelism.get())
                .saturating_sub(1)
                .clamp(1, MAX_RECORD_SHARDS)
        } else {
            0
        };
        let batches_per_shard = if num_shards > 0 {
            num_batches / (num_shards + 1)
        } else {
            0
        };

        if self.indirect_buffers.len() < num_shards + 1 {
            self.indirect_buffers.resize(num_shards + 1, None);
        }

        let viewport = super::full_area(&color);
        let scissors = (
            Vec2::ZERO,
            Vec2::new(color.extent.x as f32, color.extent.y as f32),
        );

        // Record shard ranges into secondary lists in parallel; each
        // shard owns its slot of the indirect-buffer pool. The shared
        // view of batches, draw calls and storage offsets is immutable.
        let (primary_buffer, shard_buffers) = self.indirect_buffers.split_at_mut(1);
        let mut secondary_lists: Vec<Option<CommandList>> = Vec::new();
        secondary_lists.resize_with(num_shards, || None);
        std::thread::scope(|scope| {
            for (i, (list_slot, buffer_slot)) in secondary_lists
                .iter_mut()
                .zip(shard_buffers.iter_mut())
                .enumerate()
            {
                let draw_calls = &draw_calls;
                let storage_index = &storage_index;
                let binding_sets = &binding_sets;
                scope.spawn(move || {
                    let mut cmd = device.create_command_list(QueueKind::Graphics, true);
                    cmd.set_default_viewport(device.render_area());
                    record_draw_calls(
                        i * batches_per_shard,
                        (i + 1) * batches_per_shard,
                        draw_calls,
                        &mut cmd,
                        device,
                        binding_sets,
                        storage_index,
                        buffer_slot,
                        viewport,
                        scissors,
                    );
                    *list_slot = Some(cmd);
                });
            }
        });

        graphics.image_barrier(
            &color,
            color.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );

        graphics.begin_render_pass(
            &[AttachmentRef::Texture(color.clone())],
            Some(depth.clone()),
            viewport,
            None,
            false,
            true,
        );
        record_draw_calls(
            num_shards * batches_per_shard,
            num_batches,
            &draw_calls,
            graphics,
            device,
            &binding_sets,
            &storage_index,
            &mut primary_buffer[0],
            viewport,
            scissors,
        );
        graphics.end_render_pass();

        let recorded: Vec<Arc<CommandList>> = secondary_lists
            .into_iter()
            .flatten()
            .map(Arc::new)
            .collect();
        if !recorded.is_empty() {
            graphics.execute_secondary(
                recorded,
                &[AttachmentRef::Texture(color.clone())],
                Some(depth),
                viewport,
                None,
                true,
            );
        }

        graphics.image_barrier(
            &color,
            ImageLayout::ColorAttachmentOptimal,
            color.default_layout(),
        );
    }

    fn clear(&mut self) {
        self.indirect_buffers.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
