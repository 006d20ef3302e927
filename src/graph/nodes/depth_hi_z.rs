//! Hierarchical-Z pyramid.
//!
//! Down-samples the scene depth into the mip chain of a dedicated render
//! target for GPU occlusion culling. The first dispatch reads the depth
//! attachment itself; every further level reads the previous mip.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{CommandList, ImageLayout, SceneViewSnapshot, ShaderBindingSet, ShaderSet};

const HI_Z_SHADER: &str = "Shaders/ComputeDepthHighZ.shader";
const WORKGROUP_SIZE: u32 = 8;
const REGION_COLOR: Vec4 = Vec4::new(0.4, 0.4, 1.0, 0.25);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct DownscalePush {
    output_size: Vec2,
}

#[derive(Default)]
pub struct DepthHighZNode {
    params: NodeParams,
    shader: Option<Arc<ShaderSet>>,
    /// `mip_bindings[i]` reads mip `i` and writes mip `i + 1`.
    mip_bindings: Vec<Arc<ShaderBindingSet>>,
    /// Reads the depth attachment, writes mip 0.
    prepass_bindings: Option<Arc<ShaderBindingSet>>,
}

impl DepthHighZNode {
    pub const NAME: &'static str = "DepthHighZ";
}

impl FrameGraphNode for DepthHighZNode {
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
        _transfer: &mut CommandList,
        graphics: &mut CommandList,
        _snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();

        let depth = self
            .params
            .resource("src")
            .and_then(|resource| resource.as_texture())
            .or_else(|| {
                graph
                    .get_render_target(super::DEPTH_BUFFER)
                    .map(|target| target.texture().clone())
            });
        let Some(depth) = depth else {
            warn!("DepthHighZ: no source depth");
            return;
        };
        let Some(hi_z_target) = self
            .params
            .resource("dst")
            .and_then(|resource| resource.as_render_target())
        else {
            warn!("DepthHighZ: 'dst' must reference a multi-mip render target");
            return;
        };

        let shader = self
            .shader
            .get_or_insert_with(|| device.load_shader(HI_Z_SHADER, ""))
            .clone();
        let Some(compute) = shader.compute_shader() else {
            return;
        };

        let mip_levels = hi_z_target.mip_levels();
        if self.mip_bindings.is_empty() {
            for i in 0..mip_levels - 1 {
                let set = device.create_shader_bindings();
                set.add_sampler("inputDepth", 0, hi_z_target.mip_level(i));
                set.add_storage_image("outputDepth", 1, hi_z_target.mip_level(i + 1));
                self.mip_bindings.push(set);
            }
            let prepass = device.create_shader_bindings();
            prepass.add_sampler("inputDepth", 0, depth.clone());
            prepass.add_storage_image("outputDepth", 1, hi_z_target.mip_level(0));
            self.prepass_bindings = Some(prepass);
        }

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);
        {
            let root = hi_z_target.texture();
            graphics.image_barrier(root, root.default_layout(), ImageLayout::General);

            // Level 0 is filled from the depth attachment, the rest of
            // the pyramid from the level above it.
            for level in 0..mip_levels {
                let (read_mip, bindings) = if level == 0 {
                    (depth.clone(), self.prepass_bindings.clone().expect("prepass"))
                } else {
                    (
                        hi_z_target.mip_level(level - 1),
                        self.mip_bindings[(level - 1) as usize].clone(),
                    )
                };
                let write_mip = hi_z_target.mip_level(level);

                let push_constants = DownscalePush {
                    output_size: Vec2::new(write_mip.extent.x as f32, write_mip.extent.y as f32),
                };

                graphics.image_barrier(
                    &read_mip,
                    read_mip.default_layout(),
                    ImageLayout::ComputeRead,
                );
                graphics.image_barrier(
                    &write_mip,
                    write_mip.default_layout(),
                    ImageLayout::ComputeWrite,
                );
                graphics.dispatch(
                    compute.clone(),
                    (
                        write_mip.extent.x.div_ceil(WORKGROUP_SIZE),
                        write_mip.extent.y.div_ceil(WORKGROUP_SIZE),
                        1,
                    ),
                    &[bindings],
                    bytemuck::bytes_of(&push_constants),
                );
                graphics.image_barrier(
                    &read_mip,
                    ImageLayout::ComputeRead,
                    read_mip.default_layout(),
                );
                graphics.image_barrier(
                    &write_mip,
                    ImageLayout::ComputeWrite,
                    write_mip.default_layout(),
                );
            }

            graphics.image_barrier(root, ImageLayout::General, root.default_layout());
        }
        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.shader = None;
        self.mip_bindings.clear();
        self.prepass_bindings = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
