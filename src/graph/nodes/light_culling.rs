//! Tiled light culling.
//!
//! One compute dispatch per 16×16 screen tile builds a culled-light list
//! and a per-tile grid, both injected into the scene's lights binding set
//! so the scene render sees them without further wiring.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{CameraState, CommandList, ImageLayout, SceneViewSnapshot, ShaderBindingSet};

/// Tile edge in pixels.
pub const TILE_SIZE: u32 = 16;

/// Capacity of one tile's culled-light list.
pub const LIGHTS_PER_TILE: u32 = 4;

const CULLING_SHADER: &str = "Shaders/ComputeLightCulling.shader";
const REGION_COLOR: Vec4 = Vec4::new(0.4, 0.4, 1.0, 0.25);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct PushConstants {
    inv_view_projection: Mat4,
    viewport_size: [i32; 2],
    num_tiles: [i32; 2],
    lights_num: i32,
    _padding: [i32; 3],
}

#[derive(Default)]
pub struct LightCullingNode {
    params: NodeParams,
    culled_lights: Option<Arc<ShaderBindingSet>>,
}

impl LightCullingNode {
    pub const NAME: &'static str = "LightCulling";
}

impl FrameGraphNode for LightCullingNode {
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
        snapshot: &SceneViewSnapshot,
    ) {
        // No lights in the scene means nothing to cull.
        let Some(lights_data) = snapshot.lights_data.clone() else {
            return;
        };

        let device = graph.device();
        let shader = device.load_shader(CULLING_SHADER, "");
        let Some(compute) = shader.compute_shader() else {
            return;
        };

        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            warn!("LightCulling: no depth attachment and no DepthBuffer");
            return;
        };

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        let num_tiles_x = (depth.extent.x - 1) / TILE_SIZE + 1;
        let num_tiles_y = (depth.extent.y - 1) / TILE_SIZE + 1;
        let num_tiles = u64::from(num_tiles_x) * u64::from(num_tiles_y);

        let push_constants = PushConstants {
            inv_view_projection: snapshot
                .camera
                .as_ref()
                .map_or(Mat4::IDENTITY, CameraState::inv_view_projection),
            viewport_size: [depth.extent.x as i32, depth.extent.y as i32],
            num_tiles: [num_tiles_x as i32, num_tiles_y as i32],
            lights_num: snapshot.total_lights as i32,
            _padding: [0; 3],
        };

        // The SSBOs are sized from the viewport on first use, then
        // shared into the lights set for the scene render.
        let culled_lights = self.culled_lights.get_or_insert_with(|| {
            let set = device.create_shader_bindings();
            let culled = device.add_ssbo_binding(
                &set,
                "culledLights",
                0,
                std::mem::size_of::<u32>() as u64,
                num_tiles * u64::from(LIGHTS_PER_TILE),
            );
            let grid = device.add_ssbo_binding(
                &set,
                "lightsGrid",
                1,
                std::mem::size_of::<u32>() as u64,
                num_tiles * 2 + 1,
            );
            set.add_sampler("sceneDepth", 2, depth.clone());

            lights_data.adopt(&culled, "culledLights", 1);
            lights_data.adopt(&grid, "lightsGrid", 2);
            set
        });

        graphics.image_barrier(
            &depth,
            depth.default_layout(),
            ImageLayout::ShaderReadOnlyOptimal,
        );
        graphics.dispatch(
            compute,
            (num_tiles_x, num_tiles_y, 1),
            &[
                lights_data.clone(),
                culled_lights.clone(),
                snapshot
                    .frame_bindings
                    .clone()
                    .unwrap_or_else(|| device.create_shader_bindings()),
            ],
            bytemuck::bytes_of(&push_constants),
        );
        graphics.image_barrier(
            &depth,
            ImageLayout::ShaderReadOnlyOptimal,
            depth.default_layout(),
        );

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.culled_lights = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
