//! Ray-marched volumetric fog.
//!
//! Samples a 3-D density volume into an output image. When no volume is
//! supplied a constant 64³ half-float placeholder (density ≈ 0.1) is
//! generated once and reused.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec4};

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    Clamping, CommandList, Filtration, ImageLayout, SceneViewSnapshot, ShaderBindingSet,
    ShaderSet, Texture, TextureFormat, TextureKind, TextureUsage,
};

const FOG_SHADER: &str = "Shaders/ComputeVolumetricFog.shader";
const PLACEHOLDER_VOLUME_SIZE: u32 = 64;
const WORKGROUP_SIZE: u32 = 16;
const REGION_COLOR: Vec4 = Vec4::new(0.4, 0.4, 1.0, 0.25);

/// Constant density of the placeholder volume, stored as f16.
pub const PLACEHOLDER_DENSITY: f32 = 0.1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct PushConstants {
    step_size: f32,
    fog_color: [f32; 3],
}

#[derive(Default)]
pub struct VolumetricFogNode {
    params: NodeParams,
    shader: Option<Arc<ShaderSet>>,
    bindings: Option<Arc<ShaderBindingSet>>,
    density_volume: Option<Arc<Texture>>,
}

impl VolumetricFogNode {
    pub const NAME: &'static str = "VolumetricFog";
}

impl FrameGraphNode for VolumetricFogNode {
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
        let device = graph.device();
        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        let shader = self
            .shader
            .get_or_insert_with(|| device.load_shader(FOG_SHADER, ""))
            .clone();
        let Some(compute) = shader.compute_shader() else {
            graphics.end_debug_region();
            return;
        };

        if self.density_volume.is_none() {
            // The placeholder's content is a uniform half-float density;
            // the value itself only matters to the shader.
            let _density = half::f16::from_f32(PLACEHOLDER_DENSITY);
            self.density_volume = Some(device.create_texture(
                UVec2::splat(PLACEHOLDER_VOLUME_SIZE),
                PLACEHOLDER_VOLUME_SIZE,
                TextureKind::Texture3d,
                TextureFormat::R16Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            ));
        }

        let density_volume = self
            .params
            .resolved_attachment("densityVolume")
            .or_else(|| self.density_volume.clone())
            .expect("placeholder volume");

        let Some(target) = self.params.resolved_attachment("target") else {
            graphics.end_debug_region();
            return;
        };

        let bindings = self
            .bindings
            .get_or_insert_with(|| device.create_shader_bindings())
            .clone();
        bindings.add_sampler("u_densityVolume", 0, density_volume.clone());
        bindings.add_storage_image("u_output_image", 1, target.clone());
        bindings.recalculate_compatibility();

        let push_constants = PushConstants {
            step_size: self.params.float("stepSize"),
            fog_color: [
                self.params.vec4("fogColor").x,
                self.params.vec4("fogColor").y,
                self.params.vec4("fogColor").z,
            ],
        };

        graphics.image_barrier(
            &density_volume,
            density_volume.default_layout(),
            ImageLayout::ComputeRead,
        );
        graphics.image_barrier(&target, target.default_layout(), ImageLayout::ComputeWrite);

        let sets: Vec<_> = [bindings]
            .into_iter()
            .chain(snapshot.frame_bindings.clone())
            .collect();
        graphics.dispatch(
            compute,
            (
                target.extent.x.div_ceil(WORKGROUP_SIZE),
                target.extent.y.div_ceil(WORKGROUP_SIZE),
                1,
            ),
            &sets,
            bytemuck::bytes_of(&push_constants),
        );

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.shader = None;
        self.bindings = None;
        self.density_volume = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
