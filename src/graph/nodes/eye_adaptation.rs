//! Eye adaptation and tonemapping.
//!
//! Three sub-passes: a histogram compute pass accumulating luminance
//! bins from a quarter-resolution HDR sampler, a single-workgroup
//! reduction into a 1×1 average-luminance texture with a time constant
//! of `1 − exp2(−dt · eye_reaction)`, and a fullscreen tonemap that
//! consumes the full-resolution color plus the adapted average.

use std::any::Any;
use std::sync::Arc;

use glam::{UVec2, Vec4};
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, Clamping, CommandList, CullMode, Filtration, ImageLayout, Material,
    PrimitiveTopology, RenderState, RenderTarget, SceneViewSnapshot, ShaderBindingSet, ShaderSet,
    TextureFormat, TextureUsage, VertexLayout,
};

/// Luminance histogram resolution.
pub const HISTOGRAM_SHADES: u64 = 256;

const MIN_LOG_LUMINANCE: f32 = -8.0;
const MAX_LOG_LUMINANCE: f32 = 3.0;
const EYE_REACTION: f32 = 1.8;

const HISTOGRAM_SHADER: &str = "Shaders/ComputeHistogram.shader";
const AVERAGE_SHADER: &str = "Shaders/ComputeAverageLuminance.shader";
const REGION_COLOR: Vec4 = Vec4::new(1.0, 0.65, 0.0, 0.25);

/// Adaptation factor applied between the previous average and the new
/// histogram mean.
#[must_use]
pub fn adaptation_coefficient(delta_time: f32) -> f32 {
    (1.0 - (-delta_time * EYE_REACTION).exp2()).clamp(0.0, 1.0)
}

#[derive(Default)]
pub struct EyeAdaptationNode {
    params: NodeParams,
    tonemap_shader: Option<Arc<ShaderSet>>,
    histogram_shader: Option<Arc<ShaderSet>>,
    average_shader: Option<Arc<ShaderSet>>,
    histogram_bindings: Option<Arc<ShaderBindingSet>>,
    average_bindings: Option<Arc<ShaderBindingSet>>,
    average_luminance: Option<Arc<RenderTarget>>,
    post_effect_material: Option<Arc<Material>>,
    shader_bindings: Option<Arc<ShaderBindingSet>>,
    white_point_luminance: f32,
}

impl EyeAdaptationNode {
    pub const NAME: &'static str = "EyeAdaptation";

    #[must_use]
    pub fn white_point_luminance(&self) -> f32 {
        self.white_point_luminance
    }
}

impl FrameGraphNode for EyeAdaptationNode {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    #[allow(clippy::too_many_lines)]
    fn process(
        &mut self,
        graph: &FrameGraph,
        transfer: &mut CommandList,
        graphics: &mut CommandList,
        snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();

        let Some(target) = self.params.resolved_attachment("color") else {
            warn!("EyeAdaptation: missing 'color'");
            return;
        };
        let (Some(quarter_resolution), Some(full_resolution)) = (
            self.params.resolved_attachment("hdrColor"),
            self.params.resolved_attachment("colorSampler"),
        ) else {
            warn!("EyeAdaptation: missing 'hdrColor' or 'colorSampler'");
            return;
        };
        let depth = super::resolve_depth(&self.params, graph, "depthStencil");

        let histogram_shader = self
            .histogram_shader
            .get_or_insert_with(|| device.load_shader(HISTOGRAM_SHADER, ""))
            .clone();
        let average_shader = self
            .average_shader
            .get_or_insert_with(|| device.load_shader(AVERAGE_SHADER, ""))
            .clone();
        let tonemap_shader = self
            .tonemap_shader
            .get_or_insert_with(|| {
                let path = self.params.string("toneMappingShader");
                device.load_shader(path, self.params.string("toneMappingDefines"))
            })
            .clone();

        if self.histogram_bindings.is_none() {
            let set = device.create_shader_bindings();
            let histogram = device.add_ssbo_binding(
                &set,
                "histogram",
                0,
                std::mem::size_of::<u32>() as u64,
                HISTOGRAM_SHADES,
            );
            set.add_storage_image("s_texColor", 1, quarter_resolution.clone());

            // The very first frame starts from an all-zero histogram.
            let initial = vec![0u8; (HISTOGRAM_SHADES * 4) as usize];
            transfer.update_shader_binding(&histogram, 0, &initial);
            self.histogram_bindings = Some(set);
        }

        let average_luminance = self
            .average_luminance
            .get_or_insert_with(|| {
                device.create_render_target(
                    UVec2::ONE,
                    1,
                    TextureFormat::R16Sfloat,
                    Filtration::Nearest,
                    Clamping::Repeat,
                    TextureUsage::STORAGE | TextureUsage::TRANSFER_DST | TextureUsage::SAMPLED,
                )
            })
            .clone();

        if self.average_bindings.is_none() {
            let histogram_set = self.histogram_bindings.as_ref().expect("histogram set");
            let histogram = histogram_set.find("histogram").expect("histogram binding");
            let set = device.create_shader_bindings();
            set.adopt(&histogram, "histogram", 0);
            set.add_storage_image("s_texColor", 1, average_luminance.texture().clone());
            self.average_bindings = Some(set);
        }

        if !histogram_shader.is_ready() || !average_shader.is_ready() || !tonemap_shader.is_ready()
        {
            return;
        }
        let (Some(histogram_compute), Some(average_compute)) = (
            histogram_shader.compute_shader(),
            average_shader.compute_shader(),
        ) else {
            return;
        };

        if self.post_effect_material.is_none() {
            let bindings = device.create_shader_bindings();
            let uniforms_size = (self.params.num_vectors() * std::mem::size_of::<Vec4>()) as u64;
            if uniforms_size > 0 {
                let data = device.add_uniform_binding(&bindings, "data", 0, uniforms_size);
                let mut names: Vec<&String> = self.params.vectors().map(|(name, _)| name).collect();
                names.sort();
                for (index, name) in names.iter().enumerate() {
                    let value = self.params.vec4(name);
                    transfer.update_shader_binding(
                        &data,
                        (index * std::mem::size_of::<Vec4>()) as u64,
                        bytemuck::bytes_of(&value),
                    );
                }
            }
            bindings.add_sampler("colorSampler", 1, full_resolution.clone());
            bindings.add_sampler("averageLuminanceSampler", 2, average_luminance.texture().clone());

            let mut state = RenderState::new(false, false, 0);
            state.cull_mode = CullMode::None;
            state.support_multisampling = false;
            self.post_effect_material = Some(device.create_material(
                VertexLayout::P3N3UV2C4,
                PrimitiveTopology::TriangleList,
                state,
                tonemap_shader,
                Some(bindings.clone()),
            ));
            self.shader_bindings = Some(bindings);

            let white_point = self.params.vec4("data.whitePoint");
            self.white_point_luminance =
                Vec4::new(0.2125, 0.7154, 0.0721, 0.0).dot(white_point);
        }

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        let log_luminance_range = MAX_LOG_LUMINANCE - MIN_LOG_LUMINANCE;
        let histogram_push = [MIN_LOG_LUMINANCE, 1.0 / log_luminance_range];
        let average_push = [
            MIN_LOG_LUMINANCE,
            log_luminance_range,
            (quarter_resolution.extent.x * quarter_resolution.extent.y) as f32,
            adaptation_coefficient(snapshot.delta_time),
        ];

        let histogram_bindings = self.histogram_bindings.clone().expect("histogram set");
        let average_bindings = self.average_bindings.clone().expect("average set");
        let shader_bindings = self.shader_bindings.clone().expect("tonemap bindings");
        let material = self.post_effect_material.clone().expect("tonemap material");

        // Histogram accumulation from the quarter-resolution color.
        graphics.image_barrier(
            &quarter_resolution,
            quarter_resolution.default_layout(),
            ImageLayout::ComputeRead,
        );
        graphics.dispatch(
            histogram_compute,
            (
                quarter_resolution.extent.x / 16,
                quarter_resolution.extent.y / 16,
                1,
            ),
            &[histogram_bindings],
            bytemuck::cast_slice(&histogram_push),
        );
        graphics.image_barrier(
            &quarter_resolution,
            ImageLayout::ComputeRead,
            quarter_resolution.default_layout(),
        );

        // Reduce to the 1×1 adapted average.
        let average_texture = average_luminance.texture();
        graphics.image_barrier(
            average_texture,
            average_texture.default_layout(),
            ImageLayout::ComputeWrite,
        );
        graphics.dispatch(
            average_compute,
            (1, 1, 1),
            &[average_bindings],
            bytemuck::cast_slice(&average_push),
        );
        graphics.image_barrier(
            average_texture,
            ImageLayout::ComputeWrite,
            ImageLayout::ShaderReadOnlyOptimal,
        );

        // Fullscreen tonemap.
        if let Some(depth) = &depth {
            graphics.image_barrier(
                depth,
                depth.default_layout(),
                ImageLayout::ShaderReadOnlyOptimal,
            );
        }
        graphics.image_barrier(
            &target,
            target.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );
        graphics.image_barrier(
            &full_resolution,
            full_resolution.default_layout(),
            ImageLayout::ShaderReadOnlyOptimal,
        );

        let mesh = graph.fullscreen_quad();
        graphics.bind_material(&material);
        graphics.bind_vertex_buffer(&mesh.vertex_buffer, 0);
        graphics.bind_index_buffer(&mesh.index_buffer, 0);
        let sets: Vec<_> = snapshot
            .frame_bindings
            .iter()
            .cloned()
            .chain([shader_bindings])
            .collect();
        graphics.bind_shader_bindings(&material, &sets);
        graphics.set_default_viewport(target.extent);

        graphics.begin_render_pass(
            &[AttachmentRef::Texture(target.clone())],
            depth.clone(),
            super::full_area(&target),
            None,
            false,
            false,
        );
        graphics.draw_indexed(6, 1, mesh.first_index(), mesh.vertex_offset(), 0);
        graphics.end_render_pass();

        graphics.image_barrier(
            &full_resolution,
            ImageLayout::ShaderReadOnlyOptimal,
            full_resolution.default_layout(),
        );
        graphics.image_barrier(
            &target,
            ImageLayout::ColorAttachmentOptimal,
            target.default_layout(),
        );
        if let Some(depth) = &depth {
            graphics.image_barrier(
                depth,
                ImageLayout::ShaderReadOnlyOptimal,
                depth.default_layout(),
            );
        }
        graphics.image_barrier(
            average_texture,
            ImageLayout::ShaderReadOnlyOptimal,
            average_texture.default_layout(),
        );

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.tonemap_shader = None;
        self.histogram_shader = None;
        self.average_shader = None;
        self.histogram_bindings = None;
        self.average_bindings = None;
        self.average_luminance = None;
        self.post_effect_material = None;
        self.shader_bindings = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptation_coefficient_matches_reference_curve() {
        let dt = 1.0 / 60.0;
        let expected = 1.0 - (-dt * 1.8f32).exp2();
        assert!((adaptation_coefficient(dt) - expected).abs() < 1e-6);
    }

    #[test]
    fn adaptation_coefficient_is_clamped() {
        assert_eq!(adaptation_coefficient(0.0), 0.0);
        assert!(adaptation_coefficient(1000.0) <= 1.0);
    }
}
