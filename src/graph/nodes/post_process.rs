//! Generic fullscreen post-process pass.
//!
//! Loads a fragment shader by path (with optional preprocessor defines),
//! builds a depth- and cull-free material around it, uploads every vector
//! parameter into one uniform buffer and binds every resource parameter
//! by name. Each combined image sampler is bracketed by read barriers
//! around the draw.

use std::any::Any;
use std::sync::Arc;

use glam::Vec4;
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, BindingKind, CommandList, CullMode, ImageLayout, Material,
    PrimitiveTopology, RenderState, SceneViewSnapshot, ShaderBindingSet, ShaderSet,
    VertexLayout,
};

const REGION_COLOR: Vec4 = Vec4::new(0.9, 0.3, 0.9, 0.25);

#[derive(Default)]
pub struct PostProcessNode {
    params: NodeParams,
    shader: Option<Arc<ShaderSet>>,
    post_effect_material: Option<Arc<Material>>,
    shader_bindings: Option<Arc<ShaderBindingSet>>,
}

impl PostProcessNode {
    pub const NAME: &'static str = "PostProcess";
}

impl FrameGraphNode for PostProcessNode {
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

        let target_surface = self
            .params
            .resource("color")
            .and_then(|resource| resource.as_surface());
        let use_msaa_target = target_surface
            .as_ref()
            .is_some_and(|surface| surface.needs_resolve());

        let Some(target) = super::resolve_color(&self.params, graph, "color") else {
            warn!("PostProcess: no color attachment and no BackBuffer");
            return;
        };

        let shader = self
            .shader
            .get_or_insert_with(|| {
                let path = self.params.string("shader");
                if path.is_empty() {
                    warn!("PostProcess: 'shader' parameter is required");
                }
                device.load_shader(path, self.params.string("defines"))
            })
            .clone();
        if !shader.is_ready() {
            return;
        }

        let region_label = format!("{}:{}", Self::NAME, self.params.string("shader"));
        graphics.begin_debug_region(&region_label, REGION_COLOR);

        if self.post_effect_material.is_none() {
            let bindings = device.create_shader_bindings();

            // One uniform block covers every vector parameter.
            let uniforms_size =
                256.max(self.params.num_vectors() * std::mem::size_of::<Vec4>()) as u64;
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

            let mut resource_names: Vec<&String> =
                self.params.resources().map(|(name, _)| name).collect();
            resource_names.sort();
            for (slot, name) in resource_names.iter().enumerate() {
                if let Some(texture) = self.params.resolved_attachment(name) {
                    bindings.add_sampler(name, slot as u32 + 1, texture);
                }
            }

            let mut state = RenderState::new(false, false, 0);
            state.cull_mode = CullMode::None;
            state.support_multisampling = use_msaa_target;
            self.post_effect_material = Some(device.create_material(
                VertexLayout::P3N3UV2C4,
                PrimitiveTopology::TriangleList,
                state,
                shader,
                Some(bindings.clone()),
            ));
            self.shader_bindings = Some(bindings);
        }

        let bindings = self.shader_bindings.clone().expect("post bindings");
        let material = self.post_effect_material.clone().expect("post material");

        // Transition every sampled image for reading.
        let sampled: Vec<_> = bindings
            .bindings()
            .into_iter()
            .filter(|binding| {
                binding.kind() == BindingKind::CombinedImageSampler && binding.is_bound()
            })
            .filter_map(|binding| binding.texture())
            .collect();
        for texture in &sampled {
            graphics.image_barrier(
                texture,
                texture.default_layout(),
                ImageLayout::ShaderReadOnlyOptimal,
            );
        }
        graphics.image_barrier(
            &target,
            target.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );

        let mesh = graph.fullscreen_quad();
        graphics.bind_material(&material);
        graphics.bind_vertex_buffer(&mesh.vertex_buffer, 0);
        graphics.bind_index_buffer(&mesh.index_buffer, 0);
        let sets: Vec<_> = snapshot
            .frame_bindings
            .iter()
            .cloned()
            .chain([bindings])
            .collect();
        graphics.bind_shader_bindings(&material, &sets);
        graphics.set_default_viewport(target.extent);

        let attachments = if use_msaa_target {
            vec![AttachmentRef::Surface(
                target_surface.expect("msaa surface"),
            )]
        } else {
            vec![AttachmentRef::Texture(target.clone())]
        };
        graphics.begin_render_pass(
            &attachments,
            None,
            super::full_area(&target),
            None,
            false,
            false,
        );
        graphics.draw_indexed(6, 1, mesh.first_index(), mesh.vertex_offset(), 0);
        graphics.end_render_pass();

        for texture in &sampled {
            graphics.image_barrier(
                texture,
                ImageLayout::ShaderReadOnlyOptimal,
                texture.default_layout(),
            );
        }
        graphics.image_barrier(
            &target,
            ImageLayout::ColorAttachmentOptimal,
            target.default_layout(),
        );

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.shader = None;
        self.post_effect_material = None;
        self.shader_bindings = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
