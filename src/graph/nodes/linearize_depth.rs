//! Converts post-projection depth into linear view-space depth.

use std::any::Any;
use std::sync::Arc;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, CommandList, ImageLayout, Material, PrimitiveTopology, RenderState,
    SceneViewSnapshot, ShaderBindingSet, ShaderSet, VertexLayout,
};
use glam::Vec4;
use log::warn;

const LINEARIZE_SHADER: &str = "Shaders/LinearizeDepth.shader";

#[derive(Default)]
pub struct LinearizeDepthNode {
    params: NodeParams,
    shader: Option<Arc<ShaderSet>>,
    bindings: Option<Arc<ShaderBindingSet>>,
    post_effect_material: Option<Arc<Material>>,
}

impl LinearizeDepthNode {
    pub const NAME: &'static str = "LinearizeDepth";
}

impl FrameGraphNode for LinearizeDepthNode {
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

        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            warn!("LinearizeDepth: no depth attachment and no DepthBuffer");
            return;
        };
        let Some(target) = self
            .params
            .resource("target")
            .and_then(|resource| resource.as_texture())
        else {
            return;
        };

        let shader = self
            .shader
            .get_or_insert_with(|| device.load_shader(LINEARIZE_SHADER, ""))
            .clone();
        if !shader.is_ready() {
            return;
        }

        let bindings = self
            .bindings
            .get_or_insert_with(|| {
                let set = device.create_shader_bindings();
                set.add_sampler("depthSampler", 0, depth.clone());
                set
            })
            .clone();

        let material = self
            .post_effect_material
            .get_or_insert_with(|| {
                let state = RenderState::new(false, false, 0);
                device.create_material(
                    VertexLayout::P3N3UV2C4,
                    PrimitiveTopology::TriangleList,
                    state,
                    shader.clone(),
                    Some(bindings.clone()),
                )
            })
            .clone();

        graphics.image_barrier(
            &depth,
            depth.default_layout(),
            ImageLayout::ShaderReadOnlyOptimal,
        );
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

        graphics.begin_render_pass(
            &[AttachmentRef::Texture(target.clone())],
            None,
            super::full_area(&target),
            Some(Vec4::ZERO),
            false,
            true,
        );
        graphics.draw_indexed(6, 1, mesh.first_index(), mesh.vertex_offset(), 0);
        graphics.end_render_pass();

        graphics.image_barrier(
            &target,
            ImageLayout::ColorAttachmentOptimal,
            target.default_layout(),
        );
        graphics.image_barrier(
            &depth,
            ImageLayout::ShaderReadOnlyOptimal,
            depth.default_layout(),
        );
    }

    fn clear(&mut self) {
        self.shader = None;
        self.bindings = None;
        self.post_effect_material = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
