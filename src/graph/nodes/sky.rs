//! Procedural sky, sun and star field.
//!
//! Four draws: the sky and sun are rendered to dedicated off-screen
//! targets, composed onto the scene color, then a point-sprite star pass
//! draws the catalogue mesh built once from the `BSC5` companion file
//! (see [`crate::stars`]). The star transform accounts for local mean
//! sidereal time, observer latitude/longitude and the precession of the
//! equinoxes; per frame it is re-centred on the camera.

use std::any::Any;
use std::sync::Arc;

use glam::{Mat4, UVec2, Vec3, Vec4};
use log::debug;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, BlendMode, Clamping, CommandList, CullMode, Filtration, FillMode, ImageLayout,
    Material, Mesh, PrimitiveTopology, RenderState, RenderTarget, SceneViewSnapshot,
    ShaderBindingSet, ShaderSet, TextureFormat, TextureUsage, VertexLayout,
};
use crate::stars;

const SKY_RESOLUTION: u32 = 512;
const SKY_SHADER: &str = "Shaders/Sky.shader";
const STARS_SHADER: &str = "Shaders/Stars.shader";
const STARS_COLOR_TABLE: &str = "StarsColor.yaml";
const STAR_CATALOGUE: &str = "BSC5";
const REGION_COLOR: Vec4 = Vec4::new(0.2, 0.6, 1.0, 0.25);

/// Parameters the environment node keys its cubemap caches on: a static
/// sky hashes stable, a dynamic one invalidates the derived IBL data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyParams {
    pub light_direction: Vec4,
}

impl SkyParams {
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut payload = [0u8; 16];
        for (chunk, lane) in payload
            .chunks_exact_mut(4)
            .zip(self.light_direction.to_array())
        {
            chunk.copy_from_slice(&lane.to_bits().to_le_bytes());
        }
        xxhash_rust::xxh3::xxh3_64(&payload)
    }
}

#[derive(Default)]
pub struct SkyNode {
    params: NodeParams,
    sky_shader: Option<Arc<ShaderSet>>,
    sun_shader: Option<Arc<ShaderSet>>,
    compose_shader: Option<Arc<ShaderSet>>,
    stars_shader: Option<Arc<ShaderSet>>,
    sky_texture: Option<Arc<RenderTarget>>,
    sun_texture: Option<Arc<RenderTarget>>,
    stars_mesh: Option<Arc<Mesh>>,
    stars_model_view: Mat4,
    shader_bindings: Option<Arc<ShaderBindingSet>>,
    sky_material: Option<Arc<Material>>,
    sun_material: Option<Arc<Material>>,
    compose_material: Option<Arc<Material>>,
    stars_material: Option<Arc<Material>>,
}

impl SkyNode {
    pub const NAME: &'static str = "Sky";

    /// Current sky parameters; read by the environment node through
    /// [`FrameGraph::find_node`].
    #[must_use]
    pub fn sky_params(&self) -> SkyParams {
        SkyParams {
            light_direction: self.params.vec4("lightDirection"),
        }
    }

    fn create_stars_mesh(&mut self, graph: &FrameGraph) {
        let assets = graph.assets();
        let (Some(colour_yaml), Some(catalogue_bytes)) = (
            assets.read_text(STARS_COLOR_TABLE),
            assets.read_bytes(STAR_CATALOGUE),
        ) else {
            debug!("Sky: star companion files not available");
            return;
        };
        let Ok(colours) = stars::parse_colour_table(&colour_yaml) else {
            debug!("Sky: malformed star colour table");
            return;
        };

        let catalogue = stars::parse_catalogue(&catalogue_bytes);
        let vertices = stars::build_star_vertices(&catalogue, &colours);
        let indices: Vec<u32> = (0..vertices.len() as u32).collect();

        self.stars_model_view = stars::star_field_transform(
            stars::OBSERVER_LATITUDE_RAD,
            stars::OBSERVER_LONGITUDE_RAD,
            stars::julian_date(2022, 12, 29, 12, 0, 0),
        );

        let device = graph.device();
        self.stars_mesh = Some(device.create_mesh_with_data(
            VertexLayout::P3C4,
            bytemuck::cast_slice(&vertices),
            bytemuck::cast_slice(&indices),
        ));
    }

    fn fullscreen_pass(
        graphics: &mut CommandList,
        label: &str,
        material: &Arc<Material>,
        sets: &[Arc<ShaderBindingSet>],
        target: &Arc<crate::rhi::Texture>,
        depth: &Arc<crate::rhi::Texture>,
        mesh: &Arc<Mesh>,
    ) {
        graphics.begin_debug_region(label, REGION_COLOR);

        graphics.image_barrier(
            depth,
            depth.default_layout(),
            ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
        );
        graphics.image_barrier(
            target,
            target.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );

        graphics.bind_material(material);
        graphics.bind_shader_bindings(material, sets);
        graphics.set_default_viewport(target.extent);

        graphics.begin_render_pass(
            &[AttachmentRef::Texture(target.clone())],
            Some(depth.clone()),
            super::full_area(target),
            None,
            false,
            false,
        );
        graphics.draw_indexed(6, 1, mesh.first_index(), mesh.vertex_offset(), 0);
        graphics.end_render_pass();

        graphics.image_barrier(
            target,
            ImageLayout::ColorAttachmentOptimal,
            target.default_layout(),
        );
        graphics.image_barrier(
            depth,
            ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
            depth.default_layout(),
        );

        graphics.end_debug_region();
    }
}

impl FrameGraphNode for SkyNode {
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

        if self.sky_shader.is_none() {
            self.sky_shader = Some(device.load_shader(SKY_SHADER, "FILL"));
            self.sun_shader = Some(device.load_shader(SKY_SHADER, "SUN"));
            self.compose_shader = Some(device.load_shader(SKY_SHADER, "COMPOSE"));
        }
        if self.stars_shader.is_none() {
            self.stars_shader = Some(device.load_shader(STARS_SHADER, ""));
        }

        let target_usage = TextureUsage::TRANSFER_SRC
            | TextureUsage::SAMPLED
            | TextureUsage::COLOR_ATTACHMENT;

        // The off-screen targets come up over the first frames.
        if self.sky_texture.is_none() {
            self.sky_texture = Some(device.create_render_target(
                UVec2::splat(SKY_RESOLUTION),
                1,
                TextureFormat::Rgba16Sfloat,
                Filtration::Bicubic,
                Clamping::Repeat,
                target_usage,
            ));
            return;
        }
        if self.sun_texture.is_none() {
            self.sun_texture = Some(device.create_render_target(
                UVec2::splat(SKY_RESOLUTION),
                1,
                TextureFormat::Rgba16Sfloat,
                Filtration::Bicubic,
                Clamping::Clamp,
                target_usage,
            ));
            return;
        }

        if self.stars_mesh.is_none() {
            self.create_stars_mesh(graph);
        }

        let ready = [
            self.sky_shader.as_ref(),
            self.sun_shader.as_ref(),
            self.compose_shader.as_ref(),
            self.stars_shader.as_ref(),
        ]
        .iter()
        .all(|shader| shader.is_some_and(|s| s.is_ready()));
        let Some(stars_mesh) = self.stars_mesh.clone() else {
            return;
        };
        if !ready {
            return;
        }

        let sky_texture = self.sky_texture.clone().expect("sky target");
        let sun_texture = self.sun_texture.clone().expect("sun target");

        if self.sky_material.is_none() {
            let bindings = device.create_shader_bindings();
            let uniforms_size =
                256.max(self.params.num_vectors() * std::mem::size_of::<Vec4>()) as u64;
            let data = device.add_uniform_binding(&bindings, "data", 0, uniforms_size);
            bindings.add_sampler("skySampler", 1, sky_texture.texture().clone());
            bindings.add_sampler("sunSampler", 2, sun_texture.texture().clone());

            let mut state = RenderState::new(false, false, 0);
            state.cull_mode = CullMode::None;
            state.support_multisampling = false;

            self.sky_material = Some(device.create_material(
                VertexLayout::P3N3UV2C4,
                PrimitiveTopology::TriangleList,
                state,
                self.sky_shader.clone().expect("sky shader"),
                Some(bindings.clone()),
            ));
            self.sun_material = Some(device.create_material(
                VertexLayout::P3N3UV2C4,
                PrimitiveTopology::TriangleList,
                state,
                self.sun_shader.clone().expect("sun shader"),
                Some(bindings.clone()),
            ));
            self.compose_material = Some(device.create_material(
                VertexLayout::P3N3UV2C4,
                PrimitiveTopology::TriangleList,
                state,
                self.compose_shader.clone().expect("compose shader"),
                Some(bindings.clone()),
            ));

            let light_direction = Vec4::new(0.0, -1.0, 1.0, 0.0).normalize();
            transfer.update_shader_binding(&data, 0, bytemuck::bytes_of(&light_direction));
            self.shader_bindings = Some(bindings);
        }

        if self.stars_material.is_none() {
            let mut state = RenderState::new(true, false, 0);
            state.blend_mode = BlendMode::AlphaBlending;
            state.fill_mode = FillMode::Point;
            state.support_multisampling = false;
            self.stars_material = Some(device.create_material(
                VertexLayout::P3C4,
                PrimitiveTopology::PointList,
                state,
                self.stars_shader.clone().expect("stars shader"),
                None,
            ));
        }

        let Some(target) = super::resolve_color(&self.params, graph, "color") else {
            return;
        };
        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            return;
        };

        let mesh = graph.fullscreen_quad();
        let shader_bindings = self.shader_bindings.clone().expect("sky bindings");
        let sets: Vec<_> = snapshot
            .frame_bindings
            .iter()
            .cloned()
            .chain([shader_bindings])
            .collect();

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        Self::fullscreen_pass(
            graphics,
            "Sky",
            &self.sky_material.clone().expect("sky material"),
            &sets,
            sky_texture.texture(),
            &depth,
            &mesh,
        );
        Self::fullscreen_pass(
            graphics,
            "Sun",
            &self.sun_material.clone().expect("sun material"),
            &sets,
            sun_texture.texture(),
            &depth,
            &mesh,
        );

        // Compose sky and sun onto the scene color.
        graphics.begin_debug_region("Compose", REGION_COLOR);
        {
            graphics.bind_vertex_buffer(&mesh.vertex_buffer, 0);
            graphics.bind_index_buffer(&mesh.index_buffer, 0);

            graphics.image_barrier(
                &depth,
                depth.default_layout(),
                ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
            );
            graphics.image_barrier(
                &target,
                target.default_layout(),
                ImageLayout::ColorAttachmentOptimal,
            );
            graphics.image_barrier(
                sky_texture.texture(),
                sky_texture.texture().default_layout(),
                ImageLayout::ShaderReadOnlyOptimal,
            );
            graphics.image_barrier(
                sun_texture.texture(),
                sun_texture.texture().default_layout(),
                ImageLayout::ShaderReadOnlyOptimal,
            );

            let compose = self.compose_material.clone().expect("compose material");
            graphics.bind_material(&compose);
            graphics.bind_shader_bindings(&compose, &sets);
            graphics.set_default_viewport(target.extent);

            graphics.begin_render_pass(
                &[AttachmentRef::Texture(target.clone())],
                Some(depth.clone()),
                super::full_area(&target),
                None,
                false,
                false,
            );
            graphics.draw_indexed(6, 1, mesh.first_index(), mesh.vertex_offset(), 0);
            graphics.end_render_pass();

            graphics.image_barrier(
                sky_texture.texture(),
                ImageLayout::ShaderReadOnlyOptimal,
                sky_texture.texture().default_layout(),
            );
            graphics.image_barrier(
                sun_texture.texture(),
                ImageLayout::ShaderReadOnlyOptimal,
                sun_texture.texture().default_layout(),
            );
            graphics.image_barrier(
                &target,
                ImageLayout::ColorAttachmentOptimal,
                target.default_layout(),
            );
            graphics.image_barrier(
                &depth,
                ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
                depth.default_layout(),
            );
        }
        graphics.end_debug_region();

        // Point-sprite star field, centred on the camera.
        graphics.begin_debug_region("Stars", REGION_COLOR);
        {
            graphics.bind_vertex_buffer(&stars_mesh.vertex_buffer, stars_mesh.vertex_buffer.offset());
            graphics.bind_index_buffer(&stars_mesh.index_buffer, stars_mesh.index_buffer.offset());

            let camera_position = snapshot
                .camera
                .as_ref()
                .map_or(Vec3::ZERO, |camera| camera.position);
            let stars_model_view =
                Mat4::from_translation(camera_position) * self.stars_model_view;

            graphics.image_barrier(
                &depth,
                depth.default_layout(),
                ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
            );
            graphics.image_barrier(
                &target,
                target.default_layout(),
                ImageLayout::ColorAttachmentOptimal,
            );

            let stars_material = self.stars_material.clone().expect("stars material");
            graphics.bind_material(&stars_material);
            graphics.bind_shader_bindings(&stars_material, &sets);
            graphics.push_constants(&stars_material, bytemuck::bytes_of(&stars_model_view));
            graphics.set_default_viewport(target.extent);

            graphics.begin_render_pass(
                &[AttachmentRef::Texture(target.clone())],
                Some(depth.clone()),
                super::full_area(&target),
                None,
                false,
                false,
            );
            graphics.draw_indexed(
                stars_mesh.index_count(),
                1,
                stars_mesh.first_index(),
                stars_mesh.vertex_offset(),
                0,
            );
            graphics.end_render_pass();

            graphics.image_barrier(
                &target,
                ImageLayout::ColorAttachmentOptimal,
                target.default_layout(),
            );
            graphics.image_barrier(
                &depth,
                ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
                depth.default_layout(),
            );
        }
        graphics.end_debug_region();

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.sky_texture = None;
        self.sun_texture = None;
        self.sky_shader = None;
        self.sun_shader = None;
        self.compose_shader = None;
        self.stars_shader = None;
        self.stars_mesh = None;
        self.shader_bindings = None;
        self.sky_material = None;
        self.sun_material = None;
        self.compose_material = None;
        self.stars_material = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_params_hash_is_stable_and_direction_sensitive() {
        let a = SkyParams {
            light_direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
        };
        let b = SkyParams {
            light_direction: Vec4::new(0.0, -1.0, 0.0, 0.0),
        };
        let c = SkyParams {
            light_direction: Vec4::new(0.5, -0.5, 0.0, 0.0),
        };
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }
}
