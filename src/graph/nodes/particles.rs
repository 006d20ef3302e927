//! Mesh particles (experimental).
//!
//! A compute pass animates per-instance matrices in an SSBO, then two
//! draw passes consume them: a particle shadow map and the main color
//! pass. The instance count is `particle_count × trace_frames` — each
//! particle drags a motion trail of previous frames behind it.
//!
//! The particle description is a YAML header plus a binary blob loaded
//! through the asset source; the particle mesh and materials are injected
//! by the host (model import is outside the frame graph).

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec4};
use log::debug;
use serde::Deserialize;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    AttachmentRef, Clamping, CommandList, Filtration, ImageLayout, Material, Mesh, RenderTarget,
    SceneViewSnapshot, ShaderBindingSet, ShaderSet, TextureFormat, TextureUsage,
};

const COMPUTE_SHADER: &str = "Experimental/MeshParticles/ComputeParticles.shader";
const SHADOW_MAP_SIZE: u32 = 4096;
const COMPUTE_WORKGROUP: u32 = 256;
const REGION_COLOR: Vec4 = Vec4::new(0.9, 0.5, 0.2, 0.25);

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticlesHeader {
    pub particle_count: u32,
    #[serde(default = "default_trace_frames")]
    pub trace_frames: u32,
}

const fn default_trace_frames() -> u32 {
    1
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct AnimatePush {
    delta_time: f32,
    particle_count: u32,
    trace_frames: u32,
    _padding: u32,
}

#[derive(Default)]
pub struct ParticlesNode {
    params: NodeParams,
    header: Option<ParticlesHeader>,
    data_loaded: bool,
    compute_shader: Option<Arc<ShaderSet>>,
    instances: Option<Arc<ShaderBindingSet>>,
    shadow_map: Option<Arc<RenderTarget>>,
    shadow_map_bindings: Option<Arc<ShaderBindingSet>>,
    mesh: Option<Arc<Mesh>>,
    material: Option<Arc<Material>>,
    shadow_material: Option<Arc<Material>>,
}

impl ParticlesNode {
    pub const NAME: &'static str = "ExperimentalParticles";

    /// Injects the particle mesh and its materials; model import happens
    /// outside the frame graph.
    pub fn set_particle_assets(
        &mut self,
        mesh: Arc<Mesh>,
        material: Arc<Material>,
        shadow_material: Arc<Material>,
    ) {
        self.mesh = Some(mesh);
        self.material = Some(material);
        self.shadow_material = Some(shadow_material);
    }

    fn load_description(&mut self, graph: &FrameGraph) {
        if self.data_loaded {
            return;
        }
        let Some(path) = self.params.try_string("particlesData") else {
            return;
        };
        let Some(header_text) = graph.assets().read_text(path) else {
            return;
        };
        let Ok(header) = serde_yaml::from_str::<ParticlesHeader>(&header_text) else {
            debug!("Particles: malformed header at '{path}'");
            return;
        };

        let data_path = path
            .rsplit_once('.')
            .map_or_else(|| format!("{path}.dat"), |(stem, _)| format!("{stem}.dat"));
        if graph.assets().read_bytes(&data_path).is_none() {
            return;
        }

        self.header = Some(header);
        self.data_loaded = true;
    }
}

impl FrameGraphNode for ParticlesNode {
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
        _transfer: &mut CommandList,
        graphics: &mut CommandList,
        snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();

        self.load_description(graph);
        let Some(header) = self.header.clone() else {
            return;
        };
        let num_instances = u64::from(header.particle_count) * u64::from(header.trace_frames);
        if num_instances == 0 {
            return;
        }

        if self.shadow_map.is_none() {
            let shadow_map = device.create_render_target(
                UVec2::splat(SHADOW_MAP_SIZE),
                1,
                TextureFormat::R32Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                TextureUsage::COLOR_ATTACHMENT
                    | TextureUsage::TRANSFER_SRC
                    | TextureUsage::TRANSFER_DST
                    | TextureUsage::SAMPLED,
            );
            let bindings = device.create_shader_bindings();
            bindings.add_sampler("shadowMapSampler", 0, shadow_map.texture().clone());
            self.shadow_map = Some(shadow_map);
            self.shadow_map_bindings = Some(bindings);
        }

        let (Some(mesh), Some(material), Some(shadow_material)) = (
            self.mesh.clone(),
            self.material.clone(),
            self.shadow_material.clone(),
        ) else {
            return;
        };
        if !material.is_ready() || !shadow_material.is_ready() {
            return;
        }

        let shader = self
            .compute_shader
            .get_or_insert_with(|| device.load_shader(COMPUTE_SHADER, ""))
            .clone();
        let Some(compute) = shader.compute_shader() else {
            return;
        };

        let instances = self
            .instances
            .get_or_insert_with(|| {
                let set = device.create_shader_bindings();
                device.add_ssbo_binding(
                    &set,
                    "instances",
                    0,
                    std::mem::size_of::<glam::Mat4>() as u64,
                    num_instances,
                );
                set
            })
            .clone();

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        // Animate the instance matrices in place.
        let push_constants = AnimatePush {
            delta_time: snapshot.delta_time,
            particle_count: header.particle_count,
            trace_frames: header.trace_frames,
            _padding: 0,
        };
        let compute_sets: Vec<_> = [instances.clone()]
            .into_iter()
            .chain(snapshot.frame_bindings.clone())
            .collect();
        graphics.dispatch(
            compute,
            ((num_instances as u32).div_ceil(COMPUTE_WORKGROUP), 1, 1),
            &compute_sets,
            bytemuck::bytes_of(&push_constants),
        );

        // Particle shadow map.
        let shadow_map = self.shadow_map.clone().expect("particle shadow map");
        let shadow_target = shadow_map.texture().clone();
        graphics.image_barrier(
            &shadow_target,
            shadow_target.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );
        graphics.begin_render_pass(
            &[AttachmentRef::Texture(shadow_target.clone())],
            None,
            super::full_area(&shadow_target),
            Some(Vec4::ONE),
            false,
            true,
        );
        let shadow_sets: Vec<_> = snapshot
            .frame_bindings
            .iter()
            .cloned()
            .chain([instances.clone()])
            .collect();
        graphics.bind_material(&shadow_material);
        graphics.bind_shader_bindings(&shadow_material, &shadow_sets);
        graphics.bind_vertex_buffer(&mesh.vertex_buffer, 0);
        graphics.bind_index_buffer(&mesh.index_buffer, 0);
        graphics.draw_indexed(
            mesh.index_count(),
            num_instances as u32,
            mesh.first_index(),
            mesh.vertex_offset(),
            0,
        );
        graphics.end_render_pass();
        graphics.image_barrier(
            &shadow_target,
            ImageLayout::ColorAttachmentOptimal,
            shadow_target.default_layout(),
        );

        // Main color pass.
        let Some(color) = super::resolve_color(&self.params, graph, "color") else {
            graphics.end_debug_region();
            return;
        };
        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            graphics.end_debug_region();
            return;
        };

        graphics.image_barrier(
            &color,
            color.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );
        graphics.begin_render_pass(
            &[AttachmentRef::Texture(color.clone())],
            Some(depth),
            super::full_area(&color),
            None,
            false,
            true,
        );
        let color_sets: Vec<_> = snapshot
            .frame_bindings
            .iter()
            .cloned()
            .chain([
                instances,
                self.shadow_map_bindings.clone().expect("shadow bindings"),
            ])
            .collect();
        graphics.bind_material(&material);
        graphics.bind_shader_bindings(&material, &color_sets);
        graphics.bind_vertex_buffer(&mesh.vertex_buffer, 0);
        graphics.bind_index_buffer(&mesh.index_buffer, 0);
        graphics.draw_indexed(
            mesh.index_count(),
            num_instances as u32,
            mesh.first_index(),
            mesh.vertex_offset(),
            0,
        );
        graphics.end_render_pass();
        graphics.image_barrier(
            &color,
            ImageLayout::ColorAttachmentOptimal,
            color.default_layout(),
        );

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.header = None;
        self.data_loaded = false;
        self.compute_shader = None;
        self.instances = None;
        self.shadow_map = None;
        self.shadow_map_bindings = None;
        self.mesh = None;
        self.material = None;
        self.shadow_material = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parses_camel_case_yaml() {
        let header: ParticlesHeader =
            serde_yaml::from_str("particleCount: 4096\ntraceFrames: 8\n").unwrap();
        assert_eq!(header.particle_count, 4096);
        assert_eq!(header.trace_frames, 8);
    }

    #[test]
    fn trace_frames_defaults_to_one() {
        let header: ParticlesHeader = serde_yaml::from_str("particleCount: 16\n").unwrap();
        assert_eq!(header.trace_frames, 1);
    }
}
