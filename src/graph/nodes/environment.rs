//! Image-based lighting environment.
//!
//! On a dirty tick derives, via compute, the split-sum BRDF LUT (once
//! per process), a pre-filtered specular cubemap and a diffuse
//! irradiance cubemap from either a loaded equirectangular environment
//! map or the sky node's cubemap. Both cubemaps are cached by the sky
//! parameter hash, so a static sky derives them once and a dynamic sky
//! re-derives on change. Results are published into the graph's sampler
//! table under the reserved `g_*` names.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{IVec4, UVec2, Vec4};
use log::debug;
use rustc_hash::FxHashMap;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    Clamping, CommandList, Cubemap, Filtration, ImageLayout, RenderTarget, RhiResource,
    SceneViewSnapshot, ShaderBindingSet, ShaderSet, TextureFormat, TextureUsage, Texture,
};

use super::sky::SkyNode;

pub const ENV_MAP_SIZE: u32 = 512;
pub const ENV_MAP_LEVELS: u32 = 10;
pub const IRRADIANCE_MAP_SIZE: u32 = 32;
pub const BRDF_LUT_SIZE: u32 = 256;

const BRDF_SHADER: &str = "Shaders/ComputeBrdfLut.shader";
const SPECULAR_SHADER: &str = "Shaders/ComputeEnvMap_IBL.shader";
const IRRADIANCE_SHADER: &str = "Shaders/ComputeIrradianceMap.shader";
const REGION_COLOR: Vec4 = Vec4::new(0.4, 0.4, 1.0, 0.25);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct SpecularPush {
    level: i32,
    roughness: f32,
}

#[derive(Default)]
pub struct EnvironmentNode {
    params: NodeParams,
    brdf_shader: Option<Arc<ShaderSet>>,
    specular_shader: Option<Arc<ShaderSet>>,
    irradiance_shader: Option<Arc<ShaderSet>>,
    brdf_bindings: Option<Arc<ShaderBindingSet>>,
    specular_bindings: Option<Arc<ShaderBindingSet>>,
    irradiance_bindings: Option<Arc<ShaderBindingSet>>,
    brdf_sampler: Option<Arc<RenderTarget>>,
    env_cubemaps: FxHashMap<u64, Arc<Cubemap>>,
    irradiance_cubemaps: FxHashMap<u64, Arc<Cubemap>>,
    env_map_texture: Option<Arc<Texture>>,
    dirty: bool,
}

impl EnvironmentNode {
    pub const NAME: &'static str = "Environment";

    /// Forces re-derivation on the next frame.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    fn usage() -> TextureUsage {
        TextureUsage::COLOR_ATTACHMENT
            | TextureUsage::TRANSFER_SRC
            | TextureUsage::TRANSFER_DST
            | TextureUsage::STORAGE
            | TextureUsage::SAMPLED
    }

    /// Derives the raw environment cubemap: an equirectangular map
    /// converted and mip-mapped, or the sky cubemap as-is.
    fn raw_environment(
        &mut self,
        graph: &FrameGraph,
        graphics: &mut CommandList,
    ) -> Option<(Arc<Cubemap>, bool)> {
        if self.env_map_texture.is_none() {
            if let Some(path) = self.params.try_string("EnvironmentMap") {
                self.env_map_texture =
                    graph
                        .assets()
                        .load_texture(graph.device(), path, None);
                // The importer kicks off asynchronously; convert next
                // frame once the texture is in.
                return None;
            }
        }

        if let Some(env_map) = &self.env_map_texture {
            let device = graph.device();
            let raw = device.create_cubemap(
                UVec2::splat(ENV_MAP_SIZE),
                ENV_MAP_LEVELS,
                TextureFormat::Rgba16Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                Self::usage(),
            );

            graphics.begin_debug_region("Generate Raw Env Cubemap from Equirect", REGION_COLOR);
            let root = raw.texture();
            graphics.image_barrier(root, root.default_layout(), ImageLayout::ComputeWrite);
            graphics.equirect_to_cubemap(env_map, root);
            graphics.image_barrier(root, ImageLayout::ComputeWrite, ImageLayout::TransferDstOptimal);
            graphics.generate_mipmaps(root);
            graphics.end_debug_region();

            return Some((raw, true));
        }

        graph
            .get_sampler("g_skyCubemap")
            .and_then(|resource| resource.as_cubemap())
            .map(|cubemap| (cubemap, false))
    }
}

impl FrameGraphNode for EnvironmentNode {
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
        _snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();
        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        if self.params.tag().is_none() {
            self.params.set_tag("Environment");
        }

        if self.brdf_shader.is_none() {
            self.brdf_shader = Some(device.load_shader(BRDF_SHADER, ""));
            self.brdf_bindings = Some(device.create_shader_bindings());
        }
        if self.specular_shader.is_none() {
            self.specular_shader = Some(device.load_shader(SPECULAR_SHADER, ""));
            self.specular_bindings = Some(device.create_shader_bindings());
        }
        if self.irradiance_shader.is_none() {
            self.irradiance_shader = Some(device.load_shader(IRRADIANCE_SHADER, ""));
            self.irradiance_bindings = Some(device.create_shader_bindings());
        }

        // The BRDF LUT is process-wide; one derivation, then shared
        // through the sampler table.
        if self.brdf_sampler.is_none() {
            let Some(brdf_compute) = self
                .brdf_shader
                .as_ref()
                .and_then(|shader| shader.compute_shader())
            else {
                graphics.end_debug_region();
                return;
            };

            let brdf = device.create_render_target(
                UVec2::splat(BRDF_LUT_SIZE),
                1,
                TextureFormat::Rg16Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                Self::usage(),
            );
            graph.set_sampler("g_brdfSampler", RhiResource::RenderTarget(brdf.clone()));

            graphics.begin_debug_region(
                "Generate Cook-Torrance BRDF 2D LUT for split-sum approximation",
                REGION_COLOR,
            );
            let bindings = self.brdf_bindings.clone().expect("brdf bindings");
            bindings.add_storage_image("dst", 0, brdf.texture().clone());
            let texture = brdf.texture();
            graphics.image_barrier(texture, texture.default_layout(), ImageLayout::ComputeWrite);
            graphics.dispatch(
                brdf_compute,
                (BRDF_LUT_SIZE / 32, BRDF_LUT_SIZE / 32, 6),
                &[bindings],
                &[],
            );
            graphics.image_barrier(
                texture,
                ImageLayout::ComputeWrite,
                ImageLayout::ShaderReadOnlyOptimal,
            );
            graphics.end_debug_region();

            self.brdf_sampler = Some(brdf);
        }

        if !self.dirty {
            graphics.end_debug_region();
            return;
        }

        let Some((raw_cubemap, loaded_environment_map)) = self.raw_environment(graph, graphics)
        else {
            graphics.end_debug_region();
            return;
        };

        let sky_hash = if loaded_environment_map {
            0
        } else {
            graph
                .find_node("Sky")
                .and_then(|slot| {
                    slot.lock()
                        .as_any()
                        .downcast_ref::<SkyNode>()
                        .map(|sky| sky.sky_params().hash())
                })
                .unwrap_or(0)
        };

        let cached_env = self.env_cubemaps.get(&sky_hash).cloned();
        let cached_irradiance = self.irradiance_cubemaps.get(&sky_hash).cloned();
        if let (Some(env), Some(irradiance)) = (&cached_env, &cached_irradiance) {
            graph.set_sampler("g_envCubemap", RhiResource::Cubemap(env.clone()));
            graph.set_sampler("g_irradianceCubemap", RhiResource::Cubemap(irradiance.clone()));
            self.dirty = false;
            graphics.end_debug_region();
            return;
        }

        let (Some(specular_compute), Some(irradiance_compute)) = (
            self.specular_shader
                .as_ref()
                .and_then(|shader| shader.compute_shader()),
            self.irradiance_shader
                .as_ref()
                .and_then(|shader| shader.compute_shader()),
        ) else {
            debug!("Environment: IBL compute shaders still compiling");
            graphics.end_debug_region();
            return;
        };

        // Pre-filtered specular chain: mip 0 blitted from the raw
        // cubemap, the mip tail filtered by increasing roughness.
        let env_cubemap = cached_env.unwrap_or_else(|| {
            let env = device.create_cubemap(
                UVec2::splat(ENV_MAP_SIZE),
                ENV_MAP_LEVELS,
                TextureFormat::Rgba16Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                Self::usage(),
            );
            graph.set_sampler("g_envCubemap", RhiResource::Cubemap(env.clone()));

            graphics.begin_debug_region(
                "Compute pre-filtered specular environment map",
                REGION_COLOR,
            );

            let raw_root = raw_cubemap.texture();
            let env_root = env.texture();
            graphics.image_barrier(
                raw_root,
                raw_root.default_layout(),
                ImageLayout::TransferSrcOptimal,
            );
            graphics.image_barrier(
                env_root,
                env_root.default_layout(),
                ImageLayout::TransferDstOptimal,
            );
            graphics.blit_image(
                raw_root,
                env_root,
                IVec4::new(0, 0, raw_root.extent.x as i32, raw_root.extent.y as i32),
                IVec4::new(0, 0, env_root.extent.x as i32, env_root.extent.y as i32),
            );
            graphics.image_barrier(
                raw_root,
                ImageLayout::TransferSrcOptimal,
                ImageLayout::ShaderReadOnlyOptimal,
            );
            graphics.image_barrier(
                env_root,
                ImageLayout::TransferDstOptimal,
                ImageLayout::ComputeWrite,
            );

            let bindings = self.specular_bindings.clone().expect("specular bindings");
            bindings.add_sampler("rawEnvMap", 0, raw_root.clone());
            bindings.add_sampler_array(
                "envMap",
                1,
                (1..ENV_MAP_LEVELS).map(|level| env.mip_level(level)).collect(),
            );
            bindings.recalculate_compatibility();

            let num_mip_tail_levels = ENV_MAP_LEVELS - 1;
            let delta_roughness = 1.0 / (num_mip_tail_levels as f32).max(1.0);
            let mut size = ENV_MAP_SIZE / 2;
            for level in 1..ENV_MAP_LEVELS {
                let num_groups = (size / 32).max(1);
                let push_constants = SpecularPush {
                    level: level as i32 - 1,
                    roughness: level as f32 * delta_roughness,
                };
                graphics.dispatch(
                    specular_compute.clone(),
                    (num_groups, num_groups, 6),
                    &[bindings.clone()],
                    bytemuck::bytes_of(&push_constants),
                );
                size /= 2;
            }

            graphics.image_barrier(
                env_root,
                ImageLayout::ComputeWrite,
                env_root.default_layout(),
            );
            graphics.end_debug_region();
            env
        });

        if cached_irradiance.is_none() {
            let irradiance = device.create_cubemap(
                UVec2::splat(IRRADIANCE_MAP_SIZE),
                1,
                TextureFormat::Rgba16Sfloat,
                Filtration::Linear,
                Clamping::Clamp,
                Self::usage(),
            );
            graph.set_sampler("g_irradianceCubemap", RhiResource::Cubemap(irradiance.clone()));

            graphics.begin_debug_region("Compute diffuse irradiance cubemap", REGION_COLOR);

            let env_root = env_cubemap.texture();
            let irradiance_root = irradiance.texture();
            graphics.image_barrier(
                env_root,
                env_root.default_layout(),
                ImageLayout::ShaderReadOnlyOptimal,
            );
            graphics.image_barrier(
                irradiance_root,
                irradiance_root.default_layout(),
                ImageLayout::ComputeWrite,
            );

            let bindings = self.irradiance_bindings.clone().expect("irradiance bindings");
            bindings.add_sampler("envMap", 0, env_root.clone());
            bindings.add_storage_image("irradianceMap", 1, irradiance_root.clone());
            bindings.recalculate_compatibility();

            graphics.dispatch(
                irradiance_compute,
                (IRRADIANCE_MAP_SIZE / 32, IRRADIANCE_MAP_SIZE / 32, 6),
                &[bindings],
                &[],
            );

            graphics.image_barrier(
                irradiance_root,
                ImageLayout::ComputeWrite,
                ImageLayout::ShaderReadOnlyOptimal,
            );
            graphics.end_debug_region();

            self.irradiance_cubemaps.insert(sky_hash, irradiance);
        }

        self.env_cubemaps.insert(sky_hash, env_cubemap);
        self.dirty = false;

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.brdf_shader = None;
        self.specular_shader = None;
        self.irradiance_shader = None;
        self.brdf_bindings = None;
        self.specular_bindings = None;
        self.irradiance_bindings = None;
        self.brdf_sampler = None;
        self.env_cubemaps.clear();
        self.irradiance_cubemaps.clear();
        self.env_map_texture = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
