//! Two-pass mip-chain bloom.
//!
//! Compute filter over a single multi-mip render target: a downscale
//! chain (threshold applied at the first level only) followed by an
//! upscale chain that samples a lens-dirt texture. Per-mip binding sets
//! are built once and cached; every mip flips between compute-read and
//! compute-write layouts around its dispatch.

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{CommandList, ImageLayout, SceneViewSnapshot, ShaderBindingSet, ShaderSet};

const DOWNSCALE_SHADER: &str = "Shaders/ComputeBloomDownscale.shader";
const UPSCALE_SHADER: &str = "Shaders/ComputeBloomUpscale.shader";
const WORKGROUP_SIZE: u32 = 8;
const REGION_COLOR: Vec4 = Vec4::new(1.0, 0.6, 0.2, 0.25);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct DownscalePush {
    /// `(threshold, threshold − knee, 2·knee, 0.25·knee)`
    threshold: Vec4,
    use_threshold: u32,
    _padding: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct UpscalePush {
    bloom_intensity: f32,
    dirt_intensity: f32,
    mip_level: u32,
    _padding: u32,
}

#[derive(Default)]
pub struct BloomNode {
    params: NodeParams,
    downscale_shader: Option<Arc<ShaderSet>>,
    upscale_shader: Option<Arc<ShaderSet>>,
    downscale_bindings: Vec<Arc<ShaderBindingSet>>,
    upscale_bindings: Vec<Arc<ShaderBindingSet>>,
}

impl BloomNode {
    pub const NAME: &'static str = "Bloom";
}

impl FrameGraphNode for BloomNode {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    #[allow(clippy::similar_names)]
    fn process(
        &mut self,
        graph: &FrameGraph,
        _transfer: &mut CommandList,
        graphics: &mut CommandList,
        _snapshot: &SceneViewSnapshot,
    ) {
        let device = graph.device();

        let Some(bloom_target) = self
            .params
            .resource("bloom")
            .and_then(|r| r.as_render_target())
        else {
            warn!("Bloom: 'bloom' must reference a multi-mip render target");
            return;
        };
        let mip_levels = bloom_target.mip_levels();
        if mip_levels < 2 {
            warn!("Bloom: render target needs at least two mip levels");
            return;
        }

        let downscale = self
            .downscale_shader
            .get_or_insert_with(|| device.load_shader(DOWNSCALE_SHADER, ""))
            .clone();
        let upscale = self
            .upscale_shader
            .get_or_insert_with(|| device.load_shader(UPSCALE_SHADER, ""))
            .clone();
        let (Some(downscale_compute), Some(upscale_compute)) =
            (downscale.compute_shader(), upscale.compute_shader())
        else {
            return;
        };

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);

        if self.downscale_bindings.is_empty() {
            for i in 0..mip_levels - 1 {
                let set = device.create_shader_bindings();
                set.add_storage_image("u_input_texture", 0, bloom_target.mip_level(i));
                set.add_storage_image("u_output_image", 1, bloom_target.mip_level(i + 1));
                self.downscale_bindings.push(set);
            }
        }

        if self.upscale_bindings.is_empty() {
            let lens_dirt = graph
                .get_sampler("g_lensDirtSampler")
                .and_then(|r| r.as_texture());
            for i in 1..mip_levels {
                let set = device.create_shader_bindings();
                set.add_storage_image("u_input_texture", 0, bloom_target.mip_level(i));
                set.add_storage_image("u_output_image", 1, bloom_target.mip_level(i - 1));
                if let Some(dirt) = &lens_dirt {
                    set.add_sampler("u_dirt_texture", 2, dirt.clone());
                }
                self.upscale_bindings.push(set);
            }
        }

        let threshold = self.params.float("threshold");
        let knee = self.params.float("knee");
        let mut downscale_push = DownscalePush {
            threshold: Vec4::new(threshold, threshold - knee, 2.0 * knee, 0.25 * knee),
            use_threshold: 0,
            _padding: [0; 3],
        };

        let root = bloom_target.texture();
        graphics.image_barrier(root, root.default_layout(), ImageLayout::General);

        for i in 0..mip_levels - 1 {
            downscale_push.use_threshold = u32::from(i == 0);

            let read_mip = bloom_target.mip_level(i);
            let write_mip = bloom_target.mip_level(i + 1);

            // The first level comes in at its resting layout; deeper
            // levels were the previous dispatch's write target.
            let read_from = if i == 0 {
                read_mip.default_layout()
            } else {
                ImageLayout::ComputeWrite
            };
            graphics.image_barrier(&read_mip, read_from, ImageLayout::ComputeRead);
            graphics.image_barrier(
                &write_mip,
                write_mip.default_layout(),
                ImageLayout::ComputeWrite,
            );
            graphics.dispatch(
                downscale_compute.clone(),
                (
                    write_mip.extent.x.div_ceil(WORKGROUP_SIZE),
                    write_mip.extent.y.div_ceil(WORKGROUP_SIZE),
                    1,
                ),
                &[self.downscale_bindings[i as usize].clone()],
                bytemuck::bytes_of(&downscale_push),
            );
        }

        let mut upscale_push = UpscalePush {
            bloom_intensity: self.params.float("bloomIntensity"),
            dirt_intensity: self.params.float("dirtIntensity"),
            mip_level: 0,
            _padding: 0,
        };

        for i in (1..mip_levels).rev() {
            upscale_push.mip_level = i;

            let read_mip = bloom_target.mip_level(i);
            let write_mip = bloom_target.mip_level(i - 1);

            graphics.image_barrier(&read_mip, ImageLayout::ComputeWrite, ImageLayout::ComputeRead);
            graphics.image_barrier(&write_mip, ImageLayout::ComputeRead, ImageLayout::ComputeWrite);
            graphics.dispatch(
                upscale_compute.clone(),
                (
                    write_mip.extent.x.div_ceil(WORKGROUP_SIZE),
                    write_mip.extent.y.div_ceil(WORKGROUP_SIZE),
                    1,
                ),
                &[self.upscale_bindings[(i - 1) as usize].clone()],
                bytemuck::bytes_of(&upscale_push),
            );
        }

        graphics.end_debug_region();
    }

    fn clear(&mut self) {
        self.downscale_shader = None;
        self.upscale_shader = None;
        self.downscale_bindings.clear();
        self.upscale_bindings.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
