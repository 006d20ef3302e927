//! The builtin node library.
//!
//! One file per node type. Every node follows the same discipline: read
//! parameters, fall back to the reserved `BackBuffer`/`DepthBuffer`
//! names for absent attachments, and when a dependency is still missing
//! (shader compiling, resource never produced) log and return without
//! touching either command list's balance.

mod blit;
mod bloom;
mod clear;
mod copy_to_ram;
mod debug_draw;
mod depth_hi_z;
mod depth_prepass;
mod environment;
mod eye_adaptation;
mod light_culling;
mod linearize_depth;
mod particles;
mod post_process;
mod render_imgui;
mod render_scene;
mod shadow_prepass;
mod sky;
mod volumetric_fog;

pub use blit::BlitNode;
pub use bloom::BloomNode;
pub use clear::ClearNode;
pub use copy_to_ram::CopyTextureToRamNode;
pub use debug_draw::DebugDrawNode;
pub use depth_hi_z::DepthHighZNode;
pub use depth_prepass::DepthPrepassNode;
pub use environment::EnvironmentNode;
pub use eye_adaptation::EyeAdaptationNode;
pub use light_culling::LightCullingNode;
pub use linearize_depth::LinearizeDepthNode;
pub use particles::ParticlesNode;
pub use post_process::PostProcessNode;
pub use render_imgui::RenderImGuiNode;
pub use render_scene::RenderSceneNode;
pub use shadow_prepass::ShadowPrepassNode;
pub use sky::SkyNode;
pub use volumetric_fog::VolumetricFogNode;

use std::sync::Arc;

use crate::graph::graph::FrameGraph;
use crate::graph::node::NodeParams;
use crate::rhi::Texture;

/// Reserved name of the final color target.
pub const BACK_BUFFER: &str = "BackBuffer";

/// Reserved name of the final depth target.
pub const DEPTH_BUFFER: &str = "DepthBuffer";

/// Resolves a color attachment parameter, falling back to `BackBuffer`.
fn resolve_color(
    params: &NodeParams,
    graph: &FrameGraph,
    name: &str,
) -> Option<Arc<Texture>> {
    params.resolved_attachment(name).or_else(|| {
        graph
            .get_render_target(BACK_BUFFER)
            .map(|target| target.texture().clone())
    })
}

/// Resolves a depth attachment parameter, falling back to `DepthBuffer`.
fn resolve_depth(
    params: &NodeParams,
    graph: &FrameGraph,
    name: &str,
) -> Option<Arc<Texture>> {
    params.resolved_attachment(name).or_else(|| {
        graph
            .get_render_target(DEPTH_BUFFER)
            .map(|target| target.texture().clone())
    })
}

/// Full-extent render area of a texture.
fn full_area(texture: &Texture) -> glam::Vec4 {
    glam::Vec4::new(0.0, 0.0, texture.extent.x as f32, texture.extent.y as f32)
}
