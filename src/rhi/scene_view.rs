//! Per-frame scene snapshots.
//!
//! The frame graph is a stateless pipeline over [`SceneView`]s: immutable
//! per-frame captures of cameras, drawable proxies and lighting data
//! produced by scene traversal (an external collaborator). The runtime
//! fills in `frame_bindings` before any node runs.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use super::bindings::ShaderBindingSet;
use super::command::CommandList;
use super::material::Material;
use super::resources::{Mesh, RenderTarget};

/// Camera transform and projection parameters for one snapshot.
#[derive(Clone, Copy, Debug)]
pub struct CameraState {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub z_near: f32,
    pub z_far: f32,
    pub fov_y: f32,
    pub aspect: f32,
}

impl CameraState {
    #[must_use]
    pub fn inv_projection(&self) -> Mat4 {
        self.projection.inverse()
    }

    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    #[must_use]
    pub fn inv_view_projection(&self) -> Mat4 {
        self.view_projection().inverse()
    }
}

/// Minimal CPU-side record of a drawable.
///
/// `materials` may be shorter than `meshes`; the unmatched tail of meshes
/// is skipped by every consumer.
#[derive(Clone, Debug)]
pub struct MeshProxy {
    pub world_matrix: Mat4,
    /// Bounding sphere (center, radius) in world space.
    pub sphere_bounds: Vec4,
    pub meshes: Vec<Arc<Mesh>>,
    pub materials: Vec<Arc<Material>>,
}

/// One mesh list entry of a shadow-map update.
#[derive(Clone, Debug)]
pub struct ShadowCaster {
    pub world_matrix: Mat4,
    /// World-space bounding sphere (center, radius), carried from the
    /// source proxy for cross-cascade subtraction.
    pub sphere_bounds: Vec4,
    pub meshes: Vec<Arc<Mesh>>,
}

/// A request to redraw one shadow cascade, assembled by the lighting
/// system before the frame graph runs.
///
/// Cascades are rendered in ascending `cascade_index` order; the
/// `dependencies` list names earlier requests whose geometry this cascade
/// relies on (their meshes were subtracted from `casters` to avoid
/// duplicate work).
#[derive(Clone, Debug)]
pub struct ShadowMapRequest {
    pub light_matrix: Mat4,
    pub shadow_map: Arc<RenderTarget>,
    pub cascade_index: u32,
    pub casters: Vec<ShadowCaster>,
    pub dependencies: Vec<u32>,
}

/// Everything a node may read while recording one camera's work.
#[derive(Clone, Debug, Default)]
pub struct SceneViewSnapshot {
    pub camera: Option<CameraState>,
    pub proxies: Vec<MeshProxy>,
    /// Per-frame uniform block; created and written by the runtime before
    /// the node walk.
    pub frame_bindings: Option<Arc<ShaderBindingSet>>,
    /// Light SSBO + shadow-map sampler array (+ culled-lights grid once
    /// light culling ran).
    pub lights_data: Option<Arc<ShaderBindingSet>>,
    pub total_lights: u32,
    pub shadow_maps_to_update: Vec<ShadowMapRequest>,
    /// Pre-recorded secondary lists consumed by the debug-draw and imgui
    /// nodes.
    pub debug_draw_list: Option<Arc<CommandList>>,
    pub imgui_list: Option<Arc<CommandList>>,
    /// Copied from the owning [`SceneView`] by the runtime.
    pub delta_time: f32,
}

/// The frame graph's per-frame input: one snapshot per camera.
#[derive(Clone, Debug, Default)]
pub struct SceneView {
    pub snapshots: Vec<SceneViewSnapshot>,
    pub delta_time: f32,
    pub current_time: f32,
}
