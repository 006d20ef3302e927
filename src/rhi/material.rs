//! Materials: the pipeline objects of the RHI.
//!
//! A material is keyed by vertex layout, topology, render state and the
//! shader set, plus an optional binding set holding its instance data.

use std::sync::Arc;

use super::bindings::ShaderBindingSet;
use super::resources::{Shader, ShaderSet, VertexLayout, next_resource_id};
use super::types::{PrimitiveTopology, RenderState, ResourceId};

#[derive(Debug)]
pub struct Material {
    id: ResourceId,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub render_state: RenderState,
    pub shader: Arc<ShaderSet>,
    pub bindings: Option<Arc<ShaderBindingSet>>,
}

impl Material {
    pub(crate) fn new(
        vertex_layout: VertexLayout,
        topology: PrimitiveTopology,
        render_state: RenderState,
        shader: Arc<ShaderSet>,
        bindings: Option<Arc<ShaderBindingSet>>,
    ) -> Self {
        Self {
            id: next_resource_id(),
            vertex_layout,
            topology,
            render_state,
            shader,
            bindings,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[must_use]
    pub fn vertex_shader(&self) -> Option<Arc<Shader>> {
        if self.shader.is_ready() {
            self.shader.vertex.clone()
        } else {
            None
        }
    }

    #[must_use]
    pub fn fragment_shader(&self) -> Option<Arc<Shader>> {
        if self.shader.is_ready() {
            self.shader.fragment.clone()
        } else {
            None
        }
    }

    /// Hash of the binding layout; batches with equal hashes can share a
    /// descriptor layout.
    #[must_use]
    pub fn bindings_compatibility(&self) -> u64 {
        self.bindings.as_ref().map_or(0, |b| b.compatibility_hash())
    }

    /// Scene-render readiness: both raster shaders compiled and a
    /// non-empty binding set attached. Not-ready materials are skipped
    /// for the frame, never partially bound.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.vertex_shader().is_some()
            && self.fragment_shader().is_some()
            && self.bindings.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Depth-only readiness: shaders compiled and depth writes enabled;
    /// generated depth materials carry no instance bindings.
    #[must_use]
    pub fn is_depth_ready(&self) -> bool {
        self.vertex_shader().is_some()
            && self.fragment_shader().is_some()
            && self.render_state.z_write
    }
}
