//! Frame-graph node model.
//!
//! A node is one polymorphic unit of GPU work. Concrete node types embed
//! [`NodeParams`] (their string / vector / resource parameter tables plus
//! the human tag) and implement [`FrameGraphNode`]; the parser sets
//! parameters between construction and the first `process`, and nodes
//! read them while recording.
//!
//! Missing dependencies never abort a frame: a node that cannot record
//! (shader still compiling, referenced resource absent) logs and returns,
//! leaving both command lists balanced, and tries again next frame.

use std::any::Any;
use std::sync::Arc;

use glam::Vec4;
use rustc_hash::FxHashMap;

use crate::rhi::{CommandList, RhiResource, SceneViewSnapshot, Texture};

use super::graph::FrameGraph;

/// A deferred preparation step runnable on the worker pool; the runtime
/// joins all of these before any `process` call.
pub type PrepareTask = Box<dyn FnOnce() + Send + 'static>;

/// Parameter storage shared by every node type.
#[derive(Default, Debug)]
pub struct NodeParams {
    strings: FxHashMap<String, String>,
    vectors: FxHashMap<String, Vec4>,
    resources: FxHashMap<String, RhiResource>,
    tag: Option<String>,
}

impl NodeParams {
    pub fn set_string(&mut self, name: &str, value: &str) {
        self.strings.insert(name.to_owned(), value.to_owned());
    }

    pub fn set_vec4(&mut self, name: &str, value: Vec4) {
        self.vectors.insert(name.to_owned(), value);
    }

    /// Resources obtained this way are borrowed from the graph; a node
    /// never frees them.
    pub fn set_resource(&mut self, name: &str, value: RhiResource) {
        self.resources.insert(name.to_owned(), value);
    }

    /// Absent keys read as the empty string.
    #[must_use]
    pub fn string(&self, name: &str) -> &str {
        self.strings.get(name).map_or("", String::as_str)
    }

    #[must_use]
    pub fn try_string(&self, name: &str) -> Option<&str> {
        self.strings.get(name).map(String::as_str)
    }

    /// Absent keys read as zero.
    #[must_use]
    pub fn vec4(&self, name: &str) -> Vec4 {
        self.vectors.get(name).copied().unwrap_or(Vec4::ZERO)
    }

    #[must_use]
    pub fn float(&self, name: &str) -> f32 {
        self.vec4(name).x
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<RhiResource> {
        self.resources.get(name).cloned()
    }

    /// Resolves a resource parameter to its single-sample image: a
    /// Surface yields its resolve target, a texture-like resource itself.
    /// Hides MSAA resolve from most consumers.
    #[must_use]
    pub fn resolved_attachment(&self, name: &str) -> Option<Arc<Texture>> {
        self.resources
            .get(name)
            .and_then(RhiResource::resolved_attachment)
    }

    #[must_use]
    pub fn num_vectors(&self) -> usize {
        self.vectors.len()
    }

    pub fn vectors(&self) -> impl Iterator<Item = (&String, &Vec4)> {
        self.vectors.iter()
    }

    pub fn resources(&self) -> impl Iterator<Item = (&String, &RhiResource)> {
        self.resources.iter()
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag = Some(tag.to_owned());
    }
}

/// Polymorphic unit of GPU work.
pub trait FrameGraphNode: Send + Any {
    /// The registered type name, stable across processes.
    fn type_name(&self) -> &'static str;

    fn params(&self) -> &NodeParams;

    fn params_mut(&mut self) -> &mut NodeParams;

    /// Optional CPU-side preparation scheduled before `process`.
    fn prepare(
        &mut self,
        _graph: &FrameGraph,
        _snapshot: &SceneViewSnapshot,
    ) -> Option<PrepareTask> {
        None
    }

    /// Records the node's work into the frame's command lists.
    fn process(
        &mut self,
        graph: &FrameGraph,
        transfer: &mut CommandList,
        graphics: &mut CommandList,
        snapshot: &SceneViewSnapshot,
    );

    /// Releases node-owned caches; called at graph teardown, not per
    /// frame.
    fn clear(&mut self);

    /// Downcast support for the rare cross-node parameter read.
    fn as_any(&self) -> &dyn Any;
}
