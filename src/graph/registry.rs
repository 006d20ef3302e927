//! Node type registry.
//!
//! A process-wide name→factory map. Builtin node types register once,
//! before the first graph is parsed; user crates may add their own types
//! with [`register_node`] at startup. The map is effectively write-only
//! after initialisation and safe to read from any thread. An unknown
//! name during building is logged and the node skipped; the rest of the
//! graph builds normally.

use std::sync::{Once, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::node::FrameGraphNode;

pub type NodeFactory = fn() -> Box<dyn FrameGraphNode>;

static REGISTRY: OnceLock<RwLock<FxHashMap<&'static str, NodeFactory>>> = OnceLock::new();
static BUILTINS: Once = Once::new();

fn registry() -> &'static RwLock<FxHashMap<&'static str, NodeFactory>> {
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Registers a node type under its stable name. Re-registration replaces
/// the factory; the last writer wins.
pub fn register_node(name: &'static str, factory: NodeFactory) {
    registry().write().insert(name, factory);
}

/// Instantiates a node by registered type name.
#[must_use]
pub fn create_node(name: &str) -> Option<Box<dyn FrameGraphNode>> {
    registry().read().get(name).map(|factory| factory())
}

#[must_use]
pub fn is_registered(name: &str) -> bool {
    registry().read().contains_key(name)
}

/// Registers the builtin node library. Idempotent; the builder calls it
/// before instantiating any node.
pub fn register_builtin_nodes() {
    use super::nodes;

    BUILTINS.call_once(|| {
        register_node(nodes::ClearNode::NAME, || {
            Box::new(nodes::ClearNode::default())
        });
        register_node(nodes::BlitNode::NAME, || Box::new(nodes::BlitNode::default()));
        register_node(nodes::DepthPrepassNode::NAME, || {
            Box::new(nodes::DepthPrepassNode::default())
        });
        register_node(nodes::RenderSceneNode::NAME, || {
            Box::new(nodes::RenderSceneNode::default())
        });
        register_node(nodes::ShadowPrepassNode::NAME, || {
            Box::new(nodes::ShadowPrepassNode::default())
        });
        register_node(nodes::LightCullingNode::NAME, || {
            Box::new(nodes::LightCullingNode::default())
        });
        register_node(nodes::BloomNode::NAME, || {
            Box::new(nodes::BloomNode::default())
        });
        register_node(nodes::EyeAdaptationNode::NAME, || {
            Box::new(nodes::EyeAdaptationNode::default())
        });
        register_node(nodes::SkyNode::NAME, || Box::new(nodes::SkyNode::default()));
        register_node(nodes::EnvironmentNode::NAME, || {
            Box::new(nodes::EnvironmentNode::default())
        });
        register_node(nodes::PostProcessNode::NAME, || {
            Box::new(nodes::PostProcessNode::default())
        });
        register_node(nodes::DebugDrawNode::NAME, || {
            Box::new(nodes::DebugDrawNode::default())
        });
        register_node(nodes::RenderImGuiNode::NAME, || {
            Box::new(nodes::RenderImGuiNode::default())
        });
        register_node(nodes::LinearizeDepthNode::NAME, || {
            Box::new(nodes::LinearizeDepthNode::default())
        });
        register_node(nodes::DepthHighZNode::NAME, || {
            Box::new(nodes::DepthHighZNode::default())
        });
        register_node(nodes::VolumetricFogNode::NAME, || {
            Box::new(nodes::VolumetricFogNode::default())
        });
        register_node(nodes::CopyTextureToRamNode::NAME, || {
            Box::new(nodes::CopyTextureToRamNode::default())
        });
        register_node(nodes::ParticlesNode::NAME, || {
            Box::new(nodes::ParticlesNode::default())
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_nodes_are_registered_once() {
        register_builtin_nodes();
        register_builtin_nodes();
        assert!(is_registered("Clear"));
        assert!(is_registered("RenderScene"));
        assert!(is_registered("ExperimentalParticles"));
        assert!(!is_registered("NotANode"));
    }

    #[test]
    fn create_node_instantiates_by_name() {
        register_builtin_nodes();
        let node = create_node("Blit").unwrap();
        assert_eq!(node.type_name(), "Blit");
        assert!(create_node("NotANode").is_none());
    }
}
