//! The frame graph: asset model, builder, live graph, node library and
//! per-frame runtime.
//!
//! # Frame lifecycle
//!
//! 1. **Parse**: a textual description becomes a [`FrameGraphAsset`]
//! 2. **Build**: [`FrameGraphBuilder`] creates RHI resources and
//!    instantiates nodes through the registry
//! 3. **Prepare**: nodes hand back optional CPU tasks, joined on the
//!    worker pool
//! 4. **Process**: the runtime walks the node list per camera snapshot,
//!    chunking submissions under the cost budgets

pub mod asset;
pub mod builder;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod runtime;

pub use asset::{FrameGraphAsset, NodeAsset, ParamValue, RenderTargetAsset, SamplerAsset, ValueAsset};
pub use builder::FrameGraphBuilder;
pub use graph::{FrameGraph, NodeSlot};
pub use node::{FrameGraphNode, NodeParams, PrepareTask};
pub use registry::{create_node, is_registered, register_builtin_nodes, register_node};
pub use runtime::FrameOutput;
