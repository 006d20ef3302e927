#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Riptide — a data-driven frame-graph renderer core.
//!
//! A declarative pipeline that compiles a per-frame sequence of GPU work
//! from a textual description plus a library of node types. The frame
//! graph owns transient GPU resources, records typed command streams
//! against an abstract RHI and chains submissions across the transfer
//! and graphics queues with explicit semaphores.

pub mod assets;
pub mod error;
pub mod graph;
pub mod lighting;
pub mod math;
pub mod rhi;
pub mod stars;

pub use assets::{AssetSource, NullAssetSource};
pub use error::{RendererError, Result};
pub use graph::{FrameGraph, FrameGraphAsset, FrameGraphBuilder, FrameGraphNode, FrameOutput};
pub use lighting::{LightKind, LightSource, LightingState};
pub use rhi::{Device, DeviceDesc, SceneView, SceneViewSnapshot};
