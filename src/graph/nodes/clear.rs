//! Clears a color target (or the back buffer) to a constant.

use std::any::Any;

use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{CommandList, SceneViewSnapshot};

#[derive(Default)]
pub struct ClearNode {
    params: NodeParams,
}

impl ClearNode {
    pub const NAME: &'static str = "Clear";
}

impl FrameGraphNode for ClearNode {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    fn process(
        &mut self,
        graph: &FrameGraph,
        _transfer: &mut CommandList,
        graphics: &mut CommandList,
        _snapshot: &SceneViewSnapshot,
    ) {
        let Some(color) = super::resolve_color(&self.params, graph, "color") else {
            warn!("Clear: no color attachment and no BackBuffer");
            return;
        };

        graphics.clear_image(&color, self.params.vec4("clearColor"));
    }

    fn clear(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
