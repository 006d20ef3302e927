//! Replays the frame's pre-recorded debug-draw secondary list.

use std::any::Any;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{AttachmentRef, CommandList, ImageLayout, SceneViewSnapshot};

#[derive(Default)]
pub struct DebugDrawNode {
    params: NodeParams,
}

impl DebugDrawNode {
    pub const NAME: &'static str = "DebugDraw";
}

impl FrameGraphNode for DebugDrawNode {
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
        snapshot: &SceneViewSnapshot,
    ) {
        let Some(list) = snapshot.debug_draw_list.clone() else {
            return;
        };
        let Some(color) = super::resolve_color(&self.params, graph, "color") else {
            return;
        };
        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            return;
        };

        graphics.image_barrier(
            &color,
            color.default_layout(),
            ImageLayout::ColorAttachmentOptimal,
        );
        graphics.execute_secondary(
            vec![list],
            &[AttachmentRef::Texture(color.clone())],
            Some(depth),
            super::full_area(&color),
            None,
            false,
        );
        graphics.image_barrier(
            &color,
            ImageLayout::ColorAttachmentOptimal,
            color.default_layout(),
        );
    }

    fn clear(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
