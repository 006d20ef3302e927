//! Replays the UI secondary list recorded by the ImGui integration.

use std::any::Any;

use glam::Vec4;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{AttachmentRef, CommandList, SceneViewSnapshot};

const REGION_COLOR: Vec4 = Vec4::new(1.0, 1.0, 0.4, 0.25);

#[derive(Default)]
pub struct RenderImGuiNode {
    params: NodeParams,
}

impl RenderImGuiNode {
    pub const NAME: &'static str = "RenderImGui";
}

impl FrameGraphNode for RenderImGuiNode {
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
        let Some(list) = snapshot.imgui_list.clone() else {
            return;
        };
        let Some(color) = super::resolve_color(&self.params, graph, "color") else {
            return;
        };
        let Some(depth) = super::resolve_depth(&self.params, graph, "depthStencil") else {
            return;
        };

        graphics.begin_debug_region(Self::NAME, REGION_COLOR);
        graphics.execute_secondary(
            vec![list],
            &[AttachmentRef::Texture(color.clone())],
            Some(depth),
            super::full_area(&color),
            None,
            false,
        );
        graphics.end_debug_region();
    }

    fn clear(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
