//! Full-extent image to image copy.

use std::any::Any;

use glam::IVec4;
use log::warn;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{CommandList, SceneViewSnapshot};

#[derive(Default)]
pub struct BlitNode {
    params: NodeParams,
}

impl BlitNode {
    pub const NAME: &'static str = "Blit";
}

impl FrameGraphNode for BlitNode {
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
        let Some(src) = self.params.resolved_attachment("src") else {
            warn!("Blit: missing 'src'");
            return;
        };
        let Some(dst) = super::resolve_color(&self.params, graph, "dst") else {
            warn!("Blit: missing 'dst' and no BackBuffer");
            return;
        };

        let src_region = IVec4::new(0, 0, src.extent.x as i32, src.extent.y as i32);
        let dst_region = IVec4::new(0, 0, dst.extent.x as i32, dst.extent.y as i32);
        graphics.blit_image(&src, &dst, src_region, dst_region);
    }

    fn clear(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
