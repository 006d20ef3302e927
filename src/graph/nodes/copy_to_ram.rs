//! One-shot GPU→host texture readback.
//!
//! Idle until a capture is requested; then transitions the source for
//! transfer, sizes a host-visible buffer to the image (with slack) and
//! issues the copy. The flag clears after one frame.

use std::any::Any;
use std::sync::Arc;

use glam::Vec4;

use crate::graph::graph::FrameGraph;
use crate::graph::node::{FrameGraphNode, NodeParams};
use crate::rhi::{
    Buffer, BufferUsage, CommandList, ImageLayout, MemoryProperty, SceneViewSnapshot, Texture,
};

const READBACK_SLACK: u64 = 512;

#[derive(Default)]
pub struct CopyTextureToRamNode {
    params: NodeParams,
    capture_this_frame: bool,
    texture: Option<Arc<Texture>>,
    cpu_buffer: Option<Arc<Buffer>>,
}

impl CopyTextureToRamNode {
    pub const NAME: &'static str = "CopyTextureToRam";

    /// Arms a capture for the next processed frame.
    pub fn request_capture(&mut self) {
        self.capture_this_frame = true;
    }

    /// The last captured source image, if any.
    #[must_use]
    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.texture.clone()
    }

    /// The host-visible buffer holding the last readback.
    #[must_use]
    pub fn readback_buffer(&self) -> Option<Arc<Buffer>> {
        self.cpu_buffer.clone()
    }
}

impl FrameGraphNode for CopyTextureToRamNode {
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
        if !self.capture_this_frame {
            return;
        }

        if let Some(texture) = self.params.resolved_attachment("src") {
            graphics.image_barrier(
                &texture,
                texture.default_layout(),
                ImageLayout::TransferSrcOptimal,
            );

            let needed = texture.byte_size();
            if self
                .cpu_buffer
                .as_ref()
                .is_none_or(|buffer| buffer.size() < needed)
            {
                self.cpu_buffer = Some(graph.device().create_buffer(
                    needed + READBACK_SLACK,
                    BufferUsage::TRANSFER_DST,
                    MemoryProperty::HOST_COHERENT | MemoryProperty::HOST_VISIBLE,
                ));
            }

            graphics.begin_debug_region(Self::NAME, Vec4::ONE);
            graphics.copy_image_to_buffer(
                &texture,
                self.cpu_buffer.as_ref().expect("readback buffer"),
            );
            graphics.end_debug_region();

            self.texture = Some(texture);
        }

        self.capture_this_frame = false;
    }

    fn clear(&mut self) {
        self.texture = None;
        self.cpu_buffer = None;
        self.capture_this_frame = false;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
