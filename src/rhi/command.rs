//! Command lists.
//!
//! Recording produces a typed [`Command`] stream a backend replays
//! against the GPU. The list tracks an opaque GPU cost and the number of
//! recorded commands — the frame-graph runtime chunks submissions on
//! those two budgets — plus render-pass/debug-region balance, which must
//! be zero by submit time.

use std::sync::Arc;

use glam::{IVec4, UVec2, Vec2, Vec4};
use smallvec::SmallVec;

use super::bindings::{ShaderBinding, ShaderBindingSet};
use super::material::Material;
use super::resources::{Buffer, Shader, Surface, Texture};
use super::types::{ImageLayout, QueueKind, TextureFormat};

/// A color attachment: either a plain texture or an MSAA surface that the
/// backend resolves at pass end.
#[derive(Clone, Debug)]
pub enum AttachmentRef {
    Texture(Arc<Texture>),
    Surface(Arc<Surface>),
}

impl AttachmentRef {
    /// The image the pass ultimately produces.
    #[must_use]
    pub fn resolved(&self) -> Arc<Texture> {
        match self {
            Self::Texture(texture) => texture.clone(),
            Self::Surface(surface) => surface.resolved.clone(),
        }
    }
}

/// One recorded RHI operation.
#[derive(Clone, Debug)]
pub enum Command {
    BeginDebugRegion {
        label: String,
        color: Vec4,
    },
    EndDebugRegion,
    BeginRenderPass {
        colors: SmallVec<[AttachmentRef; 2]>,
        depth: Option<Arc<Texture>>,
        area: Vec4,
        clear_color: Option<Vec4>,
        clear_depth: bool,
        store_depth: bool,
    },
    EndRenderPass,
    ImageBarrier {
        image: Arc<Texture>,
        format: TextureFormat,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    BlitImage {
        src: Arc<Texture>,
        dst: Arc<Texture>,
        src_region: IVec4,
        dst_region: IVec4,
    },
    ClearImage {
        image: Arc<Texture>,
        color: Vec4,
    },
    Dispatch {
        shader: Arc<Shader>,
        groups: (u32, u32, u32),
        bindings: SmallVec<[Arc<ShaderBindingSet>; 3]>,
        push_constants: Vec<u8>,
    },
    BindMaterial {
        material: Arc<Material>,
    },
    BindShaderBindings {
        material: Arc<Material>,
        sets: SmallVec<[Arc<ShaderBindingSet>; 3]>,
    },
    BindVertexBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
    },
    SetViewport {
        viewport: Vec4,
        scissor_origin: Vec2,
        scissor_extent: Vec2,
        depth_range: Vec2,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndexedIndirect {
        buffer: Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    UpdateBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        data: Vec<u8>,
    },
    UpdateShaderBinding {
        binding: Arc<ShaderBinding>,
        offset: u64,
        data: Vec<u8>,
    },
    PushConstants {
        material: Arc<Material>,
        data: Vec<u8>,
    },
    CopyImageToBuffer {
        image: Arc<Texture>,
        buffer: Arc<Buffer>,
    },
    GenerateMipmaps {
        image: Arc<Texture>,
    },
    EquirectToCubemap {
        src: Arc<Texture>,
        dst: Arc<Texture>,
    },
    ExecuteSecondary {
        lists: Vec<Arc<CommandList>>,
        colors: SmallVec<[AttachmentRef; 2]>,
        depth: Option<Arc<Texture>>,
        area: Vec4,
        clear_color: Option<Vec4>,
        store_depth: bool,
    },
}

impl Command {
    /// Opaque device cost used by the chunking budget.
    #[must_use]
    pub fn gpu_cost(&self) -> u32 {
        match self {
            Self::BeginDebugRegion { .. } | Self::EndDebugRegion => 0,
            Self::ImageBarrier { .. }
            | Self::BindMaterial { .. }
            | Self::BindShaderBindings { .. }
            | Self::BindVertexBuffer { .. }
            | Self::BindIndexBuffer { .. }
            | Self::SetViewport { .. }
            | Self::PushConstants { .. } => 1,
            Self::BeginRenderPass { .. } | Self::EndRenderPass => 2,
            Self::UpdateBuffer { .. } | Self::UpdateShaderBinding { .. } => 3,
            Self::BlitImage { .. }
            | Self::ClearImage { .. }
            | Self::CopyImageToBuffer { .. }
            | Self::GenerateMipmaps { .. }
            | Self::EquirectToCubemap { .. } => 5,
            Self::DrawIndexed { .. } | Self::DrawIndexedIndirect { .. } => 10,
            Self::Dispatch { .. } => 15,
            Self::ExecuteSecondary { lists, .. } => {
                2 + lists.iter().map(|l| l.gpu_cost()).sum::<u32>()
            }
        }
    }
}

/// An ordered command stream recorded on one queue.
#[derive(Debug)]
pub struct CommandList {
    queue: QueueKind,
    secondary: bool,
    commands: Vec<Command>,
    num_commands: u32,
    gpu_cost: u32,
    open_passes: i32,
    open_regions: i32,
}

impl CommandList {
    pub(crate) fn new(queue: QueueKind, secondary: bool) -> Self {
        Self {
            queue,
            secondary,
            commands: Vec::new(),
            num_commands: 0,
            gpu_cost: 0,
            open_passes: 0,
            open_regions: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    #[inline]
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.secondary
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands, debug regions excluded; one of the
    /// two chunking budgets.
    #[inline]
    #[must_use]
    pub fn num_commands(&self) -> u32 {
        self.num_commands
    }

    #[inline]
    #[must_use]
    pub fn gpu_cost(&self) -> u32 {
        self.gpu_cost
    }

    /// Every `begin_render_pass`/`begin_debug_region` has been matched.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.open_passes == 0 && self.open_regions == 0
    }

    fn record(&mut self, command: Command) {
        if !matches!(
            command,
            Command::BeginDebugRegion { .. } | Command::EndDebugRegion
        ) {
            self.num_commands += 1;
        }
        self.gpu_cost += command.gpu_cost();
        self.commands.push(command);
    }

    // ── Recording API ──────────────────────────────────────────────────

    pub fn begin_debug_region(&mut self, label: &str, color: Vec4) {
        self.open_regions += 1;
        self.record(Command::BeginDebugRegion {
            label: label.to_owned(),
            color,
        });
    }

    pub fn end_debug_region(&mut self) {
        debug_assert!(self.open_regions > 0, "unbalanced debug region");
        self.open_regions -= 1;
        self.record(Command::EndDebugRegion);
    }

    pub fn begin_render_pass(
        &mut self,
        colors: &[AttachmentRef],
        depth: Option<Arc<Texture>>,
        area: Vec4,
        clear_color: Option<Vec4>,
        clear_depth: bool,
        store_depth: bool,
    ) {
        self.open_passes += 1;
        self.record(Command::BeginRenderPass {
            colors: colors.iter().cloned().collect(),
            depth,
            area,
            clear_color,
            clear_depth,
            store_depth,
        });
    }

    pub fn end_render_pass(&mut self) {
        debug_assert!(self.open_passes > 0, "unbalanced render pass");
        self.open_passes -= 1;
        self.record(Command::EndRenderPass);
    }

    pub fn image_barrier(&mut self, image: &Arc<Texture>, old: ImageLayout, new: ImageLayout) {
        self.record(Command::ImageBarrier {
            image: image.clone(),
            format: image.format,
            old_layout: old,
            new_layout: new,
        });
    }

    /// Transition from the image's resting layout.
    pub fn transition(&mut self, image: &Arc<Texture>, new: ImageLayout) {
        self.image_barrier(image, image.default_layout(), new);
    }

    pub fn blit_image(
        &mut self,
        src: &Arc<Texture>,
        dst: &Arc<Texture>,
        src_region: IVec4,
        dst_region: IVec4,
    ) {
        self.record(Command::BlitImage {
            src: src.clone(),
            dst: dst.clone(),
            src_region,
            dst_region,
        });
    }

    pub fn clear_image(&mut self, image: &Arc<Texture>, color: Vec4) {
        self.record(Command::ClearImage {
            image: image.clone(),
            color,
        });
    }

    pub fn dispatch(
        &mut self,
        shader: Arc<Shader>,
        groups: (u32, u32, u32),
        bindings: &[Arc<ShaderBindingSet>],
        push_constants: &[u8],
    ) {
        self.record(Command::Dispatch {
            shader,
            groups,
            bindings: bindings.iter().cloned().collect(),
            push_constants: push_constants.to_vec(),
        });
    }

    pub fn bind_material(&mut self, material: &Arc<Material>) {
        self.record(Command::BindMaterial {
            material: material.clone(),
        });
    }

    pub fn bind_shader_bindings(
        &mut self,
        material: &Arc<Material>,
        sets: &[Arc<ShaderBindingSet>],
    ) {
        self.record(Command::BindShaderBindings {
            material: material.clone(),
            sets: sets.iter().cloned().collect(),
        });
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64) {
        self.record(Command::BindVertexBuffer {
            buffer: buffer.clone(),
            offset,
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64) {
        self.record(Command::BindIndexBuffer {
            buffer: buffer.clone(),
            offset,
        });
    }

    pub fn set_viewport(
        &mut self,
        viewport: Vec4,
        scissor_origin: Vec2,
        scissor_extent: Vec2,
        depth_range: Vec2,
    ) {
        self.record(Command::SetViewport {
            viewport,
            scissor_origin,
            scissor_extent,
            depth_range,
        });
    }

    /// Full-extent viewport and scissor.
    pub fn set_default_viewport(&mut self, extent: UVec2) {
        let size = Vec2::new(extent.x as f32, extent.y as f32);
        self.set_viewport(
            Vec4::new(0.0, 0.0, size.x, size.y),
            Vec2::ZERO,
            size,
            Vec2::new(0.0, 1.0),
        );
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.record(Command::DrawIndexedIndirect {
            buffer: buffer.clone(),
            offset,
            draw_count,
            stride,
        });
    }

    pub fn update_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, data: &[u8]) {
        self.record(Command::UpdateBuffer {
            buffer: buffer.clone(),
            offset,
            data: data.to_vec(),
        });
    }

    pub fn update_shader_binding(
        &mut self,
        binding: &Arc<ShaderBinding>,
        offset: u64,
        data: &[u8],
    ) {
        self.record(Command::UpdateShaderBinding {
            binding: binding.clone(),
            offset,
            data: data.to_vec(),
        });
    }

    pub fn push_constants(&mut self, material: &Arc<Material>, data: &[u8]) {
        self.record(Command::PushConstants {
            material: material.clone(),
            data: data.to_vec(),
        });
    }

    pub fn copy_image_to_buffer(&mut self, image: &Arc<Texture>, buffer: &Arc<Buffer>) {
        self.record(Command::CopyImageToBuffer {
            image: image.clone(),
            buffer: buffer.clone(),
        });
    }

    pub fn generate_mipmaps(&mut self, image: &Arc<Texture>) {
        self.record(Command::GenerateMipmaps {
            image: image.clone(),
        });
    }

    pub fn equirect_to_cubemap(&mut self, src: &Arc<Texture>, dst: &Arc<Texture>) {
        self.record(Command::EquirectToCubemap {
            src: src.clone(),
            dst: dst.clone(),
        });
    }

    /// Replays pre-recorded secondary lists inside an implicit render
    /// pass over the given attachments.
    pub fn execute_secondary(
        &mut self,
        lists: Vec<Arc<CommandList>>,
        colors: &[AttachmentRef],
        depth: Option<Arc<Texture>>,
        area: Vec4,
        clear_color: Option<Vec4>,
        store_depth: bool,
    ) {
        self.record(Command::ExecuteSecondary {
            lists,
            colors: colors.iter().cloned().collect(),
            depth,
            area,
            clear_color,
            store_depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::resources::{Texture, TextureKind};
    use crate::rhi::types::{Clamping, Filtration, TextureUsage};

    fn color_texture() -> Arc<Texture> {
        Arc::new(Texture::new(
            UVec2::new(8, 8),
            1,
            TextureFormat::Rgba8Srgb,
            TextureKind::Texture2d,
            TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLED,
            Filtration::Linear,
            Clamping::Clamp,
        ))
    }

    #[test]
    fn balance_tracks_passes_and_regions() {
        let mut list = CommandList::new(QueueKind::Graphics, false);
        list.begin_debug_region("pass", Vec4::ONE);
        list.begin_render_pass(
            &[AttachmentRef::Texture(color_texture())],
            None,
            Vec4::new(0.0, 0.0, 8.0, 8.0),
            Some(Vec4::ZERO),
            false,
            false,
        );
        assert!(!list.is_balanced());
        list.end_render_pass();
        list.end_debug_region();
        assert!(list.is_balanced());
    }

    #[test]
    fn cost_accumulates_per_command() {
        let mut list = CommandList::new(QueueKind::Graphics, false);
        let texture = color_texture();
        list.clear_image(&texture, Vec4::ONE);
        list.draw_indexed(6, 1, 0, 0, 0);
        assert_eq!(list.gpu_cost(), 15);
        assert_eq!(list.num_commands(), 2);
    }

    #[test]
    fn debug_regions_cost_nothing_and_do_not_count() {
        let mut list = CommandList::new(QueueKind::Compute, false);
        list.begin_debug_region("upload", Vec4::ONE);
        list.end_debug_region();
        assert_eq!(list.gpu_cost(), 0);
        assert_eq!(list.num_commands(), 0);
        assert_eq!(list.commands().len(), 2);
    }
}
