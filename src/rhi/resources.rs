//! RHI resource handles.
//!
//! All handles are reference counted (`Arc`); the frame graph's tables
//! hold strong references for the lifetime of the graph, nodes re-resolve
//! borrowed resources by name each frame. A handle carries enough metadata
//! (extent, format, usage, default layout) for command recording and
//! validation; the backing GPU objects live behind the device boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use glam::UVec2;

use super::types::{
    BufferUsage, Clamping, Filtration, ImageLayout, MemoryProperty, ResourceId, TextureFormat,
    TextureUsage,
};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique resource id.
pub(crate) fn next_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Textures ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    Texture2d,
    Texture3d,
    Cubemap,
}

/// A single addressable image: a plain texture, one mip of a render
/// target, or one mip of a cubemap.
#[derive(Debug)]
pub struct Texture {
    pub(crate) id: ResourceId,
    pub extent: UVec2,
    pub depth: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
    pub usage: TextureUsage,
    pub filtration: Filtration,
    pub clamping: Clamping,
    default_layout: ImageLayout,
}

impl Texture {
    pub(crate) fn new(
        extent: UVec2,
        depth: u32,
        format: TextureFormat,
        kind: TextureKind,
        usage: TextureUsage,
        filtration: Filtration,
        clamping: Clamping,
    ) -> Self {
        let default_layout = if format.is_depth() {
            ImageLayout::DepthStencilAttachmentOptimal
        } else if usage.contains(TextureUsage::STORAGE) {
            ImageLayout::General
        } else {
            ImageLayout::ShaderReadOnlyOptimal
        };
        Self {
            id: next_resource_id(),
            extent,
            depth,
            format,
            kind,
            usage,
            filtration,
            clamping,
            default_layout,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Layout the image rests in between passes.
    #[inline]
    #[must_use]
    pub fn default_layout(&self) -> ImageLayout {
        self.default_layout
    }

    /// Tightly packed byte size of the whole image, used to size
    /// host-visible readback buffers.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.extent.x) * u64::from(self.extent.y) * u64::from(self.depth)
            * u64::from(self.format.bytes_per_pixel())
    }
}

/// A texture with N mip levels, each addressable as its own [`Texture`].
#[derive(Debug)]
pub struct RenderTarget {
    root: Arc<Texture>,
    mips: Vec<Arc<Texture>>,
}

impl RenderTarget {
    pub(crate) fn with_mips(root: Texture, mip_levels: u32) -> Self {
        let root = Arc::new(root);
        let mips = (0..mip_levels.max(1))
            .map(|level| {
                if level == 0 {
                    root.clone()
                } else {
                    let extent = UVec2::new(
                        (root.extent.x >> level).max(1),
                        (root.extent.y >> level).max(1),
                    );
                    Arc::new(Texture::new(
                        extent,
                        1,
                        root.format,
                        root.kind,
                        root.usage,
                        root.filtration,
                        root.clamping,
                    ))
                }
            })
            .collect();
        Self { root, mips }
    }

    #[inline]
    #[must_use]
    pub fn texture(&self) -> &Arc<Texture> {
        &self.root
    }

    #[inline]
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    /// Mip `level` as its own image. Level 0 aliases the root texture.
    #[must_use]
    pub fn mip_level(&self, level: u32) -> Arc<Texture> {
        self.mips[level as usize].clone()
    }
}

/// MSAA color target paired with its single-sample resolve target.
#[derive(Debug)]
pub struct Surface {
    pub target: Arc<Texture>,
    pub resolved: Arc<Texture>,
    needs_resolve: bool,
}

impl Surface {
    pub(crate) fn new(target: Arc<Texture>, resolved: Arc<Texture>, needs_resolve: bool) -> Self {
        Self {
            target,
            resolved,
            needs_resolve,
        }
    }

    #[inline]
    #[must_use]
    pub fn needs_resolve(&self) -> bool {
        self.needs_resolve
    }
}

/// Six faces by N mips; the root texture addresses the whole chain,
/// `mip_level` one ring of six faces.
#[derive(Debug)]
pub struct Cubemap {
    root: Arc<Texture>,
    mips: Vec<Arc<Texture>>,
}

impl Cubemap {
    pub(crate) fn with_mips(root: Texture, mip_levels: u32) -> Self {
        let root = Arc::new(root);
        let mips = (0..mip_levels.max(1))
            .map(|level| {
                if level == 0 {
                    root.clone()
                } else {
                    let extent = UVec2::new(
                        (root.extent.x >> level).max(1),
                        (root.extent.y >> level).max(1),
                    );
                    Arc::new(Texture::new(
                        extent,
                        1,
                        root.format,
                        TextureKind::Cubemap,
                        root.usage,
                        root.filtration,
                        root.clamping,
                    ))
                }
            })
            .collect();
        Self { root, mips }
    }

    #[inline]
    #[must_use]
    pub fn texture(&self) -> &Arc<Texture> {
        &self.root
    }

    #[inline]
    #[must_use]
    pub fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    #[must_use]
    pub fn mip_level(&self, level: u32) -> Arc<Texture> {
        self.mips[level as usize].clone()
    }
}

// ─── Buffers and meshes ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Buffer {
    pub(crate) id: ResourceId,
    size: u64,
    offset: u64,
    pub usage: BufferUsage,
    pub memory: MemoryProperty,
}

impl Buffer {
    pub(crate) fn new(size: u64, usage: BufferUsage, memory: MemoryProperty) -> Self {
        Self {
            id: next_resource_id(),
            size,
            offset: 0,
            usage,
            memory,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Suballocation offset inside a shared arena; zero for dedicated
    /// buffers.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Buffers from the same arena share a compatibility hash so batches
    /// backed by one vertex pool can merge.
    #[inline]
    #[must_use]
    pub fn compatibility_hash(&self) -> u64 {
        self.id
    }
}

/// Vertex stream description; `attribute_bits` is the cache key for the
/// generated depth-only materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub attribute_bits: u32,
    pub stride: u32,
}

impl VertexLayout {
    /// Position + normal + uv + color, the layout of scene meshes and the
    /// fullscreen quad.
    pub const P3N3UV2C4: Self = Self {
        attribute_bits: 0b1111,
        stride: 48,
    };

    /// Position + color point sprites (the stars mesh).
    pub const P3C4: Self = Self {
        attribute_bits: 0b1001,
        stride: 28,
    };
}

#[derive(Debug)]
pub struct Mesh {
    pub vertex_buffer: Arc<Buffer>,
    pub index_buffer: Arc<Buffer>,
    pub vertex_layout: VertexLayout,
}

impl Mesh {
    #[inline]
    #[must_use]
    pub fn index_count(&self) -> u32 {
        (self.index_buffer.size() / 4) as u32
    }

    #[inline]
    #[must_use]
    pub fn first_index(&self) -> u32 {
        (self.index_buffer.offset() / 4) as u32
    }

    #[inline]
    #[must_use]
    pub fn vertex_offset(&self) -> i32 {
        (self.vertex_buffer.offset() / u64::from(self.vertex_layout.stride)) as i32
    }
}

// ─── Shaders ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// One compiled shader stage.
#[derive(Debug)]
pub struct Shader {
    pub(crate) id: ResourceId,
    pub path: String,
    pub stage: ShaderStage,
}

impl Shader {
    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

/// A shader program loaded by path: vertex+fragment for raster passes,
/// compute for dispatches. Readiness models the asynchronous shader
/// compiler; a set that is not ready makes its node skip the frame.
#[derive(Debug)]
pub struct ShaderSet {
    pub path: String,
    pub defines: String,
    pub vertex: Option<Arc<Shader>>,
    pub fragment: Option<Arc<Shader>>,
    pub compute: Option<Arc<Shader>>,
    ready: AtomicBool,
}

impl ShaderSet {
    pub(crate) fn new(
        path: &str,
        defines: &str,
        vertex: Option<Arc<Shader>>,
        fragment: Option<Arc<Shader>>,
        compute: Option<Arc<Shader>>,
        ready: bool,
    ) -> Self {
        Self {
            path: path.to_owned(),
            defines: defines.to_owned(),
            vertex,
            fragment,
            compute,
            ready: AtomicBool::new(ready),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    #[must_use]
    pub fn compute_shader(&self) -> Option<Arc<Shader>> {
        if self.is_ready() { self.compute.clone() } else { None }
    }
}

// ─── Resource references ─────────────────────────────────────────────────────

/// A named RHI resource as passed around by the frame graph: node
/// parameters, sampler tables and render-target tables all hold these.
#[derive(Clone, Debug)]
pub enum RhiResource {
    Texture(Arc<Texture>),
    RenderTarget(Arc<RenderTarget>),
    Surface(Arc<Surface>),
    Cubemap(Arc<Cubemap>),
}

impl RhiResource {
    /// The plain image view of the resource; surfaces have no single
    /// image and must be resolved explicitly.
    #[must_use]
    pub fn as_texture(&self) -> Option<Arc<Texture>> {
        match self {
            Self::Texture(texture) => Some(texture.clone()),
            Self::RenderTarget(target) => Some(target.texture().clone()),
            Self::Cubemap(cubemap) => Some(cubemap.texture().clone()),
            Self::Surface(_) => None,
        }
    }

    /// MSAA-resolve-aware view: a surface yields its resolve target,
    /// anything image-like yields itself.
    #[must_use]
    pub fn resolved_attachment(&self) -> Option<Arc<Texture>> {
        match self {
            Self::Surface(surface) => Some(surface.resolved.clone()),
            _ => self.as_texture(),
        }
    }

    #[must_use]
    pub fn as_render_target(&self) -> Option<Arc<RenderTarget>> {
        match self {
            Self::RenderTarget(target) => Some(target.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_surface(&self) -> Option<Arc<Surface>> {
        match self {
            Self::Surface(surface) => Some(surface.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_cubemap(&self) -> Option<Arc<Cubemap>> {
        match self {
            Self::Cubemap(cubemap) => Some(cubemap.clone()),
            _ => None,
        }
    }
}

// ─── Semaphores and fences ───────────────────────────────────────────────────

/// GPU-GPU ordering primitive used by chunked submission chaining.
#[derive(Debug)]
pub struct Semaphore {
    pub(crate) id: ResourceId,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            id: next_resource_id(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

/// Single-fire CPU-visible completion fence.
#[derive(Debug)]
pub struct Fence {
    pub(crate) id: ResourceId,
}

impl Fence {
    pub(crate) fn new() -> Self {
        Self {
            id: next_resource_id(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_mip_extents_halve() {
        let root = Texture::new(
            UVec2::new(1024, 1024),
            1,
            TextureFormat::Rgba16Sfloat,
            TextureKind::Texture2d,
            TextureUsage::STORAGE | TextureUsage::SAMPLED,
            Filtration::Linear,
            Clamping::Clamp,
        );
        let rt = RenderTarget::with_mips(root, 6);
        assert_eq!(rt.mip_levels(), 6);
        assert_eq!(rt.mip_level(0).extent, UVec2::new(1024, 1024));
        assert_eq!(rt.mip_level(1).extent, UVec2::new(512, 512));
        assert_eq!(rt.mip_level(5).extent, UVec2::new(32, 32));
        // Level zero aliases the root image.
        assert_eq!(rt.mip_level(0).id(), rt.texture().id());
    }

    #[test]
    fn depth_formats_rest_in_depth_layout() {
        let depth = Texture::new(
            UVec2::new(4, 4),
            1,
            TextureFormat::D32Sfloat,
            TextureKind::Texture2d,
            TextureUsage::DEPTH_STENCIL_ATTACHMENT,
            Filtration::Nearest,
            Clamping::Clamp,
        );
        assert_eq!(depth.default_layout(), ImageLayout::DepthStencilAttachmentOptimal);
    }

    #[test]
    fn texture_byte_size_accounts_for_depth() {
        let volume = Texture::new(
            UVec2::new(64, 64),
            64,
            TextureFormat::R16Sfloat,
            TextureKind::Texture3d,
            TextureUsage::SAMPLED,
            Filtration::Linear,
            Clamping::Clamp,
        );
        assert_eq!(volume.byte_size(), 64 * 64 * 64 * 2);
    }
}
