//! The RHI device front-end.
//!
//! [`Device`] hands out reference-counted virtual handles and collects a
//! submission log; a GPU backend replays recorded command streams in
//! submission order, honouring the fence/semaphore edges. Shader loading
//! is a catalog keyed by `(path, defines)` — compilation itself happens
//! behind the device boundary, and a set can be marked *pending* to model
//! the asynchronous compiler (nodes skip the frame until it is ready).

use std::sync::Arc;

use glam::UVec2;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use super::bindings::ShaderBindingSet;
use super::command::CommandList;
use super::material::Material;
use super::resources::{
    Buffer, Cubemap, Fence, Mesh, RenderTarget, Semaphore, Shader, ShaderSet, ShaderStage,
    Surface, Texture, TextureKind, VertexLayout, next_resource_id,
};
use super::types::{
    BufferUsage, Clamping, Filtration, MemoryProperty, MsaaSamples, PrimitiveTopology,
    QueueKind, RenderState, TextureFormat, TextureUsage,
};

/// One entry of the submission log.
#[derive(Clone, Debug)]
pub struct Submission {
    pub queue: QueueKind,
    pub list: Arc<CommandList>,
    pub fence: Option<Arc<Fence>>,
    pub signal: Option<Arc<Semaphore>>,
    pub wait: Option<Arc<Semaphore>>,
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceDesc {
    pub msaa_samples: MsaaSamples,
    /// Extent of the main window render area, fed into the per-frame
    /// uniform block and default viewports.
    pub render_area: UVec2,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            msaa_samples: MsaaSamples::Samples1,
            render_area: UVec2::new(1920, 1080),
        }
    }
}

pub struct Device {
    msaa_samples: MsaaSamples,
    render_area: UVec2,
    shaders: RwLock<FxHashMap<(String, String), Arc<ShaderSet>>>,
    pending_shaders: RwLock<FxHashSet<String>>,
    submissions: Mutex<Vec<Submission>>,
}

impl Device {
    #[must_use]
    pub fn new(desc: DeviceDesc) -> Self {
        Self {
            msaa_samples: desc.msaa_samples,
            render_area: desc.render_area,
            shaders: RwLock::new(FxHashMap::default()),
            pending_shaders: RwLock::new(FxHashSet::default()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn msaa_samples(&self) -> MsaaSamples {
        self.msaa_samples
    }

    #[inline]
    #[must_use]
    pub fn render_area(&self) -> UVec2 {
        self.render_area
    }

    // ── Resource creation ──────────────────────────────────────────────

    #[must_use]
    pub fn create_texture(
        &self,
        extent: UVec2,
        depth: u32,
        kind: TextureKind,
        format: TextureFormat,
        filtration: Filtration,
        clamping: Clamping,
        usage: TextureUsage,
    ) -> Arc<Texture> {
        Arc::new(Texture::new(
            extent, depth, format, kind, usage, filtration, clamping,
        ))
    }

    #[must_use]
    pub fn create_render_target(
        &self,
        extent: UVec2,
        mip_levels: u32,
        format: TextureFormat,
        filtration: Filtration,
        clamping: Clamping,
        usage: TextureUsage,
    ) -> Arc<RenderTarget> {
        let root = Texture::new(
            extent,
            1,
            format,
            TextureKind::Texture2d,
            usage,
            filtration,
            clamping,
        );
        Arc::new(RenderTarget::with_mips(root, mip_levels))
    }

    /// An MSAA color target plus its single-sample resolve pair.
    #[must_use]
    pub fn create_surface(
        &self,
        extent: UVec2,
        format: TextureFormat,
        filtration: Filtration,
        clamping: Clamping,
        usage: TextureUsage,
    ) -> Arc<Surface> {
        let target = Arc::new(Texture::new(
            extent,
            1,
            format,
            TextureKind::Texture2d,
            usage,
            filtration,
            clamping,
        ));
        let resolved = Arc::new(Texture::new(
            extent,
            1,
            format,
            TextureKind::Texture2d,
            usage,
            filtration,
            clamping,
        ));
        let needs_resolve = self.msaa_samples != MsaaSamples::Samples1;
        Arc::new(Surface::new(target, resolved, needs_resolve))
    }

    #[must_use]
    pub fn create_cubemap(
        &self,
        extent: UVec2,
        mip_levels: u32,
        format: TextureFormat,
        filtration: Filtration,
        clamping: Clamping,
        usage: TextureUsage,
    ) -> Arc<Cubemap> {
        let root = Texture::new(
            extent,
            6,
            format,
            TextureKind::Cubemap,
            usage,
            filtration,
            clamping,
        );
        Arc::new(Cubemap::with_mips(root, mip_levels))
    }

    #[must_use]
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperty,
    ) -> Arc<Buffer> {
        Arc::new(Buffer::new(size, usage, memory))
    }

    #[must_use]
    pub fn create_indirect_buffer(&self, size: u64) -> Arc<Buffer> {
        self.create_buffer(
            size,
            BufferUsage::INDIRECT | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        )
    }

    /// Creates a mesh with buffers of the given byte sizes; the upload
    /// happens at creation time through the device's internal transfer
    /// path.
    #[must_use]
    pub fn create_mesh(
        &self,
        layout: VertexLayout,
        vertex_data_size: u64,
        index_data_size: u64,
    ) -> Arc<Mesh> {
        let flags = BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::TRANSFER_DST;
        Arc::new(Mesh {
            vertex_buffer: self.create_buffer(vertex_data_size, flags, MemoryProperty::DEVICE_LOCAL),
            index_buffer: self.create_buffer(index_data_size, flags, MemoryProperty::DEVICE_LOCAL),
            vertex_layout: layout,
        })
    }

    /// Creates a mesh from raw vertex and index bytes.
    #[must_use]
    pub fn create_mesh_with_data(
        &self,
        layout: VertexLayout,
        vertex_data: &[u8],
        index_data: &[u8],
    ) -> Arc<Mesh> {
        self.create_mesh(layout, vertex_data.len() as u64, index_data.len() as u64)
    }

    #[must_use]
    pub fn create_shader_bindings(&self) -> Arc<ShaderBindingSet> {
        Arc::new(ShaderBindingSet::new())
    }

    /// Adds a dedicated SSBO binding backed by a fresh storage buffer of
    /// `element_size * element_count` bytes.
    pub fn add_ssbo_binding(
        &self,
        set: &Arc<ShaderBindingSet>,
        name: &str,
        slot: u32,
        element_size: u64,
        element_count: u64,
    ) -> Arc<super::bindings::ShaderBinding> {
        let buffer = self.create_buffer(
            element_size * element_count,
            BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        );
        set.add_buffer(name, slot, super::bindings::BindingKind::StorageBuffer, buffer)
    }

    /// Adds a uniform-buffer binding backed by a fresh buffer.
    pub fn add_uniform_binding(
        &self,
        set: &Arc<ShaderBindingSet>,
        name: &str,
        slot: u32,
        size: u64,
    ) -> Arc<super::bindings::ShaderBinding> {
        let buffer = self.create_buffer(
            size,
            BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
            MemoryProperty::DEVICE_LOCAL,
        );
        set.add_buffer(name, slot, super::bindings::BindingKind::UniformBuffer, buffer)
    }

    #[must_use]
    pub fn create_material(
        &self,
        vertex_layout: VertexLayout,
        topology: PrimitiveTopology,
        render_state: RenderState,
        shader: Arc<ShaderSet>,
        bindings: Option<Arc<ShaderBindingSet>>,
    ) -> Arc<Material> {
        Arc::new(Material::new(
            vertex_layout,
            topology,
            render_state,
            shader,
            bindings,
        ))
    }

    #[must_use]
    pub fn create_command_list(&self, queue: QueueKind, secondary: bool) -> CommandList {
        CommandList::new(queue, secondary)
    }

    #[must_use]
    pub fn create_semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new())
    }

    #[must_use]
    pub fn create_fence(&self) -> Arc<Fence> {
        Arc::new(Fence::new())
    }

    // ── Shader catalog ─────────────────────────────────────────────────

    /// Loads (or returns the cached) shader set for `path` + `defines`.
    pub fn load_shader(&self, path: &str, defines: &str) -> Arc<ShaderSet> {
        let key = (path.to_owned(), defines.to_owned());
        if let Some(existing) = self.shaders.read().get(&key) {
            return existing.clone();
        }

        let stage = |stage: ShaderStage| {
            Some(Arc::new(Shader {
                id: next_resource_id(),
                path: path.to_owned(),
                stage,
            }))
        };
        let ready = !self.pending_shaders.read().contains(path);
        let set = Arc::new(ShaderSet::new(
            path,
            defines,
            stage(ShaderStage::Vertex),
            stage(ShaderStage::Fragment),
            stage(ShaderStage::Compute),
            ready,
        ));
        self.shaders.write().insert(key, set.clone());
        set
    }

    /// Marks a shader path as still compiling (or done). Existing catalog
    /// entries for the path flip their readiness too.
    pub fn set_shader_pending(&self, path: &str, pending: bool) {
        if pending {
            self.pending_shaders.write().insert(path.to_owned());
        } else {
            self.pending_shaders.write().remove(path);
        }
        for ((shader_path, _), set) in self.shaders.read().iter() {
            if shader_path.as_str() == path {
                set.set_ready(!pending);
            }
        }
    }

    // ── Submission ─────────────────────────────────────────────────────

    /// Queues a recorded list for execution.
    ///
    /// The list must be balanced; an open render pass or debug region at
    /// submit time is a programming error in the recording node.
    pub fn submit(
        &self,
        list: CommandList,
        fence: Option<Arc<Fence>>,
        signal: Option<Arc<Semaphore>>,
        wait: Option<Arc<Semaphore>>,
    ) -> Arc<CommandList> {
        assert!(
            list.is_balanced(),
            "command list submitted with an open render pass or debug region"
        );
        let list = Arc::new(list);
        self.submissions.lock().push(Submission {
            queue: list.queue(),
            list: list.clone(),
            fence,
            signal,
            wait,
        });
        list
    }

    /// Snapshot of everything submitted so far, in submission order.
    #[must_use]
    pub fn submission_log(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn clear_submission_log(&self) {
        self.submissions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_catalog_caches_by_path_and_defines() {
        let device = Device::new(DeviceDesc::default());
        let a = device.load_shader("Shaders/Sky.shader", "FILL");
        let b = device.load_shader("Shaders/Sky.shader", "FILL");
        let c = device.load_shader("Shaders/Sky.shader", "SUN");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn pending_shaders_are_not_ready() {
        let device = Device::new(DeviceDesc::default());
        device.set_shader_pending("Shaders/Bloom.shader", true);
        let set = device.load_shader("Shaders/Bloom.shader", "");
        assert!(!set.is_ready());
        device.set_shader_pending("Shaders/Bloom.shader", false);
        assert!(set.is_ready());
    }

    #[test]
    fn submission_log_preserves_order_and_edges() {
        let device = Device::new(DeviceDesc::default());
        let sem = device.create_semaphore();
        let first = device.create_command_list(QueueKind::Compute, false);
        let second = device.create_command_list(QueueKind::Graphics, false);
        device.submit(first, None, Some(sem.clone()), None);
        device.submit(second, None, None, Some(sem.clone()));

        let log = device.submission_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].queue, QueueKind::Compute);
        assert_eq!(log[0].signal.as_ref().unwrap().id(), sem.id());
        assert_eq!(log[1].wait.as_ref().unwrap().id(), sem.id());
    }

    #[test]
    fn surfaces_need_resolve_only_under_msaa() {
        let single = Device::new(DeviceDesc::default());
        let surface = single.create_surface(
            UVec2::new(64, 64),
            TextureFormat::Rgba8Srgb,
            Filtration::Linear,
            Clamping::Clamp,
            TextureUsage::COLOR_ATTACHMENT,
        );
        assert!(!surface.needs_resolve());

        let msaa = Device::new(DeviceDesc {
            msaa_samples: MsaaSamples::Samples4,
            ..DeviceDesc::default()
        });
        let surface = msaa.create_surface(
            UVec2::new(64, 64),
            TextureFormat::Rgba8Srgb,
            Filtration::Linear,
            Clamping::Clamp,
            TextureUsage::COLOR_ATTACHMENT,
        );
        assert!(surface.needs_resolve());
    }
}
