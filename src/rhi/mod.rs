//! Rendering hardware interface.
//!
//! The abstract capability set the frame graph consumes: resource handles,
//! shader binding sets, materials, typed command streams and a device
//! front-end with a submission log. GPU-API specifics (descriptor sets,
//! native images, queue families) live behind the backend that replays the
//! recorded streams and are out of scope here.

pub mod batch;
pub mod bindings;
pub mod command;
pub mod device;
pub mod material;
pub mod resources;
pub mod scene_view;
pub mod types;

pub use batch::{Batch, DrawCalls, record_draw_calls};
pub use bindings::{BindingKind, ShaderBinding, ShaderBindingSet};
pub use command::{AttachmentRef, Command, CommandList};
pub use device::{Device, DeviceDesc, Submission};
pub use material::Material;
pub use resources::{
    Buffer, Cubemap, Fence, Mesh, RenderTarget, RhiResource, Semaphore, Shader, ShaderSet,
    ShaderStage, Surface, Texture, TextureKind, VertexLayout,
};
pub use scene_view::{
    CameraState, MeshProxy, SceneView, SceneViewSnapshot, ShadowCaster, ShadowMapRequest,
};
pub use types::{
    BlendMode, BufferUsage, Clamping, CullMode, DrawIndexedIndirect, Filtration, FillMode,
    FrameData, ImageLayout, MemoryProperty, MsaaSamples, PrimitiveTopology, QueueKind,
    RenderState, ResourceId, SortingOrder, TextureFormat, TextureUsage, tag_hash,
};
