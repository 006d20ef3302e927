//! Core RHI value types.
//!
//! Formats, layouts, usage flags and the POD structs that cross the
//! CPU/GPU boundary (frame uniforms, indirect draw arguments). Everything
//! in here is plain data; the handles live in [`super::resources`].

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};
use serde::{Deserialize, Serialize};

/// Stable identifier of an RHI resource within a process.
pub type ResourceId = u64;

/// GPU queue a command list is recorded for.
///
/// The transfer/compute queue carries buffer uploads and compute
/// dispatches; everything else goes to the graphics queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

/// Pixel formats understood by the frame-graph asset.
///
/// Names follow the asset vocabulary; an unknown name is a parse error
/// and fails the whole graph load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    #[serde(rename = "RGBA8_SRGB", alias = "R8G8B8A8_SRGB")]
    Rgba8Srgb,
    #[serde(rename = "RGBA8_UNORM", alias = "R8G8B8A8_UNORM")]
    Rgba8Unorm,
    #[serde(rename = "BGRA8_SRGB", alias = "B8G8R8A8_SRGB")]
    Bgra8Srgb,
    #[serde(rename = "R8_UNORM")]
    R8Unorm,
    #[serde(rename = "R16_SFLOAT")]
    R16Sfloat,
    #[serde(rename = "R16G16_SFLOAT")]
    Rg16Sfloat,
    #[serde(rename = "RGBA16F", alias = "R16G16B16A16_SFLOAT")]
    Rgba16Sfloat,
    #[serde(rename = "R32_SFLOAT")]
    R32Sfloat,
    #[serde(rename = "R32_UINT")]
    R32Uint,
    #[serde(rename = "B10G11R11_UFLOAT")]
    B10g11r11Ufloat,
    #[serde(rename = "D16_UNORM")]
    D16Unorm,
    #[serde(rename = "D24_UNORM_S8_UINT")]
    D24UnormS8Uint,
    #[serde(rename = "D32_SFLOAT")]
    D32Sfloat,
}

impl TextureFormat {
    /// Bytes per pixel for tightly packed host copies.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Sfloat | Self::D16Unorm => 2,
            Self::Rgba8Srgb
            | Self::Rgba8Unorm
            | Self::Bgra8Srgb
            | Self::Rg16Sfloat
            | Self::R32Sfloat
            | Self::R32Uint
            | Self::B10g11r11Ufloat
            | Self::D24UnormS8Uint
            | Self::D32Sfloat => 4,
            Self::Rgba16Sfloat => 8,
        }
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D16Unorm | Self::D24UnormS8Uint | Self::D32Sfloat)
    }
}

/// Image layout states recorded by memory barriers.
///
/// Transitions on a single command list must form a valid walk: a barrier's
/// old layout has to match the layout the image was left in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthAttachmentStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    ComputeRead,
    ComputeWrite,
    PresentSrc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsaaSamples {
    Samples1,
    Samples2,
    Samples4,
    Samples8,
}

impl MsaaSamples {
    #[must_use]
    pub const fn count(self) -> u32 {
        match self {
            Self::Samples1 => 1,
            Self::Samples2 => 2,
            Self::Samples4 => 4,
            Self::Samples8 => 8,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const COLOR_ATTACHMENT = 1 << 1;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const INDIRECT = 1 << 2;
        const STORAGE = 1 << 3;
        const UNIFORM = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProperty: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Filtration {
    Nearest,
    #[default]
    Linear,
    Bicubic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Clamping {
    #[default]
    Clamp,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    None,
    AlphaBlending,
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    PointList,
    LineList,
}

/// Fixed-function state baked into a [`super::material::Material`].
///
/// `tag` carries the hashed scene tag the material answers to; batching
/// compares the whole state for pipeline compatibility.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderState {
    pub depth_test: bool,
    pub z_write: bool,
    pub depth_bias: f32,
    pub custom_depth_shader: bool,
    pub cull_mode: CullMode,
    pub blend_mode: BlendMode,
    pub fill_mode: FillMode,
    pub tag: u64,
    pub support_multisampling: bool,
}

impl RenderState {
    #[must_use]
    pub fn new(depth_test: bool, z_write: bool, tag: u64) -> Self {
        Self {
            depth_test,
            z_write,
            depth_bias: 0.0,
            custom_depth_shader: false,
            cull_mode: CullMode::Back,
            blend_mode: BlendMode::None,
            fill_mode: FillMode::Fill,
            tag,
            support_multisampling: true,
        }
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new(true, true, 0)
    }
}

// RenderState participates in batch identity; depth_bias is bit-compared.
impl Eq for RenderState {}

impl std::hash::Hash for RenderState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.depth_test.hash(state);
        self.z_write.hash(state);
        self.depth_bias.to_bits().hash(state);
        self.custom_depth_shader.hash(state);
        self.cull_mode.hash(state);
        self.blend_mode.hash(state);
        self.fill_mode.hash(state);
        self.tag.hash(state);
        self.support_multisampling.hash(state);
    }
}

/// Draw ordering requested through a node's `Sorting` string parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortingOrder {
    #[default]
    FrontToBack,
    BackToFront,
}

impl SortingOrder {
    /// Parses the asset string, falling back to front-to-back for
    /// anything unrecognised.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "BackToFront" => Self::BackToFront,
            _ => Self::FrontToBack,
        }
    }
}

/// Hashes a scene tag string into the compact form stored on render state.
#[must_use]
pub fn tag_hash(tag: &str) -> u64 {
    if tag.is_empty() {
        0
    } else {
        xxhash_rust::xxh3::xxh3_64(tag.as_bytes())
    }
}

/// GPU-side indirect draw arguments, one per mesh in a batch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Per-frame uniform block bound at descriptor slot 0 of every material.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub inv_projection: Mat4,
    pub camera_position: Vec4,
    pub camera_z_near_z_far: Vec2,
    pub viewport_size: Vec2,
    pub current_time: f32,
    pub delta_time: f32,
    pub _padding: Vec2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip() {
        let json = serde_json::to_string(&TextureFormat::Rgba8Srgb).unwrap();
        assert_eq!(json, "\"RGBA8_SRGB\"");
        let back: TextureFormat = serde_json::from_str("\"RGBA16F\"").unwrap();
        assert_eq!(back, TextureFormat::Rgba16Sfloat);
        let alias: TextureFormat = serde_json::from_str("\"R16G16B16A16_SFLOAT\"").unwrap();
        assert_eq!(alias, TextureFormat::Rgba16Sfloat);
    }

    #[test]
    fn unknown_format_is_a_parse_error() {
        let result: Result<TextureFormat, _> = serde_json::from_str("\"RGBA128_QUAD\"");
        assert!(result.is_err());
    }

    #[test]
    fn sorting_order_falls_back_to_front_to_back() {
        assert_eq!(SortingOrder::parse("BackToFront"), SortingOrder::BackToFront);
        assert_eq!(SortingOrder::parse("Sideways"), SortingOrder::FrontToBack);
        assert_eq!(SortingOrder::parse(""), SortingOrder::FrontToBack);
    }

    #[test]
    fn frame_data_is_tightly_sized() {
        // Three matrices + position + four vec2-sized tails, 16-byte aligned.
        assert_eq!(std::mem::size_of::<FrameData>() % 16, 0);
    }

    #[test]
    fn indirect_struct_matches_gpu_stride() {
        assert_eq!(std::mem::size_of::<DrawIndexedIndirect>(), 20);
    }
}
