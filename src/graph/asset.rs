//! The textual frame-graph asset.
//!
//! A structured JSON document with four top-level keys — `samplers`,
//! `values`, `renderTargets` and `frame` — deserialised into an
//! intermediate [`FrameGraphAsset`] that the builder turns into a live
//! graph. Node order inside `frame` is the execution order.
//!
//! Reserved resource names: `BackBuffer` (final color) and `DepthBuffer`
//! (final depth). Unknown pixel-format names are parse errors and fail
//! the whole load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rhi::TextureFormat;

/// A texture bound into the graph's sampler table by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerAsset {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A named scalar or vector constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueAsset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vec4: Option<[f32; 4]>,
}

/// A render-target declaration; `isSurface` requests an MSAA surface
/// when multisampling is enabled on the device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderTargetAsset {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    #[serde(default = "default_mips", skip_serializing_if = "is_default_mips")]
    pub mips: u32,
    #[serde(default, rename = "isSurface", skip_serializing_if = "is_false")]
    pub is_surface: bool,
}

const fn default_mips() -> u32 {
    1
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !value
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_mips(mips: &u32) -> bool {
    *mips == 1
}

/// One node parameter: a float, a vec4 or a string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f32),
    Vec4([f32; 4]),
    String(String),
}

/// One entry of the `frame` sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAsset {
    /// Registered node type name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, ParamValue>,
    /// Parameter name → graph resource name, resolved against the
    /// surface, render-target and sampler tables at build time.
    #[serde(
        default,
        rename = "renderTargets",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub render_targets: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<String>,
}

/// The parsed document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameGraphAsset {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samplers: Vec<SamplerAsset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ValueAsset>,
    #[serde(
        default,
        rename = "renderTargets",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub render_targets: Vec<RenderTargetAsset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frame: Vec<NodeAsset>,
}

impl FrameGraphAsset {
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
    {
        "renderTargets": [
            { "name": "BackBuffer", "width": 1920, "height": 1080, "format": "RGBA8_SRGB" },
            { "name": "DepthBuffer", "width": 1920, "height": 1080, "format": "D32_SFLOAT" },
            { "name": "Bloom", "width": 1024, "height": 1024, "format": "RGBA16F", "mips": 6 }
        ],
        "values": [
            { "name": "exposure", "float": 1.5 }
        ],
        "samplers": [
            { "name": "g_lensDirtSampler", "path": "Textures/LensDirt.png" }
        ],
        "frame": [
            { "name": "Clear", "values": { "clearColor": [0, 0, 0, 1] }, "renderTargets": { "color": "BackBuffer" } },
            { "name": "RenderScene", "tag": "Main", "values": { "Tag": "Opaque" } }
        ]
    }"#;

    #[test]
    fn parses_all_sections() {
        let asset = FrameGraphAsset::from_json(MINIMAL).unwrap();
        assert_eq!(asset.render_targets.len(), 3);
        assert_eq!(asset.render_targets[2].mips, 6);
        assert!(!asset.render_targets[0].is_surface);
        assert_eq!(asset.values[0].float, Some(1.5));
        assert_eq!(asset.frame.len(), 2);
        assert_eq!(asset.frame[1].tag.as_deref(), Some("Main"));
        assert_eq!(
            asset.frame[0].render_targets.get("color").map(String::as_str),
            Some("BackBuffer")
        );
        match asset.frame[0].values.get("clearColor").unwrap() {
            ParamValue::Vec4(v) => assert_eq!(*v, [0.0, 0.0, 0.0, 1.0]),
            other => panic!("expected vec4, got {other:?}"),
        }
    }

    #[test]
    fn node_order_is_declaration_order() {
        let asset = FrameGraphAsset::from_json(MINIMAL).unwrap();
        let names: Vec<_> = asset.frame.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["Clear", "RenderScene"]);
    }

    #[test]
    fn serialisation_is_stable() {
        // Re-serialising the writer's own output is byte-identical.
        let asset = FrameGraphAsset::from_json(MINIMAL).unwrap();
        let first = asset.to_json().unwrap();
        let reparsed = FrameGraphAsset::from_json(&first).unwrap();
        assert_eq!(asset, reparsed);
        assert_eq!(first, reparsed.to_json().unwrap());
    }

    #[test]
    fn unknown_format_fails_the_whole_load() {
        let document = r#"{ "renderTargets": [
            { "name": "X", "width": 1, "height": 1, "format": "R5G5B5_TWISTED" }
        ]}"#;
        assert!(FrameGraphAsset::from_json(document).is_err());
    }

    #[test]
    fn string_params_parse_untagged() {
        let document = r#"{ "frame": [
            { "name": "PostProcess", "values": { "shader": "Shaders/Fxaa.shader", "radius": 2.5 } }
        ]}"#;
        let asset = FrameGraphAsset::from_json(document).unwrap();
        let node = &asset.frame[0];
        assert_eq!(
            node.values.get("shader"),
            Some(&ParamValue::String("Shaders/Fxaa.shader".into()))
        );
        assert_eq!(node.values.get("radius"), Some(&ParamValue::Float(2.5)));
    }
}
