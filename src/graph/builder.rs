//! Builds a live [`FrameGraph`] from a parsed asset.
//!
//! Creates the RHI resources every declaration names, instantiates nodes
//! through the registry and applies their parameters. Build problems
//! degrade per item: an unknown node type or an unresolvable sampler is
//! logged and skipped, leaving the rest of the graph intact.

use std::sync::Arc;

use glam::{UVec2, Vec4};
use log::warn;

use crate::assets::AssetSource;
use crate::rhi::{
    Clamping, Device, Filtration, MsaaSamples, RhiResource, TextureUsage,
};

use super::asset::{FrameGraphAsset, ParamValue};
use super::graph::FrameGraph;
use super::registry;

pub struct FrameGraphBuilder {
    device: Arc<Device>,
    assets: Arc<dyn AssetSource>,
}

impl FrameGraphBuilder {
    #[must_use]
    pub fn new(device: Arc<Device>, assets: Arc<dyn AssetSource>) -> Self {
        registry::register_builtin_nodes();
        Self { device, assets }
    }

    /// Instantiates a fresh graph from the asset. Every call builds new
    /// RHI resources and nodes; callers wanting one graph per asset uid
    /// cache the result themselves.
    #[must_use]
    pub fn build(&self, asset: &FrameGraphAsset) -> FrameGraph {
        let mut graph = FrameGraph::new(self.device.clone(), self.assets.clone());

        let attachment_usage = TextureUsage::SAMPLED
            | TextureUsage::TRANSFER_SRC
            | TextureUsage::TRANSFER_DST
            | TextureUsage::STORAGE;

        for declaration in &asset.render_targets {
            let extent = UVec2::new(declaration.width, declaration.height);
            let usage = if declaration.format.is_depth() {
                TextureUsage::DEPTH_STENCIL_ATTACHMENT | TextureUsage::SAMPLED
            } else {
                attachment_usage | TextureUsage::COLOR_ATTACHMENT
            };

            if declaration.is_surface && self.device.msaa_samples() != MsaaSamples::Samples1 {
                let surface = self.device.create_surface(
                    extent,
                    declaration.format,
                    Filtration::Linear,
                    Clamping::Clamp,
                    usage,
                );
                // The resolve target is also addressable under the same
                // name as a plain render target.
                let resolved = self.device.create_render_target(
                    extent,
                    declaration.mips,
                    declaration.format,
                    Filtration::Linear,
                    Clamping::Clamp,
                    usage,
                );
                graph.set_surface(&declaration.name, surface);
                graph.set_render_target(&declaration.name, resolved);
            } else {
                let target = self.device.create_render_target(
                    extent,
                    declaration.mips,
                    declaration.format,
                    Filtration::Linear,
                    Clamping::Clamp,
                    usage,
                );
                graph.set_render_target(&declaration.name, target);
            }
        }

        for value in &asset.values {
            if let Some(vec4) = value.vec4 {
                graph.set_value(&value.name, Vec4::from_array(vec4));
            } else if let Some(float) = value.float {
                graph.set_value_scalar(&value.name, float);
            }
        }

        for sampler in &asset.samplers {
            match self.assets.load_texture(
                &self.device,
                &sampler.path,
                sampler.uid.as_deref(),
            ) {
                Some(texture) => graph.set_sampler(&sampler.name, RhiResource::Texture(texture)),
                None => warn!(
                    "Sampler '{}' could not be loaded from '{}'",
                    sampler.name, sampler.path
                ),
            }
        }

        for declaration in &asset.frame {
            let Some(mut node) = registry::create_node(&declaration.name) else {
                warn!("Frame graph node '{}' is not implemented", declaration.name);
                continue;
            };

            let params = node.params_mut();
            if let Some(tag) = &declaration.tag {
                params.set_tag(tag);
            }

            for (name, value) in &declaration.values {
                match value {
                    ParamValue::Vec4(vec4) => params.set_vec4(name, Vec4::from_array(*vec4)),
                    ParamValue::Float(float) => params.set_vec4(name, Vec4::splat(*float)),
                    ParamValue::String(string) => params.set_string(name, string),
                }
            }

            for (name, resource_name) in &declaration.render_targets {
                // Surfaces subsume their resolve target; plain render
                // targets come next, loaded samplers last.
                if let Some(surface) = graph.get_surface(resource_name) {
                    params.set_resource(name, RhiResource::Surface(surface));
                } else if let Some(target) = graph.get_render_target(resource_name) {
                    params.set_resource(name, RhiResource::RenderTarget(target));
                } else if let Some(sampler) = graph.get_sampler(resource_name) {
                    params.set_resource(name, sampler);
                } else {
                    warn!(
                        "Node '{}' references unknown resource '{resource_name}'",
                        declaration.name
                    );
                }
            }

            graph.push_node(node);
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::NullAssetSource;
    use crate::rhi::DeviceDesc;

    fn builder(msaa: MsaaSamples) -> FrameGraphBuilder {
        FrameGraphBuilder::new(
            Arc::new(Device::new(DeviceDesc {
                msaa_samples: msaa,
                ..DeviceDesc::default()
            })),
            Arc::new(NullAssetSource),
        )
    }

    const DOCUMENT: &str = r#"
    {
        "renderTargets": [
            { "name": "BackBuffer", "width": 64, "height": 64, "format": "RGBA8_SRGB", "isSurface": true },
            { "name": "DepthBuffer", "width": 64, "height": 64, "format": "D32_SFLOAT" }
        ],
        "values": [ { "name": "ambient", "float": 0.25 } ],
        "frame": [
            { "name": "Clear", "values": { "clearColor": [0, 0, 0, 1] }, "renderTargets": { "color": "BackBuffer" } },
            { "name": "NotANode" },
            { "name": "RenderScene", "values": { "Tag": "Opaque" } }
        ]
    }"#;

    #[test]
    fn unknown_node_types_are_skipped() {
        let asset = FrameGraphAsset::from_json(DOCUMENT).unwrap();
        let graph = builder(MsaaSamples::Samples1).build(&asset);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn surfaces_require_msaa() {
        let asset = FrameGraphAsset::from_json(DOCUMENT).unwrap();

        let single = builder(MsaaSamples::Samples1).build(&asset);
        assert!(single.get_surface("BackBuffer").is_none());
        assert!(single.get_render_target("BackBuffer").is_some());

        let multi = builder(MsaaSamples::Samples4).build(&asset);
        assert!(multi.get_surface("BackBuffer").is_some());
        assert!(multi.get_render_target("BackBuffer").is_some());
    }

    #[test]
    fn values_and_params_are_applied() {
        let asset = FrameGraphAsset::from_json(DOCUMENT).unwrap();
        let graph = builder(MsaaSamples::Samples1).build(&asset);
        assert_eq!(graph.get_value("ambient"), Some(Vec4::splat(0.25)));

        let clear = graph.nodes[0].lock();
        assert_eq!(clear.type_name(), "Clear");
        assert_eq!(
            clear.params().vec4("clearColor"),
            Vec4::new(0.0, 0.0, 0.0, 1.0)
        );
        assert!(clear.params().resource("color").is_some());
    }

    #[test]
    fn missing_resource_reference_builds_without_it() {
        let document = r#"{ "frame": [
            { "name": "Blit", "renderTargets": { "src": "NoSuchTarget" } }
        ]}"#;
        let asset = FrameGraphAsset::from_json(document).unwrap();
        let graph = builder(MsaaSamples::Samples1).build(&asset);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.nodes[0].lock().params().resource("src").is_none());
    }
}
