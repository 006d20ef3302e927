//! Shared fixtures for the frame-graph integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

use riptide::graph::{FrameGraph, FrameGraphAsset, FrameGraphBuilder};
use riptide::rhi::{
    CameraState, Command, CommandList, Device, DeviceDesc, ImageLayout, Material, Mesh,
    MeshProxy, PrimitiveTopology, RenderState, SceneView, SceneViewSnapshot, Submission,
    VertexLayout, tag_hash,
};
use riptide::NullAssetSource;

pub fn build_graph(document: &str) -> (Arc<Device>, FrameGraph) {
    let device = Arc::new(Device::new(DeviceDesc::default()));
    let asset = FrameGraphAsset::from_json(document).expect("valid test asset");
    let graph = FrameGraphBuilder::new(device.clone(), Arc::new(NullAssetSource)).build(&asset);
    (device, graph)
}

pub fn test_camera() -> CameraState {
    CameraState {
        view: Mat4::look_at_rh(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y),
        projection: Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 500.0),
        position: Vec3::new(0.0, 1.0, 5.0),
        z_near: 0.1,
        z_far: 500.0,
        fov_y: 1.0,
        aspect: 16.0 / 9.0,
    }
}

pub fn single_snapshot_view(snapshot: SceneViewSnapshot) -> SceneView {
    SceneView {
        snapshots: vec![snapshot],
        delta_time: 1.0 / 60.0,
        current_time: 1.0,
    }
}

pub fn empty_snapshot() -> SceneViewSnapshot {
    SceneViewSnapshot {
        camera: Some(test_camera()),
        ..SceneViewSnapshot::default()
    }
}

/// A ready scene material answering to `tag`.
pub fn scene_material(device: &Device, tag: &str) -> Arc<Material> {
    let shader = device.load_shader("Shaders/Standard.shader", "");
    let bindings = device.create_shader_bindings();
    device.add_uniform_binding(&bindings, "material", 0, 64);
    device.create_material(
        VertexLayout::P3N3UV2C4,
        PrimitiveTopology::TriangleList,
        RenderState::new(true, true, tag_hash(tag)),
        shader,
        Some(bindings),
    )
}

pub fn unit_mesh(device: &Device) -> Arc<Mesh> {
    device.create_mesh(VertexLayout::P3N3UV2C4, 48 * 24, 36 * 4)
}

pub fn proxy(mesh: &Arc<Mesh>, material: &Arc<Material>, position: Vec3) -> MeshProxy {
    MeshProxy {
        world_matrix: Mat4::from_translation(position),
        sphere_bounds: position.extend(1.0),
        meshes: vec![mesh.clone()],
        materials: vec![material.clone()],
    }
}

// ─── Recorded-stream validators ──────────────────────────────────────────────

/// Render passes and debug regions nest as well-matched parentheses.
pub fn assert_well_nested(list: &CommandList) {
    let mut passes = 0i32;
    let mut regions = 0i32;
    for command in list.commands() {
        match command {
            Command::BeginRenderPass { .. } => passes += 1,
            Command::EndRenderPass => {
                passes -= 1;
                assert!(passes >= 0, "end_render_pass without matching begin");
            }
            Command::BeginDebugRegion { .. } => regions += 1,
            Command::EndDebugRegion => {
                regions -= 1;
                assert!(regions >= 0, "end_debug_region without matching begin");
            }
            _ => {}
        }
    }
    assert_eq!(passes, 0, "unbalanced render passes");
    assert_eq!(regions, 0, "unbalanced debug regions");
}

/// Every image's layout transitions on one list form a valid walk
/// starting from the image's resting layout.
pub fn assert_valid_layout_walk(list: &CommandList) {
    let mut current: FxHashMap<u64, ImageLayout> = FxHashMap::default();
    for command in list.commands() {
        if let Command::ImageBarrier {
            image,
            old_layout,
            new_layout,
            ..
        } = command
        {
            let layout = current
                .entry(image.id())
                .or_insert_with(|| image.default_layout());
            assert_eq!(
                *layout,
                *old_layout,
                "image {} transitioned from {:?} but rests in {:?}",
                image.id(),
                old_layout,
                layout
            );
            *layout = *new_layout;
        }
    }
}

/// Validates the chunk chain of §4.7 over the submission log:
/// `transfer_k → graphics_k` via the fresh semaphore and
/// `graphics_(k−1) → transfer_k` via the carried one, nothing else.
pub fn assert_semaphore_chain(log: &[Submission]) {
    assert!(log.len() % 2 == 0, "submissions come in pairs");
    let mut previous_graphics_signal: Option<u64> = None;
    for pair in log.chunks_exact(2) {
        let transfer = &pair[0];
        let graphics = &pair[1];
        assert_eq!(transfer.queue, riptide::rhi::QueueKind::Compute);
        assert_eq!(graphics.queue, riptide::rhi::QueueKind::Graphics);

        let transfer_signal = transfer.signal.as_ref().expect("transfer signals").id();
        assert_eq!(
            graphics.wait.as_ref().map(|s| s.id()),
            Some(transfer_signal),
            "graphics must wait on its chunk's transfer"
        );
        assert_eq!(
            transfer.wait.as_ref().map(|s| s.id()),
            previous_graphics_signal,
            "transfer must wait on the previous chunk's graphics"
        );
        previous_graphics_signal = Some(graphics.signal.as_ref().expect("graphics signals").id());
    }
}

/// All indirect-draw argument blocks written to a list, in order.
pub fn indirect_updates(list: &CommandList) -> Vec<Vec<riptide::rhi::DrawIndexedIndirect>> {
    list.commands()
        .iter()
        .filter_map(|command| match command {
            Command::UpdateBuffer { buffer, data, .. }
                if buffer.usage.contains(riptide::rhi::BufferUsage::INDIRECT) =>
            {
                Some(bytemuck::pod_collect_to_vec(data))
            }
            _ => None,
        })
        .collect()
}
