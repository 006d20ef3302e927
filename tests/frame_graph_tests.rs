//! End-to-end frame graph scenarios over recorded command streams.
//!
//! Tests for:
//! - Minimal present (clear-only graph)
//! - Depth prepass followed by the scene pass sharing one SSBO upload
//! - Light culling wiring its SSBOs into the lights set before shading
//! - Boundary behaviour: empty scenes, pending shaders, unknown nodes

use glam::{Vec3, Vec4};

use riptide::graph::FrameGraph;
use riptide::rhi::{Command, QueueKind};

mod common;
use common::*;

const PRESENT_DOCUMENT: &str = r#"
{
    "renderTargets": [
        { "name": "BackBuffer", "width": 1920, "height": 1080, "format": "RGBA8_SRGB" },
        { "name": "DepthBuffer", "width": 1920, "height": 1080, "format": "D32_SFLOAT" }
    ],
    "frame": [
        { "name": "Clear", "values": { "clearColor": [0, 0, 0, 1] }, "renderTargets": { "color": "BackBuffer" } }
    ]
}"#;

const DEPTH_THEN_COLOR_DOCUMENT: &str = r#"
{
    "renderTargets": [
        { "name": "BackBuffer", "width": 1920, "height": 1080, "format": "RGBA8_SRGB" },
        { "name": "DepthBuffer", "width": 1920, "height": 1080, "format": "D32_SFLOAT" }
    ],
    "frame": [
        { "name": "DepthPrepass", "values": { "Tag": "Opaque" } },
        { "name": "RenderScene", "values": { "Tag": "Opaque" } }
    ]
}"#;

#[test]
fn minimal_present_records_one_clear() {
    let (device, graph) = build_graph(PRESENT_DOCUMENT);
    let mut view = single_snapshot_view(empty_snapshot());

    let wait_semaphore = graph.process_and_submit(&mut view);

    let log = device.submission_log();
    assert_eq!(log.len(), 2, "exactly one command-list pair");
    assert_semaphore_chain(&log);

    let graphics = &log[1].list;
    assert_eq!(graphics.queue(), QueueKind::Graphics);
    let clears: Vec<_> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::ClearImage { image, color } => Some((image.clone(), *color)),
            _ => None,
        })
        .collect();
    assert_eq!(clears.len(), 1);
    assert_eq!(clears[0].1, Vec4::new(0.0, 0.0, 0.0, 1.0));
    let back_buffer = graph.get_render_target("BackBuffer").unwrap();
    assert_eq!(clears[0].0.id(), back_buffer.texture().id());

    // The present wait semaphore is the last graphics signal.
    assert_eq!(
        wait_semaphore.map(|s| s.id()),
        log[1].signal.as_ref().map(|s| s.id())
    );

    assert_well_nested(graphics);
    assert_valid_layout_walk(graphics);
}

#[test]
fn depth_then_color_shares_instance_rows() {
    let (device, graph) = build_graph(DEPTH_THEN_COLOR_DOCUMENT);

    let material = scene_material(&device, "Opaque");
    let mesh = unit_mesh(&device);
    let mut snapshot = empty_snapshot();
    for i in 0..3 {
        snapshot
            .proxies
            .push(proxy(&mesh, &material, Vec3::new(i as f32, 0.0, 0.0)));
    }
    let mut view = single_snapshot_view(snapshot);

    let output = graph.process(&mut view);
    let transfer = &output.transfer_cmd_lists[0];
    let graphics = &output.graphics_cmd_lists[0];

    // Both passes uploaded three instance rows each.
    let uploads: Vec<usize> = transfer
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::UpdateShaderBinding { binding, data, .. } if binding.name() == "data" => {
                Some(data.len())
            }
            _ => None,
        })
        .collect();
    assert_eq!(uploads.len(), 2);
    // 3 × 96-byte prepass rows, then 3 × 80-byte scene rows.
    assert_eq!(uploads[0], 3 * 96);
    assert_eq!(uploads[1], 3 * 80);

    // Two render passes: depth-only with clear, then color+depth without.
    let passes: Vec<_> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::BeginRenderPass {
                colors,
                depth,
                clear_depth,
                ..
            } => Some((colors.len(), depth.is_some(), *clear_depth)),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 2);
    assert_eq!(passes[0], (0, true, true), "depth-only pass clears depth");
    assert_eq!(passes[1], (1, true, false), "color pass preserves depth");

    // Each pass draws all three instances through one indirect call.
    let updates = indirect_updates(graphics);
    assert_eq!(updates.len(), 2);
    for block in &updates {
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].instance_count, 3);
        assert_eq!(block[0].first_instance, 0);
    }
    let indirect_draws = graphics
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::DrawIndexedIndirect { .. }))
        .count();
    assert_eq!(indirect_draws, 2);

    assert_well_nested(graphics);
    assert_well_nested(transfer);
    assert_valid_layout_walk(graphics);
}

#[test]
fn light_culling_feeds_the_scene_pass() {
    let document = r#"
    {
        "renderTargets": [
            { "name": "BackBuffer", "width": 1920, "height": 1080, "format": "RGBA8_SRGB" },
            { "name": "DepthBuffer", "width": 1920, "height": 1080, "format": "D32_SFLOAT" }
        ],
        "frame": [
            { "name": "LightCulling" },
            { "name": "RenderScene", "values": { "Tag": "Lit" } }
        ]
    }"#;
    let (device, graph) = build_graph(document);

    let lighting = riptide::LightingState::new(&device);
    let mut snapshot = empty_snapshot();
    snapshot.lights_data = Some(lighting.lights_data());
    snapshot.total_lights = 17;
    let mut view = single_snapshot_view(snapshot);

    let output = graph.process(&mut view);
    let graphics = &output.graphics_cmd_lists[0];

    // One compute dispatch across the 16×16 tile grid.
    let dispatches: Vec<_> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::Dispatch { groups, .. } => Some(*groups),
            _ => None,
        })
        .collect();
    assert_eq!(dispatches, vec![(1920u32.div_ceil(16), 1080u32.div_ceil(16), 1)]);

    // Depth flipped to shader-read and back around the dispatch.
    let depth = graph.get_render_target("DepthBuffer").unwrap();
    let barriers: Vec<_> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::ImageBarrier {
                image, new_layout, ..
            } if image.id() == depth.texture().id() => Some(*new_layout),
            _ => None,
        })
        .collect();
    assert_eq!(
        barriers,
        vec![
            riptide::rhi::ImageLayout::ShaderReadOnlyOptimal,
            depth.texture().default_layout()
        ]
    );

    // The culled-light SSBOs are visible to the scene pass.
    let lights_data = lighting.lights_data();
    assert_eq!(lights_data.find("culledLights").map(|b| b.slot()), Some(1));
    assert_eq!(lights_data.find("lightsGrid").map(|b| b.slot()), Some(2));
    assert_valid_layout_walk(graphics);
}

#[test]
fn empty_scene_records_no_passes_and_no_draws() {
    let (_, graph) = build_graph(DEPTH_THEN_COLOR_DOCUMENT);
    let mut view = single_snapshot_view(empty_snapshot());

    let output = graph.process(&mut view);
    let graphics = &output.graphics_cmd_lists[0];

    assert!(
        graphics
            .commands()
            .iter()
            .all(|command| !matches!(
                command,
                Command::BeginRenderPass { .. }
                    | Command::DrawIndexedIndirect { .. }
                    | Command::ClearImage { .. }
            ))
    );
}

#[test]
fn pending_materials_skip_without_clearing() {
    let (device, graph) = build_graph(DEPTH_THEN_COLOR_DOCUMENT);

    // Neither the scene material nor the generated depth material is
    // ready this frame.
    device.set_shader_pending("Shaders/Standard.shader", true);
    device.set_shader_pending("Shaders/DepthOnly.shader", true);

    let material = scene_material(&device, "Opaque");
    let mesh = unit_mesh(&device);
    let mut snapshot = empty_snapshot();
    snapshot.proxies.push(proxy(&mesh, &material, Vec3::ZERO));
    let mut view = single_snapshot_view(snapshot);

    let output = graph.process(&mut view);
    let graphics = &output.graphics_cmd_lists[0];

    // Clear is only issued when a pass is actually opened.
    assert!(
        graphics
            .commands()
            .iter()
            .all(|command| !matches!(command, Command::BeginRenderPass { .. }))
    );
    assert_well_nested(graphics);
}

#[test]
fn unknown_node_type_leaves_following_nodes_intact() {
    let document = r#"
    {
        "renderTargets": [
            { "name": "BackBuffer", "width": 64, "height": 64, "format": "RGBA8_SRGB" }
        ],
        "frame": [
            { "name": "Clear", "values": { "clearColor": [1, 0, 0, 1] } },
            { "name": "TemporalMegaUpscaler" },
            { "name": "Clear", "values": { "clearColor": [0, 1, 0, 1] } }
        ]
    }"#;
    let (_, graph) = build_graph(document);
    assert_eq!(graph.node_count(), 2);

    let mut view = single_snapshot_view(empty_snapshot());
    let output = graph.process(&mut view);
    let clears = output.graphics_cmd_lists[0]
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::ClearImage { .. }))
        .count();
    assert_eq!(clears, 2);
}

#[test]
fn building_twice_yields_identical_streams() {
    let (_, graph_a) = build_graph(PRESENT_DOCUMENT);
    let (_, graph_b) = build_graph(PRESENT_DOCUMENT);

    let run = |graph: &FrameGraph| {
        let mut view = single_snapshot_view(empty_snapshot());
        let output = graph.process(&mut view);
        output.graphics_cmd_lists[0]
            .commands()
            .iter()
            .map(|command| format!("{}", command_kind(command)))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(&graph_a), run(&graph_b));
}

fn command_kind(command: &Command) -> &'static str {
    match command {
        Command::BeginDebugRegion { .. } => "BeginDebugRegion",
        Command::EndDebugRegion => "EndDebugRegion",
        Command::BeginRenderPass { .. } => "BeginRenderPass",
        Command::EndRenderPass => "EndRenderPass",
        Command::ImageBarrier { .. } => "ImageBarrier",
        Command::ClearImage { .. } => "ClearImage",
        Command::BlitImage { .. } => "BlitImage",
        Command::Dispatch { .. } => "Dispatch",
        _ => "Other",
    }
}
