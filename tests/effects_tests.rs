//! Post-processing node scenarios: bloom mip chain and eye adaptation.

use riptide::rhi::Command;

mod common;
use common::*;

const BLOOM_DOCUMENT: &str = r#"
{
    "renderTargets": [
        { "name": "BackBuffer", "width": 1024, "height": 1024, "format": "RGBA8_SRGB" },
        { "name": "Bloom", "width": 1024, "height": 1024, "format": "RGBA16F", "mips": 6 }
    ],
    "frame": [
        {
            "name": "Bloom",
            "values": {
                "threshold": [1, 0, 0, 0],
                "knee": [0.5, 0, 0, 0],
                "bloomIntensity": [0.8, 0, 0, 0],
                "dirtIntensity": [0.2, 0, 0, 0]
            },
            "renderTargets": { "bloom": "Bloom" }
        }
    ]
}"#;

#[test]
fn bloom_walks_the_mip_chain_down_and_up() {
    let (_, graph) = build_graph(BLOOM_DOCUMENT);
    let mut view = single_snapshot_view(empty_snapshot());
    let output = graph.process(&mut view);
    let graphics = &output.graphics_cmd_lists[0];

    let groups: Vec<_> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::Dispatch { groups, .. } => Some(*groups),
            _ => None,
        })
        .collect();

    // Downscale writes mips 1..5 (512..32), upscale writes 4..0
    // (64..1024), workgroups of 8×8 either way.
    let expected: Vec<(u32, u32, u32)> = [512u32, 256, 128, 64, 32]
        .into_iter()
        .chain([64, 128, 256, 512, 1024])
        .map(|size| (size.div_ceil(8), size.div_ceil(8), 1))
        .collect();
    assert_eq!(groups, expected);

    // Threshold only applies at the first downscale level.
    let threshold_flags: Vec<u32> = graphics
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::Dispatch { push_constants, .. } if push_constants.len() == 32 => {
                Some(u32::from_le_bytes(
                    push_constants[16..20].try_into().unwrap(),
                ))
            }
            _ => None,
        })
        .collect();
    assert_eq!(threshold_flags.len(), 5);
    assert_eq!(threshold_flags[0], 1);
    assert!(threshold_flags[1..].iter().all(|&flag| flag == 0));

    assert_valid_layout_walk(graphics);
    assert_well_nested(graphics);
}

const EYE_ADAPTATION_DOCUMENT: &str = r#"
{
    "renderTargets": [
        { "name": "BackBuffer", "width": 1920, "height": 1080, "format": "RGBA8_SRGB" },
        { "name": "DepthBuffer", "width": 1920, "height": 1080, "format": "D32_SFLOAT" },
        { "name": "HDR", "width": 1920, "height": 1080, "format": "RGBA16F" },
        { "name": "HDRQuarter", "width": 480, "height": 270, "format": "RGBA16F" }
    ],
    "frame": [
        {
            "name": "EyeAdaptation",
            "values": {
                "toneMappingShader": "Shaders/ToneMapping.shader",
                "data.whitePoint": [1, 1, 1, 0]
            },
            "renderTargets": {
                "color": "BackBuffer",
                "hdrColor": "HDRQuarter",
                "colorSampler": "HDR"
            }
        }
    ]
}"#;

#[test]
fn eye_adaptation_uses_the_reference_time_coefficient() {
    let (_, graph) = build_graph(EYE_ADAPTATION_DOCUMENT);

    let run_frame = || {
        let mut view = single_snapshot_view(empty_snapshot());
        view.delta_time = 1.0 / 60.0;
        graph.process(&mut view)
    };

    let expected_coefficient = 1.0 - (-(1.0f32 / 60.0) * 1.8).exp2();

    for frame in 0..2 {
        let output = run_frame();
        let graphics = &output.graphics_cmd_lists[0];

        // Two dispatches: histogram then average reduction.
        let pushes: Vec<&Vec<u8>> = graphics
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::Dispatch { push_constants, .. } => Some(push_constants),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), 2, "frame {frame}");

        // The reduction's last float is the adaptation coefficient.
        let average_push = pushes[1];
        assert_eq!(average_push.len(), 16);
        let coefficient = f32::from_le_bytes(average_push[12..16].try_into().unwrap());
        assert!(
            (coefficient - expected_coefficient).abs() < 1e-6,
            "frame {frame}: coefficient {coefficient} vs {expected_coefficient}"
        );

        assert_well_nested(graphics);
        assert_valid_layout_walk(graphics);
    }
}

#[test]
fn eye_adaptation_zero_initialises_the_histogram_once() {
    let (_, graph) = build_graph(EYE_ADAPTATION_DOCUMENT);

    let zero_init_uploads = |output: &riptide::FrameOutput| {
        output.transfer_cmd_lists[0]
            .commands()
            .iter()
            .filter(|command| match command {
                Command::UpdateShaderBinding { binding, data, .. } => {
                    binding.name() == "histogram" && data.len() == 256 * 4
                }
                _ => false,
            })
            .count()
    };

    let mut view = single_snapshot_view(empty_snapshot());
    let first = graph.process(&mut view);
    assert_eq!(zero_init_uploads(&first), 1);

    let mut view = single_snapshot_view(empty_snapshot());
    let second = graph.process(&mut view);
    assert_eq!(zero_init_uploads(&second), 0);
}

#[test]
fn eye_adaptation_histogram_covers_the_quarter_target() {
    let (_, graph) = build_graph(EYE_ADAPTATION_DOCUMENT);
    let mut view = single_snapshot_view(empty_snapshot());
    let output = graph.process(&mut view);

    let groups: Vec<_> = output.graphics_cmd_lists[0]
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::Dispatch { groups, .. } => Some(*groups),
            _ => None,
        })
        .collect();
    assert_eq!(groups, vec![(480 / 16, 270 / 16, 1), (1, 1, 1)]);
}
