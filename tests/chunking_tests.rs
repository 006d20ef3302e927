//! Command-list chunking and cross-queue semaphore chaining.

use std::any::Any;

use glam::Vec4;

use riptide::graph::{FrameGraphNode, NodeParams, register_node};
use riptide::rhi::{CommandList, SceneViewSnapshot};

mod common;
use common::*;

/// Records exactly four commands per frame.
#[derive(Default)]
struct FourClearsNode {
    params: NodeParams,
}

impl FrameGraphNode for FourClearsNode {
    fn type_name(&self) -> &'static str {
        "FourClears"
    }

    fn params(&self) -> &NodeParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut NodeParams {
        &mut self.params
    }

    fn process(
        &mut self,
        graph: &riptide::FrameGraph,
        _transfer: &mut CommandList,
        graphics: &mut CommandList,
        _snapshot: &SceneViewSnapshot,
    ) {
        let target = graph
            .get_render_target("BackBuffer")
            .expect("test target")
            .texture()
            .clone();
        for _ in 0..4 {
            graphics.clear_image(&target, Vec4::ZERO);
        }
    }

    fn clear(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

const FIVE_NODES_DOCUMENT: &str = r#"
{
    "renderTargets": [
        { "name": "BackBuffer", "width": 64, "height": 64, "format": "RGBA8_SRGB" }
    ],
    "frame": [
        { "name": "FourClears" },
        { "name": "FourClears" },
        { "name": "FourClears" },
        { "name": "FourClears" },
        { "name": "FourClears" }
    ]
}"#;

#[test]
fn command_budget_splits_the_frame_into_chained_chunks() {
    register_node("FourClears", || Box::new(FourClearsNode::default()));
    let (device, mut graph) = build_graph(FIVE_NODES_DOCUMENT);
    graph.max_recorded_commands = 8;

    let mut view = single_snapshot_view(empty_snapshot());
    let wait_semaphore = graph.process_and_submit(&mut view);

    // 5 nodes × 4 commands (plus the frame-data upload) against a budget
    // of 8 yields three submitted pairs.
    let log = device.submission_log();
    assert_eq!(log.len(), 6, "three command-list pairs");
    assert_semaphore_chain(&log);

    // The last graphics signal is the present wait semaphore.
    assert_eq!(
        wait_semaphore.map(|s| s.id()),
        log[5].signal.as_ref().map(|s| s.id())
    );

    // No submission waits on anything outside the linear chain.
    for pair in log.chunks_exact(2) {
        assert!(pair[0].signal.is_some());
        assert!(pair[1].signal.is_some());
    }

    // All twenty clears survive across the chunks.
    let clears: usize = log
        .iter()
        .map(|submission| {
            submission
                .list
                .commands()
                .iter()
                .filter(|c| matches!(c, riptide::rhi::Command::ClearImage { .. }))
                .count()
        })
        .sum();
    assert_eq!(clears, 20);
}

#[test]
fn zero_gpu_cost_budget_chunks_after_every_node() {
    register_node("FourClears", || Box::new(FourClearsNode::default()));
    let (device, mut graph) = build_graph(FIVE_NODES_DOCUMENT);
    graph.max_gpu_cost = 0;

    let mut view = single_snapshot_view(empty_snapshot());
    graph.process_and_submit(&mut view);

    // A boundary after every node plus the trailing pair.
    let log = device.submission_log();
    assert_eq!(log.len(), 12);
    assert_semaphore_chain(&log);
}

#[test]
fn unchunked_frames_still_chain_transfer_before_graphics() {
    register_node("FourClears", || Box::new(FourClearsNode::default()));
    let (device, graph) = build_graph(FIVE_NODES_DOCUMENT);

    let mut view = single_snapshot_view(empty_snapshot());
    graph.process_and_submit(&mut view);

    let log = device.submission_log();
    assert_eq!(log.len(), 2);
    assert_semaphore_chain(&log);
    assert!(log[0].wait.is_none(), "first transfer waits on nothing");
}
