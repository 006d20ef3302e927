//! Per-frame graph execution.
//!
//! For each camera snapshot the runtime allocates a graphics/transfer
//! command-list pair, uploads the frame uniform block, walks the node
//! list in declaration order and chains into multiple submissions when
//! the accumulated cost or command count exceeds the graph's budgets.
//!
//! The chaining discipline: at a chunk boundary the transfer list is
//! submitted signalling a fresh semaphore and waiting on the previous
//! chunk's graphics semaphore; the graphics list waits on the transfer
//! semaphore and signals the semaphore the *next* chunk's transfer will
//! wait on. Graphics of chunk `k` therefore waits on transfer of chunk
//! `k` and transfer of chunk `k+1` waits on graphics of chunk `k` —
//! strict alternation across chunks, free parallelism inside one.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec4};

use crate::rhi::{
    CommandList, BindingKind, FrameData, QueueKind, SceneView, SceneViewSnapshot, Semaphore,
};

use super::graph::FrameGraph;
use super::node::PrepareTask;

const GRAPHICS_REGION_COLOR: Vec4 = Vec4::new(0.75, 1.0, 0.75, 0.1);
const TRANSFER_REGION_COLOR: Vec4 = Vec4::new(0.75, 0.75, 1.0, 0.1);

/// Everything the caller needs to finish the frame: the final, closed
/// but unsubmitted command-list pair of each snapshot and the semaphore
/// the present queue must wait on once those pairs are submitted.
pub struct FrameOutput {
    pub transfer_cmd_lists: Vec<CommandList>,
    pub graphics_cmd_lists: Vec<CommandList>,
    pub wait_semaphore: Option<Arc<Semaphore>>,
}

impl FrameGraph {
    /// Collects the preparation tasks of every node for every snapshot.
    ///
    /// The caller fans them out on its worker pool and joins them before
    /// calling [`FrameGraph::process`].
    #[must_use]
    pub fn prepare(&self, view: &SceneView) -> Vec<PrepareTask> {
        let mut tasks = Vec::new();
        for snapshot in &view.snapshots {
            for slot in &self.nodes {
                if let Some(task) = slot.node.lock().prepare(self, snapshot) {
                    tasks.push(task);
                }
            }
        }
        tasks
    }

    /// Runs prepare tasks on scoped worker threads and joins them all.
    pub fn run_prepare_tasks(tasks: Vec<PrepareTask>) {
        if tasks.is_empty() {
            return;
        }
        std::thread::scope(|scope| {
            for task in tasks {
                scope.spawn(task);
            }
        });
    }

    /// Processes every snapshot of the view.
    ///
    /// Interior chunks are submitted here; the final pair per snapshot is
    /// returned closed but unsubmitted together with the trailing chain
    /// semaphore.
    pub fn process(&self, view: &mut SceneView) -> FrameOutput {
        self.patch_lights_data(view);

        let device = self.device().clone();
        let mut output = FrameOutput {
            transfer_cmd_lists: Vec::new(),
            graphics_cmd_lists: Vec::new(),
            wait_semaphore: None,
        };

        let delta_time = view.delta_time;
        let current_time = view.current_time;

        for snapshot in &mut view.snapshots {
            snapshot.delta_time = delta_time;

            let mut graphics = device.create_command_list(QueueKind::Graphics, false);
            let mut transfer = device.create_command_list(QueueKind::Compute, false);
            graphics.begin_debug_region("FrameGraph:Graphics", GRAPHICS_REGION_COLOR);
            transfer.begin_debug_region("FrameGraph:Transfer", TRANSFER_REGION_COLOR);

            self.fill_frame_data(&mut transfer, snapshot, delta_time, current_time);

            let mut chain_semaphore: Option<Arc<Semaphore>> = None;

            for slot in &self.nodes {
                slot.node
                    .lock()
                    .process(self, &mut transfer, &mut graphics, snapshot);

                let num_commands = transfer.num_commands() + graphics.num_commands();
                let gpu_cost = transfer.gpu_cost() + graphics.gpu_cost();
                if gpu_cost > self.max_gpu_cost || num_commands > self.max_recorded_commands {
                    graphics.end_debug_region();
                    transfer.end_debug_region();

                    // Submit the chunk and open fresh lists.
                    let full_transfer = std::mem::replace(
                        &mut transfer,
                        device.create_command_list(QueueKind::Compute, false),
                    );
                    let full_graphics = std::mem::replace(
                        &mut graphics,
                        device.create_command_list(QueueKind::Graphics, false),
                    );

                    let new_chain_semaphore = device.create_semaphore();
                    device.submit(
                        full_transfer,
                        Some(device.create_fence()),
                        Some(new_chain_semaphore.clone()),
                        chain_semaphore.take(),
                    );

                    let graphics_semaphore = device.create_semaphore();
                    device.submit(
                        full_graphics,
                        Some(device.create_fence()),
                        Some(graphics_semaphore.clone()),
                        Some(new_chain_semaphore),
                    );
                    chain_semaphore = Some(graphics_semaphore);

                    graphics.begin_debug_region("FrameGraph:Graphics", GRAPHICS_REGION_COLOR);
                    transfer.begin_debug_region("FrameGraph:Transfer", TRANSFER_REGION_COLOR);
                }
            }

            graphics.end_debug_region();
            transfer.end_debug_region();

            output.wait_semaphore = chain_semaphore;
            output.transfer_cmd_lists.push(transfer);
            output.graphics_cmd_lists.push(graphics);
        }

        output
    }

    /// [`FrameGraph::process`] plus submission of the final pairs under
    /// the same chaining discipline. Returns the present-queue wait
    /// semaphore.
    pub fn process_and_submit(&self, view: &mut SceneView) -> Option<Arc<Semaphore>> {
        let output = self.process(view);
        let device = self.device();

        let mut chain_semaphore = output.wait_semaphore;
        for (transfer, graphics) in output
            .transfer_cmd_lists
            .into_iter()
            .zip(output.graphics_cmd_lists)
        {
            let new_chain_semaphore = device.create_semaphore();
            device.submit(
                transfer,
                Some(device.create_fence()),
                Some(new_chain_semaphore.clone()),
                chain_semaphore.take(),
            );

            let graphics_semaphore = device.create_semaphore();
            device.submit(
                graphics,
                Some(device.create_fence()),
                Some(graphics_semaphore.clone()),
                Some(new_chain_semaphore),
            );
            chain_semaphore = Some(graphics_semaphore);
        }
        chain_semaphore
    }

    /// Creates the per-snapshot frame-bindings set and records the
    /// uniform upload on the transfer list.
    fn fill_frame_data(
        &self,
        transfer: &mut CommandList,
        snapshot: &mut SceneViewSnapshot,
        delta_time: f32,
        current_time: f32,
    ) {
        let device = self.device();
        let bindings = device.create_shader_bindings();
        let binding = device.add_uniform_binding(
            &bindings,
            "frameData",
            0,
            std::mem::size_of::<FrameData>() as u64,
        );

        let viewport = device.render_area();
        let frame_data = snapshot.camera.as_ref().map_or_else(
            || FrameData {
                view: Mat4::IDENTITY,
                projection: Mat4::IDENTITY,
                inv_projection: Mat4::IDENTITY,
                viewport_size: Vec2::new(viewport.x as f32, viewport.y as f32),
                current_time,
                delta_time,
                ..FrameData::default()
            },
            |camera| FrameData {
                view: camera.view,
                projection: camera.projection,
                inv_projection: camera.inv_projection(),
                camera_position: camera.position.extend(1.0),
                camera_z_near_z_far: Vec2::new(camera.z_near, camera.z_far),
                viewport_size: Vec2::new(viewport.x as f32, viewport.y as f32),
                current_time,
                delta_time,
                _padding: Vec2::ZERO,
            },
        );

        transfer.begin_debug_region("Fill Frame Data", TRANSFER_REGION_COLOR);
        transfer.update_shader_binding(&binding, 0, bytemuck::bytes_of(&frame_data));
        transfer.end_debug_region();

        snapshot.frame_bindings = Some(bindings);
    }

    /// Swaps the environment samplers into each snapshot's lights-data
    /// set when the graph's current ones differ, recomputing the set's
    /// compatibility hash only when something actually changed.
    fn patch_lights_data(&self, view: &mut SceneView) {
        const PATCHES: [(&str, &str, u32); 3] = [
            ("g_irradianceCubemap", "g_irradianceCubemap", 3),
            ("g_brdfSampler", "g_brdfSampler", 4),
            ("g_envCubemap", "g_envCubemap", 5),
        ];

        for snapshot in &mut view.snapshots {
            let Some(lights_data) = snapshot.lights_data.as_ref() else {
                continue;
            };

            let mut changed = false;
            for (sampler_name, binding_name, slot) in PATCHES {
                let Some(texture) = self
                    .get_sampler(sampler_name)
                    .and_then(|r| r.as_texture())
                else {
                    continue;
                };
                let current = lights_data
                    .get_or_add(binding_name, slot, BindingKind::CombinedImageSampler);
                if current.texture().map(|t| t.id()) != Some(texture.id()) {
                    current.set_texture(texture);
                    changed = true;
                }
            }

            if let Some(ao) = self.get_render_target("g_AO") {
                let current =
                    lights_data.get_or_add("g_aoSampler", 9, BindingKind::CombinedImageSampler);
                if current.texture().map(|t| t.id()) != Some(ao.texture().id()) {
                    current.set_texture(ao.texture().clone());
                    changed = true;
                }
            }

            if changed {
                lights_data.recalculate_compatibility();
            }
        }
    }
}
