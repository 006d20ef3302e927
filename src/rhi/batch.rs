//! Batching and the shared indirect-draw recorder.
//!
//! A [`Batch`] groups proxies whose material and mesh buffers are
//! pipeline-compatible: one `bind_material`/`bind_shader_bindings` pair is
//! amortised across every mesh and instance in the batch. Per-instance
//! rows live in a shared SSBO; each batch owns a contiguous slice whose
//! base row lands in the indirect commands' `first_instance`.
//!
//! The recorder is shared by the depth prepass, the scene render and the
//! shadow prepass.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytemuck::Pod;
use glam::{Vec2, Vec4};
use rustc_hash::FxHashMap;

use super::command::CommandList;
use super::device::Device;
use super::material::Material;
use super::resources::{Buffer, Mesh};
use super::types::DrawIndexedIndirect;

/// Slack added when the indirect buffer grows, so small batch-count
/// fluctuations do not reallocate every frame.
const INDIRECT_BUFFER_SLACK: u64 = 256;

/// Unit of pipeline-compatible work.
///
/// Two batches are equal iff material bindings, both shaders, render
/// state and the vertex/index buffer identities all match — the exact set
/// of state one bind sequence covers.
#[derive(Clone, Debug)]
pub struct Batch {
    pub material: Arc<Material>,
    pub mesh: Arc<Mesh>,
}

impl Batch {
    #[must_use]
    pub fn new(material: Arc<Material>, mesh: Arc<Mesh>) -> Self {
        Self { material, mesh }
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.material.bindings_compatibility() == other.material.bindings_compatibility()
            && shader_id(&self.material.vertex_shader()) == shader_id(&other.material.vertex_shader())
            && shader_id(&self.material.fragment_shader())
                == shader_id(&other.material.fragment_shader())
            && self.material.render_state == other.material.render_state
            && self.mesh.vertex_buffer.compatibility_hash()
                == other.mesh.vertex_buffer.compatibility_hash()
            && self.mesh.index_buffer.compatibility_hash()
                == other.mesh.index_buffer.compatibility_hash()
    }
}

impl Eq for Batch {}

impl Hash for Batch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.material.bindings_compatibility().hash(state);
        self.mesh.vertex_buffer.compatibility_hash().hash(state);
        self.mesh.index_buffer.compatibility_hash().hash(state);
    }
}

fn shader_id(shader: &Option<Arc<super::resources::Shader>>) -> u64 {
    shader.as_ref().map_or(0, |s| s.id())
}

/// Meshes of one batch in insertion order, each with its instance rows.
#[derive(Debug)]
pub struct InstancedDraws<P> {
    entries: Vec<(Arc<Mesh>, Vec<P>)>,
}

impl<P> Default for InstancedDraws<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P> InstancedDraws<P> {
    pub fn push(&mut self, mesh: &Arc<Mesh>, instance: P) {
        if let Some((_, instances)) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| Arc::ptr_eq(existing, mesh))
        {
            instances.push(instance);
        } else {
            self.entries.push((mesh.clone(), vec![instance]));
        }
    }

    #[must_use]
    pub fn num_meshes(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn total_instances(&self) -> usize {
        self.entries.iter().map(|(_, i)| i.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Arc<Mesh>, Vec<P>)> {
        self.entries.iter()
    }
}

/// Insertion-ordered batch → draw-call table built while filtering the
/// scene view.
#[derive(Debug)]
pub struct DrawCalls<P> {
    batches: Vec<Batch>,
    draws: Vec<InstancedDraws<P>>,
    lookup: FxHashMap<Batch, usize>,
}

impl<P> Default for DrawCalls<P> {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            draws: Vec::new(),
            lookup: FxHashMap::default(),
        }
    }
}

impl<P: Pod> DrawCalls<P> {
    pub fn insert(&mut self, material: &Arc<Material>, mesh: &Arc<Mesh>, instance: P) {
        let key = Batch::new(material.clone(), mesh.clone());
        let index = *self.lookup.entry(key.clone()).or_insert_with(|| {
            self.batches.push(key);
            self.draws.push(InstancedDraws::default());
            self.draws.len() - 1
        });
        self.draws[index].push(mesh, instance);
    }

    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    #[must_use]
    pub fn total_instances(&self) -> usize {
        self.draws.iter().map(InstancedDraws::total_instances).sum()
    }

    #[must_use]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    #[must_use]
    pub fn draws(&self, batch_index: usize) -> &InstancedDraws<P> {
        &self.draws[batch_index]
    }

    /// Packs every instance row into one contiguous buffer (batch vector
    /// order, meshes in insertion order) and computes each batch's base
    /// row: `storage_index[j] = base + Σ instances of batches 0..j`.
    #[must_use]
    pub fn pack_instances(&self, base_index: u32) -> (Vec<u32>, Vec<P>) {
        let mut storage_index = vec![0u32; self.batches.len()];
        let mut rows = Vec::with_capacity(self.total_instances());
        for (j, draws) in self.draws.iter().enumerate() {
            storage_index[j] = base_index + rows.len() as u32;
            for (_, instances) in draws.iter() {
                rows.extend_from_slice(instances);
            }
        }
        (storage_index, rows)
    }
}

/// Records indirect draws for batches `start..end` into `cmd`.
///
/// Grows `indirect_buffer` (with slack) when the range needs more room,
/// deduplicates material and buffer binds against the previous batch, and
/// writes each batch's [`DrawIndexedIndirect`] block immediately before
/// the `draw_indexed_indirect` that consumes it — both on the same list,
/// so the write precedes the indirect read in program order.
pub fn record_draw_calls<P: Pod>(
    start: usize,
    end: usize,
    draw_calls: &DrawCalls<P>,
    cmd: &mut CommandList,
    device: &Device,
    shader_binding_sets: impl Fn(&Arc<Material>) -> Vec<Arc<super::bindings::ShaderBindingSet>>,
    storage_index: &[u32],
    indirect_buffer: &mut Option<Arc<Buffer>>,
    viewport: Vec4,
    scissors: (Vec2, Vec2),
) {
    let stride = std::mem::size_of::<DrawIndexedIndirect>() as u64;

    let mut indirect_buffer_size = 0u64;
    for j in start..end {
        indirect_buffer_size += draw_calls.draws(j).num_meshes() as u64 * stride;
    }

    let needs_grow = indirect_buffer
        .as_ref()
        .is_none_or(|b| b.size() < indirect_buffer_size);
    if needs_grow {
        *indirect_buffer =
            Some(device.create_indirect_buffer(indirect_buffer_size + INDIRECT_BUFFER_SLACK));
    }
    let indirect_buffer = indirect_buffer.as_ref().expect("indirect buffer allocated");

    let mut prev_material: Option<Arc<Material>> = None;
    let mut prev_vertex_buffer: Option<Arc<Buffer>> = None;
    let mut prev_index_buffer: Option<Arc<Buffer>> = None;

    let mut indirect_offset = 0u64;
    for j in start..end {
        let batch = &draw_calls.batches()[j];
        let material = &batch.material;
        let mesh = &batch.mesh;

        if prev_material.as_ref().is_none_or(|m| !Arc::ptr_eq(m, material)) {
            let sets = shader_binding_sets(material);
            cmd.bind_material(material);
            cmd.set_viewport(viewport, scissors.0, scissors.1, Vec2::new(0.0, 1.0));
            cmd.bind_shader_bindings(material, &sets);
            prev_material = Some(material.clone());
        }

        if prev_vertex_buffer
            .as_ref()
            .is_none_or(|b| !Arc::ptr_eq(b, &mesh.vertex_buffer))
        {
            cmd.bind_vertex_buffer(&mesh.vertex_buffer, 0);
            prev_vertex_buffer = Some(mesh.vertex_buffer.clone());
        }

        if prev_index_buffer
            .as_ref()
            .is_none_or(|b| !Arc::ptr_eq(b, &mesh.index_buffer))
        {
            cmd.bind_index_buffer(&mesh.index_buffer, 0);
            prev_index_buffer = Some(mesh.index_buffer.clone());
        }

        let mut commands: Vec<DrawIndexedIndirect> =
            Vec::with_capacity(draw_calls.draws(j).num_meshes());
        let mut ssbo_offset = 0u32;
        for (draw_mesh, instances) in draw_calls.draws(j).iter() {
            commands.push(DrawIndexedIndirect {
                index_count: draw_mesh.index_count(),
                instance_count: instances.len() as u32,
                first_index: draw_mesh.first_index(),
                vertex_offset: draw_mesh.vertex_offset(),
                first_instance: storage_index[j] + ssbo_offset,
            });
            ssbo_offset += instances.len() as u32;
        }

        let bytes: &[u8] = bytemuck::cast_slice(&commands);
        cmd.update_buffer(indirect_buffer, indirect_offset, bytes);
        cmd.draw_indexed_indirect(
            indirect_buffer,
            indirect_offset,
            commands.len() as u32,
            stride as u32,
        );

        indirect_offset += bytes.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::command::Command;
    use crate::rhi::device::{Device, DeviceDesc};
    use crate::rhi::resources::VertexLayout;
    use crate::rhi::types::{PrimitiveTopology, QueueKind, RenderState};
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Default, Pod, Zeroable)]
    struct Row {
        value: [f32; 4],
    }

    fn material(device: &Device, tag: u64) -> Arc<Material> {
        let shader = device.load_shader("Shaders/Standard.shader", "");
        let bindings = device.create_shader_bindings();
        device.add_uniform_binding(&bindings, "material", 0, 64);
        device.create_material(
            VertexLayout::P3N3UV2C4,
            PrimitiveTopology::TriangleList,
            RenderState::new(true, true, tag),
            shader,
            Some(bindings),
        )
    }

    fn mesh(device: &Device, indices: u64) -> Arc<Mesh> {
        device.create_mesh(VertexLayout::P3N3UV2C4, 48 * 4, indices * 4)
    }

    #[test]
    fn storage_offsets_are_prefix_sums_of_instance_counts() {
        let device = Device::new(DeviceDesc::default());
        let mat_a = material(&device, 1);
        let mat_b = material(&device, 2);
        let mesh_a = mesh(&device, 6);
        let mesh_b = mesh(&device, 12);

        let mut draw_calls = DrawCalls::<Row>::default();
        for _ in 0..3 {
            draw_calls.insert(&mat_a, &mesh_a, Row::default());
        }
        for _ in 0..2 {
            draw_calls.insert(&mat_b, &mesh_b, Row::default());
        }
        draw_calls.insert(&mat_a, &mesh_a, Row::default());

        assert_eq!(draw_calls.num_batches(), 2);
        let (storage_index, rows) = draw_calls.pack_instances(0);
        assert_eq!(rows.len(), 6);
        // Batch 0 holds 4 instances (3 + the late 1), batch 1 holds 2.
        assert_eq!(storage_index, vec![0, 4]);
    }

    #[test]
    fn first_instance_adds_per_mesh_running_offset() {
        let device = Device::new(DeviceDesc::default());
        let mat = material(&device, 1);
        let mesh_a = mesh(&device, 6);
        let mesh_b = mesh(&device, 6);

        // Same material, two meshes sharing vertex pools would be two
        // batches here (distinct buffers), so force one batch with two
        // meshes via identical buffer identity: use one mesh twice and a
        // second mesh in its own batch to exercise both paths.
        let mut draw_calls = DrawCalls::<Row>::default();
        draw_calls.insert(&mat, &mesh_a, Row::default());
        draw_calls.insert(&mat, &mesh_a, Row::default());
        draw_calls.insert(&mat, &mesh_b, Row::default());

        let (storage_index, _) = draw_calls.pack_instances(0);
        let mut cmd = device.create_command_list(QueueKind::Graphics, false);
        let mut indirect = None;
        record_draw_calls(
            0,
            draw_calls.num_batches(),
            &draw_calls,
            &mut cmd,
            &device,
            |m| vec![m.bindings.clone().unwrap()],
            &storage_index,
            &mut indirect,
            Vec4::new(0.0, 0.0, 64.0, 64.0),
            (Vec2::ZERO, Vec2::new(64.0, 64.0)),
        );

        let updates: Vec<_> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::UpdateBuffer { data, .. } => {
                    Some(bytemuck::pod_collect_to_vec::<u8, DrawIndexedIndirect>(data))
                }
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0][0].first_instance, storage_index[0]);
        assert_eq!(updates[0][0].instance_count, 2);
        assert_eq!(updates[1][0].first_instance, storage_index[1]);
    }

    #[test]
    fn material_bind_is_amortised_across_batches() {
        let device = Device::new(DeviceDesc::default());
        let mat = material(&device, 1);
        let mesh_a = mesh(&device, 6);
        let mesh_b = mesh(&device, 6);

        let mut draw_calls = DrawCalls::<Row>::default();
        draw_calls.insert(&mat, &mesh_a, Row::default());
        draw_calls.insert(&mat, &mesh_b, Row::default());

        let (storage_index, _) = draw_calls.pack_instances(0);
        let mut cmd = device.create_command_list(QueueKind::Graphics, false);
        let mut indirect = None;
        record_draw_calls(
            0,
            2,
            &draw_calls,
            &mut cmd,
            &device,
            |m| vec![m.bindings.clone().unwrap()],
            &storage_index,
            &mut indirect,
            Vec4::new(0.0, 0.0, 64.0, 64.0),
            (Vec2::ZERO, Vec2::new(64.0, 64.0)),
        );

        let material_binds = cmd
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::BindMaterial { .. }))
            .count();
        assert_eq!(material_binds, 1);
    }

    #[test]
    fn indirect_buffer_grows_with_slack_and_is_reused() {
        let device = Device::new(DeviceDesc::default());
        let mat = material(&device, 1);
        let mesh_a = mesh(&device, 6);

        let mut draw_calls = DrawCalls::<Row>::default();
        draw_calls.insert(&mat, &mesh_a, Row::default());
        let (storage_index, _) = draw_calls.pack_instances(0);

        let mut indirect = None;
        let mut cmd = device.create_command_list(QueueKind::Graphics, false);
        record_draw_calls(
            0,
            1,
            &draw_calls,
            &mut cmd,
            &device,
            |m| vec![m.bindings.clone().unwrap()],
            &storage_index,
            &mut indirect,
            Vec4::ZERO,
            (Vec2::ZERO, Vec2::ZERO),
        );
        let first = indirect.clone().unwrap();
        assert_eq!(first.size(), 20 + INDIRECT_BUFFER_SLACK);

        // A second pass of the same size keeps the buffer.
        let mut cmd = device.create_command_list(QueueKind::Graphics, false);
        record_draw_calls(
            0,
            1,
            &draw_calls,
            &mut cmd,
            &device,
            |m| vec![m.bindings.clone().unwrap()],
            &storage_index,
            &mut indirect,
            Vec4::ZERO,
            (Vec2::ZERO, Vec2::ZERO),
        );
        assert!(Arc::ptr_eq(&first, indirect.as_ref().unwrap()));
    }
}
