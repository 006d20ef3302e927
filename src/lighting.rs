//! Scene lighting state consumed by the frame graph.
//!
//! Owns the lights binding set every lit node reads: a light SSBO at
//! slot 0 and the `shadowMaps` sampler array at slot 7, backed by the
//! cascade render targets. Before the frame graph runs, shadow-map update
//! requests are assembled here: per directional light, per cascade, the
//! scene is traced against the cascade frustum, geometry already covered
//! by a smaller cascade is subtracted, and the cascade's dependency list
//! records which earlier requests it relies on.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

use crate::math::{Aabb, Frustum};
use crate::rhi::{
    BindingKind, CameraState, Clamping, CommandList, Device, Filtration, MeshProxy, RenderTarget,
    ShaderBindingSet, ShadowCaster, ShadowMapRequest, TextureFormat, TextureUsage,
};

/// Cascade count of the directional CSM chain.
pub const NUM_CASCADES: usize = 4;

/// Shadow-map slots in the `shadowMaps` sampler array.
pub const MAX_SHADOWS_IN_VIEW: usize = 16;

/// Capacity of the light SSBO.
pub const LIGHTS_MAX: u64 = 4096;

/// Practical split scheme blend factor (0 = uniform, 1 = logarithmic).
const CASCADE_SPLIT_LAMBDA: f32 = 0.5;

const SHADOW_MAP_FORMAT: TextureFormat = TextureFormat::D32Sfloat;
const CASCADE_RESOLUTIONS: [u32; NUM_CASCADES] = [4096, 2048, 2048, 1024];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// CPU-side light description.
#[derive(Clone, Debug)]
pub struct LightSource {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub intensity: Vec3,
    pub attenuation: Vec3,
    pub bounds: Vec3,
    /// Inner/outer spot angles, degrees.
    pub cut_off: Vec2,
    pub cast_shadows: bool,
    pub is_active: bool,
}

/// GPU layout of one light SSBO row.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightShaderData {
    pub world_position: Vec4,
    pub direction: Vec4,
    pub intensity: Vec4,
    pub attenuation: Vec4,
    pub bounds: Vec4,
    /// Cosines of the spot cut-off angles.
    pub cut_off: Vec2,
    pub kind: i32,
    pub _padding: u32,
}

impl LightShaderData {
    fn from_source(light: &LightSource) -> Self {
        Self {
            world_position: light.position.extend(1.0),
            direction: light.direction.extend(0.0),
            intensity: light.intensity.extend(0.0),
            attenuation: light.attenuation.extend(0.0),
            bounds: light.bounds.extend(0.0),
            cut_off: Vec2::new(
                light.cut_off.x.to_radians().cos(),
                light.cut_off.y.to_radians().cos(),
            ),
            kind: match light.kind {
                LightKind::Directional => 0,
                LightKind::Point => 1,
                LightKind::Spot => 2,
            },
            _padding: 0,
        }
    }
}

/// Lights binding set plus the cascade shadow-map pool.
pub struct LightingState {
    lights_data: Arc<ShaderBindingSet>,
    csm_shadow_maps: Vec<Arc<RenderTarget>>,
}

impl LightingState {
    #[must_use]
    pub fn new(device: &Device) -> Self {
        let lights_data = device.create_shader_bindings();
        device.add_ssbo_binding(
            &lights_data,
            "light",
            0,
            std::mem::size_of::<LightShaderData>() as u64,
            LIGHTS_MAX,
        );

        let usage = TextureUsage::DEPTH_STENCIL_ATTACHMENT
            | TextureUsage::TRANSFER_SRC
            | TextureUsage::TRANSFER_DST
            | TextureUsage::SAMPLED;

        let default_shadow_map = device.create_render_target(
            UVec2::ONE,
            1,
            SHADOW_MAP_FORMAT,
            Filtration::Linear,
            Clamping::Clamp,
            usage,
        );

        let csm_shadow_maps: Vec<_> = (0..NUM_CASCADES)
            .map(|cascade| {
                device.create_render_target(
                    UVec2::splat(CASCADE_RESOLUTIONS[cascade]),
                    1,
                    SHADOW_MAP_FORMAT,
                    Filtration::Linear,
                    Clamping::Clamp,
                    usage,
                )
            })
            .collect();

        let shadow_maps: Vec<_> = (0..MAX_SHADOWS_IN_VIEW)
            .map(|i| {
                csm_shadow_maps
                    .get(i)
                    .unwrap_or(&default_shadow_map)
                    .texture()
                    .clone()
            })
            .collect();
        lights_data.add_sampler_array("shadowMaps", 7, shadow_maps);

        Self {
            lights_data,
            csm_shadow_maps,
        }
    }

    #[inline]
    #[must_use]
    pub fn lights_data(&self) -> Arc<ShaderBindingSet> {
        self.lights_data.clone()
    }

    #[must_use]
    pub fn cascade_shadow_map(&self, cascade: usize) -> Arc<RenderTarget> {
        self.csm_shadow_maps[cascade].clone()
    }

    /// Writes all active lights into the SSBO on the world's transfer
    /// list.
    pub fn update_lights(&self, cmd: &mut CommandList, lights: &[LightSource]) {
        let rows: Vec<LightShaderData> = lights
            .iter()
            .filter(|l| l.is_active)
            .map(LightShaderData::from_source)
            .collect();
        if rows.is_empty() {
            return;
        }
        let binding = self
            .lights_data
            .get_or_add("light", 0, BindingKind::StorageBuffer);
        cmd.update_shader_binding(&binding, binding.buffer_offset(), bytemuck::cast_slice(&rows));
    }

    /// Builds the cascade update requests for every shadow-casting
    /// directional light against one camera.
    #[must_use]
    pub fn assemble_shadow_requests(
        &self,
        camera: &CameraState,
        lights: &[LightSource],
        proxies: &[MeshProxy],
    ) -> Vec<ShadowMapRequest> {
        let mut requests = Vec::new();

        for light in lights {
            if !light.cast_shadows
                || !light.is_active
                || light.kind != LightKind::Directional
            {
                continue;
            }

            let splits =
                compute_cascade_splits(NUM_CASCADES, camera.z_near, camera.z_far, CASCADE_SPLIT_LAMBDA);
            let base_request = requests.len() as u32;
            let mut cascade_frustums: Vec<Frustum> = Vec::with_capacity(NUM_CASCADES);

            let mut split_near = camera.z_near;
            for (k, &split_far) in splits.iter().enumerate() {
                let light_matrix =
                    cascade_light_matrix(camera, light.direction, split_near, split_far);
                let frustum = Frustum::from_matrix(light_matrix);

                // Trace the scene against this cascade.
                let mut casters: Vec<ShadowCaster> = proxies
                    .iter()
                    .filter(|proxy| {
                        frustum.contains_sphere(
                            proxy.sphere_bounds.truncate(),
                            proxy.sphere_bounds.w,
                        )
                    })
                    .map(|proxy| ShadowCaster {
                        world_matrix: proxy.world_matrix,
                        sphere_bounds: proxy.sphere_bounds,
                        meshes: proxy.meshes.clone(),
                    })
                    .collect();

                let mut dependencies = Vec::new();
                if k > 0 {
                    // Geometry a smaller cascade already drew is not
                    // duplicated; the dependency list records where it
                    // went instead.
                    casters.retain(|caster| {
                        let aabb = caster_aabb(caster);
                        !cascade_frustums[..k]
                            .iter()
                            .any(|lower| lower.intersects_aabb(&aabb))
                    });
                    for z in (1..=k).rev() {
                        dependencies.push(base_request + (k - z) as u32);
                    }
                }

                cascade_frustums.push(frustum);
                requests.push(ShadowMapRequest {
                    light_matrix,
                    shadow_map: self.csm_shadow_maps[k].clone(),
                    cascade_index: k as u32,
                    casters,
                    dependencies,
                });

                split_near = split_far;
            }
        }

        requests
    }
}

fn caster_aabb(caster: &ShadowCaster) -> Aabb {
    Aabb::from_sphere(caster.sphere_bounds)
}

/// Practical split scheme: a lambda blend of uniform and logarithmic
/// distributions. Returns the far plane of each cascade.
#[must_use]
pub fn compute_cascade_splits(count: usize, near: f32, far: f32, lambda: f32) -> Vec<f32> {
    let count = count.max(1);
    (1..=count)
        .map(|i| {
            let p = i as f32 / count as f32;
            let log = near * (far / near).powf(p);
            let uniform = near + (far - near) * p;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Orthographic light projection fitted around one camera sub-frustum.
fn cascade_light_matrix(
    camera: &CameraState,
    light_direction: Vec3,
    split_near: f32,
    split_far: f32,
) -> Mat4 {
    let slice_projection =
        Mat4::perspective_rh(camera.fov_y, camera.aspect, split_near, split_far);
    let inv = (slice_projection * camera.view).inverse();

    // Bounding sphere of the eight slice corners.
    let mut corners = [Vec3::ZERO; 8];
    let mut index = 0;
    for x in [-1.0f32, 1.0] {
        for y in [-1.0f32, 1.0] {
            for z in [0.0f32, 1.0] {
                let corner = inv * Vec4::new(x, y, z, 1.0);
                corners[index] = corner.truncate() / corner.w;
                index += 1;
            }
        }
    }
    let center = corners.iter().copied().sum::<Vec3>() / 8.0;
    let radius = corners
        .iter()
        .map(|c| c.distance(center))
        .fold(0.0f32, f32::max)
        .max(1.0);

    let direction = light_direction.normalize_or_zero();
    let up = if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_to_rh(center - direction * radius * 2.0, direction, up);
    let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 4.0);
    projection * view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{DeviceDesc, Mesh, VertexLayout};

    fn test_camera() -> CameraState {
        CameraState {
            view: Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0),
            position: Vec3::new(0.0, 2.0, 5.0),
            z_near: 0.1,
            z_far: 100.0,
            fov_y: 1.0,
            aspect: 16.0 / 9.0,
        }
    }

    fn proxy_with_radius(device: &Device, position: Vec3, radius: f32) -> MeshProxy {
        let mesh: Arc<Mesh> = device.create_mesh(VertexLayout::P3N3UV2C4, 48 * 3, 3 * 4);
        MeshProxy {
            world_matrix: Mat4::from_translation(position),
            sphere_bounds: position.extend(radius),
            meshes: vec![mesh],
            materials: Vec::new(),
        }
    }

    fn proxy_at(device: &Device, position: Vec3) -> MeshProxy {
        proxy_with_radius(device, position, 0.5)
    }

    /// A camera with short, tightly fitted cascades so size-dependent
    /// subtraction is observable at small world scales.
    fn close_range_camera() -> CameraState {
        CameraState {
            view: Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y),
            projection: Mat4::perspective_rh(0.5, 1.0, 0.1, 10.0),
            position: Vec3::ZERO,
            z_near: 0.1,
            z_far: 10.0,
            fov_y: 0.5,
            aspect: 1.0,
        }
    }

    fn sun_straight_down() -> LightSource {
        LightSource {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            intensity: Vec3::ONE,
            attenuation: Vec3::ZERO,
            bounds: Vec3::ZERO,
            cut_off: Vec2::ZERO,
            cast_shadows: true,
            is_active: true,
        }
    }

    fn caster_counts(requests: &[ShadowMapRequest]) -> Vec<usize> {
        requests.iter().map(|request| request.casters.len()).collect()
    }

    #[test]
    fn cascade_splits_increase_and_end_at_far() {
        let splits = compute_cascade_splits(4, 0.1, 100.0, 0.5);
        assert_eq!(splits.len(), 4);
        for window in splits.windows(2) {
            assert!(window[1] > window[0]);
        }
        assert!((splits[3] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn lights_set_has_ssbo_and_shadow_array() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);
        let set = lighting.lights_data();
        assert!(set.find("light").is_some());
        let shadow_maps = set.find("shadowMaps").unwrap();
        assert_eq!(shadow_maps.slot(), 7);
        assert_eq!(shadow_maps.textures().len(), MAX_SHADOWS_IN_VIEW);
    }

    #[test]
    fn directional_light_produces_one_request_per_cascade() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);
        let sun = LightSource {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::new(0.0, -1.0, 0.2).normalize(),
            intensity: Vec3::ONE,
            attenuation: Vec3::ZERO,
            bounds: Vec3::ZERO,
            cut_off: Vec2::ZERO,
            cast_shadows: true,
            is_active: true,
        };
        let proxies = [proxy_at(&device, Vec3::ZERO)];
        let requests = lighting.assemble_shadow_requests(&test_camera(), &[sun], &proxies);

        assert_eq!(requests.len(), NUM_CASCADES);
        for (k, request) in requests.iter().enumerate() {
            assert_eq!(request.cascade_index, k as u32);
            if k == 0 {
                assert!(request.dependencies.is_empty());
            } else {
                // Every lower cascade of the same light is listed.
                assert_eq!(request.dependencies.len(), k);
                assert!(request.dependencies.iter().all(|&d| (d as usize) < k));
            }
        }
    }

    #[test]
    fn higher_cascades_subtract_geometry_covered_below() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);
        let sun = LightSource {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            intensity: Vec3::ONE,
            attenuation: Vec3::ZERO,
            bounds: Vec3::ZERO,
            cut_off: Vec2::ZERO,
            cast_shadows: true,
            is_active: true,
        };
        // A caster near the camera lands in cascade 0 and must not be
        // re-rendered by the larger cascades that also see it.
        let proxies = [proxy_at(&device, Vec3::new(0.0, 0.0, 2.0))];
        let requests = lighting.assemble_shadow_requests(&test_camera(), &[sun], &proxies);
        assert!(!requests[0].casters.is_empty());
        for request in &requests[1..] {
            assert!(request.casters.is_empty());
        }
    }

    #[test]
    fn subtraction_uses_the_caster_real_extent_not_its_center() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);

        // A large caster centred beyond the first cascade still reaches
        // into it through its radius: it is drawn there and must be
        // subtracted from every larger cascade, not duplicated.
        let large = [proxy_with_radius(&device, Vec3::new(0.0, 0.0, -3.5), 4.0)];
        let requests =
            lighting.assemble_shadow_requests(&close_range_camera(), &[sun_straight_down()], &large);
        assert_eq!(caster_counts(&requests), vec![1, 0, 0, 0]);

        // The same centre with a small radius clears the first cascade
        // entirely: its first appearance is the second cascade, where it
        // must survive the subtraction against the cascades below.
        let small = [proxy_with_radius(&device, Vec3::new(0.0, 0.0, -2.6), 0.2)];
        let requests =
            lighting.assemble_shadow_requests(&close_range_camera(), &[sun_straight_down()], &small);
        assert_eq!(caster_counts(&requests), vec![0, 1, 0, 0]);
    }

    #[test]
    fn casters_carry_their_source_bounds() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);
        let proxies = [proxy_with_radius(&device, Vec3::new(0.0, 0.0, -0.5), 0.3)];
        let requests = lighting.assemble_shadow_requests(
            &close_range_camera(),
            &[sun_straight_down()],
            &proxies,
        );
        let caster = &requests[0].casters[0];
        assert_eq!(caster.sphere_bounds, Vec3::new(0.0, 0.0, -0.5).extend(0.3));
    }

    #[test]
    fn inactive_and_non_directional_lights_request_nothing() {
        let device = Device::new(DeviceDesc::default());
        let lighting = LightingState::new(&device);
        let spot = LightSource {
            kind: LightKind::Spot,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            intensity: Vec3::ONE,
            attenuation: Vec3::ONE,
            bounds: Vec3::ONE,
            cut_off: Vec2::new(20.0, 30.0),
            cast_shadows: true,
            is_active: true,
        };
        let requests = lighting.assemble_shadow_requests(&test_camera(), &[spot], &[]);
        assert!(requests.is_empty());
    }
}
