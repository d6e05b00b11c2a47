//! GPU buffer management for the fluid kernel.
//!
//! Creates the wgpu storage buffers for particle attributes and foam, packs
//! the uniform parameter block, and handles CPU->GPU upload and GPU->CPU
//! read-back.

use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::error::KernelError;
use crate::foam::FoamParticle;
use crate::settings::FluidSettings;
use crate::sph::SmoothingConstants;
use crate::FrameParams;

/// Smallest buffer ever created. wgpu rejects zero-sized bindings and a
/// runtime-sized array needs room for one element (32 bytes for foam).
pub const MIN_BUF_SIZE: u64 = 32;

/// Uniform parameter block of the fluid shader.
/// Must match the `Params` struct in `fluid.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParams {
    pub num_particles: u32,
    pub max_foam: u32,
    pub dt: f32,
    pub frame_dt: f32,
    pub sim_time: f32,
    pub gravity: f32,
    pub smoothing_radius: f32,
    pub target_density: f32,
    pub pressure_multiplier: f32,
    pub near_pressure_multiplier: f32,
    pub viscosity_strength: f32,
    pub collision_damping: f32,
    pub poly6: f32,
    pub spiky_pow2: f32,
    pub spiky_pow3: f32,
    pub spiky_pow2_derivative: f32,
    pub spiky_pow3_derivative: f32,
    pub bounds_centre_x: f32,
    pub bounds_centre_y: f32,
    pub bounds_centre_z: f32,
    pub bounds_size_x: f32,
    pub bounds_size_y: f32,
    pub bounds_size_z: f32,
    pub trapped_air_rate: f32,
    pub trapped_air_velocity_min: f32,
    pub trapped_air_velocity_max: f32,
    pub kinetic_energy_min: f32,
    pub kinetic_energy_max: f32,
    pub bubble_buoyancy: f32,
    pub spray_max_neighbours: u32,
    pub bubble_min_neighbours: u32,
    pub bubble_scale: f32,
    pub bubble_scale_change_speed: f32,
    pub foam_active: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl GpuParams {
    /// Pack settings and frame timing into the uniform layout.
    pub fn new(
        settings: &FluidSettings,
        kernels: &SmoothingConstants,
        frame: &FrameParams,
        num_particles: u32,
        max_foam: u32,
    ) -> Self {
        let foam = &settings.foam;
        Self {
            num_particles,
            max_foam,
            dt: frame.dt,
            frame_dt: frame.frame_dt,
            sim_time: frame.sim_time,
            gravity: settings.gravity,
            smoothing_radius: kernels.radius,
            target_density: settings.target_density,
            pressure_multiplier: settings.pressure_multiplier,
            near_pressure_multiplier: settings.near_pressure_multiplier,
            viscosity_strength: settings.viscosity_strength,
            collision_damping: settings.collision_damping,
            poly6: kernels.poly6,
            spiky_pow2: kernels.spiky_pow2,
            spiky_pow3: kernels.spiky_pow3,
            spiky_pow2_derivative: kernels.spiky_pow2_derivative,
            spiky_pow3_derivative: kernels.spiky_pow3_derivative,
            bounds_centre_x: settings.bounds.centre.x,
            bounds_centre_y: settings.bounds.centre.y,
            bounds_centre_z: settings.bounds.centre.z,
            bounds_size_x: settings.bounds.size.x,
            bounds_size_y: settings.bounds.size.y,
            bounds_size_z: settings.bounds.size.z,
            trapped_air_rate: foam.trapped_air_rate(frame.sim_time),
            trapped_air_velocity_min: foam.trapped_air_velocity.x,
            trapped_air_velocity_max: foam.trapped_air_velocity.y,
            kinetic_energy_min: foam.kinetic_energy.x,
            kinetic_energy_max: foam.kinetic_energy.y,
            bubble_buoyancy: foam.bubble_buoyancy,
            spray_max_neighbours: foam.spray_max_neighbours,
            bubble_min_neighbours: foam.bubble_min_neighbours,
            bubble_scale: foam.bubble_scale,
            bubble_scale_change_speed: foam.bubble_scale_change_speed,
            foam_active: u32::from(foam.active),
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Uniform block shared by the scan, count-sort and offset shaders.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortParams {
    pub num_items: u32,
    pub max_key: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Zeroed storage buffer of `size` bytes (at least [`MIN_BUF_SIZE`]).
pub fn create_storage_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: STORAGE_USAGE,
        mapped_at_creation: false,
    })
}

/// Storage buffer initialised from `data`; falls back to a zeroed minimal
/// buffer when `data` is empty.
pub fn create_storage_buf_init<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, data: &[T]) -> wgpu::Buffer {
    if data.is_empty() {
        create_storage_buf(device, label, 0)
    } else {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: STORAGE_USAGE,
        })
    }
}

/// Uniform buffer holding `value`, writable from the queue.
pub fn create_uniform_buf<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

/// Copy the first `count` elements of `buffer` to the host. Blocks until the
/// queue has drained.
pub fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, KernelError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let byte_len = (count * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: byte_len,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| KernelError::Readback(e.to_string()))?
        .map_err(|e| KernelError::Readback(e.to_string()))?;

    let data = slice.get_mapped_range();
    let values = bytemuck::cast_slice::<u8, T>(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(values)
}

/// Pad `Vec3`s to the vec4 layout of the attribute buffers.
pub fn pack_vec3(values: &[Vec3]) -> Vec<[f32; 4]> {
    values.iter().map(|v| v.extend(0.0).to_array()).collect()
}

/// Drop the padding lane of vec4 attribute data.
pub fn unpack_vec3(values: &[[f32; 4]]) -> Vec<Vec3> {
    values.iter().map(|v| Vec3::new(v[0], v[1], v[2])).collect()
}

/// Particle attribute buffers on the device.
pub struct ParticleGpuBuffers {
    pub positions: wgpu::Buffer,
    pub predicted_positions: wgpu::Buffer,
    pub velocities: wgpu::Buffer,
    pub densities: wgpu::Buffer,
    pub sort_target_positions: wgpu::Buffer,
    pub sort_target_predicted_positions: wgpu::Buffer,
    pub sort_target_velocities: wgpu::Buffer,
    /// Number of particles.
    pub n: u32,
}

impl ParticleGpuBuffers {
    /// Allocate zeroed buffers for `n` particles.
    pub fn new(device: &wgpu::Device, n: u32) -> Self {
        let vec4_bytes = u64::from(n) * 16;
        Self {
            positions: create_storage_buf(device, "positions", vec4_bytes),
            predicted_positions: create_storage_buf(device, "predicted_positions", vec4_bytes),
            velocities: create_storage_buf(device, "velocities", vec4_bytes),
            densities: create_storage_buf(device, "densities", u64::from(n) * 8),
            sort_target_positions: create_storage_buf(device, "sort_target_positions", vec4_bytes),
            sort_target_predicted_positions: create_storage_buf(
                device,
                "sort_target_predicted_positions",
                vec4_bytes,
            ),
            sort_target_velocities: create_storage_buf(device, "sort_target_velocities", vec4_bytes),
            n,
        }
    }

    /// Upload positions (also used as predicted positions) and velocities;
    /// densities are zeroed.
    pub fn upload(&self, queue: &wgpu::Queue, positions: &[Vec3], velocities: &[Vec3]) {
        if self.n == 0 {
            return;
        }
        let packed_positions = pack_vec3(positions);
        queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(&packed_positions));
        queue.write_buffer(&self.predicted_positions, 0, bytemuck::cast_slice(&packed_positions));
        queue.write_buffer(&self.velocities, 0, bytemuck::cast_slice(&pack_vec3(velocities)));
        let zeros = vec![Vec2::ZERO; self.n as usize];
        queue.write_buffer(&self.densities, 0, bytemuck::cast_slice(&zeros));
    }
}

/// Foam buffers on the device.
pub struct FoamGpuBuffers {
    pub particles: wgpu::Buffer,
    pub compacted: wgpu::Buffer,
    /// `[active, survivor]`.
    pub counters: wgpu::Buffer,
    pub capacity: u32,
}

impl FoamGpuBuffers {
    /// Allocate zeroed buffers for `capacity` particles.
    pub fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let bytes = u64::from(capacity) * std::mem::size_of::<FoamParticle>() as u64;
        Self {
            particles: create_storage_buf(device, "foam_particles", bytes),
            compacted: create_storage_buf(device, "foam_compacted", bytes),
            counters: create_storage_buf(device, "foam_counters", 8),
            capacity,
        }
    }

    /// Zero the particles and both counters.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.particles, 0, None);
        encoder.clear_buffer(&self.compacted, 0, None);
        encoder.clear_buffer(&self.counters, 0, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_match_uniform_layout() {
        assert_eq!(std::mem::size_of::<GpuParams>(), 144);
        assert_eq!(std::mem::size_of::<GpuParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<SortParams>(), 16);
    }

    #[test]
    fn vec3_packing_pads_w() {
        let packed = pack_vec3(&[Vec3::new(1.0, 2.0, 3.0)]);
        assert_eq!(packed, vec![[1.0, 2.0, 3.0, 0.0]]);
        assert_eq!(unpack_vec3(&packed), vec![Vec3::new(1.0, 2.0, 3.0)]);
    }
}
