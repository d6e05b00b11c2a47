//! GPU (Vulkan/Metal/DX12 via wgpu) implementation of the fluid kernel.
//!
//! `GpuKernel` implements [`FluidKernel`] with WGSL compute shaders. Particle
//! and foam data live on the device; the only host round trip is the
//! diagnostic [`FluidKernel::read_back`].
//!
//! # Architecture
//! - One substep is one command buffer, submitted after the uniform block has
//!   been rewritten, so every dispatch observes the output of the ones before
//!   it through wgpu's usage tracking.
//! - The spatial index runs as clear / count / scan levels / scatter /
//!   copy-back / offsets dispatches ([`GpuSpatialIndex`]).
//! - Pressure and viscosity write into the velocity sort target, which is then
//!   copied over the velocities.
//!
//! # Bind group layout
//! All fluid and foam kernels share a single bind group: the params uniform
//! plus 13 storage buffers. Devices that cannot bind that many storage
//! buffers per stage are rejected at construction.

pub mod buffers;
pub mod sort;

use std::collections::HashMap;

use glam::Vec2;

use crate::dispatch::{thread_groups, DispatchStats, KernelId, THREADS_PER_GROUP};
use crate::error::KernelError;
use crate::foam::{FoamCounters, FoamParticle};
use crate::particle::{FluidSnapshot, SpawnData};
use crate::settings::FluidSettings;
use crate::sph::SmoothingConstants;
use crate::{FluidKernel, FrameParams};

use buffers::{create_uniform_buf, read_buffer, unpack_vec3, FoamGpuBuffers, GpuParams, ParticleGpuBuffers};
pub use sort::{GpuScan, GpuSpatialIndex};

/// Storage buffers bound by the fluid shader.
const REQUIRED_STORAGE_BUFFERS: u32 = 13;

/// Device and queue shared by every GPU component.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire a high-performance adapter and a device able to bind every
    /// storage buffer of the fluid shader.
    pub fn new() -> Result<Self, KernelError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| KernelError::GpuInit("no suitable GPU adapter found".into()))?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(KernelError::GpuInit(format!(
                "adapter binds {} storage buffers per stage, {} required",
                adapter_limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }
        let required_limits = wgpu::Limits {
            max_storage_buffers_per_shader_stage: adapter_limits.max_storage_buffers_per_shader_stage,
            ..wgpu::Limits::default()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fluid_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| KernelError::GpuInit(format!("failed to create device: {e}")))?;

        Ok(Self { device, queue })
    }
}

/// GPU-accelerated fluid kernel using wgpu compute shaders.
pub struct GpuKernel {
    context: GpuContext,
    settings: FluidSettings,
    kernels: SmoothingConstants,
    particles: ParticleGpuBuffers,
    index: GpuSpatialIndex,
    foam: FoamGpuBuffers,
    params: wgpu::Buffer,
    bgl: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    pipelines: HashMap<KernelId, wgpu::ComputePipeline>,
    stats: DispatchStats,
    generation: u64,
}

impl GpuKernel {
    /// Create a kernel seeded from `spawn`.
    ///
    /// Returns `Err(KernelError::GpuInit)` if no suitable GPU is found,
    /// allowing callers to fall back to [`crate::CpuKernel`].
    pub fn new(spawn: &SpawnData, settings: FluidSettings) -> Result<Self, KernelError> {
        settings.check_finite()?;
        let context = GpuContext::new()?;
        let device = &context.device;
        let n = spawn.len() as u32;
        let kernels = SmoothingConstants::new(settings.smoothing_radius);

        let particles = ParticleGpuBuffers::new(device, n);
        particles.upload(&context.queue, &spawn.positions, &spawn.velocities);
        let index = GpuSpatialIndex::new(device, n);
        let foam = FoamGpuBuffers::new(device, settings.foam.max_particles);
        let params = create_uniform_buf(
            device,
            "fluid_params",
            &GpuParams::new(&settings, &kernels, &FrameParams::default(), n, settings.foam.max_particles),
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fluid"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/fluid.wgsl").into()),
        });
        let mut entries = vec![bgl_uniform(0)];
        entries.extend((1..=REQUIRED_STORAGE_BUFFERS).map(bgl_storage_rw));
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_bgl"),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fluid_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipelines = KernelId::ALL
            .into_iter()
            .filter(|id| *id != KernelId::SpatialIndex)
            .map(|id| (id, compute_pipeline(device, &layout, &shader, id.name())))
            .collect();

        let bind_group = create_fluid_bind_group(device, &bgl, &params, &particles, &index, &foam);

        tracing::info!(
            particles = n,
            foam_capacity = settings.foam.max_particles,
            scan_levels = index.scan_depth(),
            "GPU fluid kernel initialized"
        );

        Ok(Self {
            context,
            settings,
            kernels,
            particles,
            index,
            foam,
            params,
            bgl,
            bind_group,
            pipelines,
            stats: DispatchStats::new(),
            generation: 1,
        })
    }

    fn rebuild_bind_group(&mut self) {
        self.bind_group = create_fluid_bind_group(
            &self.context.device,
            &self.bgl,
            &self.params,
            &self.particles,
            &self.index,
            &self.foam,
        );
    }

    fn write_params(&self, frame: &FrameParams) {
        let params = GpuParams::new(
            &self.settings,
            &self.kernels,
            frame,
            self.particles.n,
            self.foam.capacity,
        );
        self.context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    /// Encode one fluid-shader dispatch and count it.
    fn encode(&mut self, encoder: &mut wgpu::CommandEncoder, kernel: KernelId, groups: u32) {
        if let Some(pipeline) = self.pipelines.get(&kernel) {
            dispatch(encoder, kernel.name(), pipeline, &self.bind_group, groups);
        }
        self.stats.record(kernel);
    }

    fn copy_velocities_from_sort_target(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.particles.n > 0 {
            encoder.copy_buffer_to_buffer(
                &self.particles.sort_target_velocities,
                0,
                &self.particles.velocities,
                0,
                u64::from(self.particles.n) * 16,
            );
        }
    }
}

impl FluidKernel for GpuKernel {
    fn particle_count(&self) -> usize {
        self.particles.n as usize
    }

    fn settings(&self) -> &FluidSettings {
        &self.settings
    }

    fn set_settings(&mut self, settings: FluidSettings) -> Result<(), KernelError> {
        settings.check_finite()?;
        if settings.smoothing_radius != self.settings.smoothing_radius {
            self.kernels = SmoothingConstants::new(settings.smoothing_radius);
        }
        let capacity_changed = settings.foam.max_particles != self.settings.foam.max_particles;
        self.settings = settings;
        if capacity_changed {
            self.foam = FoamGpuBuffers::new(&self.context.device, settings.foam.max_particles);
            self.rebuild_bind_group();
        }
        Ok(())
    }

    fn step(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        self.stats.begin_substep();
        self.write_params(frame);
        let groups = thread_groups(self.particles.n as usize, THREADS_PER_GROUP as usize) as u32;

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("substep") });

        self.encode(&mut encoder, KernelId::ExternalForces, groups);
        self.encode(&mut encoder, KernelId::SpatialHash, groups);

        self.index.encode(&mut encoder);
        self.stats.record(KernelId::SpatialIndex);

        self.encode(&mut encoder, KernelId::Reorder, groups);
        self.encode(&mut encoder, KernelId::ReorderCopyBack, groups);
        self.encode(&mut encoder, KernelId::Density, groups);

        self.encode(&mut encoder, KernelId::PressureForce, groups);
        self.copy_velocities_from_sort_target(&mut encoder);

        if self.settings.runs_viscosity_pass() {
            self.encode(&mut encoder, KernelId::Viscosity, groups);
            self.copy_velocities_from_sort_target(&mut encoder);
        }

        self.encode(&mut encoder, KernelId::UpdatePositions, groups);

        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn update_foam(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        self.write_params(frame);
        let groups = thread_groups(self.foam.capacity as usize, THREADS_PER_GROUP as usize) as u32;

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("foam") });

        self.encode(&mut encoder, KernelId::FoamUpdate, groups);
        self.encode(&mut encoder, KernelId::FoamCopyBack, groups);
        if self.foam.capacity == 0 {
            encoder.clear_buffer(&self.foam.counters, 0, None);
        } else {
            // survivor = 0; active was rolled over by the copy-back kernel.
            encoder.clear_buffer(&self.foam.counters, 4, Some(4));
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn reset(&mut self, spawn: &SpawnData) -> Result<(), KernelError> {
        let n = spawn.len() as u32;
        if n != self.particles.n {
            let device = &self.context.device;
            self.particles = ParticleGpuBuffers::new(device, n);
            self.index = GpuSpatialIndex::new(device, n);
            self.rebuild_bind_group();
            self.generation += 1;
            tracing::info!(
                particles = n,
                generation = self.generation,
                "GPU particle buffers reallocated"
            );
        }
        self.particles
            .upload(&self.context.queue, &spawn.positions, &spawn.velocities);

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("reset") });
        self.foam.clear(&mut encoder);
        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_back(&self) -> Result<FluidSnapshot, KernelError> {
        let GpuContext { device, queue } = &self.context;
        let n = self.particles.n as usize;

        let positions = read_buffer::<[f32; 4]>(device, queue, &self.particles.positions, n)?;
        let predicted = read_buffer::<[f32; 4]>(device, queue, &self.particles.predicted_positions, n)?;
        let velocities = read_buffer::<[f32; 4]>(device, queue, &self.particles.velocities, n)?;
        let densities = read_buffer::<Vec2>(device, queue, &self.particles.densities, n)?;

        let counters = read_buffer::<u32>(device, queue, &self.foam.counters, 2)?;
        let foam_counters = FoamCounters {
            active: counters[0],
            survivor: counters[1],
        };
        let live = (foam_counters.active as usize).min(self.foam.capacity as usize);
        let foam = read_buffer::<FoamParticle>(device, queue, &self.foam.particles, live)?;

        Ok(FluidSnapshot {
            positions: unpack_vec3(&positions),
            predicted_positions: unpack_vec3(&predicted),
            velocities: unpack_vec3(&velocities),
            densities,
            foam,
            foam_counters,
            generation: self.generation,
        })
    }

    fn dispatch_stats(&self) -> &DispatchStats {
        &self.stats
    }
}

fn create_fluid_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    params: &wgpu::Buffer,
    particles: &ParticleGpuBuffers,
    index: &GpuSpatialIndex,
    foam: &FoamGpuBuffers,
) -> wgpu::BindGroup {
    let buffers = [
        params,
        &particles.positions,
        &particles.predicted_positions,
        &particles.velocities,
        &particles.densities,
        &particles.sort_target_positions,
        &particles.sort_target_predicted_positions,
        &particles.sort_target_velocities,
        &index.keys,
        &index.sorted_indices,
        &index.offsets,
        &foam.particles,
        &foam.compacted,
        &foam.counters,
    ];
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("fluid_bg"),
        layout,
        entries: &entries,
    })
}

/// Record a single compute pass with one dispatch. Zero groups records
/// nothing.
pub(crate) fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    groups: u32,
) {
    if groups == 0 {
        return;
    }
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(groups, 1, 1);
}

pub(crate) fn compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

// ---- Bind group layout entry helpers ----

pub(crate) fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
