//! Device-side scan, counting sort and offset table.
//!
//! Mirrors [`crate::scan`], [`crate::count_sort`] and [`crate::offset_table`]
//! with WGSL kernels. Because N is fixed for the lifetime of a
//! [`GpuSpatialIndex`], the whole level stack of the scan (group-sum buffers
//! and their uniforms) is built once up front.

use crate::dispatch::{thread_groups, THREADS_PER_GROUP};
use crate::scan::ITEMS_PER_GROUP;

use super::buffers::{create_storage_buf, create_uniform_buf, SortParams};
use super::{bgl_storage_ro, bgl_storage_rw, bgl_uniform, compute_pipeline, dispatch};

/// One level of the scan: the buffer being scanned and where its block
/// totals go.
struct ScanLevel {
    count: u32,
    bind_group: wgpu::BindGroup,
    /// Block totals of this level; the buffer scanned by the next level.
    group_sums: wgpu::Buffer,
    _params: wgpu::Buffer,
}

/// Exclusive prefix sum over a fixed-length `u32` storage buffer.
pub struct GpuScan {
    levels: Vec<ScanLevel>,
    scan_pipeline: wgpu::ComputePipeline,
    add_pipeline: wgpu::ComputePipeline,
}

impl GpuScan {
    /// Build the level stack for scanning the first `count` elements of
    /// `elements`.
    pub fn new(device: &wgpu::Device, elements: &wgpu::Buffer, count: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scan"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/scan.wgsl").into()),
        });
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scan_bgl"),
            entries: &[bgl_uniform(0), bgl_storage_rw(1), bgl_storage_rw(2)],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scan_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let scan_pipeline = compute_pipeline(device, &layout, &shader, "scan_blocks");
        let add_pipeline = compute_pipeline(device, &layout, &shader, "add_group_offsets");

        let mut levels: Vec<ScanLevel> = Vec::new();
        let mut level_count = count;
        while level_count > 0 {
            let num_groups = thread_groups(level_count as usize, ITEMS_PER_GROUP) as u32;
            let group_sums = create_storage_buf(device, "scan_group_sums", u64::from(num_groups) * 4);
            let params = create_uniform_buf(
                device,
                "scan_params",
                &SortParams { num_items: level_count, max_key: 0, _pad0: 0, _pad1: 0 },
            );
            let input = levels.last().map_or(elements, |level| &level.group_sums);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scan_bg"),
                layout: &bgl,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: input.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: group_sums.as_entire_binding() },
                ],
            });
            levels.push(ScanLevel {
                count: level_count,
                bind_group,
                group_sums,
                _params: params,
            });
            if num_groups == 1 {
                break;
            }
            level_count = num_groups;
        }

        Self { levels, scan_pipeline, add_pipeline }
    }

    /// Number of levels (1 when everything fits one block, 0 when empty).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Record the scan. Returns the number of dispatches encoded.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) -> usize {
        let mut dispatches = 0;
        for level in &self.levels {
            let groups = thread_groups(level.count as usize, ITEMS_PER_GROUP) as u32;
            dispatch(encoder, "scan_blocks", &self.scan_pipeline, &level.bind_group, groups);
            dispatches += 1;
        }
        // Walk back up, adding scanned block totals into every level but the last.
        for level in self.levels.iter().rev().skip(1) {
            let groups = thread_groups(level.count as usize, ITEMS_PER_GROUP) as u32;
            dispatch(encoder, "add_group_offsets", &self.add_pipeline, &level.bind_group, groups);
            dispatches += 1;
        }
        dispatches
    }
}

/// Keys, sorted indices and offsets on the device, with the sort and offset
/// pipelines that rebuild them.
pub struct GpuSpatialIndex {
    pub keys: wgpu::Buffer,
    pub sorted_indices: wgpu::Buffer,
    pub offsets: wgpu::Buffer,
    _sorted_items: wgpu::Buffer,
    _sorted_keys: wgpu::Buffer,
    counts: wgpu::Buffer,
    _params: wgpu::Buffer,
    scan: GpuScan,
    sort_bind_group: wgpu::BindGroup,
    offsets_bind_group: wgpu::BindGroup,
    clear_pipeline: wgpu::ComputePipeline,
    count_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    copy_back_pipeline: wgpu::ComputePipeline,
    init_offsets_pipeline: wgpu::ComputePipeline,
    offsets_pipeline: wgpu::ComputePipeline,
    n: u32,
}

impl GpuSpatialIndex {
    /// Allocate every buffer for `n` particles.
    pub fn new(device: &wgpu::Device, n: u32) -> Self {
        let bytes = u64::from(n) * 4;
        let keys = create_storage_buf(device, "spatial_keys", bytes);
        let sorted_indices = create_storage_buf(device, "sorted_indices", bytes);
        let offsets = create_storage_buf(device, "spatial_offsets", bytes);
        let sorted_items = create_storage_buf(device, "sort_scratch_items", bytes);
        let sorted_keys = create_storage_buf(device, "sort_scratch_keys", bytes);
        // max_key = n - 1, so the histogram has n bins.
        let counts = create_storage_buf(device, "sort_counts", bytes);
        let params = create_uniform_buf(
            device,
            "sort_params",
            &SortParams { num_items: n, max_key: n.saturating_sub(1), _pad0: 0, _pad1: 0 },
        );

        let sort_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("count_sort"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/count_sort.wgsl").into()),
        });
        let sort_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("count_sort_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_rw(1),
                bgl_storage_rw(2),
                bgl_storage_rw(3),
                bgl_storage_rw(4),
                bgl_storage_rw(5),
            ],
        });
        let sort_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("count_sort_layout"),
            bind_group_layouts: &[&sort_bgl],
            push_constant_ranges: &[],
        });
        let sort_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("count_sort_bg"),
            layout: &sort_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted_indices.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: keys.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sorted_items.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: sorted_keys.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: counts.as_entire_binding() },
            ],
        });

        let offsets_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("spatial_offsets"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/spatial_offsets.wgsl").into()),
        });
        let offsets_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("spatial_offsets_bgl"),
            entries: &[bgl_uniform(0), bgl_storage_ro(1), bgl_storage_rw(2)],
        });
        let offsets_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("spatial_offsets_layout"),
            bind_group_layouts: &[&offsets_bgl],
            push_constant_ranges: &[],
        });
        let offsets_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("spatial_offsets_bg"),
            layout: &offsets_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: keys.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: offsets.as_entire_binding() },
            ],
        });

        Self {
            scan: GpuScan::new(device, &counts, n),
            clear_pipeline: compute_pipeline(device, &sort_layout, &sort_shader, "clear_counts"),
            count_pipeline: compute_pipeline(device, &sort_layout, &sort_shader, "calculate_counts"),
            scatter_pipeline: compute_pipeline(device, &sort_layout, &sort_shader, "scatter_output"),
            copy_back_pipeline: compute_pipeline(device, &sort_layout, &sort_shader, "copy_back"),
            init_offsets_pipeline: compute_pipeline(device, &offsets_layout, &offsets_shader, "init_offsets"),
            offsets_pipeline: compute_pipeline(device, &offsets_layout, &offsets_shader, "calculate_offsets"),
            keys,
            sorted_indices,
            offsets,
            _sorted_items: sorted_items,
            _sorted_keys: sorted_keys,
            counts,
            _params: params,
            sort_bind_group,
            offsets_bind_group,
            n,
        }
    }

    /// Number of particles.
    pub fn len(&self) -> u32 {
        self.n
    }

    /// `true` for zero particles.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Record sort + offsets. `keys` and the identity `sorted_indices` must
    /// already be written by an earlier dispatch.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.n == 0 {
            return;
        }
        let groups = thread_groups(self.n as usize, THREADS_PER_GROUP as usize) as u32;
        dispatch(encoder, "clear_counts", &self.clear_pipeline, &self.sort_bind_group, groups);
        dispatch(encoder, "calculate_counts", &self.count_pipeline, &self.sort_bind_group, groups);
        self.scan.encode(encoder);
        dispatch(encoder, "scatter_output", &self.scatter_pipeline, &self.sort_bind_group, groups);
        dispatch(encoder, "copy_back", &self.copy_back_pipeline, &self.sort_bind_group, groups);
        dispatch(encoder, "init_offsets", &self.init_offsets_pipeline, &self.offsets_bind_group, groups);
        dispatch(encoder, "calculate_offsets", &self.offsets_pipeline, &self.offsets_bind_group, groups);
    }

    /// Histogram buffer; holds exclusive key starts after a sort.
    pub fn counts(&self) -> &wgpu::Buffer {
        &self.counts
    }

    /// Scan level stack depth.
    pub fn scan_depth(&self) -> usize {
        self.scan.depth()
    }
}
