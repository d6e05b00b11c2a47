//! Spatial index and full-substep scaling on the CPU back-end.
//!
//! Run with: cargo bench -p fluid-kernel --bench spatial_index_scaling
//! Add `--features gpu` for the GPU rows.

use std::time::Instant;

use fluid_kernel::{CpuKernel, FluidKernel, FluidSettings, FrameParams, SpatialIndex, SpawnData};
use glam::Vec3;

fn particle_cube(target_count: usize, spacing: f32) -> SpawnData {
    let per_axis = (target_count as f32).cbrt().ceil() as usize;
    let origin = Vec3::splat(-0.5 * per_axis as f32 * spacing);
    let mut positions = Vec::with_capacity(per_axis.pow(3));
    for x in 0..per_axis {
        for y in 0..per_axis {
            for z in 0..per_axis {
                positions.push(origin + Vec3::new(x as f32, y as f32, z as f32) * spacing);
            }
        }
    }
    let n = positions.len();
    SpawnData::new(positions, vec![Vec3::ZERO; n]).unwrap()
}

fn bench_index(n: usize, runs: u32) -> f64 {
    let keys: Vec<u32> = (0..n as u32)
        .map(|i| i.wrapping_mul(2_654_435_761) % n as u32)
        .collect();
    let mut index = SpatialIndex::new(n);
    let start = Instant::now();
    for _ in 0..runs {
        index.keys_mut().copy_from_slice(&keys);
        index.run().unwrap();
    }
    start.elapsed().as_secs_f64() * 1000.0 / f64::from(runs)
}

fn bench_substeps<K: FluidKernel>(kernel: &mut K, steps: u32) -> f64 {
    let frame = FrameParams {
        dt: 1.0 / 180.0,
        frame_dt: 1.0 / 60.0,
        sim_time: 0.0,
    };
    // Warmup
    for _ in 0..2 {
        kernel.step(&frame).unwrap();
    }
    let start = Instant::now();
    for _ in 0..steps {
        kernel.step(&frame).unwrap();
    }
    // Force completion of queued GPU work before stopping the clock.
    let _ = kernel.read_back().unwrap();
    start.elapsed().as_secs_f64() * 1000.0 / f64::from(steps)
}

fn main() {
    println!("=== Spatial index ===\n");
    println!("{:>10} {:>12}", "Keys", "ms/run");
    for &(n, runs) in &[(1_000, 200), (10_000, 100), (100_000, 20), (1_000_000, 5)] {
        println!("{:>10} {:>12.3}", n, bench_index(n, runs));
    }

    println!("\n=== CPU substep ===\n");
    println!("{:>10} {:>12}", "Particles", "ms/substep");
    let settings = FluidSettings::default();
    for &(n, steps) in &[(4_096, 20), (32_768, 5), (110_592, 2)] {
        let spawn = particle_cube(n, 0.08);
        let mut kernel = CpuKernel::new(&spawn, settings).unwrap();
        println!("{:>10} {:>12.3}", spawn.len(), bench_substeps(&mut kernel, steps));
    }

    #[cfg(feature = "gpu")]
    {
        println!("\n=== GPU substep ===\n");
        println!("{:>10} {:>12}", "Particles", "ms/substep");
        for &(n, steps) in &[(4_096, 50), (32_768, 20), (262_144, 10)] {
            let spawn = particle_cube(n, 0.08);
            match fluid_kernel::GpuKernel::new(&spawn, settings) {
                Ok(mut kernel) => {
                    println!("{:>10} {:>12.3}", spawn.len(), bench_substeps(&mut kernel, steps));
                }
                Err(e) => {
                    println!("GPU unavailable: {e}");
                    break;
                }
            }
        }
    }
}
