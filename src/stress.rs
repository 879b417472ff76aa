//! Diagnostic runs over a shared image.
//!
//! [`run_stress`] lets a number of threads hammer one image with randomly
//! chosen slice and volume accessors. Every write adds 1 to every element of
//! the item it covers, so after the run each element must equal the number
//! of writes to its slice plus the number of writes to its volume. Any lost
//! update shows up as a mismatch, and any reader that sees a slice with
//! differing elements has observed a torn write.
//!
//! [`run_scenario`] replays the three-slice composition example.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::{AccessOptions, ImageReadAccessor, ImageWriteAccessor, PixelAccessor};
use crate::data::ImportData;
use crate::error::AccessError;
use crate::image::ImageContainer;
use crate::pixel::PixelFormat;

/// Parameters of a stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressConfig {
    pub threads: usize,
    pub iterations: usize,
    /// Extents (x, y, z) or (x, y, z, t)
    pub extents: Vec<u32>,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 1000,
            extents: vec![16, 16, 8, 2],
            seed: 0x5eed,
        }
    }
}

/// Outcome of a stress run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressReport {
    pub threads: usize,
    pub iterations: usize,
    pub extents: Vec<u32>,
    pub slice_reads: u64,
    pub volume_reads: u64,
    pub slice_writes: u64,
    pub volume_writes: u64,
    pub torn_reads: u64,
    pub mismatched_elements: u64,
    pub elapsed_ms: u64,
    /// No torn reads and no lost updates
    pub consistent: bool,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    ReadSlice { s: i32, t: i32 },
    ReadVolume { t: i32 },
    WriteSlice { s: i32, t: i32 },
    WriteVolume { t: i32 },
}

/// Xorshift generator; runs are reproducible for a given seed.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u32) -> i32 {
        (self.next() % bound as u64) as i32
    }
}

#[derive(Default)]
struct Counters {
    slice_reads: AtomicU64,
    volume_reads: AtomicU64,
    slice_writes: AtomicU64,
    volume_writes: AtomicU64,
    torn_reads: AtomicU64,
}

/// Run a stress test and report whether the image stayed consistent.
pub fn run_stress(config: &StressConfig) -> Result<StressReport, AccessError> {
    let mut image = ImageContainer::new();
    image.initialize(PixelFormat::of::<u32>(), &config.extents, 1)?;

    let slices = image.dimension_of(2);
    let time_steps = image.time_steps();
    let volume_bytes = image
        .get_volume_data(0, 0)
        .ok_or(AccessError::NoData)?
        .size();
    for t in 0..time_steps as i32 {
        image.set_volume(ImportData::Copy(&vec![0; volume_bytes]), t, 0)?;
    }

    let slice_counts: Vec<AtomicU64> = (0..slices * time_steps).map(|_| AtomicU64::new(0)).collect();
    let volume_counts: Vec<AtomicU64> = (0..time_steps).map(|_| AtomicU64::new(0)).collect();
    let counters = Counters::default();

    info!(
        threads = config.threads,
        iterations = config.iterations,
        extents = ?config.extents,
        "Starting stress run"
    );
    let started = Instant::now();

    let results: Vec<Result<(), AccessError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|worker| {
                let image = &image;
                let slice_counts = &slice_counts;
                let volume_counts = &volume_counts;
                let counters = &counters;
                let seed = config.seed ^ (worker as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                scope.spawn(move || -> Result<(), AccessError> {
                    let mut rng = Rng::new(seed);
                    for _ in 0..config.iterations {
                        let t = rng.below(time_steps);
                        let s = rng.below(slices);
                        let operation = match rng.next() % 4 {
                            0 => Operation::ReadSlice { s, t },
                            1 => Operation::ReadVolume { t },
                            2 => Operation::WriteSlice { s, t },
                            _ => Operation::WriteVolume { t },
                        };
                        run_operation(image, operation, counters)?;
                        match operation {
                            Operation::WriteSlice { s, t } => {
                                slice_counts[(t as u32 * slices + s as u32) as usize]
                                    .fetch_add(1, Ordering::Relaxed);
                            }
                            Operation::WriteVolume { t } => {
                                volume_counts[t as usize].fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });
    for result in results {
        result?;
    }

    let mut mismatched_elements = 0u64;
    for t in 0..time_steps {
        for s in 0..slices {
            let expected = slice_counts[(t * slices + s) as usize].load(Ordering::Relaxed)
                + volume_counts[t as usize].load(Ordering::Relaxed);
            let slice = image
                .get_slice_data(s as i32, t as i32, 0)
                .ok_or(AccessError::NoData)?;
            let reader = ImageReadAccessor::for_item(&image, slice, AccessOptions::NONE)?;
            mismatched_elements += elements(reader.data())
                .filter(|&value| value as u64 != expected)
                .count() as u64;
        }
    }

    let torn_reads = counters.torn_reads.load(Ordering::Relaxed);
    let report = StressReport {
        threads: config.threads,
        iterations: config.iterations,
        extents: config.extents.clone(),
        slice_reads: counters.slice_reads.load(Ordering::Relaxed),
        volume_reads: counters.volume_reads.load(Ordering::Relaxed),
        slice_writes: counters.slice_writes.load(Ordering::Relaxed),
        volume_writes: counters.volume_writes.load(Ordering::Relaxed),
        torn_reads,
        mismatched_elements,
        elapsed_ms: started.elapsed().as_millis() as u64,
        consistent: torn_reads == 0 && mismatched_elements == 0,
    };

    if report.consistent {
        info!(elapsed_ms = report.elapsed_ms, "Stress run finished, image consistent");
    } else {
        warn!(
            torn_reads = report.torn_reads,
            mismatched_elements = report.mismatched_elements,
            "Stress run finished, image inconsistent"
        );
    }
    Ok(report)
}

fn run_operation(
    image: &ImageContainer,
    operation: Operation,
    counters: &Counters,
) -> Result<(), AccessError> {
    match operation {
        Operation::ReadSlice { s, t } => {
            let slice = image.get_slice_data(s, t, 0).ok_or(AccessError::NoData)?;
            let reader = ImageReadAccessor::for_item(image, slice, AccessOptions::NONE)?;
            if !is_uniform(reader.data()) {
                counters.torn_reads.fetch_add(1, Ordering::Relaxed);
            }
            counters.slice_reads.fetch_add(1, Ordering::Relaxed);
        }
        Operation::ReadVolume { t } => {
            let volume = image.get_volume_data(t, 0).ok_or(AccessError::NoData)?;
            let reader = ImageReadAccessor::for_item(image, volume, AccessOptions::NONE)?;
            let slice_bytes = reader.size() / image.dimension_of(2) as usize;
            if !reader.data().chunks(slice_bytes.max(1)).all(is_uniform) {
                counters.torn_reads.fetch_add(1, Ordering::Relaxed);
            }
            counters.volume_reads.fetch_add(1, Ordering::Relaxed);
        }
        Operation::WriteSlice { s, t } => {
            let slice = image.get_slice_data(s, t, 0).ok_or(AccessError::NoData)?;
            let writer = ImageWriteAccessor::for_item(image, slice, AccessOptions::NONE)?;
            let mut pixels = PixelAccessor::<_, u32, 2>::new(writer)?;
            let [x_extent, y_extent] = pixels.extents();
            for y in 0..y_extent {
                for x in 0..x_extent {
                    let value = pixels.get_by_index([x, y]);
                    pixels.set_by_index([x, y], value + 1);
                }
            }
            counters.slice_writes.fetch_add(1, Ordering::Relaxed);
        }
        Operation::WriteVolume { t } => {
            let volume = image.get_volume_data(t, 0).ok_or(AccessError::NoData)?;
            let writer = ImageWriteAccessor::for_item(image, volume, AccessOptions::NONE)?;
            let mut pixels = PixelAccessor::<_, u32, 3>::new(writer)?;
            let [x_extent, y_extent, z_extent] = pixels.extents();
            for z in 0..z_extent {
                for y in 0..y_extent {
                    for x in 0..x_extent {
                        let value = pixels.get_by_index([x, y, z]);
                        pixels.set_by_index([x, y, z], value + 1);
                    }
                }
            }
            counters.volume_writes.fetch_add(1, Ordering::Relaxed);
        }
    }
    Ok(())
}

fn elements(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

fn is_uniform(bytes: &[u8]) -> bool {
    let mut values = elements(bytes);
    match values.next() {
        Some(first) => values.all(|value| value == first),
        None => true,
    }
}

// =============================================================================
// Scenario
// =============================================================================

/// Observations of the three-slice composition scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// `is_volume_set(0, 0)` after each of the three slices was stored
    pub volume_set_after_slice: Vec<bool>,
    /// Bytes of the composed volume
    pub volume: Vec<u8>,
    /// Bytes of slice 0 after composition
    pub first_slice: Vec<u8>,
    /// Whether slice 0 is now a view into the composed volume
    pub first_slice_aliases_volume: bool,
}

/// Store three 2x2 byte slices with values 7, 9 and 3 and compose them into
/// one volume.
pub fn run_scenario() -> Result<ScenarioReport, AccessError> {
    let mut image = ImageContainer::new();
    image.initialize(PixelFormat::of::<u8>(), &[2, 2, 3, 1], 1)?;

    let mut volume_set_after_slice = Vec::with_capacity(3);
    for (s, value) in [7u8, 9, 3].into_iter().enumerate() {
        image.set_slice(ImportData::Copy(&[value; 4]), s as i32, 0, 0)?;
        volume_set_after_slice.push(image.is_volume_set(0, 0));
        debug!(s = s, value = value, "Stored scenario slice");
    }

    let volume = image.get_volume_data(0, 0).ok_or(AccessError::NoData)?;
    let first = image.get_slice_data(0, 0, 0).ok_or(AccessError::NoData)?;
    let first_slice_aliases_volume = first.is_within(&volume);

    let volume = ImageReadAccessor::for_item(&image, volume, AccessOptions::NONE)?.to_bytes();
    let first_slice = ImageReadAccessor::for_item(&image, first, AccessOptions::NONE)?.to_bytes();

    Ok(ScenarioReport {
        volume_set_after_slice,
        volume: volume.to_vec(),
        first_slice: first_slice.to_vec(),
        first_slice_aliases_volume,
    })
}
