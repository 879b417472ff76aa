//! Test utilities for integration tests.
//!
//! Image builders, byte helpers and a scripted producer that fills requested
//! regions slice by slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxelcore::{
    AccessOptions, BufferItem, ImageContainer, ImageReadAccessor, ImageRegion, ImportData,
    PixelFormat, Producer,
};

/// How long a thread may take to acquire an accessor that should not block.
pub const PROMPT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that a thread is blocked.
pub const BLOCKED: Duration = Duration::from_millis(100);

// =============================================================================
// Image Builders
// =============================================================================

/// Initialized image of `u8` elements.
pub fn u8_image(extents: &[u32], channels: u32) -> ImageContainer {
    image_of(PixelFormat::of::<u8>(), extents, channels)
}

/// Initialized image of `u32` elements.
pub fn u32_image(extents: &[u32], channels: u32) -> ImageContainer {
    image_of(PixelFormat::of::<u32>(), extents, channels)
}

pub fn image_of(format: PixelFormat, extents: &[u32], channels: u32) -> ImageContainer {
    let mut image = ImageContainer::new();
    image
        .initialize(format, extents, channels)
        .expect("valid test image");
    image
}

// =============================================================================
// Byte Helpers
// =============================================================================

/// Bytes of `item`, read through an arbitrated accessor.
pub fn read_item(image: &ImageContainer, item: Arc<BufferItem>) -> Vec<u8> {
    ImageReadAccessor::for_item(image, item, AccessOptions::NONE)
        .expect("read access")
        .data()
        .to_vec()
}

pub fn u32_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn u32_values(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// =============================================================================
// Scripted Producer
// =============================================================================

/// A producer that records every requested region and, when `fills` is set,
/// populates it one `u8` slice at a time with value `1 + s + 10 * t`.
#[derive(Debug)]
pub struct ScriptedProducer {
    fills: bool,
    computing: AtomicBool,
    requests: Mutex<Vec<ImageRegion>>,
}

impl ScriptedProducer {
    pub fn filling() -> Arc<Self> {
        Arc::new(Self {
            fills: true,
            computing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A producer that never populates anything.
    pub fn idle() -> Arc<Self> {
        Arc::new(Self {
            fills: false,
            computing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ImageRegion> {
        self.requests.lock().unwrap().clone()
    }

    pub fn slice_value(s: u32, t: u32) -> u8 {
        (1 + s + 10 * t) as u8
    }
}

impl Producer for ScriptedProducer {
    fn is_computing(&self) -> bool {
        self.computing.load(Ordering::SeqCst)
    }

    fn compute_region(&self, image: &ImageContainer, region: &ImageRegion) {
        self.requests.lock().unwrap().push(*region);
        if !self.fills {
            return;
        }

        self.computing.store(true, Ordering::SeqCst);
        let [x, y, ..] = region.size();
        let [_, _, s0, t0, n] = region.index();
        let [_, _, slices, times, _] = region.size();
        for t in t0..t0 + times {
            for s in s0..s0 + slices {
                let data = vec![Self::slice_value(s, t); (x * y) as usize];
                image
                    .set_slice(ImportData::Copy(&data), s as i32, t as i32, n as i32)
                    .expect("producer writes slice");
            }
        }
        self.computing.store(false, Ordering::SeqCst);
    }
}
