//! Upstream data producer attached to an image.

use std::fmt::Debug;

use super::container::ImageContainer;
use super::region::ImageRegion;

/// A pipeline stage that can fill an image on demand.
///
/// When a slice, volume or channel is requested that is neither cached nor
/// composable, the container sets its requested region to exactly that piece
/// and calls [`compute_region`](Producer::compute_region) synchronously on the
/// requesting thread. The producer is expected to populate the region through
/// the regular `set_*` operations of the same image before returning.
pub trait Producer: Debug + Send + Sync {
    /// Whether the producer is currently running.
    fn is_computing(&self) -> bool;

    /// Populate `region` of `image`.
    fn compute_region(&self, image: &ImageContainer, region: &ImageRegion);
}
