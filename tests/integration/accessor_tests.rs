//! Single-thread accessor behavior: overlap, recursive locks, options.

use std::sync::Arc;

use voxelcore::{
    AccessError, AccessOptions, AccessState, ImageError, ImageReadAccessor, ImageRegion,
    ImageWriteAccessor, ImportData,
};

use super::test_utils::{read_item, u8_image};

#[test]
fn test_disjoint_slices_do_not_conflict() {
    let image = u8_image(&[2, 2, 3], 1);
    image.set_volume(ImportData::Copy(&[0; 12]), 0, 0).unwrap();
    let first = image.get_slice_data(0, 0, 0).unwrap();
    let second = image.get_slice_data(1, 0, 0).unwrap();

    // Both on this thread: a conflict would be reported as a recursive lock.
    let mut a = ImageWriteAccessor::for_item(&image, first, AccessOptions::FAIL_IF_LOCKED).unwrap();
    let mut b = ImageWriteAccessor::for_item(&image, second, AccessOptions::FAIL_IF_LOCKED).unwrap();
    assert_eq!(image.active_writers(), 2);
    a.data_mut().fill(1);
    b.data_mut().fill(2);
    drop((a, b));

    let volume = image.get_volume_data(0, 0).unwrap();
    assert_eq!(read_item(&image, volume), vec![1, 1, 1, 1, 2, 2, 2, 2, 0, 0, 0, 0]);
}

#[test]
fn test_volume_writer_conflicts_with_slice_reader() {
    let image = u8_image(&[2, 2, 2], 1);
    image.set_volume(ImportData::Copy(&[0; 8]), 0, 0).unwrap();
    let slice = image.get_slice_data(1, 0, 0).unwrap();
    let volume = image.get_volume_data(0, 0).unwrap();

    let reader = ImageReadAccessor::for_item(&image, Arc::clone(&slice), AccessOptions::NONE).unwrap();
    let err = ImageWriteAccessor::for_item(&image, Arc::clone(&volume), AccessOptions::FAIL_IF_LOCKED)
        .err()
        .unwrap();
    assert_eq!(err, AccessError::MemoryLocked);

    let err = ImageWriteAccessor::for_item(&image, Arc::clone(&volume), AccessOptions::NONE)
        .err()
        .unwrap();
    assert_eq!(err, AccessError::RecursiveLock);

    drop(reader);
    assert!(ImageWriteAccessor::for_item(&image, volume, AccessOptions::NONE).is_ok());
    assert_eq!(image.active_readers(), 0);
    assert_eq!(image.active_writers(), 0);
}

#[test]
fn test_channels_are_disjoint() {
    let image = u8_image(&[2, 2], 2);
    let writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
    let other = image.get_channel_data(1).unwrap();
    let reader = ImageReadAccessor::for_item(&image, other, AccessOptions::FAIL_IF_LOCKED);
    assert!(reader.is_ok());
    drop(writer);
}

#[test]
fn test_ignore_lock_read_inside_write_scope() {
    let image = u8_image(&[4], 1);
    let mut writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
    writer.data_mut().copy_from_slice(&[1, 2, 3, 4]);

    // SAFETY: the writer is not used while the reader is alive.
    let options = unsafe { AccessOptions::NONE.with_ignore_lock() };
    let reader = ImageReadAccessor::new(&image, options).unwrap();
    assert_eq!(reader.data(), &[1, 2, 3, 4]);
    assert_eq!(image.active_readers(), 0);
    drop(reader);
    drop(writer);
}

#[test]
fn test_readers_skip_ignore_lock_writer() {
    let image = u8_image(&[4], 1);
    // SAFETY: nothing writes through the writer while readers exist.
    let options = unsafe { AccessOptions::NONE.with_ignore_lock() };
    let _writer = ImageWriteAccessor::new(&image, options).unwrap();
    assert!(ImageReadAccessor::new(&image, AccessOptions::FAIL_IF_LOCKED).is_ok());
    assert_eq!(
        ImageWriteAccessor::new(&image, AccessOptions::FAIL_IF_LOCKED)
            .err()
            .unwrap(),
        AccessError::MemoryLocked
    );
}

#[test]
fn test_region_must_cover_the_image() {
    let image = u8_image(&[4, 4, 2], 1);
    let whole = image.largest_possible_region().unwrap();
    let accessor = ImageWriteAccessor::for_region(&image, &whole, AccessOptions::NONE).unwrap();
    assert_eq!(accessor.size(), 32);
    assert_eq!(accessor.state(), AccessState::Active);
    drop(accessor);

    let half = ImageRegion::new([0, 0, 0, 0, 0], [4, 4, 1, 1, 1]);
    assert_eq!(
        ImageReadAccessor::for_region(&image, &half, AccessOptions::NONE)
            .err()
            .unwrap(),
        AccessError::SubRegionUnsupported
    );
}

#[test]
fn test_accessor_on_uninitialized_image() {
    let image = voxelcore::ImageContainer::new();
    assert_eq!(
        ImageWriteAccessor::new(&image, AccessOptions::NONE)
            .err()
            .unwrap(),
        AccessError::Image(ImageError::NotInitialized)
    );
}

#[test]
fn test_whole_image_access_composes_channel() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Copy(&[1, 2]), 0, 0, 0).unwrap();
    image.set_slice(ImportData::Copy(&[3, 4]), 1, 0, 0).unwrap();
    assert!(image.is_channel_set(0));

    let reader = ImageReadAccessor::new(&image, AccessOptions::NONE).unwrap();
    assert_eq!(reader.data(), &[1, 2, 3, 4]);
    assert!(reader.covers_whole_image());
    assert_eq!(reader.to_bytes().as_ref(), &[1, 2, 3, 4]);
}

// =============================================================================
// Item Ownership
// =============================================================================

#[test]
fn test_items_of_another_image_are_rejected() {
    let a = u8_image(&[2, 2], 1);
    let b = u8_image(&[2, 2], 1);
    let item = a.get_channel_data(0).unwrap();

    let _writer =
        ImageWriteAccessor::for_item(&a, Arc::clone(&item), AccessOptions::FAIL_IF_LOCKED).unwrap();
    assert_eq!(
        ImageWriteAccessor::for_item(&b, Arc::clone(&item), AccessOptions::FAIL_IF_LOCKED).err(),
        Some(AccessError::ForeignItem)
    );

    // SAFETY: nothing writes through `_writer` while a reader could be alive.
    let options = unsafe { AccessOptions::NONE.with_ignore_lock() };
    assert_eq!(
        ImageReadAccessor::for_item(&b, item, options).err(),
        Some(AccessError::ForeignItem)
    );
    assert_eq!(b.active_writers(), 0);
    assert_eq!(a.active_writers(), 1);
}

#[test]
fn test_replaced_item_is_rejected() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Manage(vec![1, 1]), 0, 0, 0).unwrap();
    image.set_slice(ImportData::Copy(&[2, 2]), 1, 0, 0).unwrap();
    let adopted = image.get_slice_data(0, 0, 0).unwrap();

    image.get_volume_data(0, 0).unwrap();
    assert_eq!(
        ImageWriteAccessor::for_item(&image, adopted, AccessOptions::NONE).err(),
        Some(AccessError::ForeignItem)
    );
}

// =============================================================================
// Moving Held Bytes
// =============================================================================

#[test]
fn test_composing_under_own_writer_fails() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Manage(vec![1, 1]), 0, 0, 0).unwrap();
    image.set_slice(ImportData::Copy(&[2, 2]), 1, 0, 0).unwrap();
    let adopted = image.get_slice_data(0, 0, 0).unwrap();

    let mut writer = ImageWriteAccessor::for_item(&image, adopted, AccessOptions::NONE).unwrap();
    writer.data_mut().copy_from_slice(&[9, 9]);

    // Waiting for an accessor of this thread would never return.
    assert!(image.get_volume_data(0, 0).is_none());
    assert_eq!(
        image.set_volume(ImportData::Copy(&[0; 4]), 0, 0),
        Err(AccessError::RecursiveLock)
    );
    drop(writer);

    let volume = image.get_volume_data(0, 0).unwrap();
    assert_eq!(read_item(&image, volume), vec![9, 9, 2, 2]);
}
