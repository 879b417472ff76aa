//! Composition and decomposition of slices, volumes and channels.

use std::sync::Arc;

use voxelcore::{
    AccessOptions, ExternalMemory, ImageContainer, ImageWriteAccessor, ImportData, MemoryMode,
    PixelFormat,
};

use super::test_utils::{read_item, u32_bytes, u32_image, u32_values, u8_image, ScriptedProducer};

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_volume_round_trips_through_slices() {
    let (x, y, z, t) = (3u32, 2u32, 4u32, 2u32);
    let image = u32_image(&[x, y, z, t], 2);
    let slice_len = (x * y) as usize;

    for n in 0..2 {
        for step in 0..t {
            let values: Vec<u32> = (0..slice_len as u32 * z)
                .map(|i| i + 1000 * step + 100_000 * n)
                .collect();
            assert!(image
                .set_volume(ImportData::Copy(&u32_bytes(&values)), step as i32, n as i32)
                .unwrap());

            for s in 0..z {
                let slice = image.get_slice_data(s as i32, step as i32, n as i32).unwrap();
                let expected = &values[s as usize * slice_len..(s as usize + 1) * slice_len];
                assert_eq!(u32_values(&read_item(&image, slice)), expected);
            }
        }
    }
}

#[test]
fn test_composition_scenario() {
    let image = u8_image(&[2, 2, 3, 1], 1);

    image.set_slice(ImportData::Copy(&[7; 4]), 0, 0, 0).unwrap();
    assert!(!image.is_volume_set(0, 0));
    image.set_slice(ImportData::Copy(&[9; 4]), 1, 0, 0).unwrap();
    assert!(!image.is_volume_set(0, 0));
    image.set_slice(ImportData::Copy(&[3; 4]), 2, 0, 0).unwrap();
    assert!(image.is_volume_set(0, 0));

    let volume = image.get_volume_data(0, 0).unwrap();
    assert_eq!(volume.extents(), &[2, 2, 3]);
    assert_eq!(
        read_item(&image, Arc::clone(&volume)),
        vec![7, 7, 7, 7, 9, 9, 9, 9, 3, 3, 3, 3]
    );

    assert!(image.is_slice_set(0, 0, 0));
    let first = image.get_slice_data(0, 0, 0).unwrap();
    assert_eq!(read_item(&image, first), vec![7; 4]);
}

#[test]
fn test_channel_composes_from_volumes() {
    let image = u8_image(&[2, 1, 2, 3], 1);
    for t in 0..3u8 {
        image
            .set_volume(ImportData::Copy(&[t, t, t + 10, t + 10]), t as i32, 0)
            .unwrap();
    }
    assert!(image.is_channel_set(0));
    let channel = image.get_channel_data(0).unwrap();
    assert_eq!(
        read_item(&image, channel),
        vec![0, 0, 10, 10, 1, 1, 11, 11, 2, 2, 12, 12]
    );
    assert!(image.channel_catalog().channel(0).unwrap().has_data());
}

#[test]
fn test_single_slice_volume_wraps_view() {
    let image = u8_image(&[4, 4], 1);
    image.set_slice(ImportData::Copy(&[5; 16]), 0, 0, 0).unwrap();
    let slice = image.get_slice_data(0, 0, 0).unwrap();
    let volume = image.get_volume_data(0, 0).unwrap();
    assert!(volume.aliases(&slice));
    assert_eq!(volume.size(), 16);
}

// =============================================================================
// Aliasing
// =============================================================================

#[test]
fn test_decomposed_items_alias_the_channel() {
    let image = u8_image(&[2, 2, 2, 2], 1);
    image.set_channel(ImportData::Copy(&[0; 16]), 0).unwrap();

    let slice = image.get_slice_data(1, 1, 0).unwrap();
    assert!(slice.is_view());
    {
        let mut writer = ImageWriteAccessor::for_item(&image, slice, AccessOptions::NONE).unwrap();
        writer.data_mut().copy_from_slice(&[1, 2, 3, 4]);
    }

    let channel = image.get_channel_data(0).unwrap();
    let bytes = read_item(&image, channel);
    assert_eq!(&bytes[12..16], &[1, 2, 3, 4]);
    assert!(bytes[..12].iter().all(|&b| b == 0));
}

#[test]
fn test_composed_volume_replaces_slices_with_views() {
    let image = u8_image(&[2, 1, 2], 1);
    image.set_slice(ImportData::Manage(vec![1, 1]), 0, 0, 0).unwrap();
    let adopted = image.get_slice_data(0, 0, 0).unwrap();
    assert!(adopted.manages_memory());
    image.set_slice(ImportData::Copy(&[2, 2]), 1, 0, 0).unwrap();

    let volume = image.get_volume_data(0, 0).unwrap();
    let current = image.get_slice_data(0, 0, 0).unwrap();
    assert!(current.is_within(&volume));
    assert!(!current.aliases(&adopted));

    {
        let mut writer = ImageWriteAccessor::for_item(&image, current, AccessOptions::NONE).unwrap();
        writer.data_mut()[0] = 42;
    }
    assert_eq!(read_item(&image, volume), vec![42, 1, 2, 2]);
}

// =============================================================================
// Memory Modes and Modification Tracking
// =============================================================================

#[test]
fn test_reference_memory_is_written_in_place() {
    let mut backing = vec![0u8; 4];
    {
        let image = u8_image(&[2, 2], 1);
        let memory = unsafe { ExternalMemory::new(backing.as_mut_ptr(), backing.len()) }.unwrap();
        image.set_channel(ImportData::Reference(memory), 0).unwrap();

        let channel = image.get_channel_data(0).unwrap();
        assert_eq!(channel.memory_mode(), MemoryMode::ReferenceMemory);
        assert!(!channel.manages_memory());

        let mut writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
        writer.data_mut().copy_from_slice(&[4, 3, 2, 1]);
    }
    // The image is gone; the caller's buffer survives with the written bytes.
    assert_eq!(backing, vec![4, 3, 2, 1]);
}

#[test]
fn test_size_mismatch_is_rejected() {
    let image = u8_image(&[2, 2, 2], 1);
    assert!(image.set_slice(ImportData::Copy(&[0; 3]), 0, 0, 0).is_err());
    assert!(!image.is_slice_set(0, 0, 0));
}

#[test]
fn test_modified_time_tracks_overwrites_only() {
    let image = u8_image(&[2, 2, 2], 1);
    let initial = image.modified_time();

    image.set_slice(ImportData::Copy(&[1; 4]), 0, 0, 0).unwrap();
    image.set_slice(ImportData::Copy(&[2; 4]), 1, 0, 0).unwrap();
    assert_eq!(image.modified_time(), initial);

    // Composing the volume changes no visible content.
    image.get_volume_data(0, 0).unwrap();
    assert_eq!(image.modified_time(), initial);

    image.set_slice(ImportData::Copy(&[3; 4]), 1, 0, 0).unwrap();
    assert!(image.modified_time() > initial);
}

// =============================================================================
// Invalid Indices
// =============================================================================

#[test]
fn test_invalid_indices_are_harmless() {
    let image = u8_image(&[4, 4, 4, 2], 1);
    let table = image.offset_table().to_vec();

    for n in [-1, 2, 1_000_000] {
        assert!(image.get_slice_data(0, 0, n).is_none());
        assert!(image.get_volume_data(0, n).is_none());
        assert!(image.get_channel_data(n).is_none());
        assert!(!image.is_slice_set(0, 0, n));
        assert!(!image.is_volume_set(0, n));
        assert!(!image.is_channel_set(n));
        assert!(!image.set_slice(ImportData::Copy(&[0; 16]), 0, 0, n).unwrap());
    }
    for (s, t) in [(-1, 0), (4, 0), (0, -1), (0, 2), (i32::MAX, i32::MAX)] {
        assert!(image.get_slice_data(s, t, 0).is_none());
        assert!(!image.is_slice_set(s, t, 0));
    }

    assert_eq!(image.offset_table(), table.as_slice());
    assert!(!image.is_channel_set(0));
    assert!(!image.is_slice_set(0, 0, 0));
}

// =============================================================================
// Producer
// =============================================================================

#[test]
fn test_producer_fills_requested_volume() {
    let mut image = u8_image(&[2, 2, 3, 2], 1);
    let producer = ScriptedProducer::filling();
    image.set_producer(Some(producer.clone()));

    let volume = image.get_volume_data(1, 0).unwrap();
    let requests = producer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].index(), [0, 0, 0, 1, 0]);
    assert_eq!(requests[0].size(), [2, 2, 3, 1, 1]);
    assert_eq!(image.requested_region(), Some(requests[0]));

    let expected: Vec<u8> = (0..3)
        .flat_map(|s| [ScriptedProducer::slice_value(s, 1); 4])
        .collect();
    assert_eq!(read_item(&image, volume), expected);

    // Cached now.
    image.get_volume_data(1, 0).unwrap();
    image.get_slice_data(2, 1, 0).unwrap();
    assert_eq!(producer.requests().len(), 1);
}

#[test]
fn test_idle_producer_yields_nothing() {
    let mut image = u8_image(&[2, 2, 2], 1);
    let producer = ScriptedProducer::idle();
    image.set_producer(Some(producer.clone()));

    assert!(image.get_slice_data(1, 0, 0).is_none());
    assert!(!image.is_slice_set(1, 0, 0));
    assert_eq!(producer.requests().len(), 1);

    image.set_producer(None);
    assert!(image.get_slice_data(1, 0, 0).is_some());
}

#[test]
fn test_duplicate_is_independent() {
    let image = u8_image(&[2, 1, 1, 2], 1);
    image.set_volume(ImportData::Copy(&[1, 2]), 0, 0).unwrap();
    let copy: ImageContainer = image.duplicate().unwrap();
    assert_eq!(copy.pixel_format(0), Some(PixelFormat::of::<u8>()));

    let mut writer = ImageWriteAccessor::new(&copy, AccessOptions::NONE).unwrap();
    writer.data_mut()[0] = 99;
    drop(writer);

    let original = image.get_volume_data(0, 0).unwrap();
    assert_eq!(read_item(&image, original), vec![1, 2]);
}
