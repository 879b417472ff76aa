//! Typed pixel access and scalar pixel value queries.

use std::sync::Arc;

use voxelcore::{
    AccessError, AccessOptions, AxisAlignedGeometry, ComponentType, ImageContainer, ImageError,
    ImageReadAccessor, ImageWriteAccessor, ImportData, PixelAccessor, PixelFormat,
};

use super::test_utils::{image_of, u8_image};

fn f32_value(index: [u32; 4]) -> f32 {
    (index[0] + 10 * index[1] + 100 * index[2] + 1000 * index[3]) as f32
}

// =============================================================================
// Typed Accessor
// =============================================================================

#[test]
fn test_whole_image_writes_visible_in_slices() {
    let extents = [3, 2, 2, 2];
    let image = image_of(PixelFormat::of::<f32>(), &extents, 1);

    {
        let writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
        let mut pixels = PixelAccessor::<_, f32, 4>::new(writer).unwrap();
        assert_eq!(pixels.extents(), extents);
        for t in 0..2 {
            for z in 0..2 {
                for y in 0..2 {
                    for x in 0..3 {
                        pixels.set_by_index([x, y, z, t], f32_value([x, y, z, t]));
                    }
                }
            }
        }
    }

    let slice = image.get_slice_data(1, 1, 0).unwrap();
    let reader = ImageReadAccessor::for_item(&image, slice, AccessOptions::NONE).unwrap();
    let pixels = PixelAccessor::<_, f32, 2>::new(&reader).unwrap();
    assert_eq!(pixels.extents(), [3, 2]);
    assert_eq!(pixels.get_by_index([2, 1]), f32_value([2, 1, 1, 1]));
    assert_eq!(pixels.get_by_index([0, 0]), f32_value([0, 0, 1, 1]));
}

#[test]
fn test_accessor_rejects_wrong_type_and_dimension() {
    let image = u8_image(&[4, 4, 2], 1);

    let reader = ImageReadAccessor::new(&image, AccessOptions::NONE).unwrap();
    assert_eq!(
        PixelAccessor::<_, u16, 3>::new(&reader).err(),
        Some(AccessError::TypeMismatch {
            expected: PixelFormat::scalar(ComponentType::U8),
            actual: PixelFormat::scalar(ComponentType::U16),
        })
    );
    assert_eq!(
        PixelAccessor::<_, u8, 2>::new(&reader).err(),
        Some(AccessError::DimensionMismatch {
            expected: 3,
            actual: 2,
        })
    );
    drop(reader);

    // A slice accessor is two-dimensional whatever the image is.
    let slice = image.get_slice_data(0, 0, 0).unwrap();
    let reader = ImageReadAccessor::for_item(&image, slice, AccessOptions::NONE).unwrap();
    assert!(PixelAccessor::<_, u8, 2>::new(&reader).is_ok());
    assert_eq!(
        PixelAccessor::<_, u8, 3>::new(&reader).err(),
        Some(AccessError::DimensionMismatch {
            expected: 2,
            actual: 3,
        })
    );
}

#[test]
fn test_checked_access_reports_out_of_range() {
    let image = u8_image(&[4, 4], 1);
    let writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
    let mut pixels = PixelAccessor::<_, u8, 2>::new(writer).unwrap();

    pixels.set_by_index_checked([3, 3], 9).unwrap();
    assert_eq!(pixels.get_by_index_checked([3, 3]), Ok(9));
    assert_eq!(
        pixels.set_by_index_checked([0, 4], 1),
        Err(AccessError::OutOfRange {
            offset: 16,
            size: 16,
        })
    );
}

#[test]
fn test_world_coordinate_lookup() {
    let mut image = u8_image(&[4, 4, 2], 1);
    image.set_geometry(Arc::new(
        AxisAlignedGeometry::new([4, 4, 2])
            .with_origin([10.0, 0.0, 0.0])
            .with_spacing([2.0, 1.0, 1.0]),
    ));

    {
        let writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
        let mut pixels = PixelAccessor::<_, u8, 3>::new(writer).unwrap();
        pixels.set_by_index([2, 1, 1], 42);
    }

    let reader = ImageReadAccessor::new(&image, AccessOptions::NONE).unwrap();
    let pixels = PixelAccessor::<_, u8, 3>::new(&reader).unwrap();
    assert_eq!(pixels.get_by_world_coordinate([14.0, 1.0, 1.0]), Ok(42));
    assert_eq!(pixels.get_by_world_coordinate([14.4, 0.8, 1.2]), Ok(42));
    assert_eq!(
        pixels.get_by_world_coordinate([8.0, 0.0, 0.0]),
        Err(AccessError::OutOfBounds {
            axis: 0,
            index: -1,
            extent: 4,
        })
    );
}

#[test]
fn test_world_coordinate_clamps_time_step() {
    let image = u8_image(&[2, 2, 1, 3], 1);
    image
        .set_volume(ImportData::Copy(&[7, 7, 7, 7]), 2, 0)
        .unwrap();

    let reader = ImageReadAccessor::new(&image, AccessOptions::NONE).unwrap();
    let pixels = PixelAccessor::<_, u8, 4>::new(&reader).unwrap();
    assert_eq!(pixels.get_by_world_coordinate_at_time([1.0, 1.0, 0.0], 2), Ok(7));
    assert_eq!(pixels.get_by_world_coordinate_at_time([1.0, 1.0, 0.0], 99), Ok(7));
    assert_eq!(pixels.get_by_world_coordinate([1.0, 1.0, 0.0]), Ok(0));
}

// =============================================================================
// Scalar Pixel Values
// =============================================================================

#[test]
fn test_pixel_value_by_index() {
    let image = image_of(PixelFormat::of::<u16>(), &[2, 2, 2, 3], 1);
    let values: Vec<u8> = (0..24u16).flat_map(|v| (v * 2).to_ne_bytes()).collect();
    image.set_channel(ImportData::Copy(&values), 0).unwrap();

    // Element (1, 1, 1) of time step 2 is 7 + 2 * 8 = 23.
    assert_eq!(image.pixel_value_by_index([1, 1, 1], 2, 0), Ok(46.0));
    // Time step clamped to the last one.
    assert_eq!(image.pixel_value_by_index([1, 1, 1], 9, 0), Ok(46.0));
    assert_eq!(image.pixel_value_by_index([0, 0, 0], 0, 0), Ok(0.0));

    // Outside the image or the pixel.
    assert_eq!(image.pixel_value_by_index([2, 0, 0], 0, 0), Ok(0.0));
    assert_eq!(image.pixel_value_by_index([-1, 0, 0], 0, 0), Ok(0.0));
    assert_eq!(image.pixel_value_by_index([1, 0, 0], 0, 1), Ok(0.0));
}

#[test]
fn test_pixel_value_sums_packed_rgb24() {
    let image = image_of(PixelFormat::packed_rgb24(), &[2, 1], 1);
    image
        .set_channel(ImportData::Copy(&[1, 2, 3, 10, 20, 30]), 0)
        .unwrap();

    assert_eq!(image.pixel_value_by_index([1, 0, 0], 0, 0), Ok(60.0));
    assert_eq!(image.pixel_value_by_index([0, 0, 0], 0, 2), Ok(6.0));
}

#[test]
fn test_pixel_value_by_world_coordinate() {
    let mut image = u8_image(&[3, 3], 1);
    image.set_geometry(Arc::new(
        AxisAlignedGeometry::new([3, 3, 1]).with_spacing([0.5, 0.5, 1.0]),
    ));
    image
        .set_channel(ImportData::Copy(&[0, 1, 2, 3, 4, 5, 6, 7, 8]), 0)
        .unwrap();

    assert_eq!(
        image.pixel_value_by_world_coordinate([1.0, 0.5, 0.0], 0, 0),
        Ok(5.0)
    );
    assert_eq!(
        image.pixel_value_by_world_coordinate([5.0, 0.0, 0.0], 0, 0),
        Ok(0.0)
    );
}

#[test]
fn test_pixel_value_of_uninitialized_image() {
    let image = ImageContainer::new();
    assert_eq!(
        image.pixel_value_by_index([0, 0, 0], 0, 0),
        Err(AccessError::Image(ImageError::NotInitialized))
    );
}
