//! Rust element types that may be read from and written to image buffers.

use super::format::{ComponentType, PixelFormat};

mod sealed {
    pub trait Sealed {}
}

/// A primitive numeric type usable as a pixel component.
///
/// Every bit pattern of an implementing type is a valid value, which is what
/// allows elements to be read straight out of raw image memory. The trait is
/// sealed for that reason.
pub trait PixelComponent: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    /// Matching component descriptor.
    const TYPE: ComponentType;
}

/// An element type (scalar or fixed-size vector of components).
///
/// Sealed like [`PixelComponent`].
pub trait PixelElement: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Format an image must have for this element type to be accessed.
    fn pixel_format() -> PixelFormat;
}

macro_rules! impl_component {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl PixelComponent for $ty {
                const TYPE: ComponentType = ComponentType::$variant;
            }

            impl PixelElement for $ty {
                fn pixel_format() -> PixelFormat {
                    PixelFormat::scalar(ComponentType::$variant)
                }
            }
        )*
    };
}

impl_component! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl<T: PixelComponent, const N: usize> sealed::Sealed for [T; N] {}

impl<T: PixelComponent, const N: usize> PixelElement for [T; N] {
    fn pixel_format() -> PixelFormat {
        PixelFormat::new(T::TYPE, N as u32)
    }
}
