//! Pixel format descriptors.
//!
//! A [`PixelFormat`] describes one image element: the storage type of a single
//! component, how many components make up the element, and how many bits the
//! element occupies. It is the only thing the container knows about pixel
//! contents; every buffer size in the crate is derived from it.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Component Type
// =============================================================================

/// Storage type of a single pixel component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ComponentType {
    /// Byte size of one component value.
    #[inline]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Whether this is a floating point type.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Short lowercase name (`"u8"`, `"f32"`, ...).
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    /// Decode one component stored in native byte order at the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than [`byte_size`](Self::byte_size).
    pub fn decode_f64(self, bytes: &[u8]) -> Option<f64> {
        let raw = bytes.get(..self.byte_size())?;
        let value = match self {
            Self::I8 => raw[0] as i8 as f64,
            Self::U8 => raw[0] as f64,
            Self::I16 => i16::from_ne_bytes([raw[0], raw[1]]) as f64,
            Self::U16 => u16::from_ne_bytes([raw[0], raw[1]]) as f64,
            Self::I32 => i32::from_ne_bytes(raw.try_into().ok()?) as f64,
            Self::U32 => u32::from_ne_bytes(raw.try_into().ok()?) as f64,
            Self::I64 => i64::from_ne_bytes(raw.try_into().ok()?) as f64,
            Self::U64 => u64::from_ne_bytes(raw.try_into().ok()?) as f64,
            Self::F32 => f32::from_ne_bytes(raw.try_into().ok()?) as f64,
            Self::F64 => f64::from_ne_bytes(raw.try_into().ok()?),
        };
        Some(value)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Pixel Format
// =============================================================================

/// Immutable description of one image element.
///
/// Two formats are interchangeable exactly when they compare equal. The byte
/// size of an element is `components * component.byte_size()`, with one
/// exception kept for compatibility: the legacy packed 24-bit tri-component
/// format, see [`PixelFormat::packed_rgb24`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PixelFormat {
    component: ComponentType,
    components: u32,
    bits_per_element: u32,
}

impl PixelFormat {
    /// Create a format of `components` values of type `component`.
    ///
    /// A component count of zero is treated as one.
    pub const fn new(component: ComponentType, components: u32) -> Self {
        let components = if components == 0 { 1 } else { components };
        Self {
            component,
            components,
            bits_per_element: (component.byte_size() as u32) * 8 * components,
        }
    }

    /// Single-component format of the given type.
    pub const fn scalar(component: ComponentType) -> Self {
        Self::new(component, 1)
    }

    /// Legacy packed 24-bit RGB element.
    ///
    /// Scalar pixel value queries report the sum of the three components for
    /// this format instead of the first component.
    pub const fn packed_rgb24() -> Self {
        Self {
            component: ComponentType::U8,
            components: 3,
            bits_per_element: 24,
        }
    }

    /// Format matching a Rust element type.
    pub fn of<T: super::PixelElement>() -> Self {
        T::pixel_format()
    }

    /// Storage type of each component.
    #[inline]
    pub const fn component_type(&self) -> ComponentType {
        self.component
    }

    /// Number of components per element.
    #[inline]
    pub const fn number_of_components(&self) -> u32 {
        self.components
    }

    /// Bits occupied by one element.
    #[inline]
    pub const fn bits_per_element(&self) -> u32 {
        self.bits_per_element
    }

    /// Bytes occupied by one element.
    #[inline]
    pub const fn size(&self) -> usize {
        (self.bits_per_element / 8) as usize
    }

    /// Whether this is the legacy packed 24-bit tri-component layout.
    #[inline]
    pub const fn is_packed_rgb24(&self) -> bool {
        self.bits_per_element == 24 && self.components == 3
    }

    /// Byte size of a buffer holding `elements` elements.
    #[inline]
    pub const fn buffer_size(&self, elements: usize) -> usize {
        elements * self.size()
    }

    /// Like [`buffer_size`](Self::buffer_size), or `None` when the result
    /// exceeds the largest possible allocation (`isize::MAX` bytes).
    pub const fn checked_buffer_size(&self, elements: usize) -> Option<usize> {
        match elements.checked_mul(self.size()) {
            Some(bytes) if bytes <= isize::MAX as usize => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components == 1 {
            write!(f, "{}", self.component)
        } else {
            write!(f, "{}x{}", self.component, self.components)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
