//! Low-level byte order and safe reading/writing utilities for class file parsing.
//!
//! Class files store every multi-byte quantity in big-endian order. This module provides
//! bounds-checked reading and writing of primitive types from/to byte buffers in that order,
//! ensuring truncated or corrupt input surfaces as an error instead of a panic.
//!
//! # Key Components
//!
//! - [`crate::file::io::ClassIO`] - Trait defining big-endian conversion for primitive types
//! - [`crate::file::io::read_be_at`] - Bounds-checked reads at a cursor
//! - [`crate::file::io::push_be`] - Appending writes used by every serializer
//!
//! # Examples
//!
//! ```rust,ignore
//! use strcloak::file::io::{push_be, read_be_at};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&data, &mut offset)?;
//! assert_eq!(magic, 0xCAFE_BABE);
//!
//! let mut out = Vec::new();
//! push_be(&mut out, 0x0034_u16);
//! assert_eq!(&data[4..], out.as_slice());
//! # Ok::<(), strcloak::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All functions are pure and operate on caller-provided buffers.

use crate::Result;

/// Trait for implementing type specific safe big-endian readers and writers.
///
/// Implemented for the integer widths a class file uses (`u8` through `u64`, signed and
/// unsigned).
pub trait ClassIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $len];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(
    u64 => 8,
    i64 => 8,
    u32 => 4,
    i32 => 4,
    u16 => 2,
    i16 => 2,
    u8 => 1,
    i8 => 1,
);

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing the offset
/// by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends a value of type `T` in big-endian byte order to a growable buffer.
pub fn push_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}
