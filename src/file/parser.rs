//! Low-level byte stream parser for class file decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser used for reading class file structures: the header, the constant pool, member tables,
//! attributes, and the code arrays of method bodies. It offers bounds-checked access to binary
//! data in big-endian order, which is the byte order of every class file quantity.
//!
//! # Architecture
//!
//! The parser is built around a simple cursor-based model that maintains a position within
//! a byte slice:
//!
//! - **Position tracking** - Maintains current offset for sequential parsing operations
//! - **Bounds checking** - All operations validate data availability before reading
//! - **Borrowed slices** - [`crate::file::parser::Parser::read_bytes`] hands out sub-slices of
//!   the input without copying, which keeps raw attribute payloads cheap
//!
//! # Usage Examples
//!
//! ```rust
//! use strcloak::Parser;
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
//! assert_eq!(parser.read_be::<u16>()?, 0);
//! assert_eq!(parser.read_be::<u16>()?, 52);
//! assert!(!parser.has_more_data());
//! # Ok::<(), strcloak::Error>(())
//! ```

use crate::{
    file::io::{read_be_at, ClassIO},
    Result,
};

/// A generic binary data parser for reading class file structures.
///
/// `Parser` provides a cursor-based interface for reading big-endian binary data. The parser
/// maintains an internal position cursor and provides bounds checking to prevent buffer overruns
/// when reading malformed or truncated data.
///
/// # Examples
///
/// ```rust
/// use strcloak::Parser;
///
/// let data = [0x00, 0x02, 0x41, 0x42];
/// let mut parser = Parser::new(&data);
///
/// let length = parser.read_be::<u16>()?;
/// assert_eq!(parser.read_bytes(length as usize)?, b"AB");
/// # Ok::<(), strcloak::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// Seeking to `len()` is allowed and leaves the parser exhausted.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        self.position = self.calc_end_position(step)?;
        Ok(())
    }

    /// Returns the current position of the cursor.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Returns the full underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Align the position to the given boundary, relative to the start of the data.
    ///
    /// Used for the padding in front of `tableswitch` and `lookupswitch` operands, which is
    /// relative to the start of the code array.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding would run past the end of the data.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a big-endian value of type `T` and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
    pub fn read_be<T: ClassIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Execute a parsing operation, restoring the position if it fails.
    ///
    /// # Errors
    /// Returns whatever error the closure returns.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    /// Returns the number of bytes remaining from the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Calculate the end position for reading `length` bytes from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on overflow or if the end lies beyond the data.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }

    /// Read a slice of `length` bytes and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a `u16`-length-prefixed byte string, as used by `CONSTANT_Utf8`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the prefix or the payload is truncated.
    pub fn read_u16_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.read_be::<u16>()?;
        self.read_bytes(usize::from(length))
    }

    /// Read a `u4`-length-prefixed byte string, as used by attribute payloads.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the prefix or the payload is truncated.
    pub fn read_u32_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.read_be::<u32>()?;
        self.read_bytes(length as usize)
    }

    /// Read a `u16` count followed by that many `u16` values.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the table is truncated.
    pub fn read_u16_table(&mut self) -> Result<Vec<u16>> {
        let count = self.read_be::<u16>()?;
        let mut values = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            values.push(self.read_be::<u16>()?);
        }
        Ok(values)
    }
}
