//! Class file input handling.
//!
//! This module provides the byte-level foundation for everything else in the crate: safe
//! big-endian reading and writing ([`io`]), the cursor based [`parser::Parser`], and
//! [`ClassSource`], which owns the raw bytes of one class file regardless of where they came from.
//!
//! # Backends
//!
//! - **Physical** - memory-mapped files read from disk (`memmap2`)
//! - **Memory** - byte vectors handed over by the host build
//!
//! Both are hidden behind the [`Backend`] trait so the transformation code only ever sees a
//! `&[u8]`.
//!
//! # Examples
//!
//! ```rust
//! use strcloak::ClassSource;
//!
//! let source = ClassSource::from_mem("com/example/Greeting", vec![0xCA, 0xFE, 0xBA, 0xBE])?;
//! assert_eq!(source.name(), "com/example/Greeting");
//! assert_eq!(source.data().len(), 4);
//! # Ok::<(), strcloak::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use memory::Memory;
use physical::Physical;

/// Backend abstraction over the storage of class bytes.
pub trait Backend: Send + Sync {
    /// Returns a slice of `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is outside of the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the complete data.
    fn data(&self) -> &[u8];

    /// Returns the length of the data in bytes.
    fn len(&self) -> usize;
}

/// The raw bytes of one class file plus a name used in diagnostics.
///
/// The name is whatever identifies the input to the host: a path inside a jar, a file path, or a
/// binary class name. It is attached to every error raised while processing the source.
pub struct ClassSource {
    name: String,
    data: Box<dyn Backend>,
}

impl ClassSource {
    /// Open a class file from disk through a read-only memory map.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened, or
    /// [`crate::Error::Empty`] if it has no content.
    pub fn from_file(path: &Path) -> Result<ClassSource> {
        let input = Physical::new(path)?;

        Self::load(path.display().to_string(), input)
    }

    /// Wrap class bytes that already live in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(name: impl Into<String>, data: Vec<u8>) -> Result<ClassSource> {
        let input = Memory::new(data);

        Self::load(name.into(), input)
    }

    fn load<T: Backend + 'static>(name: String, data: T) -> Result<ClassSource> {
        if data.len() == 0 {
            return Err(Empty.for_class(name));
        }

        Ok(ClassSource {
            name,
            data: Box::new(data),
        })
    }

    /// The name identifying this input in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The complete class bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns a slice of the class bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is outside of the data.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Returns the length of the class bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the source holds no bytes. Never true for a loaded source.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
