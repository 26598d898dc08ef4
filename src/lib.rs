// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a class file into memory

//! # strcloak
//!
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](LICENSE-APACHE)
//!
//! Build-time string literal obfuscation for JVM class files. Built in pure Rust, `strcloak`
//! rewrites every string constant loaded by a method into an encoded payload plus a call to a
//! small generated support class, so that the plaintext no longer appears in the shipped
//! artifact. The rewritten bytecode produces exactly the same strings at run time.
//!
//! ## Features
//!
//! - **📦 Exact class file round-trip** - Constant pools, attributes and method bodies the engine
//!   does not touch are written back byte for byte
//! - **🔧 Full relocation** - Branches, switches, exception ranges, stack maps and debug tables
//!   are rewritten when instructions grow
//! - **⚡ Parallel** - Classes are processed concurrently with deterministic output
//! - **🔑 Deterministic keys** - Payloads depend only on the build seed, the class, and the
//!   position of the literal
//! - **🧩 Build integration** - A small host trait for plugging into any build system
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strcloak::prelude::*;
//!
//! let ctx = RewriteContext::new(b"release-seed");
//! let original = std::fs::read("build/classes/com/example/Greeting.class")?;
//! let rewritten = transform(&original, &ctx)?;
//! std::fs::write("build/classes/com/example/Greeting.class", &rewritten)?;
//!
//! // the rewritten class needs the support class on its class path
//! let runtime = strcloak::runtime::support_class(strcloak::runtime::DEFAULT_RUNTIME_CLASS)?;
//! std::fs::write("build/classes/io/strcloak/runtime/Strings.class", runtime)?;
//! # Ok::<(), strcloak::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - class file model: constant pool, attributes, members
//! - [`bytecode`] - instruction decoding, stack map frames, and method body relocation
//! - [`codec`] - key derivation and the literal cipher
//! - [`runtime`] - generation of the support class and a mirror of its decoder
//! - [`instrument`] - class selection, rewriting, and build integration
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with detailed [`Error`] information. Failures while
//! processing a class are attributed to that class through [`Error::Class`].

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use strcloak::prelude::*;
///
/// let instrumenter = Instrumenter::new(InstrumentConfig::default().exclude("com.example.generated.**"))?;
/// println!("{:?}", instrumenter.config());
/// # Ok::<(), strcloak::Error>(())
/// ```
pub mod prelude;

/// JVM bytecode: opcodes, instruction decoding, stack maps and relocation.
///
/// # Key Types
///
/// - [`bytecode::decoder::Instruction`] - A decoded instruction with its operand
/// - [`bytecode::stackmap::StackMapFrame`] - One entry of a `StackMapTable`
/// - [`bytecode::relocate::Patches`] - Instruction replacements applied to a method body
///
/// # Examples
///
/// ```rust
/// use strcloak::bytecode::{decoder::decode, opcodes};
///
/// let instructions = decode(&[opcodes::ICONST_0, opcodes::IRETURN])?;
/// assert_eq!(instructions.len(), 2);
/// assert_eq!(instructions[1].offset, 1);
/// # Ok::<(), strcloak::Error>(())
/// ```
pub mod bytecode;

/// The class file format.
///
/// [`classfile::ClassFile`] parses a class into its constant pool, members and attributes and
/// writes it back. Constant pool entries are only ever appended, so every index held by
/// untouched structures stays valid.
///
/// # Examples
///
/// ```rust,no_run
/// use strcloak::classfile::ClassFile;
///
/// let bytes = std::fs::read("Greeting.class")?;
/// let class = ClassFile::parse(&bytes)?;
/// println!("{} has {} methods", class.binary_name()?, class.methods.len());
/// # Ok::<(), strcloak::Error>(())
/// ```
pub mod classfile;

/// Literal encoding.
pub mod codec;

/// Instrumentation of string literals and the build integration.
pub mod instrument;

/// The generated support class.
pub mod runtime;

/// `strcloak` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `strcloak` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use strcloak::{Error, classfile::ClassFile};
///
/// match ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0x00]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::UnsupportedVersion { major, .. }) => println!("class version {major}"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Raw class bytes, read from disk or handed over from memory.
///
/// # Example
///
/// ```rust,no_run
/// use strcloak::ClassSource;
/// let source = ClassSource::from_file(std::path::Path::new("Greeting.class"))?;
/// println!("{} bytes", source.len());
/// # Ok::<(), strcloak::Error>(())
/// ```
pub use file::ClassSource;

/// Provides access to low-level parsing utilities.
///
/// The [`Parser`] type is used for decoding class structures and bytecode.
///
/// # Example
///
/// ```rust
/// use strcloak::Parser;
/// let data = [0xCA, 0xFE, 0xBA, 0xBE];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
/// # Ok::<(), strcloak::Error>(())
/// ```
pub use file::parser::Parser;
