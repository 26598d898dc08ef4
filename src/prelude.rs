//! # strcloak Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the strcloak library. Import this module to get quick access to the essential
//! types for instrumenting class files.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all strcloak operations
pub use crate::Error;

/// The result type used throughout strcloak
pub use crate::Result;

/// Raw class bytes and low-level parsing
pub use crate::{ClassSource, Parser};

// ================================================================================================
// Class File Model
// ================================================================================================

/// Parsed class files and their constant pools
pub use crate::classfile::{ClassFile, ConstantPool, ConstantPoolEntry, JavaString};

// ================================================================================================
// Instrumentation
// ================================================================================================

/// Configuration and class selection
pub use crate::instrument::{
    ClassDescriptor, ClassOrigin, ClassSelector, InstrumentConfig, InstrumentationScope,
    VersionPolicy,
};

/// Rewriting a single class
pub use crate::instrument::{transform, ConstantRewriter, RewriteContext};

/// Stage chains
pub use crate::instrument::{ClassStage, StageChain, StageOutcome};

/// Build integration
pub use crate::instrument::{
    register, BatchReport, ClassInput, ClassSink, DirectorySink, InstrumentationHost,
    Instrumenter, MemorySink, StageFactory,
};

// ================================================================================================
// Codec and Runtime
// ================================================================================================

/// Literal keys and the cipher
pub use crate::codec::{EncodedLiteral, LiteralKey};

/// Support class generation
pub use crate::runtime::{support_class, DEFAULT_RUNTIME_CLASS};
