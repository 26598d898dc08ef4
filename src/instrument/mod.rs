//! String literal instrumentation.
//!
//! This module turns plaintext string constants of a class into encoded payloads that are
//! decoded at run time by the support class from [`crate::runtime`].
//!
//! # Architecture
//!
//! - [`config`] - user options ([`InstrumentConfig`]) and their validation
//! - [`selector`] - which classes are rewritten ([`ClassSelector`])
//! - [`context`] - per-build state shared by every class ([`RewriteContext`])
//! - [`stage`] - the per-class transformation chain ([`ClassStage`], [`StageChain`])
//! - [`rewriter`] - the stage replacing literal loads ([`ConstantRewriter`]), with help from
//!   `fields` for `ConstantValue` attributes and `concat` for concatenation recipes
//! - [`pipeline`] - registration with a build host and batch processing ([`Instrumenter`])
//!
//! # Usage
//!
//! ```rust,no_run
//! use strcloak::instrument::{InstrumentConfig, Instrumenter, ClassInput, ClassOrigin, MemorySink};
//!
//! let instrumenter = Instrumenter::new(InstrumentConfig::default().with_seed("release"))?;
//! let bytes = std::fs::read("build/classes/com/example/Greeting.class")?;
//! let sink = MemorySink::new();
//! let report = instrumenter.run_batch(
//!     &[ClassInput::new("com/example/Greeting", ClassOrigin::Module, bytes)],
//!     &sink,
//! )?;
//! println!("{report}");
//! # Ok::<(), strcloak::Error>(())
//! ```

use strum::Display;

mod concat;
pub mod config;
pub mod context;
mod fields;
pub mod pipeline;
pub mod rewriter;
pub mod selector;
pub mod stage;

pub use config::{InstrumentConfig, VersionPolicy};
pub use context::{LiteralId, RewriteContext, SymbolNamer};
pub use pipeline::{
    register, BatchReport, ClassAction, ClassInput, ClassReport, ClassSink, DirectorySink,
    InstrumentationHost, Instrumenter, MemorySink, StageFactory,
};
pub use rewriter::{transform, ConstantRewriter};
pub use selector::{ClassDescriptor, ClassOrigin, ClassSelector};
pub use stage::{ChainOutput, ClassStage, StageChain, StageOutcome};

/// Which classes a host routes through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InstrumentationScope {
    /// Only classes compiled from the module's own sources
    ModuleOnly,
    /// The module's classes and those of its dependencies
    ModuleAndDependencies,
}
