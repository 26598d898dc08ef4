//! Per-build rewrite state.
//!
//! One [`RewriteContext`] lives for a whole build and is shared, read-mostly, by every class
//! transformation. It carries the seed, the runtime class name, and the [`SymbolNamer`] that
//! hands out literal identifiers.

use std::fmt;

use dashmap::DashMap;
use log::warn;

use crate::{
    codec::LiteralKey,
    instrument::config::InstrumentConfig,
    runtime::{
        CONSTANT_DESCRIPTOR, CONSTANT_NAME, DECODE_DESCRIPTOR, DECODE_NAME, DEFAULT_RUNTIME_CLASS,
    },
};

/// Identifier of one literal within its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiteralId(u32);

impl LiteralId {
    /// Position of the literal in the order the class encountered it.
    #[must_use]
    pub fn ordinal(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LiteralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Allocates literal identifiers, partitioned by class.
///
/// Identifiers only have to be unique together with the class name, so each class gets its own
/// [`ClassNamer`] counting from zero. Output therefore does not depend on the order in which
/// worker threads pick up classes. The shared map only records which classes have claimed a
/// partition, to flag the same class being rewritten twice in one build.
#[derive(Debug, Default)]
pub struct SymbolNamer {
    claimed: DashMap<String, u32>,
}

impl SymbolNamer {
    /// Create an empty namer.
    #[must_use]
    pub fn new() -> SymbolNamer {
        SymbolNamer::default()
    }

    /// Open the identifier partition of a class.
    pub fn claim(&self, class: &str) -> ClassNamer {
        let mut claims = self.claimed.entry(class.to_string()).or_insert(0);
        *claims += 1;
        if *claims > 1 {
            warn!("Class {class} is rewritten {} times in this build", *claims);
        }

        ClassNamer {
            class: class.to_string(),
            next: 0,
        }
    }

    /// Number of distinct classes that claimed a partition.
    #[must_use]
    pub fn claimed_classes(&self) -> usize {
        self.claimed.len()
    }
}

/// Identifier allocation within one class.
#[derive(Debug)]
pub struct ClassNamer {
    class: String,
    next: u32,
}

impl ClassNamer {
    /// The class this partition belongs to.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Allocate the next identifier.
    pub fn next_literal(&mut self) -> LiteralId {
        let id = LiteralId(self.next);
        self.next += 1;
        id
    }

    /// Number of identifiers allocated so far.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

/// State shared by every class transformation of one build.
#[derive(Debug)]
pub struct RewriteContext {
    seed: Vec<u8>,
    runtime_class: String,
    skip_synthetic: bool,
    namer: SymbolNamer,
}

impl RewriteContext {
    /// Create a context with a seed and the default runtime class.
    #[must_use]
    pub fn new(seed: &[u8]) -> RewriteContext {
        RewriteContext {
            seed: seed.to_vec(),
            runtime_class: DEFAULT_RUNTIME_CLASS.to_string(),
            skip_synthetic: false,
            namer: SymbolNamer::new(),
        }
    }

    /// Create the context for a configured build.
    #[must_use]
    pub fn from_config(config: &InstrumentConfig) -> RewriteContext {
        RewriteContext::new(&config.seed)
            .with_runtime_class(config.runtime_class.clone())
            .with_skip_synthetic(config.skip_synthetic)
    }

    /// Use a different runtime class (internal name).
    #[must_use]
    pub fn with_runtime_class(mut self, internal_name: impl Into<String>) -> RewriteContext {
        self.runtime_class = internal_name.into();
        self
    }

    /// Leave classes whose own flags mark them synthetic alone.
    #[must_use]
    pub fn with_skip_synthetic(mut self, skip: bool) -> RewriteContext {
        self.skip_synthetic = skip;
        self
    }

    /// The build seed.
    #[must_use]
    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    /// Internal name of the runtime class rewritten code calls.
    #[must_use]
    pub fn runtime_class(&self) -> &str {
        &self.runtime_class
    }

    /// Whether classes flagged synthetic are skipped.
    #[must_use]
    pub fn skip_synthetic(&self) -> bool {
        self.skip_synthetic
    }

    /// Name and descriptor of the decode method.
    #[must_use]
    pub fn decode_method(&self) -> (&'static str, &'static str) {
        (DECODE_NAME, DECODE_DESCRIPTOR)
    }

    /// Name and descriptor of the bootstrap method resolving encoded dynamic constants.
    #[must_use]
    pub fn constant_method(&self) -> (&'static str, &'static str) {
        (CONSTANT_NAME, CONSTANT_DESCRIPTOR)
    }

    /// The identifier allocator.
    #[must_use]
    pub fn namer(&self) -> &SymbolNamer {
        &self.namer
    }

    /// Derive the key of a literal.
    #[must_use]
    pub fn literal_key(&self, class: &str, id: LiteralId) -> LiteralKey {
        LiteralKey::derive(&self.seed, class, &id.to_string())
    }
}
