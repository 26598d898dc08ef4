//! Composable class stages.
//!
//! A [`ClassStage`] is one transformation over a parsed [`ClassFile`]. Stages are plain values
//! collected into a [`StageChain`]; the chain parses the input once, hands the same
//! [`ClassFile`] to every stage in order, and serializes only if some stage reported a change.
//! Where the bytes go afterwards is up to the caller, usually a
//! [`crate::instrument::pipeline::ClassSink`].

use std::borrow::Cow;

use log::debug;

use crate::{classfile::ClassFile, instrument::RewriteContext, Result};

/// What a stage did to a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The class was not touched
    Unchanged,
    /// The class was modified
    Modified {
        /// Number of rewritten instructions
        rewrites: usize,
    },
}

/// One transformation step over a parsed class.
///
/// Stages must be thread-safe (`Send + Sync`): the same stage value is applied to many classes
/// in parallel. A stage that fails may leave the [`ClassFile`] half-modified; the chain then
/// discards it and the caller keeps the original bytes.
pub trait ClassStage: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this stage run on the class?
    ///
    /// Called before [`ClassStage::apply`]. Override to skip classes the stage has nothing to
    /// do for.
    fn should_run(&self, _class: &ClassFile, _ctx: &RewriteContext) -> bool {
        true
    }

    /// Apply the stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the class cannot be transformed. The error is fatal for the class.
    fn apply(&self, class: &mut ClassFile, ctx: &RewriteContext) -> Result<StageOutcome>;

    /// Get a description of what this stage does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}

/// Result of running a chain over one class.
#[derive(Debug)]
pub struct ChainOutput<'a> {
    /// The output bytes, borrowed from the input if no stage changed anything
    pub bytes: Cow<'a, [u8]>,
    /// Total rewrites reported by the stages
    pub rewrites: usize,
}

impl ChainOutput<'_> {
    /// Returns `true` if the output differs from the input.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        matches!(self.bytes, Cow::Owned(_))
    }
}

/// An ordered list of stages.
#[derive(Default)]
pub struct StageChain {
    stages: Vec<Box<dyn ClassStage>>,
}

impl StageChain {
    /// Create an empty chain, which passes every class through.
    #[must_use]
    pub fn new() -> StageChain {
        StageChain::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn then(mut self, stage: impl ClassStage + 'static) -> StageChain {
        self.stages.push(Box::new(stage));
        self
    }

    /// Put a stage in front of the existing ones.
    #[must_use]
    pub fn prepend(mut self, stage: Box<dyn ClassStage>) -> StageChain {
        self.stages.insert(0, stage);
        self
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the stages, in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    /// Run every stage over `bytes`.
    ///
    /// An empty chain returns the input without parsing it.
    ///
    /// # Errors
    /// Returns the parse error of the input, or the first error of a stage.
    pub fn run<'a>(&self, bytes: &'a [u8], ctx: &RewriteContext) -> Result<ChainOutput<'a>> {
        if self.stages.is_empty() {
            return Ok(ChainOutput {
                bytes: Cow::Borrowed(bytes),
                rewrites: 0,
            });
        }

        let mut class = ClassFile::parse(bytes)?;
        let mut modified = false;
        let mut rewrites = 0;

        for stage in &self.stages {
            if !stage.should_run(&class, ctx) {
                debug!("Stage {} skipped", stage.name());
                continue;
            }
            match stage.apply(&mut class, ctx)? {
                StageOutcome::Unchanged => {}
                StageOutcome::Modified { rewrites: count } => {
                    modified = true;
                    rewrites += count;
                }
            }
        }

        let bytes = if modified {
            Cow::Owned(class.to_bytes())
        } else {
            Cow::Borrowed(bytes)
        };
        Ok(ChainOutput { bytes, rewrites })
    }
}

impl std::fmt::Debug for StageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
