//! Configuration for the instrumentation engine.
//!
//! [`InstrumentConfig`] is supplied once, at registration time, and applies to every class of
//! the build. Nothing in it varies per class.

use strum::{Display, EnumString};

use crate::{
    instrument::selector::compile_pattern,
    runtime::{is_valid_internal_name, DEFAULT_RUNTIME_CLASS},
    Error, Result,
};

/// What to do with a class whose format version is newer than the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum VersionPolicy {
    /// Fail the build, naming the class (default).
    #[default]
    Fail,
    /// Copy the class through unmodified and log a warning.
    PassThrough,
}

/// Build-wide configuration of the instrumentation engine.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Whether the engine runs at all (default: true).
    pub enabled: bool,

    /// Seed mixed into every literal key (default: empty).
    ///
    /// The same seed and the same input classes always produce the same output.
    pub seed: Vec<u8>,

    /// Classes to leave alone, as dotted binary name patterns.
    pub exclude_patterns: Vec<String>,

    /// If non-empty, only classes matching one of these patterns are rewritten.
    pub include_patterns: Vec<String>,

    /// Skip classes flagged synthetic (default: false).
    pub skip_synthetic: bool,

    /// Handling of class files newer than the supported window (default: fail).
    pub version_policy: VersionPolicy,

    /// Internal name of the generated runtime decode class.
    pub runtime_class: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: Vec::new(),
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            skip_synthetic: false,
            version_policy: VersionPolicy::Fail,
            runtime_class: DEFAULT_RUNTIME_CLASS.to_string(),
        }
    }
}

impl InstrumentConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that registers nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the build seed.
    ///
    /// # Arguments
    ///
    /// * `seed` - Bytes mixed into every literal key.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.seed = seed.into();
        self
    }

    /// Adds an exclude pattern.
    ///
    /// # Arguments
    ///
    /// * `pattern` - A dotted binary name pattern, e.g. `com.example.generated.*`.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Adds an include pattern.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    /// Sets whether synthetic classes are skipped.
    #[must_use]
    pub fn with_skip_synthetic(mut self, skip: bool) -> Self {
        self.skip_synthetic = skip;
        self
    }

    /// Sets the policy for class files newer than the supported window.
    #[must_use]
    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Sets the internal name of the generated runtime class.
    #[must_use]
    pub fn with_runtime_class(mut self, internal_name: impl Into<String>) -> Self {
        self.runtime_class = internal_name.into();
        self
    }

    /// Check the configuration before any class is touched.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] for a pattern that does not compile or a
    /// runtime class name that is not a valid internal name.
    pub fn validate(&self) -> Result<()> {
        for pattern in self.exclude_patterns.iter().chain(&self.include_patterns) {
            compile_pattern(pattern)?;
        }
        if !is_valid_internal_name(&self.runtime_class) {
            return Err(Error::Configuration(format!(
                "runtime class '{}' is not a valid internal name",
                self.runtime_class
            )));
        }
        Ok(())
    }
}
