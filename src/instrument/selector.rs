//! Class selection.
//!
//! The selector decides from host-supplied metadata alone whether a class enters the rewrite
//! set; it never looks at class bytes. Patterns are written against dotted binary names:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `*`     | any run of characters except `.` |
//! | `**`    | any run of characters, including `.` |
//! | `?`     | one character other than `.` |
//!
//! Everything else is literal, `/` is read as `.`, and a pattern must match the whole name.

use regex::Regex;
use strum::Display;

use crate::{
    instrument::{config::InstrumentConfig, InstrumentationScope},
    Error, Result,
};

/// Where a class comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ClassOrigin {
    /// Compiled from the module's own sources
    Module,
    /// Part of a dependency artifact
    Dependency,
}

/// Static metadata about a class, as known to the host without parsing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Dotted binary name, e.g. `com.example.Foo$Inner`
    pub binary_name: String,
    /// Origin of the class
    pub origin: ClassOrigin,
    /// Whether the host knows the class to be synthetic or generated
    pub synthetic: bool,
}

impl ClassDescriptor {
    /// Describe a class by its dotted binary name.
    #[must_use]
    pub fn new(binary_name: impl Into<String>, origin: ClassOrigin) -> ClassDescriptor {
        ClassDescriptor {
            binary_name: binary_name.into(),
            origin,
            synthetic: false,
        }
    }

    /// Describe a class by its internal name, e.g. `com/example/Foo`.
    #[must_use]
    pub fn from_internal_name(internal_name: &str, origin: ClassOrigin) -> ClassDescriptor {
        ClassDescriptor::new(internal_name.replace('/', "."), origin)
    }

    /// Mark the class as synthetic.
    #[must_use]
    pub fn with_synthetic(mut self, synthetic: bool) -> ClassDescriptor {
        self.synthetic = synthetic;
        self
    }
}

/// Translate a class name pattern into an anchored regular expression.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] for an empty pattern or one that does not compile.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.trim().is_empty() {
        return Err(Error::Configuration(
            "class name pattern must not be empty".to_string(),
        ));
    }

    let mut source = String::with_capacity(pattern.len() * 2 + 2);
    source.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                source.push_str(".*");
            }
            '*' => source.push_str("[^.]*"),
            '?' => source.push_str("[^.]"),
            '/' => source.push_str(r"\."),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    Regex::new(&source)
        .map_err(|error| Error::Configuration(format!("invalid pattern '{pattern}': {error}")))
}

/// The include/exclude predicate over [`ClassDescriptor`]s.
#[derive(Debug, Clone)]
pub struct ClassSelector {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    runtime_class: String,
    skip_synthetic: bool,
    scope: InstrumentationScope,
}

impl ClassSelector {
    /// Build a selector from the build configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if a pattern does not compile.
    pub fn new(config: &InstrumentConfig, scope: InstrumentationScope) -> Result<ClassSelector> {
        Ok(ClassSelector {
            include: config
                .include_patterns
                .iter()
                .map(|pattern| compile_pattern(pattern))
                .collect::<Result<_>>()?,
            exclude: config
                .exclude_patterns
                .iter()
                .map(|pattern| compile_pattern(pattern))
                .collect::<Result<_>>()?,
            runtime_class: config.runtime_class.replace('/', "."),
            skip_synthetic: config.skip_synthetic,
            scope,
        })
    }

    /// Returns `true` if the class should be rewritten.
    #[must_use]
    pub fn should_instrument(&self, class: &ClassDescriptor) -> bool {
        self.rejection(class).is_none()
    }

    /// Why the class is left alone, `None` if it is selected.
    #[must_use]
    pub fn rejection(&self, class: &ClassDescriptor) -> Option<&'static str> {
        let name = class.binary_name.as_str();

        if self.is_runtime(name) {
            return Some("runtime support class");
        }
        if name == "module-info" || name.ends_with(".module-info") {
            return Some("module descriptor");
        }
        if self.scope == InstrumentationScope::ModuleOnly && class.origin == ClassOrigin::Dependency
        {
            return Some("dependency outside of scope");
        }
        if self.skip_synthetic && class.synthetic {
            return Some("synthetic class");
        }
        if self.exclude.iter().any(|pattern| pattern.is_match(name)) {
            return Some("excluded by pattern");
        }
        if !self.include.is_empty() && !self.include.iter().any(|pattern| pattern.is_match(name)) {
            return Some("not included by any pattern");
        }
        None
    }

    fn is_runtime(&self, name: &str) -> bool {
        name == self.runtime_class
            || name
                .strip_prefix(self.runtime_class.as_str())
                .is_some_and(|rest| rest.starts_with('$'))
    }
}
