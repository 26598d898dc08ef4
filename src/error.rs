use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Per-class failures are wrapped into [`Error::Class`] by the pipeline so that every diagnostic
/// names the class it belongs to.
///
/// # Error Categories
///
/// ## Class Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input (truncated class)
/// - [`Error::UnsupportedVersion`] - Class format newer than the engine understands
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewriting Errors
/// - [`Error::CodeOverflow`] - A rewritten method would exceed class format limits
/// - [`Error::Unrelocatable`] - A method body holds offsets the relocator cannot update
/// - [`Error::EncodingInvariant`] - The codec self-test failed for a literal
///
/// ## Build Integration Errors
/// - [`Error::Configuration`] - Invalid configuration or wrong registration order
/// - [`Error::Class`] - Any of the above, attributed to a specific class
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust
/// use strcloak::{Error, instrument::RewriteContext, instrument::rewriter::transform};
///
/// let ctx = RewriteContext::new(b"seed");
/// match transform(&[0xCA, 0xFE], &ctx) {
///     Err(Error::OutOfBounds { .. }) => println!("truncated class"),
///     Err(Error::Malformed { message, .. }) => println!("malformed class: {message}"),
///     Err(e) => println!("other error: {e}"),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for debugging
    /// purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    ///
    /// Truncated class files end up here.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The class file format version is outside of the supported window.
    #[error("Unsupported class file version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version found in the class header
        major: u16,
        /// Minor version found in the class header
        minor: u16,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Rewritten output would not fit within the limits of the class file format.
    ///
    /// Raised for code longer than 65535 bytes, a branch offset that no longer fits into 16
    /// bits, an operand stack deeper than 65535 slots, or a full constant pool.
    #[error("Code overflow: {0}")]
    CodeOverflow(String),

    /// A method body carries offset-bearing data the relocator does not understand.
    ///
    /// An unknown attribute nested in `Code` may hold bytecode offsets that would go stale, so
    /// the method is left untouched.
    #[error("Cannot relocate method body: {0}")]
    Unrelocatable(String),

    /// `decode(encode(s)) != s` was detected for a literal.
    ///
    /// This must never ship: the build aborts.
    #[error("Encoding invariant violated for a literal of {length} code units")]
    EncodingInvariant {
        /// Length of the literal that failed to round-trip, in UTF-16 code units
        length: usize,
    },

    /// The engine was registered or configured incorrectly.
    ///
    /// Raised before any class is touched, e.g. when the host reports that the required
    /// application plugin is missing or an exclude pattern does not compile.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A per-class failure, with the identity of the class attached.
    #[error("{class}: {source}")]
    Class {
        /// Binary name of the offending class (or the input name when the class did not parse)
        class: String,
        /// The underlying failure
        source: Box<Error>,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors from the file-backed class source and the directory sink.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Attach the identity of a class to this error.
    ///
    /// Errors that already carry a class identity are returned unchanged.
    #[must_use]
    pub fn for_class(self, class: impl Into<String>) -> Error {
        match self {
            Error::Class { .. } => self,
            other => Error::Class {
                class: class.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through [`Error::Class`] wrappers.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Class { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the error only prevents rewriting a single method body.
    ///
    /// The rewriter recovers from these by leaving the method as it was.
    #[must_use]
    pub fn is_method_local(&self) -> bool {
        matches!(
            self.root(),
            Error::CodeOverflow(_) | Error::Unrelocatable(_)
        )
    }

    /// Returns `true` if the error means the input could not be parsed as a class file.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self.root(),
            Error::Malformed { .. } | Error::OutOfBounds { .. } | Error::Empty
        )
    }
}
