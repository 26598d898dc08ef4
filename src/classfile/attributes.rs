//! Attributes.
//!
//! Attributes are kept as raw `(name_index, info)` pairs. Only `Code` gets a structured form,
//! because rewriting a method body means rebuilding it; everything else is written back exactly
//! as it was read.

use crate::{
    classfile::constants::ConstantPool,
    file::{io::push_be, parser::Parser},
    Result,
};

/// Names of the attributes this crate interprets.
#[allow(missing_docs)]
pub mod names {
    pub const CODE: &str = "Code";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const INNER_CLASSES: &str = "InnerClasses";
    pub const ENCLOSING_METHOD: &str = "EnclosingMethod";
    pub const SYNTHETIC: &str = "Synthetic";
    pub const SIGNATURE: &str = "Signature";
    pub const SOURCE_FILE: &str = "SourceFile";
    pub const SOURCE_DEBUG_EXTENSION: &str = "SourceDebugExtension";
    pub const DEPRECATED: &str = "Deprecated";
    pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
    pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
    pub const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeVisibleParameterAnnotations";
    pub const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str =
        "RuntimeInvisibleParameterAnnotations";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
    pub const ANNOTATION_DEFAULT: &str = "AnnotationDefault";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const METHOD_PARAMETERS: &str = "MethodParameters";
    pub const MODULE: &str = "Module";
    pub const MODULE_PACKAGES: &str = "ModulePackages";
    pub const MODULE_MAIN_CLASS: &str = "ModuleMainClass";
    pub const NEST_HOST: &str = "NestHost";
    pub const NEST_MEMBERS: &str = "NestMembers";
    pub const RECORD: &str = "Record";
    pub const PERMITTED_SUBCLASSES: &str = "PermittedSubclasses";

    /// Empty class attribute marking a class whose literals have been rewritten
    pub const REWRITTEN_MARKER: &str = "StrcloakRewritten";
}

/// A raw attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Index of the `Utf8` holding the attribute name
    pub name_index: u16,
    /// The attribute payload, without name and length
    pub info: Vec<u8>,
}

impl AttributeInfo {
    /// Parse one attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the declared length runs past the input.
    pub fn parse(parser: &mut Parser) -> Result<AttributeInfo> {
        let name_index = parser.read_be::<u16>()?;
        let info = parser.read_u32_prefixed_bytes()?.to_vec();
        Ok(AttributeInfo { name_index, info })
    }

    /// Parse a `u2` count followed by that many attributes.
    ///
    /// # Errors
    /// See [`AttributeInfo::parse`].
    pub fn parse_list(parser: &mut Parser) -> Result<Vec<AttributeInfo>> {
        let count = parser.read_be::<u16>()?;
        let mut attributes = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            attributes.push(AttributeInfo::parse(parser)?);
        }
        Ok(attributes)
    }

    /// Serialize one attribute.
    pub fn write(&self, out: &mut Vec<u8>) {
        push_be(out, self.name_index);
        push_be(out, self.info.len() as u32);
        out.extend_from_slice(&self.info);
    }

    /// Serialize a `u2` count followed by the attributes.
    pub fn write_list(attributes: &[AttributeInfo], out: &mut Vec<u8>) {
        push_be(out, attributes.len() as u16);
        for attribute in attributes {
            attribute.write(out);
        }
    }

    /// Resolve the attribute name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `name_index` is not a valid `Utf8`.
    pub fn name(&self, pool: &ConstantPool) -> Result<String> {
        pool.utf8_string(self.name_index)
    }

    /// Returns `true` if the attribute is named `name`.
    ///
    /// A broken name index is treated as a mismatch.
    #[must_use]
    pub fn is_named(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.utf8(self.name_index)
            .is_ok_and(|bytes| bytes == name.as_bytes())
    }
}

/// One row of a method's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// Start of the protected range, inclusive
    pub start_pc: u16,
    /// End of the protected range, exclusive
    pub end_pc: u16,
    /// Start of the handler
    pub handler_pc: u16,
    /// Caught class, 0 for `finally`
    pub catch_type: u16,
}

/// One entry of the `BootstrapMethods` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// Index of the `MethodHandle` of the bootstrap method
    pub method_ref: u16,
    /// Indices of the static arguments
    pub arguments: Vec<u16>,
}

impl BootstrapMethod {
    /// Parse the payload of a `BootstrapMethods` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and [`crate::Error::Malformed`]
    /// for trailing bytes.
    pub fn parse_all(info: &[u8]) -> Result<Vec<BootstrapMethod>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        let mut methods = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            methods.push(BootstrapMethod {
                method_ref: parser.read_be()?,
                arguments: parser.read_u16_table()?,
            });
        }
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes in BootstrapMethods",
                parser.remaining()
            ));
        }
        Ok(methods)
    }

    /// Serialize into the payload of a `BootstrapMethods` attribute.
    #[must_use]
    pub fn write_all(methods: &[BootstrapMethod]) -> Vec<u8> {
        let mut out = Vec::new();
        push_be(&mut out, methods.len() as u16);
        for method in methods {
            push_be(&mut out, method.method_ref);
            push_be(&mut out, method.arguments.len() as u16);
            for argument in &method.arguments {
                push_be(&mut out, *argument);
            }
        }
        out
    }
}

/// The structured form of a `Code` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum depth of the operand stack
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// The bytecode
    pub code: Vec<u8>,
    /// Exception handlers, in order of precedence
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Nested attributes (`LineNumberTable`, `StackMapTable`, ...)
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    /// Parse the payload of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty code array or trailing bytes, and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn parse(info: &[u8]) -> Result<CodeAttribute> {
        let mut parser = Parser::new(info);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code = parser.read_u32_prefixed_bytes()?.to_vec();
        if code.is_empty() {
            return Err(malformed_error!("Code attribute with an empty code array"));
        }

        let exception_count = parser.read_be::<u16>()?;
        let mut exception_table = Vec::with_capacity(usize::from(exception_count));
        for _ in 0..exception_count {
            exception_table.push(ExceptionTableEntry {
                start_pc: parser.read_be()?,
                end_pc: parser.read_be()?,
                handler_pc: parser.read_be()?,
                catch_type: parser.read_be()?,
            });
        }

        let attributes = AttributeInfo::parse_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes in Code attribute",
                parser.remaining()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Serialize into the payload of a `Code` attribute.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        push_be(&mut out, self.max_stack);
        push_be(&mut out, self.max_locals);
        push_be(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);
        push_be(&mut out, self.exception_table.len() as u16);
        for entry in &self.exception_table {
            push_be(&mut out, entry.start_pc);
            push_be(&mut out, entry.end_pc);
            push_be(&mut out, entry.handler_pc);
            push_be(&mut out, entry.catch_type);
        }
        AttributeInfo::write_list(&self.attributes, &mut out);
        out
    }
}
