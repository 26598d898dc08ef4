//! The JVM class file model.
//!
//! [`ClassFile`] is a faithful, index-preserving representation of a class file: the constant
//! pool keeps every entry in place (see [`constants::ConstantPool`]), members keep their order,
//! and attributes stay raw unless something needs to look inside them. Parsing and writing a
//! class without touching it reproduces the input byte-for-byte.
//!
//! # Key Components
//!
//! - [`ClassFile`] - header, pool, members and attributes of one class
//! - [`constants`] - the append-only constant pool and its entries
//! - [`attributes`] - raw attributes and the structured `Code` attribute
//! - [`annotations`] - walkers over annotation and type annotation payloads
//! - [`references`] - which pool entries are referenced from where
//! - [`mutf8`] - Java strings and modified UTF-8
//!
//! # Examples
//!
//! ```rust,no_run
//! use strcloak::classfile::ClassFile;
//!
//! let bytes = std::fs::read("Greeting.class")?;
//! let class = ClassFile::parse(&bytes)?;
//! println!("{} has {} methods", class.this_class_name()?, class.methods.len());
//! assert_eq!(class.to_bytes(), bytes);
//! # Ok::<(), strcloak::Error>(())
//! ```

pub mod annotations;
pub mod attributes;
pub mod constants;
pub mod flags;
pub mod mutf8;
pub mod references;

use crate::{
    file::{io::push_be, parser::Parser},
    Error, Result,
};
use attributes::{names, AttributeInfo, CodeAttribute};
use flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

pub use constants::{ConstantPool, ConstantPoolEntry, ConstantTag};
pub use mutf8::JavaString;

/// The `0xCAFEBABE` magic every class file starts with.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest supported major version (JDK 1.1).
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Newest supported major version (Java 25).
pub const MAX_MAJOR_VERSION: u16 = 69;

/// Check a class header version against the supported window.
///
/// # Errors
/// Returns [`crate::Error::UnsupportedVersion`] for versions newer than
/// [`MAX_MAJOR_VERSION`] and [`crate::Error::Malformed`] for versions older than
/// [`MIN_MAJOR_VERSION`], which no compiler ever produced.
pub fn check_version(major: u16, minor: u16) -> Result<()> {
    if major > MAX_MAJOR_VERSION {
        return Err(Error::UnsupportedVersion { major, minor });
    }
    if major < MIN_MAJOR_VERSION {
        return Err(malformed_error!("Invalid class file version {}.{}", major, minor));
    }
    Ok(())
}

/// A field of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Access and property flags
    pub access_flags: FieldAccessFlags,
    /// Index of the `Utf8` field name
    pub name_index: u16,
    /// Index of the `Utf8` field descriptor
    pub descriptor_index: u16,
    /// Field attributes
    pub attributes: Vec<AttributeInfo>,
}

/// A method of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Access and property flags
    pub access_flags: MethodAccessFlags,
    /// Index of the `Utf8` method name
    pub name_index: u16,
    /// Index of the `Utf8` method descriptor
    pub descriptor_index: u16,
    /// Method attributes
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    /// Position of the `Code` attribute in [`MethodInfo::attributes`].
    #[must_use]
    pub fn code_position(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.is_named(pool, names::CODE))
    }

    /// Parse the method body, `None` for abstract and native methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the `Code` attribute is damaged.
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.code_position(pool) {
            Some(position) => Ok(Some(CodeAttribute::parse(&self.attributes[position].info)?)),
            None => Ok(None),
        }
    }

    /// `name + descriptor`, for diagnostics.
    #[must_use]
    pub fn display_name(&self, pool: &ConstantPool) -> String {
        let name = pool
            .utf8_string(self.name_index)
            .unwrap_or_else(|_| "<invalid>".to_string());
        let descriptor = pool
            .utf8_string(self.descriptor_index)
            .unwrap_or_default();
        format!("{name}{descriptor}")
    }
}

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: ClassAccessFlags,
    /// Index of the `Class` entry for this class
    pub this_class: u16,
    /// Index of the `Class` entry for the superclass, 0 for `java.lang.Object` and modules
    pub super_class: u16,
    /// Indices of the `Class` entries of direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Class attributes
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// Read `(major, minor)` from the header without parsing the rest.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong magic number and
    /// [`crate::Error::OutOfBounds`] for input shorter than the header.
    pub fn peek_version(data: &[u8]) -> Result<(u16, u16)> {
        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid magic 0x{:08X}", magic));
        }
        let minor = parser.read_be::<u16>()?;
        let major = parser.read_be::<u16>()?;
        Ok((major, minor))
    }

    /// Parse a complete class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::UnsupportedVersion`]
    /// for class files newer than [`MAX_MAJOR_VERSION`], and [`crate::Error::Malformed`] or
    /// [`crate::Error::OutOfBounds`] for anything structurally wrong.
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let (major_version, minor_version) = Self::peek_version(data)?;
        check_version(major_version, minor_version)?;

        let mut parser = Parser::new(data);
        parser.seek(8)?;

        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = ClassAccessFlags::from_bits_retain(parser.read_be()?);
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;
        let interfaces = parser.read_u16_table()?;

        let field_count = parser.read_be::<u16>()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            fields.push(FieldInfo {
                access_flags: FieldAccessFlags::from_bits_retain(parser.read_be()?),
                name_index: parser.read_be()?,
                descriptor_index: parser.read_be()?,
                attributes: AttributeInfo::parse_list(&mut parser)?,
            });
        }

        let method_count = parser.read_be::<u16>()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            methods.push(MethodInfo {
                access_flags: MethodAccessFlags::from_bits_retain(parser.read_be()?),
                name_index: parser.read_be()?,
                descriptor_index: parser.read_be()?,
                attributes: AttributeInfo::parse_list(&mut parser)?,
            });
        }

        let attributes = AttributeInfo::parse_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after the class file",
                parser.remaining()
            ));
        }

        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.this_class_name()?;

        Ok(class)
    }

    /// Serialize the class file.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4096);
        push_be(&mut out, MAGIC);
        push_be(&mut out, self.minor_version);
        push_be(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        push_be(&mut out, self.access_flags.bits());
        push_be(&mut out, self.this_class);
        push_be(&mut out, self.super_class);
        push_be(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            push_be(&mut out, *interface);
        }

        push_be(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            push_be(&mut out, field.access_flags.bits());
            push_be(&mut out, field.name_index);
            push_be(&mut out, field.descriptor_index);
            AttributeInfo::write_list(&field.attributes, &mut out);
        }

        push_be(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            push_be(&mut out, method.access_flags.bits());
            push_be(&mut out, method.name_index);
            push_be(&mut out, method.descriptor_index);
            AttributeInfo::write_list(&method.attributes, &mut out);
        }

        AttributeInfo::write_list(&self.attributes, &mut out);
        out
    }

    /// Internal name of this class, e.g. `com/example/Greeting`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `this_class` is not a valid `Class` entry.
    pub fn this_class_name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Binary name of this class, e.g. `com.example.Greeting`.
    ///
    /// # Errors
    /// See [`ClassFile::this_class_name`].
    pub fn binary_name(&self) -> Result<String> {
        Ok(self.this_class_name()?.replace('/', "."))
    }

    /// Returns `true` if a class-level attribute named `name` is present.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.is_named(&self.constant_pool, name))
    }

    /// Returns `true` if the class is marked synthetic by flag or attribute.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::SYNTHETIC)
            || self.has_attribute(names::SYNTHETIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ClassBuilder;

    #[test]
    fn parse_write_is_identity() {
        let bytes = ClassBuilder::greeting().build();
        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.to_bytes(), bytes);
        assert_eq!(class.this_class_name().unwrap(), "com/example/Greeting");
        assert_eq!(class.binary_name().unwrap(), "com.example.Greeting");
        assert!(!class.is_synthetic());
    }

    #[test]
    fn version_window() {
        assert!(check_version(45, 3).is_ok());
        assert!(check_version(69, 0).is_ok());
        assert!(matches!(
            check_version(70, 0),
            Err(Error::UnsupportedVersion { major: 70, minor: 0 })
        ));
        assert!(matches!(check_version(44, 0), Err(Error::Malformed { .. })));
    }

    #[test]
    fn peek_version_checks_magic() {
        assert_eq!(
            ClassFile::peek_version(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 3, 0, 52]).unwrap(),
            (52, 3)
        );
        assert!(matches!(
            ClassFile::peek_version(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            ClassFile::peek_version(&[0xCA, 0xFE]),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn newer_version_is_unsupported() {
        let mut bytes = ClassBuilder::greeting().build();
        bytes[6] = 0;
        bytes[7] = 70;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(Error::UnsupportedVersion { major: 70, .. })
        ));
    }

    #[test]
    fn truncated_and_trailing_input() {
        let bytes = ClassBuilder::greeting().build();
        for cut in [9, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                ClassFile::parse(&bytes[..cut]).is_err(),
                "prefix of {cut} bytes parsed"
            );
        }

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            ClassFile::parse(&extended),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(ClassFile::parse(&[]), Err(Error::Empty)));
    }

    #[test]
    fn method_code_lookup() {
        let class = ClassFile::parse(&ClassBuilder::greeting().build()).unwrap();
        let hello = class
            .methods
            .iter()
            .find(|m| m.display_name(&class.constant_pool).starts_with("hello"))
            .unwrap();
        let code = hello.code(&class.constant_pool).unwrap().unwrap();
        assert_eq!(code.code[0], crate::bytecode::opcodes::LDC);
    }
}
