//! The constant pool.
//!
//! [`ConstantPool`] keeps every entry exactly as parsed, including duplicates, and only ever
//! appends. Existing indices stay valid for the lifetime of the pool, which is what lets the
//! rest of the class (code, attributes, other entries) be written back byte-for-byte.
//!
//! `CONSTANT_Long` and `CONSTANT_Double` occupy two slots; the second slot, like slot 0, is
//! represented by [`ConstantPoolEntry::Unusable`].

use std::collections::HashMap;

use strum::{Display, FromRepr};

use crate::{
    classfile::mutf8::JavaString,
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Largest `constant_pool_count` a class file can declare.
pub const MAX_POOL_COUNT: usize = 0xFFFF;

/// Largest payload of a `CONSTANT_Utf8` entry, in bytes.
pub const MAX_UTF8_LEN: usize = 0xFFFF;

/// Tag byte of a constant pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ConstantTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    Fieldref = 9,
    Methodref = 10,
    InterfaceMethodref = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
    Module = 19,
    Package = 20,
}

/// One entry of the constant pool.
///
/// Floating point values are kept as raw bits so that every entry is `Eq + Hash` and NaN
/// payloads survive unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConstantPoolEntry {
    /// Slot 0, and the slot following a `Long` or `Double`
    Unusable,
    /// Raw modified UTF-8 bytes
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl ConstantPoolEntry {
    /// The tag of this entry, `None` for [`ConstantPoolEntry::Unusable`].
    #[must_use]
    pub fn tag(&self) -> Option<ConstantTag> {
        let tag = match self {
            ConstantPoolEntry::Unusable => return None,
            ConstantPoolEntry::Utf8(_) => ConstantTag::Utf8,
            ConstantPoolEntry::Integer(_) => ConstantTag::Integer,
            ConstantPoolEntry::Float(_) => ConstantTag::Float,
            ConstantPoolEntry::Long(_) => ConstantTag::Long,
            ConstantPoolEntry::Double(_) => ConstantTag::Double,
            ConstantPoolEntry::Class { .. } => ConstantTag::Class,
            ConstantPoolEntry::String { .. } => ConstantTag::String,
            ConstantPoolEntry::Fieldref { .. } => ConstantTag::Fieldref,
            ConstantPoolEntry::Methodref { .. } => ConstantTag::Methodref,
            ConstantPoolEntry::InterfaceMethodref { .. } => ConstantTag::InterfaceMethodref,
            ConstantPoolEntry::NameAndType { .. } => ConstantTag::NameAndType,
            ConstantPoolEntry::MethodHandle { .. } => ConstantTag::MethodHandle,
            ConstantPoolEntry::MethodType { .. } => ConstantTag::MethodType,
            ConstantPoolEntry::Dynamic { .. } => ConstantTag::Dynamic,
            ConstantPoolEntry::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
            ConstantPoolEntry::Module { .. } => ConstantTag::Module,
            ConstantPoolEntry::Package { .. } => ConstantTag::Package,
        };
        Some(tag)
    }

    /// Returns `true` for entries that take up two slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(
            self,
            ConstantPoolEntry::Long(_) | ConstantPoolEntry::Double(_)
        )
    }

    /// Pool indices this entry refers to.
    ///
    /// The bootstrap method index of `Dynamic`/`InvokeDynamic` points into the
    /// `BootstrapMethods` attribute, not the pool, and is not reported.
    #[must_use]
    pub fn references(&self) -> [Option<u16>; 2] {
        match *self {
            ConstantPoolEntry::Class { name_index }
            | ConstantPoolEntry::Module { name_index }
            | ConstantPoolEntry::Package { name_index } => [Some(name_index), None],
            ConstantPoolEntry::String { string_index } => [Some(string_index), None],
            ConstantPoolEntry::MethodType { descriptor_index } => [Some(descriptor_index), None],
            ConstantPoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => [Some(class_index), Some(name_and_type_index)],
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => [Some(name_index), Some(descriptor_index)],
            ConstantPoolEntry::MethodHandle {
                reference_index, ..
            } => [Some(reference_index), None],
            ConstantPoolEntry::Dynamic {
                name_and_type_index,
                ..
            }
            | ConstantPoolEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => [Some(name_and_type_index), None],
            _ => [None, None],
        }
    }

    fn parse(parser: &mut Parser) -> Result<ConstantPoolEntry> {
        let raw_tag = parser.read_be::<u8>()?;
        let Some(tag) = ConstantTag::from_repr(raw_tag) else {
            return Err(malformed_error!(
                "Invalid constant pool tag {} at offset {}",
                raw_tag,
                parser.pos() - 1
            ));
        };

        let entry = match tag {
            ConstantTag::Utf8 => ConstantPoolEntry::Utf8(parser.read_u16_prefixed_bytes()?.to_vec()),
            ConstantTag::Integer => ConstantPoolEntry::Integer(parser.read_be::<i32>()?),
            ConstantTag::Float => ConstantPoolEntry::Float(parser.read_be::<u32>()?),
            ConstantTag::Long => ConstantPoolEntry::Long(parser.read_be::<i64>()?),
            ConstantTag::Double => ConstantPoolEntry::Double(parser.read_be::<u64>()?),
            ConstantTag::Class => ConstantPoolEntry::Class {
                name_index: parser.read_be()?,
            },
            ConstantTag::String => ConstantPoolEntry::String {
                string_index: parser.read_be()?,
            },
            ConstantTag::Fieldref => ConstantPoolEntry::Fieldref {
                class_index: parser.read_be()?,
                name_and_type_index: parser.read_be()?,
            },
            ConstantTag::Methodref => ConstantPoolEntry::Methodref {
                class_index: parser.read_be()?,
                name_and_type_index: parser.read_be()?,
            },
            ConstantTag::InterfaceMethodref => ConstantPoolEntry::InterfaceMethodref {
                class_index: parser.read_be()?,
                name_and_type_index: parser.read_be()?,
            },
            ConstantTag::NameAndType => ConstantPoolEntry::NameAndType {
                name_index: parser.read_be()?,
                descriptor_index: parser.read_be()?,
            },
            ConstantTag::MethodHandle => ConstantPoolEntry::MethodHandle {
                reference_kind: parser.read_be()?,
                reference_index: parser.read_be()?,
            },
            ConstantTag::MethodType => ConstantPoolEntry::MethodType {
                descriptor_index: parser.read_be()?,
            },
            ConstantTag::Dynamic => ConstantPoolEntry::Dynamic {
                bootstrap_method_attr_index: parser.read_be()?,
                name_and_type_index: parser.read_be()?,
            },
            ConstantTag::InvokeDynamic => ConstantPoolEntry::InvokeDynamic {
                bootstrap_method_attr_index: parser.read_be()?,
                name_and_type_index: parser.read_be()?,
            },
            ConstantTag::Module => ConstantPoolEntry::Module {
                name_index: parser.read_be()?,
            },
            ConstantTag::Package => ConstantPoolEntry::Package {
                name_index: parser.read_be()?,
            },
        };

        Ok(entry)
    }

    fn write(&self, out: &mut Vec<u8>) {
        let Some(tag) = self.tag() else {
            return;
        };
        out.push(tag as u8);

        match self {
            ConstantPoolEntry::Unusable => {}
            ConstantPoolEntry::Utf8(bytes) => {
                push_be(out, bytes.len() as u16);
                out.extend_from_slice(bytes);
            }
            ConstantPoolEntry::Integer(value) => push_be(out, *value),
            ConstantPoolEntry::Float(bits) => push_be(out, *bits),
            ConstantPoolEntry::Long(value) => push_be(out, *value),
            ConstantPoolEntry::Double(bits) => push_be(out, *bits),
            ConstantPoolEntry::Class { name_index }
            | ConstantPoolEntry::Module { name_index }
            | ConstantPoolEntry::Package { name_index } => push_be(out, *name_index),
            ConstantPoolEntry::String { string_index } => push_be(out, *string_index),
            ConstantPoolEntry::MethodType { descriptor_index } => push_be(out, *descriptor_index),
            ConstantPoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                push_be(out, *class_index);
                push_be(out, *name_and_type_index);
            }
            ConstantPoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => {
                push_be(out, *name_index);
                push_be(out, *descriptor_index);
            }
            ConstantPoolEntry::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                out.push(*reference_kind);
                push_be(out, *reference_index);
            }
            ConstantPoolEntry::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                push_be(out, *bootstrap_method_attr_index);
                push_be(out, *name_and_type_index);
            }
        }
    }
}

/// A member reference resolved to its three names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Internal name of the owning class
    pub class: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

/// Append-only constant pool with index-preserving round trips.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<ConstantPoolEntry>,
    lookup: Option<HashMap<ConstantPoolEntry, u16>>,
}

impl ConstantPool {
    /// Create a pool holding only the reserved slot 0.
    #[must_use]
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![ConstantPoolEntry::Unusable],
            lookup: None,
        }
    }

    /// Parse `constant_pool_count` followed by the entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a zero count, an unknown tag, or an 8-byte
    /// constant in the last slot, and [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(parser: &mut Parser) -> Result<ConstantPool> {
        let count = usize::from(parser.read_be::<u16>()?);
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut entries = Vec::with_capacity(count);
        entries.push(ConstantPoolEntry::Unusable);

        while entries.len() < count {
            let entry = ConstantPoolEntry::parse(parser)?;
            let wide = entry.is_wide();
            entries.push(entry);

            if wide {
                if entries.len() >= count {
                    return Err(malformed_error!(
                        "8-byte constant at index {} overruns the pool",
                        entries.len() - 1
                    ));
                }
                entries.push(ConstantPoolEntry::Unusable);
            }
        }

        Ok(ConstantPool {
            entries,
            lookup: None,
        })
    }

    /// Serialize `constant_pool_count` followed by the entries.
    pub fn write(&self, out: &mut Vec<u8>) {
        push_be(out, self.entries.len() as u16);
        for entry in &self.entries {
            entry.write(out);
        }
    }

    /// The `constant_pool_count` value: number of slots including slot 0.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over `(index, entry)` for every usable slot.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ConstantPoolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !matches!(entry, ConstantPoolEntry::Unusable))
            .map(|(index, entry)| (index as u16, entry))
    }

    /// Fetch an entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for index 0, the upper half of an 8-byte constant,
    /// or an index beyond the pool.
    pub fn get(&self, index: u16) -> Result<&ConstantPoolEntry> {
        match self.entries.get(usize::from(index)) {
            Some(ConstantPoolEntry::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool count {})",
                index,
                self.entries.len()
            )),
            Some(entry) => Ok(entry),
        }
    }

    /// Raw bytes of the `CONSTANT_Utf8` at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing or not a `Utf8`.
    pub fn utf8(&self, index: u16) -> Result<&[u8]> {
        match self.get(index)? {
            ConstantPoolEntry::Utf8(bytes) => Ok(bytes),
            other => Err(malformed_error!(
                "Constant {} is {:?}, expected Utf8",
                index,
                other.tag()
            )),
        }
    }

    /// The `CONSTANT_Utf8` at `index`, decoded.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing, not a `Utf8`, or not valid
    /// modified UTF-8.
    pub fn java_string(&self, index: u16) -> Result<JavaString> {
        JavaString::from_mutf8(self.utf8(index)?)
    }

    /// The `CONSTANT_Utf8` at `index` as a Rust string.
    ///
    /// # Errors
    /// See [`ConstantPool::java_string`].
    pub fn utf8_string(&self, index: u16) -> Result<String> {
        Ok(self.java_string(index)?.to_string_lossy())
    }

    /// Value of the `CONSTANT_String` at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `String` or its text is not
    /// valid modified UTF-8.
    pub fn string(&self, index: u16) -> Result<JavaString> {
        match self.get(index)? {
            ConstantPoolEntry::String { string_index } => self.java_string(*string_index),
            other => Err(malformed_error!(
                "Constant {} is {:?}, expected String",
                index,
                other.tag()
            )),
        }
    }

    /// Internal name of the `CONSTANT_Class` at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `Class` or its name is invalid.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            ConstantPoolEntry::Class { name_index } => self.utf8_string(*name_index),
            other => Err(malformed_error!(
                "Constant {} is {:?}, expected Class",
                index,
                other.tag()
            )),
        }
    }

    /// Resolve a `Fieldref`, `Methodref` or `InterfaceMethodref` to its names.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry or any entry it refers to has the wrong
    /// type.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            ConstantPoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            other => {
                return Err(malformed_error!(
                    "Constant {} is {:?}, expected a member reference",
                    index,
                    other.tag()
                ))
            }
        };

        let ConstantPoolEntry::NameAndType {
            name_index,
            descriptor_index,
        } = self.get(name_and_type_index)?
        else {
            return Err(malformed_error!(
                "Constant {} is not a NameAndType",
                name_and_type_index
            ));
        };

        Ok(MemberRef {
            class: self.class_name(class_index)?,
            name: self.utf8_string(*name_index)?,
            descriptor: self.utf8_string(*descriptor_index)?,
        })
    }

    /// Index of an existing entry equal to `entry`, if any.
    ///
    /// When the pool holds duplicates, the lowest index is returned.
    pub fn find(&mut self, entry: &ConstantPoolEntry) -> Option<u16> {
        self.index().get(entry).copied()
    }

    fn index(&mut self) -> &HashMap<ConstantPoolEntry, u16> {
        let entries = &self.entries;
        self.lookup.get_or_insert_with(|| {
            let mut lookup = HashMap::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate().rev() {
                if !matches!(entry, ConstantPoolEntry::Unusable) {
                    lookup.insert(entry.clone(), index as u16);
                }
            }
            lookup
        })
    }

    /// Return the index of an entry equal to `entry`, appending it if the pool has none.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the pool has no room left.
    pub fn intern(&mut self, entry: ConstantPoolEntry) -> Result<u16> {
        if matches!(entry, ConstantPoolEntry::Unusable) {
            return Err(Error::Error("Cannot intern an unusable slot".to_string()));
        }
        if let Some(index) = self.find(&entry) {
            return Ok(index);
        }

        self.push(entry)
    }

    /// Append an entry without looking for an existing equal one.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the pool has no room left.
    pub fn push(&mut self, entry: ConstantPoolEntry) -> Result<u16> {
        if matches!(entry, ConstantPoolEntry::Unusable) {
            return Err(Error::Error("Cannot push an unusable slot".to_string()));
        }

        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > MAX_POOL_COUNT {
            return Err(Error::CodeOverflow(format!(
                "constant pool is full ({} slots)",
                self.entries.len()
            )));
        }

        let index = self.entries.len() as u16;
        if let Some(lookup) = self.lookup.as_mut() {
            lookup.entry(entry.clone()).or_insert(index);
        }
        self.entries.push(entry);
        if slots == 2 {
            self.entries.push(ConstantPoolEntry::Unusable);
        }

        Ok(index)
    }

    /// Intern a `CONSTANT_Utf8`.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the encoding exceeds 65535 bytes or the pool
    /// is full.
    pub fn intern_utf8(&mut self, value: &JavaString) -> Result<u16> {
        let bytes = value.to_mutf8();
        if bytes.len() > MAX_UTF8_LEN {
            return Err(Error::CodeOverflow(format!(
                "string constant of {} bytes exceeds the Utf8 limit",
                bytes.len()
            )));
        }
        self.intern(ConstantPoolEntry::Utf8(bytes))
    }

    /// Intern a `CONSTANT_String` together with its `Utf8`.
    ///
    /// # Errors
    /// See [`ConstantPool::intern_utf8`].
    pub fn intern_string(&mut self, value: &JavaString) -> Result<u16> {
        let string_index = self.intern_utf8(value)?;
        self.intern(ConstantPoolEntry::String { string_index })
    }

    /// Intern a `CONSTANT_Long`.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the pool is full.
    pub fn intern_long(&mut self, value: i64) -> Result<u16> {
        self.intern(ConstantPoolEntry::Long(value))
    }

    /// Intern a `CONSTANT_Class` for an internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the pool is full.
    pub fn intern_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.intern_utf8(&JavaString::from(internal_name))?;
        self.intern(ConstantPoolEntry::Class { name_index })
    }

    /// Intern a `CONSTANT_Methodref` with its class and name-and-type.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if the pool is full.
    pub fn intern_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.intern_class(class)?;
        let name_index = self.intern_utf8(&JavaString::from(name))?;
        let descriptor_index = self.intern_utf8(&JavaString::from(descriptor))?;
        let name_and_type_index = self.intern(ConstantPoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })?;
        self.intern(ConstantPoolEntry::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    /// Overwrite the payload of an existing `CONSTANT_Utf8`.
    ///
    /// Indices are unaffected; only the bytes change.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `Utf8`.
    pub fn replace_utf8(&mut self, index: u16, bytes: Vec<u8>) -> Result<()> {
        match self.entries.get_mut(usize::from(index)) {
            Some(ConstantPoolEntry::Utf8(current)) => {
                *current = bytes;
                self.lookup = None;
                Ok(())
            }
            _ => Err(malformed_error!("Constant {} is not a Utf8", index)),
        }
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}
