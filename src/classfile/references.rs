//! Constant pool reference scanning.
//!
//! [`ReferenceScan`] records, for every pool index, whether anything outside the pool refers to
//! it (class header, members, attributes, bytecode) and which pool entries refer to it. The
//! rewriter uses this to decide whether the `Utf8` behind a rewritten literal can be blanked
//! without breaking some other use of the same text.
//!
//! The scan knows every attribute of the current class file format. An attribute it does not
//! recognise, or a recognised one it cannot parse, makes the scan *incomplete*: its references
//! are unknown, so no entry can be proven unused.

use std::collections::{HashMap, HashSet};

use crate::{
    bytecode::{decoder, stackmap},
    classfile::{
        annotations::{
            annotation_references, element_value_references, parameter_annotation_references,
            TypeAnnotation,
        },
        attributes::{names, AttributeInfo, CodeAttribute},
        constants::ConstantPool,
        ClassFile,
    },
    file::parser::Parser,
    Result,
};

/// Where each constant pool entry is referenced from.
#[derive(Debug, Default)]
pub struct ReferenceScan {
    outside: HashSet<u16>,
    pool_referrers: HashMap<u16, Vec<u16>>,
    unknown: Vec<String>,
}

impl ReferenceScan {
    /// Scan a class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] only if an attribute name itself cannot be resolved;
    /// damaged attribute payloads make the scan incomplete instead.
    pub fn scan(class: &ClassFile) -> Result<ReferenceScan> {
        let pool = &class.constant_pool;
        let mut scan = ReferenceScan::default();

        for (index, entry) in pool.iter() {
            for target in entry.references().into_iter().flatten() {
                scan.pool_referrers.entry(target).or_default().push(index);
            }
        }

        scan.mark(class.this_class);
        scan.mark(class.super_class);
        for interface in &class.interfaces {
            scan.mark(*interface);
        }

        for field in &class.fields {
            scan.mark(field.name_index);
            scan.mark(field.descriptor_index);
            scan.attributes(pool, &field.attributes)?;
        }
        for method in &class.methods {
            scan.mark(method.name_index);
            scan.mark(method.descriptor_index);
            scan.attributes(pool, &method.attributes)?;
        }
        scan.attributes(pool, &class.attributes)?;

        Ok(scan)
    }

    /// Returns `true` if every attribute was understood.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }

    /// Names of the attributes that made the scan incomplete.
    #[must_use]
    pub fn unknown_attributes(&self) -> &[String] {
        &self.unknown
    }

    /// Returns `true` if `index` is referenced from outside the constant pool.
    #[must_use]
    pub fn is_referenced_outside(&self, index: u16) -> bool {
        self.outside.contains(&index)
    }

    /// Pool entries that refer to `index`.
    #[must_use]
    pub fn pool_referrers(&self, index: u16) -> &[u16] {
        self.pool_referrers
            .get(&index)
            .map_or(&[], Vec::as_slice)
    }

    fn mark(&mut self, index: u16) {
        if index != 0 {
            self.outside.insert(index);
        }
    }

    fn mark_all(&mut self, indices: impl IntoIterator<Item = u16>) {
        for index in indices {
            self.mark(index);
        }
    }

    fn attributes(&mut self, pool: &ConstantPool, attributes: &[AttributeInfo]) -> Result<()> {
        for attribute in attributes {
            self.mark(attribute.name_index);
            let name = attribute.name(pool)?;
            match self.attribute(pool, &name, &attribute.info) {
                Ok(true) => {}
                Ok(false) => self.unknown.push(name),
                Err(_) => self.unknown.push(format!("{name} (damaged)")),
            }
        }
        Ok(())
    }

    /// Returns `Ok(false)` for attributes it does not know.
    fn attribute(&mut self, pool: &ConstantPool, name: &str, info: &[u8]) -> Result<bool> {
        match name {
            names::CONSTANT_VALUE
            | names::SIGNATURE
            | names::SOURCE_FILE
            | names::MODULE_MAIN_CLASS
            | names::NEST_HOST => {
                let mut parser = Parser::new(info);
                self.mark(parser.read_be()?);
            }
            names::EXCEPTIONS
            | names::MODULE_PACKAGES
            | names::NEST_MEMBERS
            | names::PERMITTED_SUBCLASSES => {
                self.mark_all(Parser::new(info).read_u16_table()?);
            }
            names::SYNTHETIC
            | names::DEPRECATED
            | names::SOURCE_DEBUG_EXTENSION
            | names::LINE_NUMBER_TABLE
            | names::REWRITTEN_MARKER => {}
            names::CODE => self.code(pool, info)?,
            names::STACK_MAP_TABLE => {
                for frame in stackmap::parse(info)? {
                    for value in frame.types() {
                        if let stackmap::VerificationType::Object(index) = value {
                            self.mark(*index);
                        }
                    }
                }
            }
            names::LOCAL_VARIABLE_TABLE | names::LOCAL_VARIABLE_TYPE_TABLE => {
                let mut parser = Parser::new(info);
                let count = parser.read_be::<u16>()?;
                for _ in 0..count {
                    parser.advance_by(4)?;
                    self.mark(parser.read_be()?);
                    self.mark(parser.read_be()?);
                    parser.advance_by(2)?;
                }
            }
            names::INNER_CLASSES => {
                let mut parser = Parser::new(info);
                let count = parser.read_be::<u16>()?;
                for _ in 0..count {
                    self.mark(parser.read_be()?);
                    self.mark(parser.read_be()?);
                    self.mark(parser.read_be()?);
                    parser.advance_by(2)?;
                }
            }
            names::ENCLOSING_METHOD => {
                let mut parser = Parser::new(info);
                self.mark(parser.read_be()?);
                self.mark(parser.read_be()?);
            }
            names::RUNTIME_VISIBLE_ANNOTATIONS | names::RUNTIME_INVISIBLE_ANNOTATIONS => {
                self.mark_all(annotation_references(info)?);
            }
            names::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS
            | names::RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS => {
                self.mark_all(parameter_annotation_references(info)?);
            }
            names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS | names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => {
                for annotation in TypeAnnotation::parse_all(info)? {
                    self.mark_all(annotation.references()?);
                }
            }
            names::ANNOTATION_DEFAULT => self.mark_all(element_value_references(info)?),
            names::BOOTSTRAP_METHODS => {
                let mut parser = Parser::new(info);
                let count = parser.read_be::<u16>()?;
                for _ in 0..count {
                    self.mark(parser.read_be()?);
                    self.mark_all(parser.read_u16_table()?);
                }
            }
            names::METHOD_PARAMETERS => {
                let mut parser = Parser::new(info);
                let count = parser.read_be::<u8>()?;
                for _ in 0..count {
                    self.mark(parser.read_be()?);
                    parser.advance_by(2)?;
                }
            }
            names::MODULE => self.module(info)?,
            names::RECORD => {
                let mut parser = Parser::new(info);
                let count = parser.read_be::<u16>()?;
                for _ in 0..count {
                    self.mark(parser.read_be()?);
                    self.mark(parser.read_be()?);
                    let attributes = AttributeInfo::parse_list(&mut parser)?;
                    self.attributes(pool, &attributes)?;
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn code(&mut self, pool: &ConstantPool, info: &[u8]) -> Result<()> {
        let code = CodeAttribute::parse(info)?;
        for instruction in decoder::decode(&code.code)? {
            if let Some(index) = instruction.constant_index() {
                self.mark(index);
            }
        }
        for entry in &code.exception_table {
            self.mark(entry.catch_type);
        }
        self.attributes(pool, &code.attributes)
    }

    fn module(&mut self, info: &[u8]) -> Result<()> {
        let mut parser = Parser::new(info);
        self.mark(parser.read_be()?);
        parser.advance_by(2)?;
        self.mark(parser.read_be()?);

        // requires
        let count = parser.read_be::<u16>()?;
        for _ in 0..count {
            self.mark(parser.read_be()?);
            parser.advance_by(2)?;
            self.mark(parser.read_be()?);
        }

        // exports, then opens
        for _ in 0..2 {
            let count = parser.read_be::<u16>()?;
            for _ in 0..count {
                self.mark(parser.read_be()?);
                parser.advance_by(2)?;
                self.mark_all(parser.read_u16_table()?);
            }
        }

        // uses
        self.mark_all(parser.read_u16_table()?);

        // provides
        let count = parser.read_be::<u16>()?;
        for _ in 0..count {
            self.mark(parser.read_be()?);
            self.mark_all(parser.read_u16_table()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::ClassBuilder;

    #[test]
    fn literal_text_shared_with_a_field_name() {
        // The literal "name" shares its Utf8 with the field called `name`
        let bytes = ClassBuilder::new("com/example/Shared")
            .field("name", "Ljava/lang/String;")
            .method_returning_literal("label", "name")
            .build();
        let class = ClassFile::parse(&bytes).unwrap();
        let scan = ReferenceScan::scan(&class).unwrap();
        assert!(scan.is_complete());

        let pool = &class.constant_pool;
        let (utf8, _) = pool
            .iter()
            .find(|(_, entry)| {
                matches!(entry, crate::classfile::constants::ConstantPoolEntry::Utf8(b) if b == b"name")
            })
            .unwrap();
        assert!(scan.is_referenced_outside(utf8));
        assert_eq!(scan.pool_referrers(utf8).len(), 1);
    }

    #[test]
    fn unknown_attribute_makes_scan_incomplete() {
        let bytes = ClassBuilder::greeting()
            .class_attribute("VendorData", vec![0x00, 0x01])
            .build();
        let class = ClassFile::parse(&bytes).unwrap();
        let scan = ReferenceScan::scan(&class).unwrap();
        assert!(!scan.is_complete());
        assert_eq!(scan.unknown_attributes(), ["VendorData".to_string()]);
    }

    #[test]
    fn damaged_known_attribute_makes_scan_incomplete() {
        let bytes = ClassBuilder::greeting()
            .class_attribute(names::RUNTIME_VISIBLE_ANNOTATIONS, vec![0x00, 0x05])
            .build();
        let class = ClassFile::parse(&bytes).unwrap();
        let scan = ReferenceScan::scan(&class).unwrap();
        assert!(!scan.is_complete());
    }

    #[test]
    fn code_references_are_seen() {
        let class = ClassFile::parse(&ClassBuilder::greeting().build()).unwrap();
        let scan = ReferenceScan::scan(&class).unwrap();
        assert!(scan.is_complete());

        let pool = &class.constant_pool;
        let (string, _) = pool
            .iter()
            .find(|(_, entry)| {
                matches!(entry, crate::classfile::constants::ConstantPoolEntry::String { .. })
            })
            .unwrap();
        assert!(scan.is_referenced_outside(string));
    }
}
