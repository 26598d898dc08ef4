//! Annotation payload walkers.
//!
//! Annotations are never modified, but two things need to see inside them: the reference
//! scanner, which must know every constant an annotation points at, and the code relocator,
//! which must move the bytecode offsets stored in the targets of type annotations on code.

use crate::{
    file::{io::push_be, parser::Parser},
    Result,
};

fn walk_element_value(parser: &mut Parser, refs: &mut Vec<u16>) -> Result<()> {
    let tag = parser.read_be::<u8>()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => {
            refs.push(parser.read_be()?);
        }
        b'e' => {
            refs.push(parser.read_be()?);
            refs.push(parser.read_be()?);
        }
        b'@' => walk_annotation(parser, refs)?,
        b'[' => {
            let count = parser.read_be::<u16>()?;
            for _ in 0..count {
                walk_element_value(parser, refs)?;
            }
        }
        _ => {
            return Err(malformed_error!(
                "Invalid element_value tag 0x{:02X} at {}",
                tag,
                parser.pos() - 1
            ))
        }
    }
    Ok(())
}

fn walk_annotation(parser: &mut Parser, refs: &mut Vec<u16>) -> Result<()> {
    refs.push(parser.read_be()?);
    let pairs = parser.read_be::<u16>()?;
    for _ in 0..pairs {
        refs.push(parser.read_be()?);
        walk_element_value(parser, refs)?;
    }
    Ok(())
}

fn finish(parser: &Parser, what: &str) -> Result<()> {
    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes in {}",
            parser.remaining(),
            what
        ));
    }
    Ok(())
}

/// Pool indices referenced by a `Runtime(In)VisibleAnnotations` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged payloads.
pub fn annotation_references(info: &[u8]) -> Result<Vec<u16>> {
    let mut parser = Parser::new(info);
    let mut refs = Vec::new();
    let count = parser.read_be::<u16>()?;
    for _ in 0..count {
        walk_annotation(&mut parser, &mut refs)?;
    }
    finish(&parser, "annotations")?;
    Ok(refs)
}

/// Pool indices referenced by a `Runtime(In)VisibleParameterAnnotations` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged payloads.
pub fn parameter_annotation_references(info: &[u8]) -> Result<Vec<u16>> {
    let mut parser = Parser::new(info);
    let mut refs = Vec::new();
    let parameters = parser.read_be::<u8>()?;
    for _ in 0..parameters {
        let count = parser.read_be::<u16>()?;
        for _ in 0..count {
            walk_annotation(&mut parser, &mut refs)?;
        }
    }
    finish(&parser, "parameter annotations")?;
    Ok(refs)
}

/// Pool indices referenced by an `AnnotationDefault` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged payloads.
pub fn element_value_references(info: &[u8]) -> Result<Vec<u16>> {
    let mut parser = Parser::new(info);
    let mut refs = Vec::new();
    walk_element_value(&mut parser, &mut refs)?;
    finish(&parser, "annotation default")?;
    Ok(refs)
}

/// One row of a `localvar_target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVarTarget {
    /// First instruction of the live range
    pub start_pc: u16,
    /// Length of the live range in bytes
    pub length: u16,
    /// Local variable slot
    pub index: u16,
}

/// The `target_info` union of a type annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TargetInfo {
    TypeParameter(u8),
    Supertype(u16),
    TypeParameterBound { parameter: u8, bound: u8 },
    Empty,
    FormalParameter(u8),
    Throws(u16),
    LocalVar(Vec<LocalVarTarget>),
    Catch(u16),
    Offset(u16),
    TypeArgument { offset: u16, argument: u8 },
}

/// A type annotation with its target decoded and the rest kept raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    /// The `target_type` byte
    pub target_type: u8,
    /// The decoded `target_info`
    pub target: TargetInfo,
    /// The `type_path` structure, including its length byte
    pub type_path: Vec<u8>,
    /// The annotation body: `type_index`, element-value pairs
    pub body: Vec<u8>,
}

impl TypeAnnotation {
    /// Parse a `Runtime(In)VisibleTypeAnnotations` payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown target types or damaged payloads.
    pub fn parse_all(info: &[u8]) -> Result<Vec<TypeAnnotation>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        let mut annotations = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            annotations.push(Self::parse(&mut parser)?);
        }
        finish(&parser, "type annotations")?;
        Ok(annotations)
    }

    fn parse(parser: &mut Parser) -> Result<TypeAnnotation> {
        let target_type = parser.read_be::<u8>()?;
        let target = match target_type {
            0x00 | 0x01 => TargetInfo::TypeParameter(parser.read_be()?),
            0x10 => TargetInfo::Supertype(parser.read_be()?),
            0x11 | 0x12 => TargetInfo::TypeParameterBound {
                parameter: parser.read_be()?,
                bound: parser.read_be()?,
            },
            0x13..=0x15 => TargetInfo::Empty,
            0x16 => TargetInfo::FormalParameter(parser.read_be()?),
            0x17 => TargetInfo::Throws(parser.read_be()?),
            0x40 | 0x41 => {
                let length = parser.read_be::<u16>()?;
                let mut table = Vec::with_capacity(usize::from(length));
                for _ in 0..length {
                    table.push(LocalVarTarget {
                        start_pc: parser.read_be()?,
                        length: parser.read_be()?,
                        index: parser.read_be()?,
                    });
                }
                TargetInfo::LocalVar(table)
            }
            0x42 => TargetInfo::Catch(parser.read_be()?),
            0x43..=0x46 => TargetInfo::Offset(parser.read_be()?),
            0x47..=0x4B => TargetInfo::TypeArgument {
                offset: parser.read_be()?,
                argument: parser.read_be()?,
            },
            _ => {
                return Err(malformed_error!(
                    "Invalid type annotation target type 0x{:02X}",
                    target_type
                ))
            }
        };

        let path_start = parser.pos();
        let path_length = parser.read_be::<u8>()?;
        parser.advance_by(usize::from(path_length) * 2)?;
        let type_path = parser.data()[path_start..parser.pos()].to_vec();

        let body_start = parser.pos();
        walk_annotation(parser, &mut Vec::new())?;
        let body = parser.data()[body_start..parser.pos()].to_vec();

        Ok(TypeAnnotation {
            target_type,
            target,
            type_path,
            body,
        })
    }

    /// Serialize a `Runtime(In)VisibleTypeAnnotations` payload.
    #[must_use]
    pub fn write_all(annotations: &[TypeAnnotation]) -> Vec<u8> {
        let mut out = Vec::new();
        push_be(&mut out, annotations.len() as u16);
        for annotation in annotations {
            annotation.write(&mut out);
        }
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.target_type);
        match &self.target {
            TargetInfo::TypeParameter(index) | TargetInfo::FormalParameter(index) => {
                out.push(*index);
            }
            TargetInfo::Supertype(index) | TargetInfo::Throws(index) | TargetInfo::Catch(index) => {
                push_be(out, *index);
            }
            TargetInfo::TypeParameterBound { parameter, bound } => {
                out.push(*parameter);
                out.push(*bound);
            }
            TargetInfo::Empty => {}
            TargetInfo::LocalVar(table) => {
                push_be(out, table.len() as u16);
                for row in table {
                    push_be(out, row.start_pc);
                    push_be(out, row.length);
                    push_be(out, row.index);
                }
            }
            TargetInfo::Offset(offset) => push_be(out, *offset),
            TargetInfo::TypeArgument { offset, argument } => {
                push_be(out, *offset);
                out.push(*argument);
            }
        }
        out.extend_from_slice(&self.type_path);
        out.extend_from_slice(&self.body);
    }

    /// Pool indices referenced by the annotation body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body is damaged.
    pub fn references(&self) -> Result<Vec<u16>> {
        let mut parser = Parser::new(&self.body);
        let mut refs = Vec::new();
        walk_annotation(&mut parser, &mut refs)?;
        Ok(refs)
    }
}
