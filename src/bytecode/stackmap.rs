//! `StackMapTable` frames.
//!
//! Frames are stored with delta-encoded offsets that depend on the frame before them, so they
//! are decoded to absolute offsets, moved, and re-encoded. Re-encoding picks the compact
//! `same_frame` and `same_locals_1_stack_item_frame` forms whenever the new delta allows and
//! falls back to the extended forms otherwise.

use crate::{
    file::{io::push_be, parser::Parser},
    Result,
};

/// A `verification_type_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class`
    Object(u16),
    /// Offset of the `new` instruction that created the value
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(parser: &mut Parser) -> Result<VerificationType> {
        let tag = parser.read_be::<u8>()?;
        let value = match tag {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(parser.read_be()?),
            8 => VerificationType::Uninitialized(parser.read_be()?),
            _ => {
                return Err(malformed_error!(
                    "Invalid verification type tag {} at {}",
                    tag,
                    parser.pos() - 1
                ))
            }
        };
        Ok(value)
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            VerificationType::Top => out.push(0),
            VerificationType::Integer => out.push(1),
            VerificationType::Float => out.push(2),
            VerificationType::Double => out.push(3),
            VerificationType::Long => out.push(4),
            VerificationType::Null => out.push(5),
            VerificationType::UninitializedThis => out.push(6),
            VerificationType::Object(index) => {
                out.push(7);
                push_be(out, *index);
            }
            VerificationType::Uninitialized(offset) => {
                out.push(8);
                push_be(out, *offset);
            }
        }
    }
}

/// The shape of a frame relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Same locals, empty stack (`same_frame`, `same_frame_extended`)
    Same,
    /// Same locals, one stack item
    SameLocals1StackItem(VerificationType),
    /// Last `n` locals removed, empty stack
    Chop(u8),
    /// Locals appended, empty stack
    Append(Vec<VerificationType>),
    /// Everything spelled out
    Full {
        /// All locals
        locals: Vec<VerificationType>,
        /// All stack items
        stack: Vec<VerificationType>,
    },
}

/// A frame at an absolute code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// The code offset the frame applies to
    pub offset: u32,
    /// The frame content
    pub kind: FrameKind,
}

impl StackMapFrame {
    /// Every verification type mentioned by the frame.
    pub fn types(&self) -> impl Iterator<Item = &VerificationType> {
        let (first, second): (&[VerificationType], &[VerificationType]) = match &self.kind {
            FrameKind::Same | FrameKind::Chop(_) => (&[], &[]),
            FrameKind::SameLocals1StackItem(item) => (std::slice::from_ref(item), &[]),
            FrameKind::Append(locals) => (locals, &[]),
            FrameKind::Full { locals, stack } => (locals, stack),
        };
        first.iter().chain(second.iter())
    }

    fn types_mut(&mut self) -> Vec<&mut VerificationType> {
        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => Vec::new(),
            FrameKind::SameLocals1StackItem(item) => vec![item],
            FrameKind::Append(locals) => locals.iter_mut().collect(),
            FrameKind::Full { locals, stack } => locals.iter_mut().chain(stack.iter_mut()).collect(),
        }
    }
}

fn parse_types(parser: &mut Parser, count: usize) -> Result<Vec<VerificationType>> {
    let mut types = Vec::with_capacity(count.min(parser.remaining()));
    for _ in 0..count {
        types.push(VerificationType::parse(parser)?);
    }
    Ok(types)
}

/// Parse the payload of a `StackMapTable` attribute.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved frame types and invalid verification types.
pub fn parse(info: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, kind) = match frame_type {
            0..=63 => (u32::from(frame_type), FrameKind::Same),
            64..=127 => (
                u32::from(frame_type - 64),
                FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
            ),
            247 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                (
                    delta,
                    FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
                )
            }
            248..=250 => (
                u32::from(parser.read_be::<u16>()?),
                FrameKind::Chop(251 - frame_type),
            ),
            251 => (u32::from(parser.read_be::<u16>()?), FrameKind::Same),
            252..=254 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                let locals = parse_types(&mut parser, usize::from(frame_type - 251))?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = u32::from(parser.read_be::<u16>()?);
                let local_count = parser.read_be::<u16>()?;
                let locals = parse_types(&mut parser, usize::from(local_count))?;
                let stack_count = parser.read_be::<u16>()?;
                let stack = parse_types(&mut parser, usize::from(stack_count))?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => {
                return Err(malformed_error!(
                    "Reserved stack map frame type {}",
                    frame_type
                ))
            }
        };

        let offset = match previous {
            None => delta,
            Some(previous) => previous + delta + 1,
        };
        previous = Some(offset);
        frames.push(StackMapFrame { offset, kind });
    }

    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes in StackMapTable",
            parser.remaining()
        ));
    }

    Ok(frames)
}

/// Serialize frames into the payload of a `StackMapTable` attribute.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the frames are not in strictly increasing offset order.
pub fn write(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    push_be(&mut out, frames.len() as u16);
    let mut previous: Option<u32> = None;

    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(previous) if frame.offset > previous => frame.offset - previous - 1,
            Some(previous) => {
                return Err(malformed_error!(
                    "Stack map frame at {} does not follow frame at {}",
                    frame.offset,
                    previous
                ))
            }
        };
        previous = Some(frame.offset);
        let delta16 = delta as u16;

        match &frame.kind {
            FrameKind::Same => {
                if delta <= 63 {
                    out.push(delta as u8);
                } else {
                    out.push(251);
                    push_be(&mut out, delta16);
                }
            }
            FrameKind::SameLocals1StackItem(item) => {
                if delta <= 63 {
                    out.push(64 + delta as u8);
                } else {
                    out.push(247);
                    push_be(&mut out, delta16);
                }
                item.write(&mut out);
            }
            FrameKind::Chop(count) => {
                out.push(251 - count);
                push_be(&mut out, delta16);
            }
            FrameKind::Append(locals) => {
                out.push(251 + locals.len() as u8);
                push_be(&mut out, delta16);
                for local in locals {
                    local.write(&mut out);
                }
            }
            FrameKind::Full { locals, stack } => {
                out.push(255);
                push_be(&mut out, delta16);
                push_be(&mut out, locals.len() as u16);
                for local in locals {
                    local.write(&mut out);
                }
                push_be(&mut out, stack.len() as u16);
                for item in stack {
                    item.write(&mut out);
                }
            }
        }
    }

    Ok(out)
}

/// Move every frame, and every `Uninitialized` offset inside the frames, through `map`.
///
/// # Errors
/// Returns whatever `map` returns for an offset it cannot translate.
pub fn relocate<F>(frames: &mut [StackMapFrame], mut map: F) -> Result<()>
where
    F: FnMut(u32) -> Result<u32>,
{
    for frame in frames.iter_mut() {
        frame.offset = map(frame.offset)?;
        for value in frame.types_mut() {
            if let VerificationType::Uninitialized(offset) = value {
                *offset = map(u32::from(*offset))? as u16;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate() {
        // same_frame delta 5, same_locals_1 delta 2 with Integer, append delta 10 with Object #9
        let payload = [0x00, 0x03, 5, 64 + 2, 1, 252, 0x00, 0x0A, 7, 0x00, 0x09];
        let frames = parse(&payload).unwrap();
        assert_eq!(frames[0].offset, 5);
        assert_eq!(frames[1].offset, 8);
        assert_eq!(frames[2].offset, 19);
        assert_eq!(
            frames[2].kind,
            FrameKind::Append(vec![VerificationType::Object(9)])
        );
        assert_eq!(frames[2].types().count(), 1);
        assert_eq!(write(&frames).unwrap(), payload);
    }

    #[test]
    fn relocation_upgrades_to_extended_forms() {
        let payload = [0x00, 0x02, 5, 64 + 2, 8, 0x00, 0x03];
        let mut frames = parse(&payload).unwrap();
        relocate(&mut frames, |offset| Ok(offset * 30)).unwrap();
        assert_eq!(frames[0].offset, 150);
        assert_eq!(frames[1].offset, 240);
        assert_eq!(
            frames[1].kind,
            FrameKind::SameLocals1StackItem(VerificationType::Uninitialized(90))
        );

        let bytes = write(&frames).unwrap();
        // 251 = same_frame_extended, 247 = same_locals_1_stack_item_frame_extended
        assert_eq!(bytes, [0x00, 0x02, 251, 0x00, 150, 247, 0x00, 89, 8, 0x00, 90]);
        assert_eq!(parse(&bytes).unwrap(), frames);
    }

    #[test]
    fn full_and_chop_frames() {
        let payload = [
            0x00, 0x02, 255, 0x00, 0x04, 0x00, 0x02, 1, 4, 0x00, 0x01, 5, 249, 0x00, 0x01,
        ];
        let frames = parse(&payload).unwrap();
        assert_eq!(
            frames[0].kind,
            FrameKind::Full {
                locals: vec![VerificationType::Integer, VerificationType::Long],
                stack: vec![VerificationType::Null],
            }
        );
        assert_eq!(frames[1].kind, FrameKind::Chop(2));
        assert_eq!(frames[1].offset, 6);
        assert_eq!(write(&frames).unwrap(), payload);
    }

    #[test]
    fn reserved_frame_type_is_malformed() {
        assert!(parse(&[0x00, 0x01, 128]).is_err());
        assert!(parse(&[0x00, 0x01, 64, 9]).is_err());
    }
}
