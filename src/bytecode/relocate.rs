//! Method body relocation.
//!
//! [`relocate`] replaces single instructions of a method with instruction sequences and lays the
//! whole body out again. Everything in the `Code` attribute that holds a bytecode offset moves
//! along: branch and switch targets, the exception table, `LineNumberTable`,
//! `LocalVariableTable`, `LocalVariableTypeTable`, `StackMapTable`, and type annotations whose
//! targets live in the code.
//!
//! Layout is a single forward pass. The only instructions whose size depends on their position
//! are `tableswitch` and `lookupswitch` (their padding aligns to the *new* position), and that
//! position is known once everything before it has been placed.
//!
//! Any nested attribute not listed above might hold offsets too, so it makes the method
//! [`crate::Error::Unrelocatable`].

use std::collections::BTreeMap;

use crate::{
    bytecode::{decoder, decoder::Instruction, stackmap},
    classfile::{
        annotations::{TargetInfo, TypeAnnotation},
        attributes::{names, AttributeInfo, CodeAttribute},
        constants::ConstantPool,
    },
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// Largest code array a method may have.
pub const MAX_CODE_LEN: u32 = 0xFFFF;

/// Instruction replacements keyed by the offset of the replaced instruction.
pub type Patches = BTreeMap<u32, Vec<Instruction>>;

struct OffsetMap {
    /// New offset for every old offset that starts an instruction, plus the old code length
    offsets: Vec<Option<u32>>,
}

impl OffsetMap {
    fn get(&self, old: u32, what: &str) -> Result<u32> {
        self.offsets
            .get(old as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                Error::Unrelocatable(format!(
                    "{what} refers to offset {old}, which is not an instruction boundary"
                ))
            })
    }

    fn get_u16(&self, old: u16, what: &str) -> Result<u16> {
        Ok(self.get(u32::from(old), what)? as u16)
    }
}

/// Rebuild `code` with the instructions at the keys of `patches` replaced by the values.
///
/// Branch targets inside a replacement are old offsets and move like every other target, so a
/// replacement may carry the instruction it replaces. Anything jumping to a replaced instruction
/// lands on the first instruction of its replacement. `max_stack` grows by `extra_stack`.
///
/// # Errors
/// - [`crate::Error::CodeOverflow`] if the new code exceeds 65535 bytes, a branch no longer
///   fits its displacement, or `max_stack` overflows
/// - [`crate::Error::Unrelocatable`] for unknown nested attributes or offsets that do not
///   start an instruction
/// - [`crate::Error::Malformed`] if the code itself does not decode
pub fn relocate(
    code: &CodeAttribute,
    pool: &ConstantPool,
    patches: &Patches,
    extra_stack: u16,
) -> Result<CodeAttribute> {
    let instructions = decoder::decode(&code.code)?;
    let old_len = code.code.len();

    for offset in patches.keys() {
        if instructions
            .binary_search_by_key(offset, |instruction| instruction.offset)
            .is_err()
        {
            return Err(Error::Error(format!(
                "patch at {offset} does not replace an instruction"
            )));
        }
    }

    // Layout
    let mut offsets = vec![None; old_len + 1];
    let mut pc: u32 = 0;
    for instruction in &instructions {
        offsets[instruction.offset as usize] = Some(pc);
        match patches.get(&instruction.offset) {
            Some(replacement) => {
                for new in replacement {
                    pc += new.encoded_len(pc);
                }
            }
            None => pc += instruction.encoded_len(pc),
        }
    }
    offsets[old_len] = Some(pc);

    if pc > MAX_CODE_LEN {
        return Err(Error::CodeOverflow(format!(
            "code grows to {pc} bytes"
        )));
    }
    let map = OffsetMap { offsets };

    // Encoding
    let mut new_code = Vec::with_capacity(pc as usize);
    for instruction in &instructions {
        let replacement = patches
            .get(&instruction.offset)
            .map_or(std::slice::from_ref(instruction), Vec::as_slice);
        for new in replacement {
            let moved = new.map_targets(|target| map.get(target, "branch"))?;
            moved.encode(new_code.len() as u32, &mut new_code)?;
        }
    }

    let exception_table = code
        .exception_table
        .iter()
        .map(|entry| {
            let mut entry = *entry;
            entry.start_pc = map.get_u16(entry.start_pc, "exception range start")?;
            entry.end_pc = map.get_u16(entry.end_pc, "exception range end")?;
            entry.handler_pc = map.get_u16(entry.handler_pc, "exception handler")?;
            Ok(entry)
        })
        .collect::<Result<Vec<_>>>()?;

    let attributes = code
        .attributes
        .iter()
        .map(|attribute| relocate_attribute(attribute, pool, &map))
        .collect::<Result<Vec<_>>>()?;

    let max_stack = code.max_stack.checked_add(extra_stack).ok_or_else(|| {
        Error::CodeOverflow(format!(
            "max_stack {} cannot grow by {}",
            code.max_stack, extra_stack
        ))
    })?;

    Ok(CodeAttribute {
        max_stack,
        max_locals: code.max_locals,
        code: new_code,
        exception_table,
        attributes,
    })
}

fn relocate_attribute(
    attribute: &AttributeInfo,
    pool: &ConstantPool,
    map: &OffsetMap,
) -> Result<AttributeInfo> {
    let name = attribute.name(pool)?;
    let info = match name.as_str() {
        names::LINE_NUMBER_TABLE => relocate_line_numbers(&attribute.info, map)?,
        names::LOCAL_VARIABLE_TABLE | names::LOCAL_VARIABLE_TYPE_TABLE => {
            relocate_local_variables(&attribute.info, map)?
        }
        names::STACK_MAP_TABLE => {
            let mut frames = stackmap::parse(&attribute.info)?;
            stackmap::relocate(&mut frames, |offset| map.get(offset, "stack map frame"))?;
            stackmap::write(&frames)?
        }
        names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS | names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => {
            relocate_type_annotations(&attribute.info, map)?
        }
        _ => {
            return Err(Error::Unrelocatable(format!(
                "unknown attribute {name} inside Code"
            )))
        }
    };

    Ok(AttributeInfo {
        name_index: attribute.name_index,
        info,
    })
}

fn relocate_line_numbers(info: &[u8], map: &OffsetMap) -> Result<Vec<u8>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut out = Vec::with_capacity(info.len());
    push_be(&mut out, count);
    for _ in 0..count {
        let start_pc = parser.read_be::<u16>()?;
        let line = parser.read_be::<u16>()?;
        push_be(&mut out, map.get_u16(start_pc, "line number entry")?);
        push_be(&mut out, line);
    }
    Ok(out)
}

fn relocate_range(start_pc: u16, length: u16, map: &OffsetMap) -> Result<(u16, u16)> {
    let start = map.get(u32::from(start_pc), "local variable range start")?;
    let end = map.get(
        u32::from(start_pc) + u32::from(length),
        "local variable range end",
    )?;
    Ok((start as u16, (end - start) as u16))
}

fn relocate_local_variables(info: &[u8], map: &OffsetMap) -> Result<Vec<u8>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut out = Vec::with_capacity(info.len());
    push_be(&mut out, count);
    for _ in 0..count {
        let start_pc = parser.read_be::<u16>()?;
        let length = parser.read_be::<u16>()?;
        let (start_pc, length) = relocate_range(start_pc, length, map)?;
        push_be(&mut out, start_pc);
        push_be(&mut out, length);
        // name, descriptor or signature, slot
        out.extend_from_slice(parser.read_bytes(6)?);
    }
    Ok(out)
}

fn relocate_type_annotations(info: &[u8], map: &OffsetMap) -> Result<Vec<u8>> {
    let mut annotations = TypeAnnotation::parse_all(info)?;
    for annotation in &mut annotations {
        match &mut annotation.target {
            TargetInfo::LocalVar(table) => {
                for row in table.iter_mut() {
                    let (start_pc, length) = relocate_range(row.start_pc, row.length, map)?;
                    row.start_pc = start_pc;
                    row.length = length;
                }
            }
            TargetInfo::Offset(offset) | TargetInfo::TypeArgument { offset, .. } => {
                *offset = map.get_u16(*offset, "type annotation")?;
            }
            _ => {}
        }
    }
    Ok(TypeAnnotation::write_all(&annotations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{decoder::Operand, opcodes::*},
        classfile::{attributes::ExceptionTableEntry, mutf8::JavaString},
    };

    fn pool_with(names: &[&str]) -> (ConstantPool, Vec<u16>) {
        let mut pool = ConstantPool::new();
        let indices = names
            .iter()
            .map(|name| pool.intern_utf8(&JavaString::from(*name)).unwrap())
            .collect();
        (pool, indices)
    }

    fn three_byte_patch() -> Vec<Instruction> {
        vec![
            Instruction::new(LDC, Operand::Constant(7)),
            Instruction::new(LDC2_W, Operand::Constant(8)),
            Instruction::new(INVOKESTATIC, Operand::Constant(10)),
        ]
    }

    #[test]
    fn branches_follow_inserted_code() {
        // 0: iload_0; 1: ifeq -> 9; 4: ldc #2; 6: goto -> 10; 9: nop; 10: areturn
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code: vec![ILOAD_0, IFEQ, 0, 8, LDC, 2, GOTO, 0, 4, NOP, ARETURN],
            exception_table: vec![ExceptionTableEntry {
                start_pc: 4,
                end_pc: 6,
                handler_pc: 9,
                catch_type: 0,
            }],
            attributes: Vec::new(),
        };

        let mut patches = Patches::new();
        patches.insert(4, three_byte_patch());
        let relocated = relocate(&code, &ConstantPool::new(), &patches, 2).unwrap();

        // ldc (2) became 2 + 3 + 3 = 8 bytes: everything after offset 4 moves by 6
        let instructions = decoder::decode(&relocated.code).unwrap();
        assert_eq!(instructions[1].operand, Operand::Branch(15));
        assert_eq!(instructions[2].opcode, LDC);
        assert_eq!(instructions[3].opcode, LDC2_W);
        assert_eq!(instructions[4].opcode, INVOKESTATIC);
        assert_eq!(instructions[5].operand, Operand::Branch(16));
        assert_eq!(relocated.code.len(), 17);
        assert_eq!(relocated.max_stack, 3);
        assert_eq!(
            relocated.exception_table[0],
            ExceptionTableEntry {
                start_pc: 4,
                end_pc: 12,
                handler_pc: 15,
                catch_type: 0
            }
        );
    }

    #[test]
    fn code_can_be_prepended_to_a_branch() {
        // 0: goto -> 4; 3: nop; 4: return
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 0,
            code: vec![GOTO, 0, 4, NOP, RETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let first = decoder::decode(&code.code).unwrap().remove(0);
        let mut replacement = three_byte_patch();
        replacement.push(first);

        let mut patches = Patches::new();
        patches.insert(0, replacement);
        let relocated = relocate(&code, &ConstantPool::new(), &patches, 3).unwrap();

        let instructions = decoder::decode(&relocated.code).unwrap();
        assert_eq!(instructions[3].offset, 8);
        assert_eq!(instructions[3].operand, Operand::Branch(12));
        assert_eq!(instructions[5].offset, 12);
        assert_eq!(instructions[5].opcode, RETURN);
    }

    #[test]
    fn switch_padding_is_recomputed() {
        // 0: ldc #2; 2: pop; 3: iload_0; 4: tableswitch (pad 3) default/target -> 24; 24: return
        let mut code = vec![LDC, 2, POP, ILOAD_0, TABLESWITCH, 0, 0, 0];
        for value in [20_i32, 0, 0, 20] {
            code.extend_from_slice(&value.to_be_bytes());
        }
        code.push(RETURN);
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };

        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        let relocated = relocate(&code, &ConstantPool::new(), &patches, 2).unwrap();

        // switch moves from 4 to 10 and its padding shrinks from 3 to 1
        let instructions = decoder::decode(&relocated.code).unwrap();
        assert_eq!(instructions[5].offset, 10);
        assert_eq!(
            instructions[5].operand,
            Operand::TableSwitch {
                default: 28,
                low: 0,
                targets: vec![28]
            }
        );
        assert_eq!(instructions[6].offset, 28);
        assert_eq!(relocated.code.len(), 29);
    }

    #[test]
    fn debug_tables_and_frames_move() {
        let (pool, indices) = pool_with(&[
            names::LINE_NUMBER_TABLE,
            names::LOCAL_VARIABLE_TABLE,
            names::STACK_MAP_TABLE,
        ]);
        // 0: ldc #2; 2: astore_1; 3: aload_1; 4: areturn
        let line_numbers = vec![0, 2, 0, 0, 0, 10, 0, 3, 0, 11];
        let local_variables = vec![0, 1, 0, 3, 0, 2, 0, 20, 0, 21, 0, 1];
        // same_frame at offset 3
        let frames = vec![0, 1, 3];

        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 2,
            code: vec![LDC, 2, ASTORE_1, ALOAD_1, ARETURN],
            exception_table: Vec::new(),
            attributes: vec![
                AttributeInfo {
                    name_index: indices[0],
                    info: line_numbers,
                },
                AttributeInfo {
                    name_index: indices[1],
                    info: local_variables,
                },
                AttributeInfo {
                    name_index: indices[2],
                    info: frames,
                },
            ],
        };

        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        let relocated = relocate(&code, &pool, &patches, 2).unwrap();

        assert_eq!(relocated.attributes[0].info, vec![0, 2, 0, 0, 0, 10, 0, 9, 0, 11]);
        assert_eq!(
            relocated.attributes[1].info,
            vec![0, 1, 0, 9, 0, 2, 0, 20, 0, 21, 0, 1]
        );
        assert_eq!(relocated.attributes[2].info, vec![0, 1, 9]);
    }

    // One annotation per code-scoped target kind:
    // local variable (start 6, length 6, slot 1), `new` at 6, cast at 2 with type argument 0
    fn code_type_annotations(local_start: u8, new_at: u8, cast_at: u8) -> Vec<u8> {
        let body = [0, 22, 0, 0];
        let mut info = vec![0, 3];
        info.extend_from_slice(&[0x40, 0, 1, 0, local_start, 0, 6, 0, 1, 0]);
        info.extend_from_slice(&body);
        info.extend_from_slice(&[0x44, 0, new_at, 0]);
        info.extend_from_slice(&body);
        info.extend_from_slice(&[0x47, 0, cast_at, 0, 0]);
        info.extend_from_slice(&body);
        info
    }

    #[test]
    fn generic_locals_and_type_annotations_move() {
        let (pool, indices) = pool_with(&[
            names::LOCAL_VARIABLE_TYPE_TABLE,
            names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS,
            names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS,
        ]);
        // 0: ldc #2; 2: checkcast #3; 5: astore_1; 6: new #4; 9: pop; 10: aload_1; 11: areturn
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: vec![LDC, 2, CHECKCAST, 0, 3, ASTORE_1, NEW, 0, 4, POP, ALOAD_1, ARETURN],
            exception_table: Vec::new(),
            attributes: vec![
                AttributeInfo {
                    name_index: indices[0],
                    info: vec![0, 1, 0, 6, 0, 6, 0, 20, 0, 21, 0, 1],
                },
                AttributeInfo {
                    name_index: indices[1],
                    info: code_type_annotations(6, 6, 2),
                },
                AttributeInfo {
                    name_index: indices[2],
                    info: code_type_annotations(6, 6, 2),
                },
            ],
        };

        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        let relocated = relocate(&code, &pool, &patches, 2).unwrap();

        let boundaries: Vec<u32> = decoder::decode(&relocated.code)
            .unwrap()
            .iter()
            .map(|instruction| instruction.offset)
            .collect();
        assert_eq!(boundaries, [0, 2, 5, 8, 11, 12, 15, 16, 17]);
        assert_eq!(relocated.code.len(), 18);

        // the range ends exactly at the end of the code
        assert_eq!(
            relocated.attributes[0].info,
            vec![0, 1, 0, 12, 0, 6, 0, 20, 0, 21, 0, 1]
        );
        for attribute in &relocated.attributes[1..] {
            assert_eq!(attribute.info, code_type_annotations(12, 12, 8));

            let annotations = TypeAnnotation::parse_all(&attribute.info).unwrap();
            assert_eq!(
                annotations[0].target,
                TargetInfo::LocalVar(vec![crate::classfile::annotations::LocalVarTarget {
                    start_pc: 12,
                    length: 6,
                    index: 1,
                }])
            );
            assert_eq!(annotations[1].target, TargetInfo::Offset(12));
            assert_eq!(
                annotations[2].target,
                TargetInfo::TypeArgument {
                    offset: 8,
                    argument: 0
                }
            );
        }
    }

    #[test]
    fn type_annotation_inside_an_instruction_is_unrelocatable() {
        let (pool, indices) = pool_with(&[names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS]);
        let code = CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: vec![LDC, 2, CHECKCAST, 0, 3, ASTORE_1, NEW, 0, 4, POP, ALOAD_1, ARETURN],
            exception_table: Vec::new(),
            attributes: vec![AttributeInfo {
                name_index: indices[0],
                // the cast annotation points into the operand of checkcast
                info: code_type_annotations(6, 6, 3),
            }],
        };
        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        assert!(matches!(
            relocate(&code, &pool, &patches, 2),
            Err(Error::Unrelocatable(_))
        ));
    }

    #[test]
    fn unknown_code_attribute_is_unrelocatable() {
        let (pool, indices) = pool_with(&["VendorOffsets"]);
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 0,
            code: vec![LDC, 2, ARETURN],
            exception_table: Vec::new(),
            attributes: vec![AttributeInfo {
                name_index: indices[0],
                info: vec![0, 2],
            }],
        };
        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        let error = relocate(&code, &pool, &patches, 2).unwrap_err();
        assert!(matches!(error, Error::Unrelocatable(_)));
        assert!(error.is_method_local());
    }

    #[test]
    fn code_limit_is_enforced() {
        // 21846 ldc instructions grow from 2 to 8 bytes each: 174768 bytes
        let mut bytes = Vec::new();
        for _ in 0..21_846 {
            bytes.extend_from_slice(&[LDC, 2]);
        }
        bytes.push(RETURN);
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 0,
            code: bytes,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let patches: Patches = (0..21_846_u32)
            .map(|i| (i * 2, three_byte_patch()))
            .collect();
        assert!(matches!(
            relocate(&code, &ConstantPool::new(), &patches, 2),
            Err(Error::CodeOverflow(_))
        ));
    }

    #[test]
    fn stack_limit_is_enforced() {
        let code = CodeAttribute {
            max_stack: u16::MAX - 1,
            max_locals: 0,
            code: vec![LDC, 2, ARETURN],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        let mut patches = Patches::new();
        patches.insert(0, three_byte_patch());
        assert!(matches!(
            relocate(&code, &ConstantPool::new(), &patches, 2),
            Err(Error::CodeOverflow(_))
        ));
    }
}
