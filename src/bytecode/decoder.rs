//! Instruction decoding and encoding.
//!
//! [`decode`] turns a code array into a list of [`Instruction`]s. Branch and switch targets are
//! stored as absolute code offsets rather than the relative displacements of the class file, so
//! a decoded method can be moved around (see [`crate::bytecode::relocate`]) and re-encoded at
//! new positions with [`Instruction::encode`].

use crate::{
    bytecode::opcodes::{self, *},
    file::{io::push_be, parser::Parser},
    Error, Result,
};

/// The operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// `bipush` immediate
    Byte(i8),
    /// `sipush` immediate
    Short(i16),
    /// `newarray` element type
    ArrayType(u8),
    /// Local variable slot of loads, stores and `ret`
    Local(u16),
    /// Constant pool index (`ldc` family, field and method access, type operations)
    Constant(u16),
    /// `iinc` slot and increment
    Iinc {
        /// Local variable slot
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// Absolute branch target
    Branch(u32),
    /// `tableswitch` with absolute targets
    TableSwitch {
        /// Target when the key is out of range
        default: u32,
        /// Lowest key
        low: i32,
        /// Targets for keys `low..=low + targets.len() - 1`
        targets: Vec<u32>,
    },
    /// `lookupswitch` with absolute targets
    LookupSwitch {
        /// Target when no key matches
        default: u32,
        /// Sorted `(key, target)` pairs
        pairs: Vec<(i32, u32)>,
    },
    /// `invokeinterface` method reference and argument slot count
    InvokeInterface {
        /// Constant pool index of the `InterfaceMethodref`
        index: u16,
        /// Number of argument slots, including the receiver
        count: u8,
    },
    /// `invokedynamic` call site
    InvokeDynamic(u16),
    /// `multianewarray` class and dimension count
    MultiANewArray {
        /// Constant pool index of the array class
        index: u16,
        /// Number of dimensions to create
        dimensions: u8,
    },
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the instruction in its code array
    pub offset: u32,
    /// The opcode (never `wide`; see [`Instruction::wide`])
    pub opcode: u8,
    /// Whether the instruction was prefixed by `wide`
    pub wide: bool,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction that is not yet placed in a code array.
    #[must_use]
    pub fn new(opcode: u8, operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            opcode,
            wide: false,
            operand,
        }
    }

    /// The mnemonic of the opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcodes::mnemonic(self.opcode).unwrap_or("<invalid>")
    }

    /// The constant pool index this instruction refers to, if any.
    #[must_use]
    pub fn constant_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Constant(index)
            | Operand::InvokeDynamic(index)
            | Operand::InvokeInterface { index, .. }
            | Operand::MultiANewArray { index, .. } => Some(index),
            _ => None,
        }
    }

    /// All absolute branch targets of this instruction.
    #[must_use]
    pub fn targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// A copy of this instruction with every branch target passed through `map`.
    ///
    /// # Errors
    /// Returns whatever `map` returns for a target it cannot translate.
    pub fn map_targets<F>(&self, mut map: F) -> Result<Instruction>
    where
        F: FnMut(u32) -> Result<u32>,
    {
        let operand = match &self.operand {
            Operand::Branch(target) => Operand::Branch(map(*target)?),
            Operand::TableSwitch {
                default,
                low,
                targets,
            } => Operand::TableSwitch {
                default: map(*default)?,
                low: *low,
                targets: targets
                    .iter()
                    .map(|target| map(*target))
                    .collect::<Result<_>>()?,
            },
            Operand::LookupSwitch { default, pairs } => Operand::LookupSwitch {
                default: map(*default)?,
                pairs: pairs
                    .iter()
                    .map(|(key, target)| Ok((*key, map(*target)?)))
                    .collect::<Result<_>>()?,
            },
            other => other.clone(),
        };

        Ok(Instruction {
            offset: self.offset,
            opcode: self.opcode,
            wide: self.wide,
            operand,
        })
    }

    /// Size in bytes of this instruction when encoded at `pc`.
    #[must_use]
    pub fn encoded_len(&self, pc: u32) -> u32 {
        match &self.operand {
            Operand::None => 1,
            Operand::Byte(_) | Operand::ArrayType(_) => 2,
            Operand::Short(_) => 3,
            Operand::Local(_) => {
                if self.wide {
                    4
                } else {
                    2
                }
            }
            Operand::Constant(_) => {
                if self.opcode == LDC {
                    2
                } else {
                    3
                }
            }
            Operand::Iinc { .. } => {
                if self.wide {
                    6
                } else {
                    3
                }
            }
            Operand::Branch(_) => {
                if is_wide_branch(self.opcode) {
                    5
                } else {
                    3
                }
            }
            Operand::TableSwitch { targets, .. } => {
                1 + switch_padding(pc) + 12 + 4 * targets.len() as u32
            }
            Operand::LookupSwitch { pairs, .. } => {
                1 + switch_padding(pc) + 8 + 8 * pairs.len() as u32
            }
            Operand::InvokeInterface { .. } | Operand::InvokeDynamic(_) => 5,
            Operand::MultiANewArray { .. } => 4,
        }
    }

    /// Append the encoding of this instruction placed at `pc`.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeOverflow`] if a branch displacement does not fit its
    /// operand, and [`crate::Error::Error`] for operands that cannot be encoded with the
    /// opcode (an `ldc` index above 255, a narrow local above 255).
    pub fn encode(&self, pc: u32, out: &mut Vec<u8>) -> Result<()> {
        if self.wide {
            out.push(WIDE);
        }
        out.push(self.opcode);

        match &self.operand {
            Operand::None => {}
            Operand::Byte(value) => push_be(out, *value),
            Operand::Short(value) => push_be(out, *value),
            Operand::ArrayType(kind) => out.push(*kind),
            Operand::Local(index) => {
                if self.wide {
                    push_be(out, *index);
                } else {
                    out.push(narrow(*index, "local variable index")?);
                }
            }
            Operand::Constant(index) => {
                if self.opcode == LDC {
                    out.push(narrow(*index, "ldc constant index")?);
                } else {
                    push_be(out, *index);
                }
            }
            Operand::Iinc { index, delta } => {
                if self.wide {
                    push_be(out, *index);
                    push_be(out, *delta);
                } else {
                    out.push(narrow(*index, "iinc local variable index")?);
                    let Ok(delta) = i8::try_from(*delta) else {
                        return Err(Error::Error(format!(
                            "iinc increment {delta} needs the wide form"
                        )));
                    };
                    push_be(out, delta);
                }
            }
            Operand::Branch(target) => {
                let displacement = i64::from(*target) - i64::from(pc);
                if is_wide_branch(self.opcode) {
                    push_be(out, displacement as i32);
                } else {
                    push_be(out, short_displacement(displacement, pc)?);
                }
            }
            Operand::TableSwitch {
                default,
                low,
                targets,
            } => {
                out.resize(out.len() + switch_padding(pc) as usize, 0);
                push_be(out, switch_displacement(*default, pc));
                push_be(out, *low);
                push_be(out, low.wrapping_add(targets.len() as i32 - 1));
                for target in targets {
                    push_be(out, switch_displacement(*target, pc));
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                out.resize(out.len() + switch_padding(pc) as usize, 0);
                push_be(out, switch_displacement(*default, pc));
                push_be(out, pairs.len() as i32);
                for (key, target) in pairs {
                    push_be(out, *key);
                    push_be(out, switch_displacement(*target, pc));
                }
            }
            Operand::InvokeInterface { index, count } => {
                push_be(out, *index);
                out.push(*count);
                out.push(0);
            }
            Operand::InvokeDynamic(index) => {
                push_be(out, *index);
                push_be(out, 0_u16);
            }
            Operand::MultiANewArray { index, dimensions } => {
                push_be(out, *index);
                out.push(*dimensions);
            }
        }

        Ok(())
    }
}

fn narrow(value: u16, what: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::Error(format!("{what} {value} does not fit one byte")))
}

fn short_displacement(displacement: i64, pc: u32) -> Result<i16> {
    i16::try_from(displacement).map_err(|_| {
        Error::CodeOverflow(format!(
            "branch at {pc} needs a displacement of {displacement}"
        ))
    })
}

fn switch_displacement(target: u32, pc: u32) -> i32 {
    (i64::from(target) - i64::from(pc)) as i32
}

fn is_wide_branch(opcode: u8) -> bool {
    matches!(opcode, GOTO_W | JSR_W)
}

/// Number of padding bytes after a switch opcode at `pc`.
#[must_use]
pub fn switch_padding(pc: u32) -> u32 {
    (4 - (pc + 1) % 4) % 4
}

fn branch_target(offset: u32, displacement: i64, code_len: usize) -> Result<u32> {
    let target = i64::from(offset) + displacement;
    if target < 0 || target >= code_len as i64 {
        return Err(malformed_error!(
            "Branch at {} targets {} outside of the code array",
            offset,
            target
        ));
    }
    Ok(target as u32)
}

fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos() as u32;
    let code_len = parser.len();
    let mut opcode = parser.read_be::<u8>()?;
    let mut wide = false;

    if opcode == WIDE {
        wide = true;
        opcode = parser.read_be::<u8>()?;
        if !matches!(opcode, ILOAD..=ALOAD | ISTORE..=ASTORE | RET | IINC) {
            return Err(malformed_error!(
                "Invalid opcode after wide: 0x{:02X} at {}",
                opcode,
                offset
            ));
        }
    }

    let operand = match opcode {
        BIPUSH => Operand::Byte(parser.read_be()?),
        SIPUSH => Operand::Short(parser.read_be()?),
        NEWARRAY => Operand::ArrayType(parser.read_be()?),
        LDC => Operand::Constant(u16::from(parser.read_be::<u8>()?)),
        LDC_W | LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            Operand::Constant(parser.read_be()?)
        }
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
            if wide {
                Operand::Local(parser.read_be()?)
            } else {
                Operand::Local(u16::from(parser.read_be::<u8>()?))
            }
        }
        IINC => {
            if wide {
                Operand::Iinc {
                    index: parser.read_be()?,
                    delta: parser.read_be()?,
                }
            } else {
                Operand::Iinc {
                    index: u16::from(parser.read_be::<u8>()?),
                    delta: i16::from(parser.read_be::<i8>()?),
                }
            }
        }
        IFEQ..=JSR | IFNULL | IFNONNULL => {
            let displacement = i64::from(parser.read_be::<i16>()?);
            Operand::Branch(branch_target(offset, displacement, code_len)?)
        }
        GOTO_W | JSR_W => {
            let displacement = i64::from(parser.read_be::<i32>()?);
            Operand::Branch(branch_target(offset, displacement, code_len)?)
        }
        TABLESWITCH => {
            parser.align(4)?;
            let default = branch_target(offset, i64::from(parser.read_be::<i32>()?), code_len)?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if high < low {
                return Err(malformed_error!(
                    "tableswitch at {} with high {} below low {}",
                    offset,
                    high,
                    low
                ));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            if count.saturating_mul(4) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let displacement = i64::from(parser.read_be::<i32>()?);
                targets.push(branch_target(offset, displacement, code_len)?);
            }
            Operand::TableSwitch {
                default,
                low,
                targets,
            }
        }
        LOOKUPSWITCH => {
            parser.align(4)?;
            let default = branch_target(offset, i64::from(parser.read_be::<i32>()?), code_len)?;
            let npairs = parser.read_be::<i32>()?;
            let Ok(count) = usize::try_from(npairs) else {
                return Err(malformed_error!(
                    "lookupswitch at {} with negative pair count {}",
                    offset,
                    npairs
                ));
            };
            if count.saturating_mul(8) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                let key = parser.read_be::<i32>()?;
                let displacement = i64::from(parser.read_be::<i32>()?);
                pairs.push((key, branch_target(offset, displacement, code_len)?));
            }
            Operand::LookupSwitch { default, pairs }
        }
        INVOKEINTERFACE => {
            let index = parser.read_be()?;
            let count = parser.read_be()?;
            parser.advance_by(1)?;
            Operand::InvokeInterface { index, count }
        }
        INVOKEDYNAMIC => {
            let index = parser.read_be()?;
            parser.advance_by(2)?;
            Operand::InvokeDynamic(index)
        }
        MULTIANEWARRAY => Operand::MultiANewArray {
            index: parser.read_be()?,
            dimensions: parser.read_be()?,
        },
        NOP..=DCONST_1
        | ILOAD_0..=SALOAD
        | ISTORE_0..=LXOR
        | I2L..=DCMPG
        | IRETURN..=RETURN
        | ARRAYLENGTH
        | ATHROW
        | MONITORENTER
        | MONITOREXIT => Operand::None,
        _ => {
            return Err(malformed_error!(
                "Invalid opcode: 0x{:02X} at {}",
                opcode,
                offset
            ))
        }
    };

    Ok(Instruction {
        offset,
        opcode,
        wide,
        operand,
    })
}

/// Decode a complete code array.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid opcodes, bad switch tables, or branches
/// leaving the code array, and [`crate::Error::OutOfBounds`] for a truncated last instruction.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }
    Ok(instructions)
}

/// Encode instructions back to back starting at offset 0.
///
/// # Errors
/// See [`Instruction::encode`].
pub fn encode(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for instruction in instructions {
        instruction.encode(out.len() as u32, &mut out)?;
    }
    Ok(out)
}
