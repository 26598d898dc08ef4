//! JVM bytecode: opcodes, instruction decoding, stack map frames, and method body relocation.
//!
//! # Key Components
//!
//! - [`opcodes`] - opcode constants and mnemonics
//! - [`decoder`] - [`decoder::Instruction`] with absolute branch targets, decode and encode
//! - [`stackmap`] - `StackMapTable` frames with absolute offsets
//! - [`relocate`] - replace instructions and move every offset-bearing structure along
//!
//! # Examples
//!
//! ```rust
//! use strcloak::bytecode::{decoder, opcodes};
//!
//! let code = [opcodes::LDC, 0x02, opcodes::ARETURN];
//! let instructions = decoder::decode(&code)?;
//! assert_eq!(instructions[0].mnemonic(), "ldc");
//! assert_eq!(instructions[0].constant_index(), Some(2));
//! assert_eq!(decoder::encode(&instructions)?, code);
//! # Ok::<(), strcloak::Error>(())
//! ```

pub mod decoder;
pub mod opcodes;
pub mod relocate;
pub mod stackmap;
