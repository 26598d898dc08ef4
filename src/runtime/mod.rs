//! Runtime decode support.
//!
//! Rewritten classes call a static `decode(String, long)` method that has to ship with the
//! application. Instead of depending on a prebuilt jar, the engine assembles that class itself:
//! [`support_class`] emits a version 52 class file containing a method that reverses the
//! keystream of [`crate::codec`] and interns the result, and the bootstrap method that resolves
//! encoded dynamic constants through it.
//!
//! The emitted methods are equivalent to:
//!
//! ```java
//! public static String decode(String payload, long key) {
//!     char[] chars = payload.toCharArray();
//!     long state = key;
//!     for (int i = 0; i < chars.length; i++) {
//!         state = state * 6364136223846793005L + 1442695040888963407L;
//!         chars[i] = (char) (chars[i] ^ (int) (state >>> 32));
//!     }
//!     return new String(chars).intern();
//! }
//!
//! public static Object constant(MethodHandles.Lookup lookup, String name, Class<?> type,
//!                               String payload, long key) {
//!     return decode(payload, key);
//! }
//! ```
//!
//! The class has no constructor and is never instantiated.

use crate::{
    bytecode::{
        decoder::{self, Instruction, Operand},
        opcodes::*,
        stackmap::{self, FrameKind, StackMapFrame, VerificationType},
    },
    classfile::{
        attributes::{names, AttributeInfo, CodeAttribute},
        flags::{ClassAccessFlags, MethodAccessFlags},
        mutf8::JavaString,
        ClassFile, ConstantPool, MethodInfo,
    },
    codec::{LCG_INCREMENT, LCG_MULTIPLIER},
    Error, Result,
};

/// Internal name of the runtime class unless configured otherwise.
pub const DEFAULT_RUNTIME_CLASS: &str = "io/strcloak/runtime/Strings";

/// Name of the decode method.
pub const DECODE_NAME: &str = "decode";

/// Descriptor of the decode method.
pub const DECODE_DESCRIPTOR: &str = "(Ljava/lang/String;J)Ljava/lang/String;";

/// Name of the dynamic constant bootstrap method.
pub const CONSTANT_NAME: &str = "constant";

/// Descriptor of the dynamic constant bootstrap method.
pub const CONSTANT_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;\
                                       Ljava/lang/Class;Ljava/lang/String;J)Ljava/lang/Object;";

const STRING_CLASS: &str = "java/lang/String";

/// Class file version of the emitted class; the first with mandatory stack maps.
const SUPPORT_MAJOR_VERSION: u16 = 52;

/// Returns `true` if `internal_name` is a plausible internal class name.
///
/// Segments are separated by `/`, must be non-empty, and must not contain the characters the
/// JVM forbids in unqualified names.
#[must_use]
pub fn is_valid_internal_name(internal_name: &str) -> bool {
    !internal_name.is_empty()
        && internal_name.split('/').all(|segment| {
            !segment.is_empty() && !segment.contains(['.', ';', '[', '<', '>'])
        })
}

/// Assemble the runtime decode class.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if `internal_name` is not a valid internal name.
pub fn support_class(internal_name: &str) -> Result<Vec<u8>> {
    if !is_valid_internal_name(internal_name) {
        return Err(Error::Configuration(format!(
            "'{internal_name}' is not a valid runtime class name"
        )));
    }

    let mut pool = ConstantPool::new();
    let this_class = pool.intern_class(internal_name)?;
    let super_class = pool.intern_class("java/lang/Object")?;
    let name_index = pool.intern_utf8(&JavaString::from(DECODE_NAME))?;
    let descriptor_index = pool.intern_utf8(&JavaString::from(DECODE_DESCRIPTOR))?;
    let code_name = pool.intern_utf8(&JavaString::from(names::CODE))?;
    let stack_map_name = pool.intern_utf8(&JavaString::from(names::STACK_MAP_TABLE))?;

    let to_char_array = pool.intern_methodref(STRING_CLASS, "toCharArray", "()[C")?;
    let string_class = pool.intern_class(STRING_CLASS)?;
    let string_init = pool.intern_methodref(STRING_CLASS, "<init>", "([C)V")?;
    let intern = pool.intern_methodref(STRING_CLASS, "intern", "()Ljava/lang/String;")?;
    let char_array = pool.intern_class("[C")?;
    let multiplier = pool.intern_long(LCG_MULTIPLIER as i64)?;
    let increment = pool.intern_long(LCG_INCREMENT as i64)?;

    // locals: 0 payload, 1-2 key, 3 chars, 4-5 state, 6 i
    let body = [
        Instruction::new(ALOAD_0, Operand::None),
        Instruction::new(INVOKEVIRTUAL, Operand::Constant(to_char_array)),
        Instruction::new(ASTORE_3, Operand::None),
        Instruction::new(LLOAD_1, Operand::None),
        Instruction::new(LSTORE, Operand::Local(4)),
        Instruction::new(ICONST_0, Operand::None),
        Instruction::new(ISTORE, Operand::Local(6)),
        // 11: loop head
        Instruction::new(ILOAD, Operand::Local(6)),
        Instruction::new(ALOAD_3, Operand::None),
        Instruction::new(ARRAYLENGTH, Operand::None),
        Instruction::new(IF_ICMPGE, Operand::Branch(LOOP_EXIT)),
        Instruction::new(LLOAD, Operand::Local(4)),
        Instruction::new(LDC2_W, Operand::Constant(multiplier)),
        Instruction::new(LMUL, Operand::None),
        Instruction::new(LDC2_W, Operand::Constant(increment)),
        Instruction::new(LADD, Operand::None),
        Instruction::new(LSTORE, Operand::Local(4)),
        Instruction::new(ALOAD_3, Operand::None),
        Instruction::new(ILOAD, Operand::Local(6)),
        Instruction::new(ALOAD_3, Operand::None),
        Instruction::new(ILOAD, Operand::Local(6)),
        Instruction::new(CALOAD, Operand::None),
        Instruction::new(LLOAD, Operand::Local(4)),
        Instruction::new(BIPUSH, Operand::Byte(32)),
        Instruction::new(LUSHR, Operand::None),
        Instruction::new(L2I, Operand::None),
        Instruction::new(IXOR, Operand::None),
        Instruction::new(I2C, Operand::None),
        Instruction::new(CASTORE, Operand::None),
        Instruction::new(IINC, Operand::Iinc { index: 6, delta: 1 }),
        Instruction::new(GOTO, Operand::Branch(LOOP_HEAD)),
        // 52: loop exit
        Instruction::new(NEW, Operand::Constant(string_class)),
        Instruction::new(DUP, Operand::None),
        Instruction::new(ALOAD_3, Operand::None),
        Instruction::new(INVOKESPECIAL, Operand::Constant(string_init)),
        Instruction::new(INVOKEVIRTUAL, Operand::Constant(intern)),
        Instruction::new(ARETURN, Operand::None),
    ];
    let code = decoder::encode(&body)?;

    let frames = [
        StackMapFrame {
            offset: LOOP_HEAD,
            kind: FrameKind::Append(vec![
                VerificationType::Object(char_array),
                VerificationType::Long,
                VerificationType::Integer,
            ]),
        },
        StackMapFrame {
            offset: LOOP_EXIT,
            kind: FrameKind::Same,
        },
    ];

    let code = CodeAttribute {
        max_stack: 6,
        max_locals: 7,
        code,
        exception_table: Vec::new(),
        attributes: vec![AttributeInfo {
            name_index: stack_map_name,
            info: stackmap::write(&frames)?,
        }],
    };

    // locals: 0 lookup, 1 name, 2 type, 3 payload, 4-5 key
    let decode = pool.intern_methodref(internal_name, DECODE_NAME, DECODE_DESCRIPTOR)?;
    let constant = CodeAttribute {
        max_stack: 3,
        max_locals: 6,
        code: decoder::encode(&[
            Instruction::new(ALOAD_3, Operand::None),
            Instruction::new(LLOAD, Operand::Local(4)),
            Instruction::new(INVOKESTATIC, Operand::Constant(decode)),
            Instruction::new(ARETURN, Operand::None),
        ])?,
        exception_table: Vec::new(),
        attributes: Vec::new(),
    };
    let constant_name = pool.intern_utf8(&JavaString::from(CONSTANT_NAME))?;
    let constant_descriptor = pool.intern_utf8(&JavaString::from(CONSTANT_DESCRIPTOR))?;

    let public_static = |name_index, descriptor_index, code: CodeAttribute| MethodInfo {
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name_index,
        descriptor_index,
        attributes: vec![AttributeInfo {
            name_index: code_name,
            info: code.to_bytes(),
        }],
    };

    let class = ClassFile {
        minor_version: 0,
        major_version: SUPPORT_MAJOR_VERSION,
        constant_pool: pool,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![
            public_static(name_index, descriptor_index, code),
            public_static(constant_name, constant_descriptor, constant),
        ],
        attributes: Vec::new(),
    };

    Ok(class.to_bytes())
}

const LOOP_HEAD: u32 = 11;
const LOOP_EXIT: u32 = 52;

/// Decode a payload exactly the way the emitted class does.
///
/// Step for step the same loop as the bytecode, including the `int` widening of the shifted
/// state, so it can serve as a cross-check of [`crate::codec::decode`].
#[must_use]
pub fn decode(payload: &JavaString, key: u64) -> JavaString {
    let mut chars = payload.units().to_vec();
    let mut state = key as i64;
    for slot in &mut chars {
        state = state
            .wrapping_mul(LCG_MULTIPLIER as i64)
            .wrapping_add(LCG_INCREMENT as i64);
        let shifted = ((state as u64) >> 32) as i32;
        *slot = (i32::from(*slot) ^ shifted) as u16;
    }
    JavaString::from_units(chars)
}
