//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use strcloak::{
    bytecode::{
        decoder::{self, Instruction},
        opcodes::{ARETURN, INVOKESTATIC, LDC, LDC2_W, LDC_W},
    },
    classfile::{
        attributes::{names, AttributeInfo, CodeAttribute},
        flags::{ClassAccessFlags, MethodAccessFlags},
        ClassFile, ConstantPool, ConstantPoolEntry, JavaString, MethodInfo,
    },
    instrument::{ClassInput, ClassOrigin},
    runtime,
};

/// Assemble a class whose methods each return one literal: `(method name, literal)`.
pub fn literal_class(internal_name: &str, methods: &[(&str, &str)]) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let this_class = pool.intern_class(internal_name).unwrap();
    let super_class = pool.intern_class("java/lang/Object").unwrap();
    let code_name = pool.intern_utf8(&JavaString::from(names::CODE)).unwrap();
    let descriptor = pool
        .intern_utf8(&JavaString::from("()Ljava/lang/String;"))
        .unwrap();

    let methods = methods
        .iter()
        .map(|(name, literal)| {
            let name_index = pool.intern_utf8(&JavaString::from(*name)).unwrap();
            let string = pool.intern_string(&JavaString::from(*literal)).unwrap();
            let mut code = match u8::try_from(string) {
                Ok(index) => vec![LDC, index],
                Err(_) => {
                    let [high, low] = string.to_be_bytes();
                    vec![LDC_W, high, low]
                }
            };
            code.push(ARETURN);

            let body = CodeAttribute {
                max_stack: 1,
                max_locals: 0,
                code,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            };
            MethodInfo {
                access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                name_index,
                descriptor_index: descriptor,
                attributes: vec![AttributeInfo {
                    name_index: code_name,
                    info: body.to_bytes(),
                }],
            }
        })
        .collect();

    ClassFile {
        minor_version: 0,
        major_version: 52,
        constant_pool: pool,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        attributes: Vec::new(),
    }
    .to_bytes()
}

/// A module class.
pub fn module_input(internal_name: &str, methods: &[(&str, &str)]) -> ClassInput {
    ClassInput::new(
        internal_name,
        ClassOrigin::Module,
        literal_class(internal_name, methods),
    )
}

/// The string `method` returns, decoding a rewritten load with the runtime mirror.
pub fn returned_literal(class_bytes: &[u8], method: &str) -> String {
    let class = ClassFile::parse(class_bytes).unwrap();
    let pool = &class.constant_pool;
    let method = class
        .methods
        .iter()
        .find(|m| pool.utf8_string(m.name_index).unwrap() == method)
        .unwrap();
    let code = method.code(pool).unwrap().unwrap();
    let instructions = decoder::decode(&code.code).unwrap();

    match instructions.as_slice() {
        [load, ret] if is_ldc(load) && ret.opcode == ARETURN => {
            pool.string(load.constant_index().unwrap())
                .unwrap()
                .to_string_lossy()
        }
        [load, key, call, ret]
            if is_ldc(load)
                && key.opcode == LDC2_W
                && call.opcode == INVOKESTATIC
                && ret.opcode == ARETURN =>
        {
            let member = pool.member_ref(call.constant_index().unwrap()).unwrap();
            assert_eq!(member.name, runtime::DECODE_NAME);
            assert_eq!(member.descriptor, runtime::DECODE_DESCRIPTOR);

            let cipher = pool.string(load.constant_index().unwrap()).unwrap();
            let key = match pool.get(key.constant_index().unwrap()).unwrap() {
                ConstantPoolEntry::Long(key) => *key as u64,
                other => panic!("key is not a long: {other:?}"),
            };
            runtime::decode(&cipher, key).to_string_lossy()
        }
        other => panic!("unexpected body {other:?}"),
    }
}

/// Returns `true` if `needle` occurs anywhere in `haystack`.
pub fn contains_bytes(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

fn is_ldc(instruction: &Instruction) -> bool {
    instruction.opcode == LDC || instruction.opcode == LDC_W
}
