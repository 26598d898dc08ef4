//! String constants of fields.
//!
//! A `final String` field initialized with a literal carries the text in a `ConstantValue`
//! attribute. For a static field the JVM stores that value before `<clinit>` runs, so the
//! attribute is removed and the class initializer stores the decoded literal instead:
//!
//! ```text
//! ldc[_w]  <cipher string>
//! ldc2_w   <long key>
//! invokestatic <runtime>.decode(Ljava/lang/String;J)Ljava/lang/String;
//! putstatic <this class>.<field>
//! ```
//!
//! The stores run ahead of the existing initializer, or make up a new one. Instance fields only
//! lose the attribute: the JVM ignores it there, and constructors assign the value themselves.
//!
//! Without the attribute, code compiled against the output no longer sees the field as a
//! compile-time constant.

use std::collections::BTreeSet;

use log::warn;

use crate::{
    bytecode::{
        decoder::{self, Instruction, Operand},
        opcodes::{PUTSTATIC, RETURN},
        relocate::{relocate, Patches, MAX_CODE_LEN},
    },
    classfile::{
        attributes::{names, AttributeInfo, CodeAttribute},
        flags::{FieldAccessFlags, MethodAccessFlags},
        ClassFile, ConstantPool, ConstantPoolEntry, JavaString, MethodInfo,
    },
    file::parser::Parser,
    instrument::rewriter::RewriteSession,
    Error, Result,
};

const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";
const CLASS_INITIALIZER: &str = "<clinit>";
const VOID_DESCRIPTOR: &str = "()V";

/// Operand stack one store needs: the cipher text and the two-slot key.
const STORE_STACK: u16 = 3;

/// Interfaces whose default `serialVersionUID` covers the presence of `<clinit>`.
const SERIALIZABLE: [&str; 2] = ["java/io/Serializable", "java/io/Externalizable"];

/// A `String` field with a non-empty `ConstantValue`.
#[derive(Debug)]
pub(super) struct ConstantField {
    field: usize,
    string_index: u16,
    is_static: bool,
}

/// Find the fields whose `ConstantValue` is a non-empty string.
pub(super) fn constant_fields(class: &ClassFile) -> Result<Vec<ConstantField>> {
    let pool = &class.constant_pool;
    let mut found = Vec::new();
    for (position, field) in class.fields.iter().enumerate() {
        if pool.utf8(field.descriptor_index)? != STRING_DESCRIPTOR.as_bytes() {
            continue;
        }
        for attribute in &field.attributes {
            if !attribute.is_named(pool, names::CONSTANT_VALUE) {
                continue;
            }
            let string_index = Parser::new(&attribute.info).read_be::<u16>()?;
            if let ConstantPoolEntry::String { string_index: utf8 } = pool.get(string_index)? {
                if !pool.utf8(*utf8)?.is_empty() {
                    found.push(ConstantField {
                        field: position,
                        string_index,
                        is_static: field.access_flags.contains(FieldAccessFlags::STATIC),
                    });
                }
            }
        }
    }
    Ok(found)
}

/// Replace `ConstantValue` attributes of `constants` by stores in `<clinit>`.
///
/// Returns the number of fields that lost their attribute; the `String` entries they referred to
/// are added to `strings`.
pub(super) fn initialize_in_clinit(
    class: &mut ClassFile,
    session: &mut RewriteSession,
    constants: &[ConstantField],
    strings: &mut BTreeSet<u16>,
) -> Result<usize> {
    let statics: Vec<&ConstantField> = constants.iter().filter(|c| c.is_static).collect();
    let mut handled: Vec<&ConstantField> = constants.iter().filter(|c| !c.is_static).collect();

    if !statics.is_empty() {
        match store_statics(class, session, &statics) {
            Ok(true) => handled.extend(statics),
            Ok(false) => {}
            Err(error) if error.is_method_local() => {
                warn!(
                    "{}: static String constants kept, {error}",
                    session.class_name
                );
            }
            Err(error) => return Err(error),
        }
    }

    let pool = &class.constant_pool;
    for constant in &handled {
        class.fields[constant.field]
            .attributes
            .retain(|attribute| !attribute.is_named(pool, names::CONSTANT_VALUE));
        strings.insert(constant.string_index);
    }
    Ok(handled.len())
}

/// Emit the stores of the static constants into `<clinit>`.
///
/// Returns `false` if the class needs a new initializer but must not get one.
fn store_statics(
    class: &mut ClassFile,
    session: &mut RewriteSession,
    statics: &[&ConstantField],
) -> Result<bool> {
    let initializer = class
        .methods
        .iter()
        .position(|method| is_class_initializer(method, &class.constant_pool));
    if initializer.is_none() && serial_version_depends_on_clinit(class) {
        warn!(
            "{}: static String constants kept, a new <clinit> would change the default \
             serialVersionUID",
            session.class_name
        );
        return Ok(false);
    }

    let pool = &mut class.constant_pool;
    let mut stores = Vec::with_capacity(statics.len() * 4 + 1);
    for constant in statics {
        let field = &class.fields[constant.field];
        let literal = pool.string(constant.string_index)?;
        stores.extend(session.literal_sequence(pool, literal)?);

        let name_and_type_index = pool.intern(ConstantPoolEntry::NameAndType {
            name_index: field.name_index,
            descriptor_index: field.descriptor_index,
        })?;
        let field_ref = pool.intern(ConstantPoolEntry::Fieldref {
            class_index: class.this_class,
            name_and_type_index,
        })?;
        stores.push(Instruction::new(PUTSTATIC, Operand::Constant(field_ref)));
    }

    match initializer {
        Some(position) => {
            let method = &mut class.methods[position];
            let Some(code_position) = method.code_position(pool) else {
                return Err(malformed_error!("{} has no Code attribute", CLASS_INITIALIZER));
            };
            let code = CodeAttribute::parse(&method.attributes[code_position].info)?;
            method.attributes[code_position].info = prepend(&code, pool, stores)?.to_bytes();
        }
        None => {
            stores.push(Instruction::new(RETURN, Operand::None));
            let code = decoder::encode(&stores)?;
            if code.len() > MAX_CODE_LEN as usize {
                return Err(Error::CodeOverflow(format!(
                    "{CLASS_INITIALIZER} grows to {} bytes",
                    code.len()
                )));
            }
            let code = CodeAttribute {
                max_stack: STORE_STACK,
                max_locals: 0,
                code,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            };
            let method = MethodInfo {
                access_flags: MethodAccessFlags::STATIC,
                name_index: pool.intern_utf8(&JavaString::from(CLASS_INITIALIZER))?,
                descriptor_index: pool.intern_utf8(&JavaString::from(VOID_DESCRIPTOR))?,
                attributes: vec![AttributeInfo {
                    name_index: pool.intern_utf8(&JavaString::from(names::CODE))?,
                    info: code.to_bytes(),
                }],
            };
            class.methods.push(method);
        }
    }
    Ok(true)
}

/// Run `stores` before the first instruction of `code`.
fn prepend(
    code: &CodeAttribute,
    pool: &ConstantPool,
    mut stores: Vec<Instruction>,
) -> Result<CodeAttribute> {
    let Some(first) = decoder::decode(&code.code)?.into_iter().next() else {
        return Err(malformed_error!("{} without instructions", CLASS_INITIALIZER));
    };
    stores.push(first);

    let mut patches = Patches::new();
    patches.insert(0, stores);
    // the stores start and end on an empty stack
    let mut relocated = relocate(code, pool, &patches, 0)?;
    relocated.max_stack = relocated.max_stack.max(STORE_STACK);
    Ok(relocated)
}

fn is_class_initializer(method: &MethodInfo, pool: &ConstantPool) -> bool {
    pool.utf8(method.name_index)
        .is_ok_and(|name| name == CLASS_INITIALIZER.as_bytes())
        && pool
            .utf8(method.descriptor_index)
            .is_ok_and(|descriptor| descriptor == VOID_DESCRIPTOR.as_bytes())
}

/// Returns `true` for a directly serializable class relying on the computed
/// `serialVersionUID`.
fn serial_version_depends_on_clinit(class: &ClassFile) -> bool {
    let pool = &class.constant_pool;
    let serializable = class.interfaces.iter().any(|&interface| {
        pool.class_name(interface)
            .is_ok_and(|name| SERIALIZABLE.contains(&name.as_str()))
    });
    let declares_uid = class.fields.iter().any(|field| {
        pool.utf8(field.name_index)
            .is_ok_and(|name| name == b"serialVersionUID")
    });
    serializable && !declares_uid
}
