//! String concatenation recipes.
//!
//! Since Java 9, javac compiles `"prefix " + value` to an `invokedynamic` bootstrapped by
//! `StringConcatFactory.makeConcatWithConstants`. The literal parts never reach an `ldc`: they
//! live in the recipe, a `String` static argument of the bootstrap method, and in the further
//! `String` arguments the recipe refers to with `\u0002`.
//!
//! From class file version 55 on, each of those arguments is replaced by a dynamic constant
//! that the runtime class resolves:
//!
//! ```text
//! CONSTANT_Dynamic constant:Ljava/lang/String;
//!   bootstrap  REF_invokeStatic <runtime>.constant(Lookup, String, Class, String, long)
//!   arguments  <cipher string>, <long key>
//! ```
//!
//! Versions 53 and 54 have these call sites but no dynamic constants, so their recipes stay
//! readable.

use std::collections::{BTreeSet, HashMap};

use log::warn;

use crate::{
    classfile::{
        attributes::{names, BootstrapMethod},
        ClassFile, ConstantPool, ConstantPoolEntry, JavaString,
    },
    instrument::rewriter::RewriteSession,
    Error, Result,
};

const CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";
const CONCAT_WITH_CONSTANTS: &str = "makeConcatWithConstants";
const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

/// First class file version with `CONSTANT_Dynamic`.
const DYNAMIC_CONSTANT_VERSION: u16 = 55;

const REF_INVOKE_STATIC: u8 = 6;

/// A non-empty `String` argument of a concatenation bootstrap method.
#[derive(Debug)]
pub(super) struct RecipeArgument {
    entry: usize,
    argument: usize,
    string_index: u16,
}

/// Find the `String` arguments of every `makeConcatWithConstants` bootstrap method.
pub(super) fn recipe_arguments(class: &ClassFile) -> Result<Vec<RecipeArgument>> {
    let Some(attribute) = bootstrap_attribute(class) else {
        return Ok(Vec::new());
    };
    let pool = &class.constant_pool;
    let methods = BootstrapMethod::parse_all(&class.attributes[attribute].info)?;

    let mut found = Vec::new();
    for (entry, method) in methods.iter().enumerate() {
        if !is_concat_factory(pool, method.method_ref) {
            continue;
        }
        for (argument, &index) in method.arguments.iter().enumerate() {
            if let ConstantPoolEntry::String { string_index } = pool.get(index)? {
                if !pool.utf8(*string_index)?.is_empty() {
                    found.push(RecipeArgument {
                        entry,
                        argument,
                        string_index: index,
                    });
                }
            }
        }
    }
    Ok(found)
}

/// Replace `recipes` by dynamic constants.
///
/// Returns the number of arguments replaced and adds the `String` entries they used to
/// `strings`.
pub(super) fn rewrite_recipes(
    class: &mut ClassFile,
    session: &mut RewriteSession,
    recipes: &[RecipeArgument],
    strings: &mut BTreeSet<u16>,
) -> Result<usize> {
    if recipes.is_empty() {
        return Ok(0);
    }
    if class.major_version < DYNAMIC_CONSTANT_VERSION {
        warn!(
            "{}: {} concatenation constants kept, class file version {} predates dynamic \
             constants",
            session.class_name,
            recipes.len(),
            class.major_version
        );
        return Ok(0);
    }
    let Some(attribute) = bootstrap_attribute(class) else {
        return Ok(0);
    };

    let mut methods = BootstrapMethod::parse_all(&class.attributes[attribute].info)?;
    match encode_arguments(&mut class.constant_pool, session, &mut methods, recipes) {
        Ok(()) => {}
        Err(error) if error.is_method_local() => {
            warn!(
                "{}: concatenation constants kept, {error}",
                session.class_name
            );
            return Ok(0);
        }
        Err(error) => return Err(error),
    }

    class.attributes[attribute].info = BootstrapMethod::write_all(&methods);
    strings.extend(recipes.iter().map(|recipe| recipe.string_index));
    Ok(recipes.len())
}

fn encode_arguments(
    pool: &mut ConstantPool,
    session: &mut RewriteSession,
    methods: &mut Vec<BootstrapMethod>,
    recipes: &[RecipeArgument],
) -> Result<()> {
    let (name, descriptor) = session.ctx.constant_method();
    let bootstrap = pool.intern_methodref(session.ctx.runtime_class(), name, descriptor)?;
    let handle = pool.intern(ConstantPoolEntry::MethodHandle {
        reference_kind: REF_INVOKE_STATIC,
        reference_index: bootstrap,
    })?;
    let name_index = pool.intern_utf8(&JavaString::from(name))?;
    let descriptor_index = pool.intern_utf8(&JavaString::from(STRING_DESCRIPTOR))?;
    let name_and_type_index = pool.intern(ConstantPoolEntry::NameAndType {
        name_index,
        descriptor_index,
    })?;

    // one dynamic constant per distinct literal
    let mut constants: HashMap<JavaString, u16> = HashMap::new();
    for recipe in recipes {
        let literal = pool.string(recipe.string_index)?;
        let dynamic = match constants.get(&literal) {
            Some(index) => *index,
            None => {
                let payload = session.payload(pool, literal.clone())?;
                if methods.len() >= usize::from(u16::MAX) {
                    return Err(Error::CodeOverflow(
                        "BootstrapMethods has no room left".to_string(),
                    ));
                }
                let bootstrap_method_attr_index = methods.len() as u16;
                methods.push(BootstrapMethod {
                    method_ref: handle,
                    arguments: vec![payload.cipher, payload.key],
                });
                let index = pool.push(ConstantPoolEntry::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                })?;
                constants.insert(literal, index);
                index
            }
        };
        methods[recipe.entry].arguments[recipe.argument] = dynamic;
    }
    Ok(())
}

fn bootstrap_attribute(class: &ClassFile) -> Option<usize> {
    class
        .attributes
        .iter()
        .position(|attribute| attribute.is_named(&class.constant_pool, names::BOOTSTRAP_METHODS))
}

fn is_concat_factory(pool: &ConstantPool, method_ref: u16) -> bool {
    let Ok(ConstantPoolEntry::MethodHandle {
        reference_index, ..
    }) = pool.get(method_ref)
    else {
        return false;
    };
    pool.member_ref(*reference_index).is_ok_and(|member| {
        member.class == CONCAT_FACTORY && member.name == CONCAT_WITH_CONSTANTS
    })
}
