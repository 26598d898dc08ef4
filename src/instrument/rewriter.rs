//! The constant rewriter.
//!
//! [`ConstantRewriter`] replaces every `ldc`/`ldc_w` of a non-empty `CONSTANT_String` with
//!
//! ```text
//! ldc[_w]  <cipher string>
//! ldc2_w   <long key>
//! invokestatic <runtime>.decode(Ljava/lang/String;J)Ljava/lang/String;
//! ```
//!
//! which leaves the same string reference on the stack. Payloads live in the constant pool
//! only; no fields are added. Two other places hold literals and are rewritten too:
//!
//! - `ConstantValue` attributes of `String` fields
//! - the recipes of `StringConcatFactory` call sites
//!
//! Afterwards the plaintext `Utf8` entries that nothing needs any more are blanked, and the
//! class gets an empty `StrcloakRewritten` attribute so a second run leaves it alone.
//!
//! A method whose rewritten body would break a class format limit (or holds offsets the
//! relocator cannot update) keeps its original body and its literals stay readable; the rest
//! of the class is still rewritten.

use std::{
    borrow::Cow,
    collections::{BTreeSet, HashMap},
};

use log::{debug, warn};

use crate::{
    bytecode::{
        decoder::{self, Instruction, Operand},
        opcodes::{INVOKESTATIC, LDC, LDC2_W, LDC_W},
        relocate::{relocate, Patches},
    },
    classfile::{
        attributes::{names, AttributeInfo},
        references::ReferenceScan,
        ClassFile, ConstantPool, ConstantPoolEntry, JavaString,
    },
    codec,
    instrument::{
        concat,
        context::ClassNamer,
        fields,
        stage::{ClassStage, StageChain, StageOutcome},
        RewriteContext,
    },
    Error, Result,
};

/// Extra operand stack the call sequence needs over the load it replaces.
const EXTRA_STACK: u16 = 2;

/// Pool indices of an encoded literal.
#[derive(Debug, Clone, Copy)]
pub(super) struct Payload {
    /// The `String` holding the cipher text
    pub(super) cipher: u16,
    /// The `Long` holding the key
    pub(super) key: u16,
}

/// One literal load found in a method body.
#[derive(Debug)]
struct LiteralLoad {
    offset: u32,
    string_index: u16,
}

/// The string literal rewriting stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantRewriter;

impl ConstantRewriter {
    /// Create the stage.
    #[must_use]
    pub fn new() -> ConstantRewriter {
        ConstantRewriter
    }
}

impl ClassStage for ConstantRewriter {
    fn name(&self) -> &'static str {
        "constant-rewriter"
    }

    fn description(&self) -> &'static str {
        "Replaces string literal loads with calls to the runtime decoder"
    }

    fn should_run(&self, class: &ClassFile, ctx: &RewriteContext) -> bool {
        let name = class.this_class_name().unwrap_or_default();
        if class.has_attribute(names::REWRITTEN_MARKER) {
            debug!("{name}: already rewritten");
            return false;
        }
        if name == ctx.runtime_class() {
            debug!("{name}: runtime support class");
            return false;
        }
        if calls_decoder(&class.constant_pool, ctx) {
            debug!("{name}: already calls the runtime decoder");
            return false;
        }
        if ctx.skip_synthetic() && class.is_synthetic() {
            debug!("{name}: synthetic");
            return false;
        }
        true
    }

    fn apply(&self, class: &mut ClassFile, ctx: &RewriteContext) -> Result<StageOutcome> {
        let class_name = class.this_class_name()?;

        let mut loads = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            let found = match method.code(&class.constant_pool)? {
                Some(code) => literal_loads(&class.constant_pool, &code.code)?,
                None => Vec::new(),
            };
            loads.push(found);
        }
        let constant_fields = fields::constant_fields(class)?;
        let recipes = concat::recipe_arguments(class)?;
        if loads.iter().all(Vec::is_empty) && constant_fields.is_empty() && recipes.is_empty() {
            debug!("{class_name}: no string literals");
            return Ok(StageOutcome::Unchanged);
        }

        let marker = match class
            .constant_pool
            .intern_utf8(&JavaString::from(names::REWRITTEN_MARKER))
        {
            Ok(index) => index,
            Err(error) if error.is_method_local() => {
                warn!("{class_name}: left untouched, {error}");
                return Ok(StageOutcome::Unchanged);
            }
            Err(error) => return Err(error),
        };

        let mut session = RewriteSession {
            class_name: &class_name,
            ctx,
            namer: ctx.namer().claim(&class_name),
            payloads: HashMap::new(),
            decoder: None,
        };

        let mut rewrites = 0;
        let mut rewritten_strings = BTreeSet::new();

        for (method, method_loads) in class.methods.iter_mut().zip(&loads) {
            if method_loads.is_empty() {
                continue;
            }
            let Some(position) = method.code_position(&class.constant_pool) else {
                continue;
            };

            match session.rewrite_method(
                &mut class.constant_pool,
                &method.attributes[position].info,
                method_loads,
            ) {
                Ok(code) => {
                    method.attributes[position].info = code;
                    rewrites += method_loads.len();
                    rewritten_strings.extend(method_loads.iter().map(|load| load.string_index));
                }
                Err(error) if error.is_method_local() => {
                    warn!(
                        "{class_name}: method {} left untouched, {error}",
                        method.display_name(&class.constant_pool)
                    );
                }
                Err(error) => return Err(error),
            }
        }

        rewrites += fields::initialize_in_clinit(
            class,
            &mut session,
            &constant_fields,
            &mut rewritten_strings,
        )?;
        rewrites +=
            concat::rewrite_recipes(class, &mut session, &recipes, &mut rewritten_strings)?;

        if rewrites == 0 {
            return Ok(StageOutcome::Unchanged);
        }

        scrub(class, &class_name, &rewritten_strings)?;
        class.attributes.push(AttributeInfo {
            name_index: marker,
            info: Vec::new(),
        });

        debug!(
            "{class_name}: rewrote {rewrites} loads of {} literals",
            session.payloads.len()
        );
        Ok(StageOutcome::Modified { rewrites })
    }
}

/// Per-class state of one rewrite.
pub(super) struct RewriteSession<'a> {
    pub(super) class_name: &'a str,
    pub(super) ctx: &'a RewriteContext,
    namer: ClassNamer,
    /// Encoded payloads, one per distinct literal of the class
    payloads: HashMap<JavaString, Payload>,
    decoder: Option<u16>,
}

impl RewriteSession<'_> {
    fn rewrite_method(
        &mut self,
        pool: &mut ConstantPool,
        info: &[u8],
        loads: &[LiteralLoad],
    ) -> Result<Vec<u8>> {
        let code = crate::classfile::attributes::CodeAttribute::parse(info)?;

        let mut patches = Patches::new();
        for load in loads {
            let literal = pool.string(load.string_index)?;
            patches.insert(load.offset, self.literal_sequence(pool, literal)?);
        }

        Ok(relocate(&code, pool, &patches, EXTRA_STACK)?.to_bytes())
    }

    /// The instructions leaving `literal` on the stack.
    pub(super) fn literal_sequence(
        &mut self,
        pool: &mut ConstantPool,
        literal: JavaString,
    ) -> Result<Vec<Instruction>> {
        let decoder = self.decoder(pool)?;
        let payload = self.payload(pool, literal)?;
        let load_cipher = if payload.cipher <= u16::from(u8::MAX) {
            Instruction::new(LDC, Operand::Constant(payload.cipher))
        } else {
            Instruction::new(LDC_W, Operand::Constant(payload.cipher))
        };
        Ok(vec![
            load_cipher,
            Instruction::new(LDC2_W, Operand::Constant(payload.key)),
            Instruction::new(INVOKESTATIC, Operand::Constant(decoder)),
        ])
    }

    fn decoder(&mut self, pool: &mut ConstantPool) -> Result<u16> {
        if let Some(index) = self.decoder {
            return Ok(index);
        }
        let (name, descriptor) = self.ctx.decode_method();
        let index = pool.intern_methodref(self.ctx.runtime_class(), name, descriptor)?;
        self.decoder = Some(index);
        Ok(index)
    }

    pub(super) fn payload(
        &mut self,
        pool: &mut ConstantPool,
        literal: JavaString,
    ) -> Result<Payload> {
        if let Some(payload) = self.payloads.get(&literal) {
            return Ok(*payload);
        }

        let id = self.namer.next_literal();
        let key = self.ctx.literal_key(self.class_name, id);
        let encoded = codec::encode(&literal, &key)?;

        let bytes = encoded.cipher.to_mutf8();
        if bytes.len() > crate::classfile::constants::MAX_UTF8_LEN {
            return Err(Error::CodeOverflow(format!(
                "cipher text of {} bytes exceeds the Utf8 limit",
                bytes.len()
            )));
        }
        let cipher_utf8 = pool.push(ConstantPoolEntry::Utf8(bytes))?;
        let cipher = pool.push(ConstantPoolEntry::String {
            string_index: cipher_utf8,
        })?;
        let key = pool.intern_long(encoded.key as i64)?;

        let payload = Payload { cipher, key };
        self.payloads.insert(literal, payload);
        Ok(payload)
    }
}

/// Returns `true` if the pool references the runtime decode method.
fn calls_decoder(pool: &ConstantPool, ctx: &RewriteContext) -> bool {
    let (name, descriptor) = ctx.decode_method();
    pool.iter().any(|(index, entry)| {
        matches!(entry, ConstantPoolEntry::Methodref { .. })
            && pool.member_ref(index).is_ok_and(|member| {
                member.class == ctx.runtime_class()
                    && member.name == name
                    && member.descriptor == descriptor
            })
    })
}

/// Find the loads of non-empty string constants in a code array.
fn literal_loads(pool: &ConstantPool, code: &[u8]) -> Result<Vec<LiteralLoad>> {
    let mut loads = Vec::new();
    for instruction in decoder::decode(code)? {
        if instruction.opcode != LDC && instruction.opcode != LDC_W {
            continue;
        }
        let Operand::Constant(index) = instruction.operand else {
            continue;
        };
        if let ConstantPoolEntry::String { string_index } = pool.get(index)? {
            if !pool.utf8(*string_index)?.is_empty() {
                loads.push(LiteralLoad {
                    offset: instruction.offset,
                    string_index: index,
                });
            }
        }
    }
    Ok(loads)
}

/// Blank the plaintext of rewritten literals that nothing else uses.
///
/// A `Utf8` is blanked only if no part of the class outside the pool refers to it and every
/// pool entry referring to it is a `String` that is itself unused. Indices never change.
fn scrub(class: &mut ClassFile, class_name: &str, strings: &BTreeSet<u16>) -> Result<usize> {
    let scan = ReferenceScan::scan(class)?;
    if !scan.is_complete() {
        warn!(
            "{class_name}: plaintext kept, cannot enumerate references of {}",
            scan.unknown_attributes().join(", ")
        );
        return Ok(0);
    }

    let pool = &class.constant_pool;
    let mut blank = BTreeSet::new();
    for &string in strings {
        if scan.is_referenced_outside(string) {
            continue;
        }
        let ConstantPoolEntry::String { string_index } = pool.get(string)? else {
            continue;
        };
        let utf8 = *string_index;
        if scan.is_referenced_outside(utf8) {
            continue;
        }
        let only_dead_strings = scan.pool_referrers(utf8).iter().all(|&referrer| {
            matches!(pool.get(referrer), Ok(ConstantPoolEntry::String { .. }))
                && !scan.is_referenced_outside(referrer)
        });
        if only_dead_strings {
            blank.insert(utf8);
        }
    }

    for &utf8 in &blank {
        class.constant_pool.replace_utf8(utf8, Vec::new())?;
    }
    Ok(blank.len())
}

/// Rewrite the string literals of one class.
///
/// Convenience for a chain holding only [`ConstantRewriter`]. A borrowed result means the class
/// passes through byte-identical.
///
/// # Errors
/// Returns [`crate::Error::Malformed`], [`crate::Error::OutOfBounds`] or
/// [`crate::Error::Empty`] for input that is not a class file,
/// [`crate::Error::UnsupportedVersion`] for class files newer than the supported window, and
/// [`crate::Error::EncodingInvariant`] if a literal fails its self-test.
///
/// # Examples
///
/// ```rust,no_run
/// use strcloak::instrument::{rewriter::transform, RewriteContext};
///
/// let ctx = RewriteContext::new(b"release-seed");
/// let bytes = std::fs::read("Greeting.class")?;
/// let rewritten = transform(&bytes, &ctx)?;
/// std::fs::write("Greeting.class", &rewritten)?;
/// # Ok::<(), strcloak::Error>(())
/// ```
pub fn transform<'a>(bytes: &'a [u8], ctx: &RewriteContext) -> Result<Cow<'a, [u8]>> {
    Ok(StageChain::new()
        .then(ConstantRewriter::new())
        .run(bytes, ctx)?
        .bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{opcodes, stackmap},
        classfile::attributes::CodeAttribute,
        test::{evaluate_literal_loads, ClassBuilder},
    };

    fn rewrite(bytes: &[u8]) -> Vec<u8> {
        transform(bytes, &RewriteContext::new(b"test-seed"))
            .unwrap()
            .into_owned()
    }

    fn method_code(class: &ClassFile, name: &str) -> CodeAttribute {
        class
            .methods
            .iter()
            .find(|m| m.display_name(&class.constant_pool).starts_with(name))
            .unwrap()
            .code(&class.constant_pool)
            .unwrap()
            .unwrap()
    }

    fn has_utf8(class: &ClassFile, text: &str) -> bool {
        class
            .constant_pool
            .iter()
            .any(|(_, entry)| matches!(entry, ConstantPoolEntry::Utf8(b) if b == text.as_bytes()))
    }

    #[test]
    fn greeting_is_rewritten() {
        let original = ClassBuilder::greeting().build();
        let rewritten = rewrite(&original);
        let class = ClassFile::parse(&rewritten).unwrap();

        assert!(!has_utf8(&class, "hi"));
        assert!(class.has_attribute(names::REWRITTEN_MARKER));

        let code = method_code(&class, "hello");
        let instructions = decoder::decode(&code.code).unwrap();
        assert_eq!(instructions[0].opcode, opcodes::LDC);
        assert_eq!(instructions[1].opcode, opcodes::LDC2_W);
        assert_eq!(instructions[2].opcode, opcodes::INVOKESTATIC);
        let member = class
            .constant_pool
            .member_ref(instructions[2].constant_index().unwrap())
            .unwrap();
        assert_eq!(member.class, "io/strcloak/runtime/Strings");
        assert_eq!(member.name, "decode");

        let original_code = method_code(&ClassFile::parse(&original).unwrap(), "hello");
        assert_eq!(code.max_stack, original_code.max_stack + 2);

        assert_eq!(evaluate_literal_loads(&rewritten, "hello"), ["hi"]);
    }

    #[test]
    fn classes_without_literals_are_untouched() {
        let bytes = ClassBuilder::new("com/example/Empty")
            .field("count", "I")
            .build();
        let ctx = RewriteContext::new(b"");
        assert!(matches!(transform(&bytes, &ctx).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn empty_literals_are_untouched() {
        let bytes = ClassBuilder::new("com/example/Blank")
            .method_returning_literal("blank", "")
            .build();
        let ctx = RewriteContext::new(b"");
        assert!(matches!(transform(&bytes, &ctx).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let once = rewrite(&ClassBuilder::greeting().build());
        let ctx = RewriteContext::new(b"test-seed");
        assert!(matches!(transform(&once, &ctx).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn hand_written_decoder_calls_are_recognized() {
        // No marker, but the class already calls the decoder
        let mut class = ClassFile::parse(&ClassBuilder::greeting().build()).unwrap();
        class
            .constant_pool
            .intern_methodref(
                "io/strcloak/runtime/Strings",
                "decode",
                "(Ljava/lang/String;J)Ljava/lang/String;",
            )
            .unwrap();
        let bytes = class.to_bytes();
        let ctx = RewriteContext::new(b"");
        assert!(matches!(transform(&bytes, &ctx).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn output_is_deterministic() {
        let bytes = ClassBuilder::kitchen_sink().build();
        assert_eq!(rewrite(&bytes), rewrite(&bytes));

        let other = transform(&bytes, &RewriteContext::new(b"other-seed")).unwrap();
        assert_ne!(rewrite(&bytes), other.as_ref());
    }

    #[test]
    fn repeated_literals_share_a_payload() {
        let bytes = ClassBuilder::new("com/example/Twice")
            .method_returning_literal("a", "same")
            .method_returning_literal("b", "same")
            .build();
        let class = ClassFile::parse(&rewrite(&bytes)).unwrap();
        let a = decoder::decode(&method_code(&class, "a").code).unwrap();
        let b = decoder::decode(&method_code(&class, "b").code).unwrap();
        assert_eq!(a[0].constant_index(), b[0].constant_index());
        assert_eq!(a[1].constant_index(), b[1].constant_index());
    }

    #[test]
    fn shared_text_is_not_scrubbed() {
        // "name" is also the name of a field
        let bytes = ClassBuilder::new("com/example/Shared")
            .field("name", "Ljava/lang/String;")
            .method_returning_literal("label", "name")
            .build();
        let rewritten = rewrite(&bytes);
        let class = ClassFile::parse(&rewritten).unwrap();
        assert!(has_utf8(&class, "name"));
        assert_eq!(evaluate_literal_loads(&rewritten, "label"), ["name"]);
    }

    #[test]
    fn unknown_attribute_keeps_plaintext() {
        let bytes = ClassBuilder::greeting()
            .class_attribute("VendorData", vec![0, 1])
            .build();
        let rewritten = rewrite(&bytes);
        let class = ClassFile::parse(&rewritten).unwrap();
        assert!(class.has_attribute(names::REWRITTEN_MARKER));
        assert!(has_utf8(&class, "hi"));
        assert_eq!(evaluate_literal_loads(&rewritten, "hello"), ["hi"]);
    }

    #[test]
    fn branches_switches_and_frames_survive() {
        let bytes = ClassBuilder::kitchen_sink().build();
        let rewritten = rewrite(&bytes);
        let class = ClassFile::parse(&rewritten).unwrap();
        assert_eq!(class.to_bytes(), rewritten);

        for (_, entry) in class.constant_pool.iter() {
            if let ConstantPoolEntry::Utf8(bytes) = entry {
                for literal in ClassBuilder::KITCHEN_SINK_LITERALS {
                    assert_ne!(bytes.as_slice(), literal.as_bytes(), "{literal} left in pool");
                }
            }
        }

        let code = method_code(&class, "pick");
        let instructions = decoder::decode(&code.code).unwrap();
        let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        for instruction in &instructions {
            for target in instruction.targets() {
                assert!(offsets.contains(&target), "branch to {target} is not an instruction");
            }
        }
        for entry in &code.exception_table {
            assert!(offsets.contains(&u32::from(entry.start_pc)));
            assert!(offsets.contains(&u32::from(entry.handler_pc)));
        }
        let table = code
            .attributes
            .iter()
            .find(|a| a.is_named(&class.constant_pool, names::STACK_MAP_TABLE))
            .unwrap();
        for frame in stackmap::parse(&table.info).unwrap() {
            assert!(offsets.contains(&frame.offset));
        }

        let mut literals = evaluate_literal_loads(&rewritten, "pick");
        literals.sort();
        let mut expected: Vec<String> = ClassBuilder::KITCHEN_SINK_LITERALS
            .iter()
            .map(ToString::to_string)
            .collect();
        expected.sort();
        assert_eq!(literals, expected);
    }

    #[test]
    fn oversized_method_is_left_alone() {
        let bytes = ClassBuilder::new("com/example/Big")
            .method_returning_literal("small", "kept short")
            .method_with_padding("big", "too big", 65_530)
            .build();
        let rewritten = rewrite(&bytes);
        let class = ClassFile::parse(&rewritten).unwrap();

        assert_eq!(evaluate_literal_loads(&rewritten, "small"), ["kept short"]);
        let big = method_code(&class, "big");
        assert_eq!(big.code[0], opcodes::LDC);
        assert_eq!(
            class.constant_pool.string(u16::from(big.code[1])).unwrap(),
            JavaString::from("too big")
        );
        assert!(has_utf8(&class, "too big"));
        assert!(!has_utf8(&class, "kept short"));
    }

    #[test]
    fn malformed_input_is_an_error() {
        let bytes = ClassBuilder::greeting().build();
        let ctx = RewriteContext::new(b"");
        let error = transform(&bytes[..bytes.len() / 2], &ctx).unwrap_err();
        assert!(error.is_malformed_input());
        assert!(matches!(transform(&[], &ctx), Err(Error::Empty)));
    }

    #[test]
    fn runtime_class_is_never_rewritten() {
        let bytes = crate::runtime::support_class("io/strcloak/runtime/Strings").unwrap();
        let ctx = RewriteContext::new(b"");
        assert!(matches!(transform(&bytes, &ctx).unwrap(), Cow::Borrowed(_)));
    }
}
