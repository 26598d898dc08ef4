//! End-to-end tests of the instrumentation pipeline.
//!
//! Classes are assembled through the public API, run through an [`Instrumenter`], and the
//! output is checked for preserved behavior and the absence of plaintext.

mod common;

use common::{contains_bytes, literal_class, module_input, returned_literal};
use strcloak::prelude::*;

const SECRET: &str = "sk-live-4f9a1c0e7b";

#[test]
fn module_and_dependency_classes_are_rewritten() -> Result<()> {
    let instrumenter = Instrumenter::new(InstrumentConfig::default().with_seed("e2e"))?;
    let inputs = vec![
        module_input(
            "com/example/Config",
            &[("token", SECRET), ("endpoint", "https://api.example.com")],
        ),
        ClassInput::new(
            "org/thirdparty/Banner",
            ClassOrigin::Dependency,
            literal_class("org/thirdparty/Banner", &[("text", "Powered by thirdparty")]),
        ),
    ];

    let sink = MemorySink::new();
    let report = instrumenter.run_batch(&inputs, &sink)?;
    assert_eq!(report.rewritten, 2);
    assert_eq!(report.literals, 3);

    let config = sink.get("com/example/Config").unwrap();
    assert!(!contains_bytes(&config, SECRET));
    assert!(!contains_bytes(&config, "https://api.example.com"));
    assert_eq!(returned_literal(&config, "token"), SECRET);
    assert_eq!(returned_literal(&config, "endpoint"), "https://api.example.com");

    let banner = sink.get("org/thirdparty/Banner").unwrap();
    assert!(!contains_bytes(&banner, "Powered by thirdparty"));
    assert_eq!(returned_literal(&banner, "text"), "Powered by thirdparty");
    Ok(())
}

#[test]
fn excluded_classes_pass_through_byte_identical() -> Result<()> {
    let instrumenter =
        Instrumenter::new(InstrumentConfig::default().exclude("com.example.generated.**"))?;
    let generated = literal_class("com/example/generated/deep/Stub", &[("id", SECRET)]);
    let inputs = vec![ClassInput::new(
        "com/example/generated/deep/Stub",
        ClassOrigin::Module,
        generated.clone(),
    )];

    let sink = MemorySink::new();
    let report = instrumenter.run_batch(&inputs, &sink)?;
    assert_eq!(report.skipped, 1);
    assert_eq!(sink.get("com/example/generated/deep/Stub").unwrap(), generated);
    Ok(())
}

#[test]
fn include_patterns_restrict_selection() -> Result<()> {
    let instrumenter = Instrumenter::new(InstrumentConfig::default().include("com.example.api.*"))?;
    let inputs = vec![
        module_input("com/example/api/Client", &[("name", "client")]),
        module_input("com/example/internal/Cache", &[("name", "cache")]),
    ];

    let sink = MemorySink::new();
    let report = instrumenter.run_batch(&inputs, &sink)?;
    assert_eq!(report.rewritten, 1);
    assert_eq!(report.skipped, 1);
    assert!(!contains_bytes(&sink.get("com/example/api/Client").unwrap(), "client"));
    assert!(contains_bytes(&sink.get("com/example/internal/Cache").unwrap(), "cache"));
    Ok(())
}

#[test]
fn output_depends_only_on_seed_and_input() -> Result<()> {
    let inputs = vec![
        module_input("com/example/A", &[("a", "alpha"), ("b", "beta")]),
        module_input("com/example/B", &[("a", "alpha")]),
    ];
    let run = |seed: &str| -> Result<MemorySink> {
        let sink = MemorySink::new();
        Instrumenter::new(InstrumentConfig::default().with_seed(seed))?
            .run_batch(&inputs, &sink)?;
        Ok(sink)
    };

    let first = run("seed-1")?.into_classes();
    let second = run("seed-1")?.into_classes();
    let other = run("seed-2")?.into_classes();

    assert_eq!(first, second);
    assert_ne!(first["com/example/A"], other["com/example/A"]);
    assert_eq!(returned_literal(&other["com/example/A"], "b"), "beta");
    Ok(())
}

#[test]
fn malformed_class_aborts_without_output() -> Result<()> {
    let mut truncated = literal_class("com/example/Broken", &[("x", "x")]);
    truncated.truncate(truncated.len() / 2);
    let inputs = vec![
        module_input("com/example/Fine", &[("x", "fine")]),
        ClassInput::new("com/example/Broken", ClassOrigin::Module, truncated),
    ];

    let dir = tempfile::tempdir()?;
    let instrumenter = Instrumenter::new(InstrumentConfig::default())?;
    let error = instrumenter
        .run_batch(&inputs, &DirectorySink::new(dir.path()))
        .unwrap_err();

    assert!(error.is_malformed_input());
    assert!(error.to_string().starts_with("com.example.Broken"));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn instrumenting_twice_changes_nothing() -> Result<()> {
    let inputs = vec![module_input("com/example/Twice", &[("x", SECRET)])];
    let once = MemorySink::new();
    Instrumenter::new(InstrumentConfig::default())?.run_batch(&inputs, &once)?;

    let rewritten = once.get("com/example/Twice").unwrap();
    let again = MemorySink::new();
    let report = Instrumenter::new(InstrumentConfig::default())?.run_batch(
        &[ClassInput::new(
            "com/example/Twice",
            ClassOrigin::Module,
            rewritten.clone(),
        )],
        &again,
    )?;

    assert_eq!(report.unchanged, 1);
    assert_eq!(again.get("com/example/Twice").unwrap(), rewritten);
    Ok(())
}

#[test]
fn class_directories_round_trip() -> Result<()> {
    let input_dir = tempfile::tempdir()?;
    let output_dir = tempfile::tempdir()?;
    let input_sink = DirectorySink::new(input_dir.path());
    input_sink.accept(
        "com/example/OnDisk",
        &literal_class("com/example/OnDisk", &[("greet", "hello from disk")]),
    )?;

    let path = input_sink.path_of("com/example/OnDisk");
    let input = ClassInput::from_file(input_dir.path(), &path, ClassOrigin::Module)?;
    assert_eq!(input.name, "com/example/OnDisk");

    let output_sink = DirectorySink::new(output_dir.path());
    Instrumenter::new(InstrumentConfig::default())?.run_batch(&[input], &output_sink)?;

    let written = std::fs::read(output_sink.path_of("com/example/OnDisk"))?;
    assert_eq!(returned_literal(&written, "greet"), "hello from disk");
    Ok(())
}

#[test]
fn support_class_matches_configuration() -> Result<()> {
    let bytes = support_class("com/acme/obf/S")?;
    let class = ClassFile::parse(&bytes)?;
    assert_eq!(class.this_class_name()?, "com/acme/obf/S");

    let config = InstrumentConfig::default().with_runtime_class("com/acme/obf/S");
    let instrumenter = Instrumenter::new(config)?;
    let sink = MemorySink::new();
    instrumenter.run_batch(
        &[ClassInput::new("com/acme/obf/S", ClassOrigin::Module, bytes.clone())],
        &sink,
    )?;
    assert_eq!(sink.get("com/acme/obf/S").unwrap(), bytes);
    Ok(())
}

#[test]
fn class_directories_can_be_rewritten_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sink = DirectorySink::new(dir.path());
    let original = literal_class("com/example/InPlace", &[("greet", SECRET)]);
    sink.accept("com/example/InPlace", &original)?;

    let path = sink.path_of("com/example/InPlace");
    let input = ClassInput::from_file(dir.path(), &path, ClassOrigin::Module)?;
    assert_eq!(input.bytes, original);

    // the sink overwrites the very file the input was read from
    let report = Instrumenter::new(InstrumentConfig::default())?.run_batch(&[input], &sink)?;
    assert_eq!(report.rewritten, 1);

    let written = std::fs::read(&path)?;
    assert_ne!(written, original);
    assert!(!contains_bytes(&written, SECRET));
    assert_eq!(returned_literal(&written, "greet"), SECRET);
    Ok(())
}
