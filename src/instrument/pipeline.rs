//! Build integration.
//!
//! The host build system owns discovery, scheduling and packaging of classes. This module is
//! what it talks to:
//!
//! - [`register`] checks the configuration, asks the [`InstrumentationHost`] to route every class
//!   of the module and its dependencies through an [`Instrumenter`], and hands the host the
//!   runtime support class to package.
//! - [`Instrumenter`] is the [`StageFactory`] the host calls per class. It can also drive
//!   classes itself: [`Instrumenter::process`] for one class at a time, and
//!   [`Instrumenter::run_batch`] for an all-or-nothing parallel run.
//! - [`ClassSink`] receives output bytes; [`MemorySink`] and [`DirectorySink`] are provided.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    instrument::{
        config::{InstrumentConfig, VersionPolicy},
        rewriter::ConstantRewriter,
        selector::{ClassDescriptor, ClassOrigin, ClassSelector},
        stage::StageChain,
        InstrumentationScope, RewriteContext,
    },
    runtime, Error, Result,
};

/// The build system the engine is registered with.
pub trait InstrumentationHost {
    /// Whether the application plugin the engine depends on has been applied.
    fn has_application_plugin(&self) -> bool;

    /// Route every class in `scope` through the stages produced by `factory`.
    ///
    /// `parameters` carries per-invocation options; the engine never passes any.
    ///
    /// # Errors
    /// The host may refuse the registration, e.g. for a scope it cannot provide.
    fn transform_classes_with(
        &mut self,
        scope: InstrumentationScope,
        parameters: Option<&InstrumentConfig>,
        factory: Arc<dyn StageFactory>,
    ) -> Result<()>;

    /// Add a generated class to the artifact.
    ///
    /// # Errors
    /// The host may fail to store the class.
    fn add_runtime_class(&mut self, internal_name: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Produces the stages a class runs through.
pub trait StageFactory: Send + Sync {
    /// Extend `next` with the stages `class` needs.
    ///
    /// `next` is whatever the host runs after this engine; a class that is not selected gets
    /// it back unchanged.
    fn create(&self, class: &ClassDescriptor, next: StageChain) -> StageChain;

    /// The shared per-build context the stages run with.
    fn context(&self) -> &RewriteContext;
}

/// One class handed to the engine.
#[derive(Debug, Clone)]
pub struct ClassInput {
    /// Internal name, e.g. `com/example/Greeting`
    pub name: String,
    /// Where the class comes from
    pub origin: ClassOrigin,
    /// Whether the host knows the class to be synthetic
    pub synthetic: bool,
    /// The class file
    pub bytes: Vec<u8>,
}

impl ClassInput {
    /// Wrap class bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, origin: ClassOrigin, bytes: Vec<u8>) -> ClassInput {
        ClassInput {
            name: name.into(),
            origin,
            synthetic: false,
            bytes,
        }
    }

    /// Read a class file below a class directory; the name is the path relative to `root`
    /// without the `.class` suffix.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Configuration`] if `path` is not a `.class` file below `root`.
    pub fn from_file(root: &Path, path: &Path, origin: ClassOrigin) -> Result<ClassInput> {
        let relative = path.strip_prefix(root).map_err(|_| {
            Error::Configuration(format!(
                "{} is not below {}",
                path.display(),
                root.display()
            ))
        })?;
        let Some(name) = relative
            .to_str()
            .and_then(|name| name.strip_suffix(".class"))
        else {
            return Err(Error::Configuration(format!(
                "{} is not a class file",
                path.display()
            )));
        };
        let name = name.replace(std::path::MAIN_SEPARATOR, "/");

        Ok(ClassInput::new(name, origin, fs::read(path)?))
    }

    /// Mark the class as synthetic.
    #[must_use]
    pub fn with_synthetic(mut self, synthetic: bool) -> ClassInput {
        self.synthetic = synthetic;
        self
    }

    /// The selector's view of the class.
    #[must_use]
    pub fn descriptor(&self) -> ClassDescriptor {
        ClassDescriptor::from_internal_name(&self.name, self.origin).with_synthetic(self.synthetic)
    }
}

/// Receives transformed classes.
pub trait ClassSink: Send + Sync {
    /// Store one class.
    ///
    /// # Errors
    /// Returns an error if the class cannot be stored.
    fn accept(&self, internal_name: &str, bytes: &[u8]) -> Result<()>;
}

/// Keeps output classes in memory, sorted by name.
#[derive(Debug, Default)]
pub struct MemorySink {
    classes: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// The stored bytes of a class.
    #[must_use]
    pub fn get(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes
            .lock()
            .ok()
            .and_then(|classes| classes.get(internal_name).cloned())
    }

    /// Number of stored classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.lock().map_or(0, |classes| classes.len())
    }

    /// Returns `true` if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all stored classes.
    #[must_use]
    pub fn into_classes(self) -> BTreeMap<String, Vec<u8>> {
        self.classes
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ClassSink for MemorySink {
    fn accept(&self, internal_name: &str, bytes: &[u8]) -> Result<()> {
        self.classes
            .lock()
            .map_err(|_| Error::Error("memory sink lock poisoned".to_string()))?
            .insert(internal_name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Writes `<root>/<internal name>.class`, creating directories as needed.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Write below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> DirectorySink {
        DirectorySink { root: root.into() }
    }

    /// Where a class ends up.
    #[must_use]
    pub fn path_of(&self, internal_name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(internal_name.split('/'));
        path.set_extension("class");
        path
    }
}

impl ClassSink for DirectorySink {
    fn accept(&self, internal_name: &str, bytes: &[u8]) -> Result<()> {
        if internal_name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(Error::Error(format!(
                "refusing to write class with name '{internal_name}'"
            )));
        }
        let path = self.path_of(internal_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// What happened to one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassAction {
    /// Literals were rewritten
    Rewritten,
    /// Selected, but nothing to rewrite
    Unchanged,
    /// Not selected
    Skipped,
    /// Newer class format, copied through under [`VersionPolicy::PassThrough`]
    PassedThrough,
}

/// Per-class entry of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
    /// Internal name of the class
    pub name: String,
    /// What happened
    pub action: ClassAction,
    /// Literal loads rewritten
    pub literals: usize,
}

/// Totals over many classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Classes with rewritten literals
    pub rewritten: usize,
    /// Selected classes left as they were
    pub unchanged: usize,
    /// Classes the selector left alone
    pub skipped: usize,
    /// Classes copied through because of their version
    pub passed_through: usize,
    /// Literal loads rewritten
    pub literals: usize,
}

impl BatchReport {
    /// Count one class.
    pub fn record(&mut self, report: &ClassReport) {
        match report.action {
            ClassAction::Rewritten => self.rewritten += 1,
            ClassAction::Unchanged => self.unchanged += 1,
            ClassAction::Skipped => self.skipped += 1,
            ClassAction::PassedThrough => self.passed_through += 1,
        }
        self.literals += report.literals;
    }

    /// Number of classes seen.
    #[must_use]
    pub fn total(&self) -> usize {
        self.rewritten + self.unchanged + self.skipped + self.passed_through
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} classes: {} rewritten ({} literals), {} unchanged, {} skipped, {} passed through",
            self.total(),
            self.rewritten,
            self.literals,
            self.unchanged,
            self.skipped,
            self.passed_through
        )
    }
}

/// A transformed class, before it reaches a sink.
#[derive(Debug)]
pub struct TransformedClass<'a> {
    /// What happened
    pub report: ClassReport,
    /// The output bytes, borrowed if identical to the input
    pub bytes: Cow<'a, [u8]>,
}

/// The engine bound to one build.
pub struct Instrumenter {
    config: InstrumentConfig,
    context: Arc<RewriteContext>,
    selector: ClassSelector,
    reports: boxcar::Vec<ClassReport>,
}

impl Instrumenter {
    /// The scope the engine always registers with.
    pub const REQUIRED_SCOPE: InstrumentationScope = InstrumentationScope::ModuleAndDependencies;

    /// Create the engine for a build.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if the configuration does not validate.
    pub fn new(config: InstrumentConfig) -> Result<Instrumenter> {
        config.validate()?;
        let selector = ClassSelector::new(&config, Self::REQUIRED_SCOPE)?;
        let context = Arc::new(RewriteContext::from_config(&config));
        Ok(Instrumenter {
            config,
            context,
            selector,
            reports: boxcar::Vec::new(),
        })
    }

    /// The configuration the engine was created with.
    #[must_use]
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// The shared rewrite context.
    #[must_use]
    pub fn shared_context(&self) -> Arc<RewriteContext> {
        Arc::clone(&self.context)
    }

    /// The class selector.
    #[must_use]
    pub fn selector(&self) -> &ClassSelector {
        &self.selector
    }

    /// Transform one class without storing it.
    ///
    /// # Errors
    /// Any failure, wrapped in [`crate::Error::Class`] with the binary name of the input.
    pub fn transform_class<'a>(&self, input: &'a ClassInput) -> Result<TransformedClass<'a>> {
        let descriptor = input.descriptor();
        let chain = self.create(&descriptor, StageChain::new());

        if chain.is_empty() {
            return Ok(TransformedClass {
                report: ClassReport {
                    name: input.name.clone(),
                    action: ClassAction::Skipped,
                    literals: 0,
                },
                bytes: Cow::Borrowed(&input.bytes),
            });
        }

        match chain.run(&input.bytes, &self.context) {
            Ok(output) => {
                let action = if output.is_modified() {
                    ClassAction::Rewritten
                } else {
                    ClassAction::Unchanged
                };
                Ok(TransformedClass {
                    report: ClassReport {
                        name: input.name.clone(),
                        action,
                        literals: output.rewrites,
                    },
                    bytes: output.bytes,
                })
            }
            Err(Error::UnsupportedVersion { major, minor })
                if self.config.version_policy == VersionPolicy::PassThrough =>
            {
                warn!(
                    "{}: class file version {major}.{minor} is not supported, copied unmodified",
                    descriptor.binary_name
                );
                Ok(TransformedClass {
                    report: ClassReport {
                        name: input.name.clone(),
                        action: ClassAction::PassedThrough,
                        literals: 0,
                    },
                    bytes: Cow::Borrowed(&input.bytes),
                })
            }
            Err(error) => Err(error.for_class(descriptor.binary_name)),
        }
    }

    /// Transform one class and hand it to `sink`.
    ///
    /// # Errors
    /// See [`Instrumenter::transform_class`]; nothing reaches the sink on error.
    pub fn process(&self, input: &ClassInput, sink: &dyn ClassSink) -> Result<ClassReport> {
        let transformed = self.transform_class(input)?;
        sink.accept(&input.name, &transformed.bytes)?;
        self.reports.push(transformed.report.clone());
        Ok(transformed.report)
    }

    /// Transform many classes in parallel, then store them in input order.
    ///
    /// The run is all-or-nothing: if any class fails, the error of the first failing class in
    /// input order is returned and the sink receives nothing.
    ///
    /// # Errors
    /// The first per-class error, or the first error of the sink.
    pub fn run_batch(&self, inputs: &[ClassInput], sink: &dyn ClassSink) -> Result<BatchReport> {
        let results: Vec<Result<TransformedClass>> = inputs
            .par_iter()
            .map(|input| self.transform_class(input))
            .collect();

        let mut transformed = Vec::with_capacity(results.len());
        for result in results {
            transformed.push(result?);
        }

        let mut report = BatchReport::default();
        for class in transformed {
            sink.accept(&class.report.name, &class.bytes)?;
            report.record(&class.report);
            self.reports.push(class.report);
        }

        info!("{report}");
        Ok(report)
    }

    /// Totals over every class processed so far.
    #[must_use]
    pub fn summary(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for (_, class) in self.reports.iter() {
            report.record(class);
        }
        report
    }

    /// Per-class reports of everything processed so far.
    #[must_use]
    pub fn reports(&self) -> Vec<ClassReport> {
        self.reports.iter().map(|(_, report)| report.clone()).collect()
    }
}

impl StageFactory for Instrumenter {
    fn create(&self, class: &ClassDescriptor, next: StageChain) -> StageChain {
        match self.selector.rejection(class) {
            Some(reason) => {
                debug!("{}: skipped, {reason}", class.binary_name);
                next
            }
            None => next.prepend(Box::new(ConstantRewriter::new())),
        }
    }

    fn context(&self) -> &RewriteContext {
        &self.context
    }
}

impl fmt::Debug for Instrumenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumenter")
            .field("config", &self.config)
            .field("processed", &self.reports.count())
            .finish_non_exhaustive()
    }
}

/// Register the engine with a host.
///
/// Returns `Ok(None)` without touching the host when the configuration disables the engine.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] for an invalid configuration or a host without the
/// application plugin, and whatever the host returns for a refused registration.
pub fn register(
    host: &mut dyn InstrumentationHost,
    config: &InstrumentConfig,
) -> Result<Option<Arc<Instrumenter>>> {
    config.validate()?;
    if !host.has_application_plugin() {
        return Err(Error::Configuration(
            "string literal instrumentation requires the application plugin to be applied first"
                .to_string(),
        ));
    }
    if !config.enabled {
        info!("String literal instrumentation is disabled");
        return Ok(None);
    }

    let instrumenter = Arc::new(Instrumenter::new(config.clone())?);
    host.transform_classes_with(
        Instrumenter::REQUIRED_SCOPE,
        None,
        Arc::clone(&instrumenter) as Arc<dyn StageFactory>,
    )?;
    host.add_runtime_class(
        &config.runtime_class,
        runtime::support_class(&config.runtime_class)?,
    )?;

    Ok(Some(instrumenter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::ClassFile,
        test::{evaluate_literal_loads, init_logging, ClassBuilder, Jvm},
    };

    #[derive(Default)]
    struct RecordingHost {
        application_plugin: bool,
        registrations: Vec<(InstrumentationScope, bool, Arc<dyn StageFactory>)>,
        runtime_classes: Vec<(String, Vec<u8>)>,
    }

    impl InstrumentationHost for RecordingHost {
        fn has_application_plugin(&self) -> bool {
            self.application_plugin
        }

        fn transform_classes_with(
            &mut self,
            scope: InstrumentationScope,
            parameters: Option<&InstrumentConfig>,
            factory: Arc<dyn StageFactory>,
        ) -> Result<()> {
            self.registrations
                .push((scope, parameters.is_some(), factory));
            Ok(())
        }

        fn add_runtime_class(&mut self, internal_name: &str, bytes: Vec<u8>) -> Result<()> {
            self.runtime_classes.push((internal_name.to_string(), bytes));
            Ok(())
        }
    }

    fn input(name: &str, bytes: Vec<u8>) -> ClassInput {
        ClassInput::new(name, ClassOrigin::Module, bytes)
    }

    #[test]
    fn registration() {
        let mut host = RecordingHost {
            application_plugin: true,
            ..RecordingHost::default()
        };
        let instrumenter = register(&mut host, &InstrumentConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(host.registrations.len(), 1);
        let (scope, has_parameters, factory) = &host.registrations[0];
        assert_eq!(*scope, InstrumentationScope::ModuleAndDependencies);
        assert!(!has_parameters);
        assert_eq!(factory.context().runtime_class(), "io/strcloak/runtime/Strings");

        assert_eq!(host.runtime_classes.len(), 1);
        let (name, bytes) = &host.runtime_classes[0];
        assert_eq!(name, "io/strcloak/runtime/Strings");
        assert_eq!(
            ClassFile::parse(bytes).unwrap().this_class_name().unwrap(),
            *name
        );
        assert_eq!(instrumenter.summary().total(), 0);
    }

    #[test]
    fn registration_errors() {
        let mut host = RecordingHost::default();
        assert!(matches!(
            register(&mut host, &InstrumentConfig::default()),
            Err(Error::Configuration(_))
        ));

        let mut host = RecordingHost {
            application_plugin: true,
            ..RecordingHost::default()
        };
        assert!(matches!(
            register(&mut host, &InstrumentConfig::default().exclude("")),
            Err(Error::Configuration(_))
        ));
        assert!(register(&mut host, &InstrumentConfig::disabled())
            .unwrap()
            .is_none());
        assert!(host.registrations.is_empty());
        assert!(host.runtime_classes.is_empty());
    }

    #[test]
    fn factory_respects_selection() {
        let instrumenter =
            Instrumenter::new(InstrumentConfig::default().exclude("com.example.generated.*"))
                .unwrap();
        let selected = ClassDescriptor::new("com.example.Greeting", ClassOrigin::Dependency);
        let excluded = ClassDescriptor::new("com.example.generated.Stub", ClassOrigin::Module);

        let chain = instrumenter.create(&selected, StageChain::new());
        assert_eq!(chain.names().collect::<Vec<_>>(), ["constant-rewriter"]);
        assert!(instrumenter.create(&excluded, StageChain::new()).is_empty());
    }

    #[test]
    fn batch_writes_everything_in_order() {
        init_logging();
        let instrumenter =
            Instrumenter::new(InstrumentConfig::default().exclude("com.example.generated.*"))
                .unwrap();
        let generated = ClassBuilder::new("com/example/generated/Stub")
            .method_returning_literal("id", "stub")
            .build();
        let empty = ClassBuilder::new("com/example/Empty").build();
        let inputs = vec![
            input("com/example/Greeting", ClassBuilder::greeting().build()),
            input("com/example/generated/Stub", generated.clone()),
            input("com/example/Empty", empty.clone()),
            ClassInput::new(
                "org/lib/Kitchen",
                ClassOrigin::Dependency,
                ClassBuilder::kitchen_sink().build(),
            ),
        ];

        let sink = MemorySink::new();
        let report = instrumenter.run_batch(&inputs, &sink).unwrap();
        assert_eq!(
            report,
            BatchReport {
                rewritten: 2,
                unchanged: 1,
                skipped: 1,
                passed_through: 0,
                literals: 7,
            }
        );
        assert_eq!(instrumenter.summary(), report);
        assert_eq!(sink.len(), 4);
        assert_eq!(sink.get("com/example/generated/Stub").unwrap(), generated);
        assert_eq!(sink.get("com/example/Empty").unwrap(), empty);
        assert_eq!(
            evaluate_literal_loads(&sink.get("com/example/Greeting").unwrap(), "hello"),
            ["hi"]
        );
        assert_eq!(
            instrumenter
                .reports()
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>(),
            [
                "com/example/Greeting",
                "com/example/generated/Stub",
                "com/example/Empty",
                "org/lib/Kitchen"
            ]
        );
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let instrumenter = Instrumenter::new(InstrumentConfig::default()).unwrap();
        let good = ClassBuilder::greeting().build();
        let truncated = good[..good.len() - 7].to_vec();
        let inputs = vec![
            input("com/example/Greeting", good),
            input("com/example/Broken", truncated),
        ];

        let sink = MemorySink::new();
        let error = instrumenter.run_batch(&inputs, &sink).unwrap_err();
        match &error {
            Error::Class { class, .. } => assert_eq!(class, "com.example.Broken"),
            other => panic!("unexpected error {other}"),
        }
        assert!(error.is_malformed_input());
        assert!(sink.is_empty());
        assert_eq!(instrumenter.summary().total(), 0);
    }

    #[test]
    fn version_policy() {
        let mut newer = ClassBuilder::greeting().build();
        newer[6] = 0;
        newer[7] = 99;
        let classes = [input("com/example/Greeting", newer.clone())];

        let strict = Instrumenter::new(InstrumentConfig::default()).unwrap();
        let error = strict.run_batch(&classes, &MemorySink::new()).unwrap_err();
        assert!(matches!(
            error.root(),
            Error::UnsupportedVersion { major: 99, .. }
        ));

        let lenient = Instrumenter::new(
            InstrumentConfig::default().with_version_policy(VersionPolicy::PassThrough),
        )
        .unwrap();
        let sink = MemorySink::new();
        let report = lenient.run_batch(&classes, &sink).unwrap();
        assert_eq!(report.passed_through, 1);
        assert_eq!(sink.get("com/example/Greeting").unwrap(), newer);
    }

    #[test]
    fn process_streams_single_classes() {
        let instrumenter = Instrumenter::new(InstrumentConfig::default()).unwrap();
        let sink = MemorySink::new();
        let report = instrumenter
            .process(&input("com/example/Greeting", ClassBuilder::greeting().build()), &sink)
            .unwrap();
        assert_eq!(report.action, ClassAction::Rewritten);
        assert_eq!(report.literals, 1);

        let bad = input("com/example/Bad", vec![0xCA, 0xFE, 0xBA, 0xBE]);
        assert!(instrumenter.process(&bad, &sink).is_err());
        assert_eq!(sink.len(), 1);
        assert_eq!(instrumenter.summary().rewritten, 1);
    }

    #[test]
    fn directory_sink_layout() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.accept("com/example/Greeting", b"bytes").unwrap();
        let path = dir.path().join("com").join("example").join("Greeting.class");
        assert_eq!(fs::read(&path).unwrap(), b"bytes");
        assert_eq!(sink.path_of("com/example/Greeting"), path);

        assert!(sink.accept("../escape", b"").is_err());
        assert!(sink.accept("a//b", b"").is_err());

        let input = ClassInput::from_file(dir.path(), &path, ClassOrigin::Module).unwrap();
        assert_eq!(input.name, "com/example/Greeting");
        assert_eq!(input.bytes, b"bytes");
        assert!(ClassInput::from_file(&dir.path().join("other"), &path, ClassOrigin::Module)
            .is_err());
    }

    #[test]
    fn rewritten_classes_run_on_a_jvm() {
        let Some(jvm) = Jvm::detect() else {
            eprintln!("java not found, skipping");
            return;
        };
        init_logging();
        log::info!("running on {}", jvm.version);

        let mut host = RecordingHost {
            application_plugin: true,
            ..RecordingHost::default()
        };
        let instrumenter = register(&mut host, &InstrumentConfig::default().with_seed("jvm"))
            .unwrap()
            .unwrap();

        let mut calls = vec![
            ("com/example/Greeting", "hello", None),
            ("com/example/Kitchen", "pick", Some(0)),
            ("com/example/Kitchen", "pick", Some(1)),
            ("com/example/Kitchen", "pick", Some(100)),
            ("com/example/Kitchen", "pick", Some(7)),
            ("com/example/Constants", "token", None),
        ];
        let mut expected = vec!["hi", "zero", "one", "hundred", "done", "api-token"];
        let constants = ClassBuilder::new("com/example/Constants")
            .constant_field("TOKEN", "api-token", true)
            .method_returning_static("token", "TOKEN")
            .build();
        let mut inputs = vec![
            input("com/example/Greeting", ClassBuilder::greeting().build()),
            input("com/example/Kitchen", ClassBuilder::kitchen_sink().build()),
            input("com/example/Constants", constants),
        ];
        // dynamic constants need class file version 55
        if jvm.feature_release().is_some_and(|release| release >= 11) {
            calls.push(("com/example/Concat", "label", Some(7)));
            expected.push("item #7 of many");
            let concat = ClassBuilder::new("com/example/Concat")
                .version(55)
                .concat_method("label", "\u{2}\u{1} of many", &["item #"])
                .build();
            inputs.push(input("com/example/Concat", concat));
        }
        let main = ClassBuilder::main_printing("com/example/Main", &calls).build();
        inputs.push(input("com/example/Main", main));

        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        instrumenter.run_batch(&inputs, &sink).unwrap();
        for (name, bytes) in &host.runtime_classes {
            sink.accept(name, bytes).unwrap();
        }

        let output = jvm.run(dir.path(), "com.example.Main");
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert_eq!(
            String::from_utf8_lossy(&output.stdout).lines().collect::<Vec<_>>(),
            expected
        );
    }
}
