//! Shared fixtures for unit tests.
//!
//! - [`ClassBuilder`] - assembles small, verifiable class files
//! - [`evaluate_literal_loads`] - what each string load of a method produces, decoding rewritten
//!   sequences with the runtime mirror
//! - [`Jvm`] - detection and invocation of a local `java`, for tests that run real bytecode


pub use builder::ClassBuilder;
pub use evaluate::evaluate_literal_loads;
pub use jvm::Jvm;

/// Route `log` output of the crate to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_module("strcloak", log::LevelFilter::Debug)
        .try_init();
}
