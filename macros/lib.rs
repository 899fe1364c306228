//! Re-exports the attribute and function-like proc-macros used to build the
//! solver's option registry and parameterized tests, so downstream crates
//! depend on a single `macros` path dependency instead of the individual
//! proc-macro crates.

pub use options::{build_option_enum, build_options, explicit_options, use_option};
pub use testing::{type_parameterized_test, value_parameterized_test};
