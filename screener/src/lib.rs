//! Stock screener query pipeline.
//!
//! Turns an untrusted natural-language screening query into a safely
//! executed, parameterized SQL query in four stages: translation (text →
//! DSL candidate), validation (candidate → typed document, allowlist
//! enforced), compilation (typed document → parameterized SQL with minimal
//! joins) and execution (bounded pool, statement timeout, classified
//! failures). Translator output never reaches the database untransformed:
//! the validator is the mandatory checkpoint and the compiler only accepts
//! documents the validator constructed.

pub mod catalog;
pub mod compile;
pub mod config;
pub mod dsl;
pub mod run;
pub mod screen;
pub mod translate;
pub mod validate;
