//! Pure condensing algorithms.
//!
//! Every module here is synchronous and side-effect free: parse a payload,
//! classify its structure, characterize table columns, reduce, and render.
//! The proxy layers above own all I/O and configuration.

pub mod columns;
pub mod flatten;
pub mod parsers;
pub mod reduce;
pub mod render;
pub mod tokens;
pub mod toon;
