//! A ChocoPy front end: lexer, parser, and the semantic passes (symbol-table
//! generation, declaration analysis, bidirectional type checking) that lower
//! a source file into an SSA-like IR `Module`. Structured as a pipeline of
//! independent passes over a shared AST, the way mmcc's own front end chains
//! `HirBuild`/`NameAnalyzer`/`TypeCheck` passes ahead of its own IR builder.

pub mod build_mir;
pub mod declck;
pub mod diagnostics;
pub mod driver;
pub mod hierarchy;
pub mod idx;
pub mod lexer;
pub mod nameck;
pub mod parser;
pub mod span;
pub mod symbol;
pub mod typeck;
pub mod types;

pub use driver::Compiler;
