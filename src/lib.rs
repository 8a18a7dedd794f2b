//! dex-mir: mid-level IR for a Dalvik bytecode JIT
//!
//! This library turns a decoded method into a graph of basic blocks of MIR
//! instructions, computes dominance, converts to SSA form, and runs type
//! inference together with null-check and bounds-check elimination.

pub mod analysis;
pub mod cfg;
pub mod cli;
pub mod config;
pub mod dex;
pub mod error;
pub mod frontend;
pub mod utils;

pub use cfg::builder::build;
pub use cfg::{BasicBlock, BlockId, Mir, MirGraph, MirId};
pub use config::CompilerOptions;
pub use error::{Error, Result};
pub use frontend::{compile_method, CompilationOutcome, CompilationStatus};
