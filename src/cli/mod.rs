//! Command-line interface module
//!
//! This module contains the implementations for the CLI subcommands.

pub mod cfg;
pub mod compile;

use crate::config::CompilerOptions;
use crate::error::Result;
use std::path::Path;

/// Options from `config` if given, defaults otherwise.
pub(crate) fn load_options(config: Option<&Path>) -> Result<CompilerOptions> {
    match config {
        Some(path) => CompilerOptions::from_file(path),
        None => Ok(CompilerOptions::default()),
    }
}
