use clap::{Parser, Subcommand};
use miette::{miette, Result};
use std::path::PathBuf;

use dex_mir::cli;
use dex_mir::config::CompilerFilter;

#[derive(Parser)]
#[command(name = "dex-mir")]
#[command(about = "Block graph, SSA and check elimination for Dalvik methods")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the block graph of each method and print blocks and dominators
    Cfg {
        /// Input JSON file with one method or an array of methods
        input: PathBuf,

        /// Compiler options file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output DOT file for visualization (optional)
        #[arg(short, long)]
        dot: Option<PathBuf>,

        /// Include unreachable and hidden blocks in the DOT output
        #[arg(long)]
        all_blocks: bool,
    },

    /// Run the full pipeline and print a per-method summary
    Compile {
        /// Input JSON file with one method or an array of methods
        input: PathBuf,

        /// Compiler options file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write a DOT file per compiled method into this directory
        #[arg(long)]
        dump_dir: Option<PathBuf>,

        /// Suffix appended to dump file names
        #[arg(long)]
        suffix: Option<String>,

        /// Compiler filter (interpret-only, space, balanced, speed, everything)
        #[arg(short, long)]
        filter: Option<CompilerFilter>,

        /// Worker threads (defaults to one per core)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Verify SSA form after conversion
        #[arg(long)]
        verify: bool,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cfg {
            input,
            config,
            dot,
            all_blocks,
        } => cli::cfg::cfg(&input, config.as_deref(), dot.as_deref(), all_blocks)
            .map_err(|e| miette!("{}", e)),
        Commands::Compile {
            input,
            config,
            dump_dir,
            suffix,
            filter,
            jobs,
            verify,
            json,
        } => {
            let args = cli::compile::CompileArgs {
                input_path: input,
                config,
                dump_dir,
                suffix,
                filter,
                jobs,
                verify,
                json,
            };
            cli::compile::compile(&args).map_err(|e| miette!("{}", e))
        }
    }
}
