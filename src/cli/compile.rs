use crate::config::{CompilerFilter, DebugFlags};
use crate::error::{Error, Result};
use crate::frontend::{compile_method, load_methods, CompilationOutcome, CompilationStatus};
use rayon::prelude::*;
use std::path::PathBuf;

/// Arguments of the `compile` subcommand. Values given here override the
/// configuration file.
#[derive(Debug, Clone, Default)]
pub struct CompileArgs {
    pub input_path: PathBuf,
    pub config: Option<PathBuf>,
    pub dump_dir: Option<PathBuf>,
    pub suffix: Option<String>,
    pub filter: Option<CompilerFilter>,
    pub jobs: Option<usize>,
    pub verify: bool,
    pub json: bool,
}

/// Run the default pipeline over every method of the input file and print
/// one summary line per method.
pub fn compile(args: &CompileArgs) -> Result<()> {
    let mut options = super::load_options(args.config.as_deref())?;
    if let Some(filter) = args.filter {
        options.filter = filter;
    }
    if let Some(dir) = &args.dump_dir {
        options.dump_dir = Some(dir.clone());
        options.debug |= DebugFlags::DUMP_CFG;
    }
    if args.suffix.is_some() {
        options.dump_suffix = args.suffix.clone();
    }
    if args.verify {
        options.debug |= DebugFlags::VERIFY_DATAFLOW;
    }
    if let Some(dir) = &options.dump_dir {
        std::fs::create_dir_all(dir)?;
    }

    let methods = load_methods(&args.input_path)?;
    let mut pool = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = args.jobs {
        pool = pool.num_threads(jobs);
    }
    let pool = pool
        .build()
        .map_err(|e| Error::internal(format!("Failed to start worker pool: {}", e)))?;

    let outcomes: Vec<CompilationOutcome> = pool.install(|| {
        methods
            .into_par_iter()
            .map(|method| compile_method(&method.into_unit(), &options))
            .collect()
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        print_summary(&outcomes);
    }
    Ok(())
}

fn print_summary(outcomes: &[CompilationOutcome]) {
    for outcome in outcomes {
        let status = match outcome.status {
            CompilationStatus::Compiled => "compiled",
            CompilationStatus::Skipped => "skipped",
            CompilationStatus::Rejected => "rejected",
        };
        let mut line = format!(
            "{:<9} {}  blocks={} ssa={}",
            status, outcome.method, outcome.blocks, outcome.ssa_names
        );
        if let Some(checks) = outcome.checks {
            line.push_str(&format!(
                " null={}/{} range={}/{}",
                checks.null_checks_eliminated,
                checks.null_checks,
                checks.range_checks_eliminated,
                checks.range_checks
            ));
        }
        if let Some(reason) = &outcome.reason {
            line.push_str(&format!(" ({})", reason));
        }
        println!("{}", line);
    }
    let count = |status| outcomes.iter().filter(|o| o.status == status).count();
    println!(
        "{} methods: {} compiled, {} skipped, {} rejected",
        outcomes.len(),
        count(CompilationStatus::Compiled),
        count(CompilationStatus::Skipped),
        count(CompilationStatus::Rejected)
    );
}
