use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rubric::{ErrorQueue, GlobalState, Options, StrictLevel, typecheck};

/// A static type-checker for a dynamically-typed, object-oriented scripting
/// language.
#[derive(Debug, Parser)]
#[command(name = "rubric", version, about)]
struct Args {
    /// Source files to check.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Worker threads for the parallel phases.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Override every file's strictness level.
    #[arg(long, value_enum)]
    typed: Option<TypedLevel>,

    /// Print an intermediate representation instead of just diagnostics.
    #[arg(long, value_enum)]
    print: Option<PrintKind>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TypedLevel {
    Ignore,
    False,
    True,
    Strict,
    Strong,
}

impl From<TypedLevel> for StrictLevel {
    fn from(level: TypedLevel) -> Self {
        match level {
            TypedLevel::Ignore => Self::Ignore,
            TypedLevel::False => Self::False,
            TypedLevel::True => Self::True,
            TypedLevel::Strict => Self::Strict,
            TypedLevel::Strong => Self::Strong,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PrintKind {
    Ast,
    AstRaw,
    Cfg,
    CfgRaw,
    SymbolTable,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(&Args::parse()) {
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<bool> {
    let mut queue = ErrorQueue::new();
    let mut gs = GlobalState::new(&queue);

    let mut files = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let source = std::fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        let file = gs.enter_file(input.display().to_string(), source);
        if let Some(level) = args.typed {
            gs.override_strictness(file, level.into());
        }
        files.push(file);
    }

    let options = Options {
        workers: args.threads,
        cancel: Arc::new(AtomicBool::new(false)),
        // The raw dump brackets blocks with environment snapshots.
        debug_environments: matches!(args.print, Some(PrintKind::CfgRaw)),
    };
    let results = typecheck(&mut gs, &mut queue, &files, &options);

    let mut clean = true;
    for result in &results {
        match args.print {
            Some(PrintKind::Ast) => print!("{}", result.tree.show(&gs)),
            Some(PrintKind::AstRaw) => print!("{}", result.tree.show_raw(&gs)),
            Some(PrintKind::Cfg) => {
                for cfg in &result.cfgs {
                    print!("{}", cfg.show(&gs));
                }
            }
            Some(PrintKind::CfgRaw) => {
                for cfg in &result.cfgs {
                    print!("{}", cfg.show_raw(&gs));
                }
            }
            Some(PrintKind::SymbolTable) | None => {}
        }
        for error in &result.errors {
            clean = false;
            eprintln!("{}: {error}", gs.file(result.file).path);
        }
    }
    if matches!(args.print, Some(PrintKind::SymbolTable)) {
        print!("{}", gs.show_symbol_table());
    }
    Ok(clean)
}
