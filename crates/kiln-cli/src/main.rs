use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use kiln_core::{EngineConfig, EngineError, ScriptEngine};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Compile and run scripts against the kiln engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Directory scanned for .ncl libraries; repeatable
    #[arg(long = "library-root", global = true)]
    library_roots: Vec<PathBuf>,

    /// Using declarations applied before compiling; repeatable
    #[arg(long = "using", global = true)]
    usings: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and run its entry point
    Run {
        /// Script file to compile
        file: Option<PathBuf>,

        /// Inline script text instead of a file
        #[arg(short = 'e', long)]
        expr: Option<String>,
    },

    /// Compile a coroutine and print every step in order
    Steps {
        /// Script file to compile
        file: Option<PathBuf>,

        /// Inline script text instead of a file
        #[arg(short = 'e', long)]
        expr: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::TRACE
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(cli.debug)
        .with_writer(std::io::stderr)
        .init();

    let mut engine = ScriptEngine::new(EngineConfig {
        library_roots: cli.library_roots.clone(),
    });
    for using in &cli.usings {
        engine
            .add_usings(using)
            .with_context(|| format!("declaring `{using}`"))?;
    }

    match cli.command {
        Commands::Run { file, expr } => {
            let code = read_code(file, expr)?;
            let script = match engine.compile_code(&code) {
                Ok(script) => script,
                Err(err) => return report_compile_failure(&engine, err),
            };
            info!(generation = script.generation(), "script compiled");
            println!("{}", script.execute()?);
        }
        Commands::Steps { file, expr } => {
            let code = read_code(file, expr)?;
            let steps = match engine.compile_coroutine(&code) {
                Ok(steps) => steps,
                Err(err) => return report_compile_failure(&engine, err),
            };
            for step in steps {
                println!("{}", step?);
            }
        }
    }
    Ok(())
}

fn read_code(file: Option<PathBuf>, expr: Option<String>) -> Result<String> {
    match (file, expr) {
        (Some(path), None) => {
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        }
        (None, Some(expr)) => Ok(expr),
        (Some(_), Some(_)) => bail!("pass either a file or --expr, not both"),
        (None, None) => bail!("nothing to compile; pass a file or --expr"),
    }
}

fn report_compile_failure(engine: &ScriptEngine, err: EngineError) -> Result<()> {
    for diagnostic in &engine.last_report().errors {
        eprintln!("{diagnostic}");
    }
    for diagnostic in &engine.last_report().warnings {
        eprintln!("{diagnostic}");
    }
    Err(err.into())
}
