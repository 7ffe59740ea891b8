//! Krait - run scripts that spawn thread-backed workers
//!
//! Usage:
//! - `krait main.js` runs a script and its workers until they are all done
//! - `krait run main.ts --assets scripts/` resolves worker ids against a directory
//! - `krait transpile worker.ts` prints the JavaScript a worker would execute

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use krait::runtime::{Runtime, RuntimeConfig};
use krait::transpiler::{Transpiler, TranspilerConfig};
use krait::worker::WorkerConfig;

#[derive(Parser)]
#[command(name = "krait")]
#[command(author, version, about = "Thread-per-worker script runtime powered by Boa and OXC")]
struct Cli {
    /// TypeScript/JavaScript file to execute
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script and drive its workers until they finish
    Run {
        /// Script to execute
        script: PathBuf,

        /// Directory worker script ids are resolved against
        /// (defaults to the script's directory)
        #[arg(long)]
        assets: Option<PathBuf>,

        /// Host loop period in milliseconds
        #[arg(long, default_value_t = 16)]
        tick_ms: u64,

        /// Worker idle sleep in milliseconds (0 busy-polls)
        #[arg(long, default_value_t = 0)]
        poll_ms: u64,

        /// Stop the host loop after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Transpile a TypeScript file to JavaScript
    Transpile {
        /// Input TypeScript file
        input: PathBuf,

        /// Output JavaScript file (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minify the output
        #[arg(short, long)]
        minify: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            script,
            assets,
            tick_ms,
            poll_ms,
            timeout_secs,
        }) => {
            let poll = (poll_ms > 0).then(|| Duration::from_millis(poll_ms));
            let config = RuntimeConfig {
                tick_interval: Duration::from_millis(tick_ms),
                max_runtime: Duration::from_secs(timeout_secs),
                worker: WorkerConfig {
                    poll_interval: poll,
                    ..WorkerConfig::default()
                },
                ..RuntimeConfig::default()
            };
            run_script(&script, assets, config)?;
        }
        Some(Commands::Transpile {
            input,
            output,
            minify,
        }) => {
            transpile_file(&input, output.as_deref(), minify)?;
        }
        None => {
            if let Some(script) = cli.script {
                run_script(&script, None, RuntimeConfig::default())?;
            } else {
                eprintln!(
                    "{}: no script given. Try `krait <script>` or `krait --help`",
                    "Error".red()
                );
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

/// Split `script` into an asset root and the id the loader resolves
fn locate(script: &Path, assets: Option<PathBuf>) -> Result<(PathBuf, String)> {
    let script = script.canonicalize().into_diagnostic()?;

    let root = match assets {
        Some(dir) => dir.canonicalize().into_diagnostic()?,
        None => script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let id = script
        .strip_prefix(&root)
        .map_err(|_| {
            miette::miette!(
                "{} is not inside the asset directory {}",
                script.display(),
                root.display()
            )
        })?
        .to_string_lossy()
        .replace('\\', "/");

    Ok((root, id))
}

/// Run a script file with the host loop, then tear its workers down
fn run_script(script: &Path, assets: Option<PathBuf>, mut config: RuntimeConfig) -> Result<()> {
    let (root, id) = locate(script, assets)?;
    config.asset_root = root;

    let mut runtime = Runtime::new(config).into_diagnostic()?;

    if let Err(e) = runtime.run_script(&id) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }

    Ok(())
}

/// Transpile a TypeScript file and write or print the result
fn transpile_file(input: &Path, output: Option<&Path>, minify: bool) -> Result<()> {
    let transpiler = Transpiler::with_config(TranspilerConfig { minify });

    let js_code = transpiler.transpile_file(input).into_diagnostic()?;

    if let Some(output_path) = output {
        std::fs::write(output_path, &js_code).into_diagnostic()?;
        println!(
            "{}: Transpiled {} -> {}",
            "Success".green(),
            input.display(),
            output_path.display()
        );
    } else {
        println!("{}", js_code);
    }

    Ok(())
}
