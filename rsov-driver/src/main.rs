use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use rsov_linker::{LinkOptions, LinkStats, Linker};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser, Debug)]
#[command(name = "rsov-link")]
#[command(about = "Links a compute kernel module into a SPIR-V wrapper module")]
#[command(version)]
struct Cli {
    /// Kernel module (SPIR-V text)
    #[arg(short, long)]
    kernel: PathBuf,

    /// Wrapper module (SPIR-V text)
    #[arg(short, long)]
    wrapper: PathBuf,

    /// Output file (defaults to <wrapper>.linked.spt)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with linker options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the prefix given to kernel identifiers
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Print link statistics as JSON
    #[arg(long)]
    stats: bool,

    /// Omit block banners and indentation in the output
    #[arg(long)]
    no_annotate: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn default_output_path(wrapper: &Path) -> PathBuf {
    wrapper.with_extension("linked.spt")
}

fn load_options(cli: &Cli) -> Result<LinkOptions> {
    let mut options = match &cli.config {
        Some(path) => LinkOptions::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LinkOptions::default(),
    };

    if let Some(prefix) = &cli.prefix {
        options.kernel_prefix = prefix.clone();
    }
    if cli.no_annotate {
        options.annotate_blocks = false;
    }
    options.validate()?;
    Ok(options)
}

fn run(cli: &Cli) -> Result<(PathBuf, LinkStats)> {
    let options = load_options(cli)?;
    debug!("Linker options: {:?}", options);

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.wrapper));

    let stats = Linker::new(options).link_files(&cli.kernel, &cli.wrapper, &output)?;
    Ok((output, stats))
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::init();
    }

    match run(&cli) {
        Ok((output, stats)) => {
            println!(
                "Linked {} into {}: {} call(s) inlined, {} definition(s) fused, {} lines",
                stats.kernel,
                output.display(),
                stats.inlined_calls,
                stats.fused_definitions,
                stats.lines
            );
            if cli.stats {
                match serde_json::to_string_pretty(&stats) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Failed to serialize stats: {}", e),
                }
            }
        }
        Err(e) => {
            eprintln!("Linking failed: {:#}", e);
            process::exit(1);
        }
    }
}
