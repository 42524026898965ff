// Command-line interface.
//
// `oxipatch apply <old> <diff> <output>` runs the one-shot file variant.
// Stats go to stdout, human-readable by default or as JSON with `--json`.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use crate::io::{self, ApplyStats};

// ---------------------------------------------------------------------------
// Argument definitions
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "oxipatch",
    version,
    about = "Apply HDIFF binary deltas to files and images"
)]
struct Cli {
    /// Overwrite the output file if it exists.
    #[arg(short, long, global = true)]
    force: bool,

    /// Suppress non-error output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a diff to an old image, producing the new image.
    Apply {
        /// Old image file.
        old: PathBuf,
        /// Compressed diff file.
        diff: PathBuf,
        /// Output file for the patched image.
        output: PathBuf,
        /// Print stats as JSON.
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Apply {
            old,
            diff,
            output,
            json,
        } => {
            if output.exists() && !cli.force {
                eprintln!(
                    "oxipatch: output file exists: {} (use --force to overwrite)",
                    output.display()
                );
                process::exit(1);
            }

            match io::apply_file(&old, &diff, &output) {
                Ok(stats) => {
                    if !cli.quiet {
                        print_stats(&stats, json);
                    }
                    process::exit(0);
                }
                Err(e) => {
                    eprintln!("oxipatch: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

fn print_stats(stats: &ApplyStats, json: bool) {
    if json {
        let value = serde_json::json!({
            "old_size": stats.old_size,
            "diff_size": stats.diff_size,
            "new_size": stats.new_size,
            "output_sha256": stats.output_sha256.map(hex),
        });
        println!("{value}");
    } else {
        println!(
            "applied: {} B old + {} B diff -> {} B new",
            stats.old_size, stats.diff_size, stats.new_size
        );
        if let Some(digest) = stats.output_sha256 {
            println!("output sha256: {}", hex(digest));
        }
    }
}

fn hex(digest: [u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
