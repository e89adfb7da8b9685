use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::bail;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use doctag_core::{
    format_filename, parse_filename, sort_files, sync_files, CommandTagStore, NoopTagStore,
    SortOptions, SyncOptions, TagStore, DEFAULT_TAG_EXE,
};

#[derive(Parser)]
#[command(name = "doctag", version, about = "Keep document filenames, dates and finder tags in sync")]
struct Cli {
    /// Finder tag helper (`tag --list` / `tag --set` compatible)
    #[arg(long, global = true, env = "DOCTAG_TAG_EXE", default_value = DEFAULT_TAG_EXE)]
    tag_exe: PathBuf,

    /// Neither read nor write finder tags
    #[arg(long, global = true)]
    no_finder_tags: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge finder tags into filenames (and back), adding a date prefix
    Sync {
        /// Files to sync; a single `-` reads paths from stdin
        files: Vec<PathBuf>,

        /// Only show what would change
        #[arg(short = 's', long)]
        dry_run: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move documents into <output>/YYYY/MM under their canonical name
    Sort {
        /// Files to sort; a single `-` reads paths from stdin
        files: Vec<PathBuf>,

        /// Root of the dated directory tree
        #[arg(short, long, env = "DOCTAG_SORT_OUTPUT_DIR")]
        output: PathBuf,

        /// Only show what would change
        #[arg(short = 's', long)]
        dry_run: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print date, base name and tags encoded in filenames as JSON
    Parse {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Build a filename from a base name, date and tags
    Format {
        base_name: String,

        /// Date prefix (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Tag to encode (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "doctag=debug,doctag_core=debug"
        } else {
            "doctag=info,doctag_core=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// `-` alone means "one path per line on stdin".
fn expand_files(files: Vec<PathBuf>) -> anyhow::Result<Vec<PathBuf>> {
    if files.len() == 1 && files[0].as_os_str() == "-" {
        let mut out = Vec::new();
        for line in io::stdin().lock().lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                out.push(PathBuf::from(line));
            }
        }
        tracing::debug!("{} path(s) read from stdin", out.len());
        return Ok(out);
    }
    Ok(files)
}

fn tag_store(cli: &Cli) -> Box<dyn TagStore> {
    if cli.no_finder_tags {
        Box::new(NoopTagStore)
    } else {
        Box::new(CommandTagStore::new(&cli.tag_exe))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let t_total = std::time::Instant::now();
    let store = tag_store(&cli);

    match cli.command {
        Command::Sync { files, dry_run, json } => {
            let files = expand_files(files)?;
            if files.is_empty() {
                println!("No files given, nothing to do.");
                return Ok(());
            }

            let report = sync_files(&files, store.as_ref(), &SyncOptions { dry_run });
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for outcome in &report.synced {
                    println!("{}", outcome.destination.display());
                }
            }
            eprintln!(
                "Done! {} synced, {} renamed, {} failed ({:.2}s)",
                report.synced.len(),
                report.synced.iter().filter(|o| o.renamed).count(),
                report.failed.len(),
                t_total.elapsed().as_secs_f64()
            );
            if !report.failed.is_empty() {
                bail!("{} file(s) could not be synced", report.failed.len());
            }
        }
        Command::Sort {
            files,
            output,
            dry_run,
            json,
        } => {
            let files = expand_files(files)?;
            if files.is_empty() {
                println!("No files given, nothing to do.");
                return Ok(());
            }

            let options = SortOptions { output, dry_run };
            let result = sort_files(&files, store.as_ref(), &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for outcome in &result.outcomes {
                    if let Some(dest) = &outcome.destination {
                        println!("{} -> {}", outcome.source.display(), dest.display());
                    }
                }
            }
            eprintln!(
                "Done! {} of {} files {}, {} already sorted, {} failed ({:.2}s)",
                result.moved,
                result.total,
                if dry_run { "to move" } else { "moved" },
                result.skipped,
                result.failed,
                t_total.elapsed().as_secs_f64()
            );
            if result.failed > 0 {
                bail!("{} file(s) could not be sorted", result.failed);
            }
        }
        Command::Parse { names } => {
            let mut failed = 0usize;
            for name in &names {
                match parse_filename(name) {
                    Ok(parsed) => println!("{}", serde_json::to_string(&parsed)?),
                    Err(e) => {
                        eprintln!("{}", e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} name(s) could not be parsed", failed);
            }
        }
        Command::Format {
            base_name,
            date,
            tags,
        } => {
            println!("{}", format_filename(&base_name, date, &tags)?);
        }
    }

    Ok(())
}
