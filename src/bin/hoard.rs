//! hoard CLI
//!
//! Command-line interface for archive snapshots.
//!
//! Provides commands for:
//! - Initializing a working tree
//! - Taking snapshots into a configured repository
//! - Listing stored versions
//! - Restoring a version into a directory
//! - Trimming old versions per retention settings

use clap::{Parser, Subcommand};
use hoard::{
    create_version, open_repository, read_version, restore_tree, trim_versions, BlockStore,
    CancelToken, ConsoleSink, HoardError, MemoryBlockStore, MemoryVersionStore, RepoConfig,
    RepoKind, SnapshotOptions, VersionStore, WorkingTree,
};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Format bytes as human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[derive(Parser)]
#[command(name = "hoard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental encrypted snapshots of directory trees")]
#[command(long_about = "hoard - Snapshot CLI\n\n\
    hoard records versions of a working tree into a content-addressed\n\
    repository. Raw files are piped through an externally configured encoder\n\
    program (typically an encryption tool), and unchanged files reuse blocks\n\
    already present in the repository.\n\n\
    A working tree is any directory with a .hoard control directory; create\n\
    one with 'hoard init'. Repositories and encoder commands are configured\n\
    in .hoard/config, ignore rules in .hoard/ignore.\n\n\
    Examples:\n\
      hoard init photos --repo-root /mnt/backup/hoard\n\
      hoard snapshot -v\n\
      hoard versions\n\
      hoard restore -o ./restored\n\
      hoard trim")]
pub struct Cli {
    /// Repository name from .hoard/config (required when several are
    /// configured)
    #[arg(short, long, global = true, value_name = "NAME")]
    repo: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a working tree in the current directory
    #[command(long_about = "Initialize a working tree in the current directory\n\n\
        Creates the .hoard control directory with archive settings, an empty\n\
        ignore file, and the local versions directory. With --repo-root the\n\
        filesystem repository is created as well and the archive registered\n\
        in it.\n\n\
        Example:\n\
          hoard init photos --repo-root /mnt/backup/hoard\n\
          hoard init notes --encode 'age -e -r KEY' --decode 'age -d -i key.txt'")]
    Init {
        /// Archive name
        #[arg(value_name = "NAME")]
        name: String,

        /// Create a filesystem repository at this path and register it
        #[arg(long, value_name = "DIR")]
        repo_root: Option<PathBuf>,

        /// Encoder command reading plaintext on stdin, writing ciphertext
        /// on stdout
        #[arg(long, default_value = "cat", value_name = "CMD")]
        encode: String,

        /// Decoder command reversing the encoder
        #[arg(long, default_value = "cat", value_name = "CMD")]
        decode: String,
    },

    /// Record a new version of the working tree
    #[command(long_about = "Record a new version of the working tree\n\n\
        Walks the tree honoring ignore rules, hashes changed files, stores\n\
        missing blocks through the encoder, and writes the version index to\n\
        the repository.\n\n\
        Example:\n\
          hoard snapshot\n\
          hoard snapshot -j 4 -v")]
    Snapshot {
        /// Concurrent encoder invocations
        #[arg(short, long, default_value_t = 1, value_name = "N")]
        jobs: usize,

        /// Encoder timeout in seconds
        #[arg(long, default_value_t = 60, value_name = "SECS")]
        timeout: u64,
    },

    /// List versions stored for this archive
    Versions,

    /// Restore a version into a directory
    #[command(long_about = "Restore a version into a directory\n\n\
        Reads the version index through the decoder, then decodes each block\n\
        and verifies the restored plaintext against its recorded identity.\n\n\
        Example:\n\
          hoard restore -o ./restored\n\
          hoard restore 20221204-14882-abcde -o ./restored")]
    Restore {
        /// Version id (defaults to the most recent)
        #[arg(value_name = "ID")]
        version: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Decoder timeout in seconds
        #[arg(long, default_value_t = 60, value_name = "SECS")]
        timeout: u64,
    },

    /// Remove old versions according to retention settings
    Trim,
}

fn open_stores(
    tree: &WorkingTree,
    name: Option<&str>,
) -> hoard::Result<(RepoConfig, Box<dyn VersionStore>, Box<dyn BlockStore>)> {
    let repo = tree.repository(name)?;
    match &repo.kind {
        RepoKind::File { root } => {
            let (versions, blocks) = open_repository(root)?;
            Ok((repo, Box::new(versions), Box::new(blocks)))
        }
        RepoKind::Memory => {
            eprintln!("warning: memory repository holds nothing across invocations");
            Ok((
                repo,
                Box::new(MemoryVersionStore::new()),
                Box::new(MemoryBlockStore::new()),
            ))
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> hoard::Result<()> {
    let cli = Cli::parse();
    let cwd = env::current_dir()?;

    match cli.command {
        Commands::Init {
            name,
            repo_root,
            encode,
            decode,
        } => {
            let tree = WorkingTree::init(&cwd, &name, &encode, &decode)?;
            println!("✓ Initialized archive {:?} in {}", name, tree.root().display());

            if let Some(root) = repo_root {
                let mut config = tree.config_text()?;
                config.push_str(&format!(
                    "\n[repository.main]\ntype = file\nroot = {}\n",
                    root.display()
                ));
                std::fs::write(tree.config_path(), &config)?;

                let (versions, _blocks) = open_repository(&root)?;
                versions.write_archive_config(&name, &tree.config_text()?)?;
                println!("✓ Repository ready at {}", root.display());
            }
            Ok(())
        }

        Commands::Snapshot { jobs, timeout } => {
            let tree = WorkingTree::discover(&cwd)?;
            let mut archive = tree.load_archive()?;
            let (repo, versions, blocks) = open_stores(&tree, cli.repo.as_deref())?;
            repo.apply_commands(&mut archive);

            let opts = SnapshotOptions {
                parallelism: jobs.max(1),
                encoder_timeout: Duration::from_secs(timeout),
            };
            let sink = ConsoleSink::new(cli.verbose);
            let report = create_version(
                &tree,
                &archive,
                blocks.as_ref(),
                versions.as_ref(),
                &opts,
                &CancelToken::new(),
                &sink,
            )?;

            println!(
                "✓ Version {} recorded: {} entries, {} ({} stored, {} reused)",
                report.version.id,
                report.version.tree_count,
                format_bytes(report.version.tree_size),
                report.blocks_stored,
                report.blocks_reused,
            );
            if cli.verbose {
                println!(
                    "  {} hashed, {} cache hits, index {}",
                    report.files_hashed,
                    report.cache_hits,
                    format_bytes(report.version.size)
                );
            }
            Ok(())
        }

        Commands::Versions => {
            let tree = WorkingTree::discover(&cwd)?;
            let mut archive = tree.load_archive()?;
            let (_repo, versions, _blocks) = open_stores(&tree, cli.repo.as_deref())?;
            archive.load_versions(versions.as_ref())?;

            if archive.versions.is_empty() {
                println!("No versions stored for {:?}", archive.name);
            } else {
                println!("Versions of {:?}: {}", archive.name, archive.versions.len());
                for v in &archive.versions {
                    println!("  {}  {:>10}", v.id, format_bytes(v.size));
                }
            }
            Ok(())
        }

        Commands::Restore {
            version,
            output,
            timeout,
        } => {
            let tree = WorkingTree::discover(&cwd)?;
            let mut archive = tree.load_archive()?;
            let (repo, versions, blocks) = open_stores(&tree, cli.repo.as_deref())?;
            repo.apply_commands(&mut archive);
            let timeout = Duration::from_secs(timeout);
            let cancel = CancelToken::new();

            let id = match version {
                Some(id) => id,
                None => versions
                    .get_archive(&archive.name)?
                    .and_then(|meta| meta.latest().map(|v| v.id.clone()))
                    .ok_or_else(|| {
                        HoardError::VersionStore(format!(
                            "no versions stored for {:?}",
                            archive.name
                        ))
                    })?,
            };

            let sink = ConsoleSink::new(cli.verbose);
            let version = read_version(&archive, versions.as_ref(), &id, timeout, &cancel)?;
            let summary = restore_tree(
                &archive,
                &version,
                blocks.as_ref(),
                &output,
                timeout,
                &cancel,
                &sink,
            )?;

            println!(
                "✓ Restored {} to {}: {} files ({}), {} dirs, {} symlinks",
                id,
                output.display(),
                summary.files,
                format_bytes(summary.bytes),
                summary.directories,
                summary.symlinks,
            );
            if summary.skipped > 0 {
                println!("  {} entries of unknown type skipped", summary.skipped);
            }
            Ok(())
        }

        Commands::Trim => {
            let tree = WorkingTree::discover(&cwd)?;
            let archive = tree.load_archive()?;
            let (repo, versions, _blocks) = open_stores(&tree, cli.repo.as_deref())?;

            if !repo.trim.is_configured() {
                println!(
                    "Repository {:?} has no trim settings; nothing to do",
                    repo.name
                );
                return Ok(());
            }

            let sink = ConsoleSink::new(cli.verbose);
            let outcome =
                trim_versions(&tree, &archive.name, versions.as_ref(), &repo.trim, &sink)?;
            if outcome.removed.is_empty() {
                println!("✓ Nothing to trim ({} versions kept)", outcome.kept);
            } else {
                println!(
                    "✓ Trimmed {} versions, {} kept",
                    outcome.removed.len(),
                    outcome.kept
                );
                for id in &outcome.removed {
                    println!("  removed {}", id);
                }
            }
            Ok(())
        }
    }
}
