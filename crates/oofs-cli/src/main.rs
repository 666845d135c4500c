//! # oofs CLI
//!
//! Command-line access to OOFS stores on this machine or behind `oofsd`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use oofs_config::logging::{init_logging, LogLevel};
use oofs_config::Config;
use oofs_identity::{AuditLog, ConflictPolicy, PastePolicy};
use oofs_remote::{compare_between, copy_between, ProgressSink};
use oofs_wire::FileKind;
use uuid::Uuid;

mod admin;
mod location;
mod progress;

use location::{Access, Location};

/// OOFS: one view of object stores, here or remote
#[derive(Parser)]
#[command(name = "oofs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Login for remote locations without `login@`
    #[arg(long, global = true, env = "OOFS_LOGIN")]
    login: Option<String>,

    /// Password for remote locations
    #[arg(long, global = true, env = "OOFS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Server port (overrides config and OOFS_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Talk to oofsd even when the host is this machine
    #[arg(long, global = true)]
    remote: bool,

    /// Hide transfer progress
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Favor {
    Table,
    Tree,
}

impl From<Favor> for ConflictPolicy {
    fn from(favor: Favor) -> Self {
        match favor {
            Favor::Table => ConflictPolicy::FavorTable,
            Favor::Tree => ConflictPolicy::FavorTree,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show kind, size, mode and mtime
    Stat { target: Location },
    /// List a directory
    Ls { target: Location },
    /// Print a file to stdout
    Cat { target: Location },
    /// Upload a local file
    Put { file: PathBuf, target: Location },
    /// Copy a file or directory, possibly between machines
    Cp { src: Location, dst: Location },
    /// Exit non-zero when two files differ
    Cmp { a: Location, b: Location },
    /// Rename within one machine
    Mv { from: Location, to: PathBuf },
    /// Create LINK pointing at TARGET_TEXT
    Ln { target_text: PathBuf, link: Location },
    Readlink { target: Location },
    Realpath { target: Location },
    Mkdir { target: Location },
    Rmdir { target: Location },
    /// Remove a file or a whole tree
    Rm { target: Location },
    /// Pack a directory into a local archive file
    Archive {
        target: Location,
        #[arg(short, long)]
        output: PathBuf,
        /// Leave out subdirectories
        #[arg(long)]
        shallow: bool,
    },
    /// Unpack a local archive file into DEST
    Dearchive { archive: PathBuf, dest: Location },
    /// Paste an archived object tree at a new DEST
    Paste {
        archive: PathBuf,
        dest: Location,
        /// Give the pasted objects fresh identities
        #[arg(long)]
        renew: bool,
    },
    /// Replace files identical to their grandparent's copy with links
    Prototype {
        #[arg(required = true)]
        targets: Vec<Location>,
    },
    /// Object identities
    Uuid {
        #[command(subcommand)]
        command: UuidCommands,
    },
    /// Repair the identity table of the store at ROOT
    Reconcile {
        root: Location,
        /// Subtree to scan (defaults to ROOT)
        #[arg(long)]
        scan: Option<PathBuf>,
        #[arg(long)]
        shallow: bool,
        #[arg(long, value_enum, default_value = "table")]
        favor: Favor,
    },
    /// Collect unreferenced identities and report broken links
    Fixoofs {
        root: Location,
        /// Give every referenced object a new identity
        #[arg(long)]
        renumber: bool,
    },
    /// Print a default config.toml
    Config,
    /// Edit the local permission file
    Admin {
        #[command(subcommand)]
        command: admin::AdminCommands,
    },
}

#[derive(Subcommand)]
enum UuidCommands {
    /// Print an object's identity
    Get {
        target: Location,
        /// Store root on the same machine
        #[arg(long)]
        root: PathBuf,
        /// Assign an identity when the object has none
        #[arg(long)]
        create: bool,
    },
    /// Print the object holding an identity
    Lookup {
        uuid: Uuid,
        /// Store root, possibly remote
        root: Location,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let progress: Option<Arc<dyn ProgressSink>> = if cli.quiet {
        None
    } else {
        Some(Arc::new(progress::BarProgress::default()))
    };
    let access = Access {
        config,
        login: cli.login,
        password: cli.password,
        force_remote: cli.remote,
        progress,
    };
    run(cli.command, &access).await
}

async fn run(command: Commands, access: &Access) -> Result<()> {
    match command {
        Commands::Stat { target } => {
            let stat = access.connect(&target)?.stat(target.absolute_path()?).await?;
            println!(
                "{:<8} {:>12} {:o} {}",
                kind_name(stat.kind),
                stat.size,
                stat.mode & 0o7777,
                stat.mtime
            );
        }
        Commands::Ls { target } => {
            for entry in access.connect(&target)?.list(target.absolute_path()?).await? {
                let suffix = match entry.kind {
                    FileKind::Dir => "/",
                    FileKind::Symlink => "@",
                    _ => "",
                };
                println!("{}{}", entry.name, suffix);
            }
        }
        Commands::Cat { target } => {
            let data = access.connect(&target)?
                .read_file(target.absolute_path()?)
                .await?;
            std::io::stdout().write_all(&data)?;
        }
        Commands::Put { file, target } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Cannot read {}", file.display()))?;
            access.connect(&target)?
                .write_file(target.absolute_path()?, data)
                .await?;
        }
        Commands::Cp { src, dst } => {
            let (mut from, mut to) = (access.connect(&src)?, access.connect(&dst)?);
            copy_between(&mut from, src.absolute_path()?, &mut to, dst.absolute_path()?).await?;
        }
        Commands::Cmp { a, b } => {
            let (mut left, mut right) = (access.connect(&a)?, access.connect(&b)?);
            let same =
                compare_between(&mut left, a.absolute_path()?, &mut right, b.absolute_path()?)
                    .await?;
            if !same {
                bail!("files differ");
            }
        }
        Commands::Mv { from, to } => {
            let to = from.sibling(&to).absolute_path()?;
            access.connect(&from)?
                .rename(from.absolute_path()?, to)
                .await?;
        }
        Commands::Ln { target_text, link } => {
            access.connect(&link)?
                .symlink(target_text, link.absolute_path()?)
                .await?;
        }
        Commands::Readlink { target } => {
            let path = access.connect(&target)?
                .read_link(target.absolute_path()?)
                .await?;
            println!("{}", path.display());
        }
        Commands::Realpath { target } => {
            let path = access.connect(&target)?
                .real_path(target.absolute_path()?)
                .await?;
            println!("{}", path.display());
        }
        Commands::Mkdir { target } => {
            access.connect(&target)?
                .make_dir(target.absolute_path()?)
                .await?
        }
        Commands::Rmdir { target } => {
            access.connect(&target)?
                .remove_dir(target.absolute_path()?)
                .await?
        }
        Commands::Rm { target } => {
            access.connect(&target)?
                .remove_all(target.absolute_path()?)
                .await?
        }
        Commands::Archive {
            target,
            output,
            shallow,
        } => {
            let blob = access.connect(&target)?
                .archive(target.absolute_path()?, !shallow)
                .await?;
            std::fs::write(&output, blob)
                .with_context(|| format!("Cannot write {}", output.display()))?;
        }
        Commands::Dearchive { archive, dest } => {
            let blob = read_archive(&archive)?;
            access.connect(&dest)?
                .dearchive(dest.absolute_path()?, blob)
                .await?;
        }
        Commands::Paste {
            archive,
            dest,
            renew,
        } => {
            let blob = read_archive(&archive)?;
            let policy = if renew {
                PastePolicy::Renew
            } else {
                PastePolicy::Preserve
            };
            access.connect(&dest)?
                .paste(dest.absolute_path()?, blob, policy)
                .await?;
        }
        Commands::Prototype { targets } => {
            for target in targets {
                let path = target.absolute_path()?;
                if access.connect(&target)?.prototype(&path).await? {
                    println!("linked {}", path.display());
                }
            }
        }
        Commands::Uuid { command } => match command {
            UuidCommands::Get {
                target,
                root,
                create,
            } => {
                let root = target.sibling(&root).absolute_path()?;
                let uuid = access.connect(&target)?
                    .get_uuid(root, target.absolute_path()?, create)
                    .await?;
                println!("{}", uuid.braced());
            }
            UuidCommands::Lookup { uuid, root } => {
                match access.connect(&root)?
                    .lookup_uuid(root.absolute_path()?, uuid)
                    .await?
                {
                    Some(path) => println!("{}", path.display()),
                    None => bail!("no object holds {}", uuid.braced()),
                }
            }
        },
        Commands::Reconcile {
            root,
            scan,
            shallow,
            favor,
        } => {
            let root_path = root.absolute_path()?;
            let scan = match scan {
                Some(scan) => root.sibling(&scan).absolute_path()?,
                None => root_path.clone(),
            };
            let log = access.connect(&root)?
                .reconcile(root_path, scan, !shallow, favor.into())
                .await?;
            print_audit(&log);
        }
        Commands::Fixoofs { root, renumber } => {
            let log = access.connect(&root)?
                .fix_oofs(root.absolute_path()?, renumber)
                .await?;
            print_audit(&log);
        }
        Commands::Config => print!("{}", Config::default_toml()),
        Commands::Admin { command } => admin::run(command, &access.config)?,
    }
    Ok(())
}

fn read_archive(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Cannot read archive {}", path.display()))
}

fn kind_name(kind: FileKind) -> &'static str {
    match kind {
        FileKind::File => "file",
        FileKind::Dir => "dir",
        FileKind::Symlink => "symlink",
        FileKind::Other => "other",
    }
}

fn print_audit(log: &AuditLog) {
    for action in log.iter() {
        println!("{}", action);
    }
    if log.is_empty() {
        println!("consistent");
    }
}
