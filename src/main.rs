//! Command line interface for the event filesystem. Supports initializing the
//! database, ingesting event files, verifying stored signatures, browsing the
//! tree without a mount, and mounting it through FUSE.

mod config;
mod error;
mod event;
mod fuse;
mod handles;
mod nostrfs;
mod path;
mod storage;
mod verify;

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Settings;
use event::Event;
use nostrfs::{AccessMode, Attr, NodeKind, NostrFs};
use storage::{Ingest, Store};
use tracing::{info, warn};
use verify::{AcceptAll, SchnorrVerifier, Verifier};

/// Bytes requested per read when streaming a file with `cat`.
const CAT_WINDOW: usize = 64 * 1024;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "nostrfs",
    author,
    version,
    about = "Read-only filesystem view of a Nostr event store"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the event database at `DB_PATH`.
    Init,
    /// Ingest event files (one event object or an array of events each).
    Ingest {
        /// Paths to JSON event files to ingest.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Verify a random sample of stored events.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
    /// List a directory of the filesystem without mounting it.
    Ls { path: String },
    /// Print a file of the filesystem without mounting it.
    Cat { path: String },
    /// Show the attributes of a file or directory without mounting it.
    Stat { path: String },
    /// Mount the filesystem (requires the `fuse` feature).
    Mount {
        /// Mount point; defaults to `MOUNT_POINT`.
        mountpoint: Option<PathBuf>,
    },
}

/// Execute the selected CLI subcommand, writing command output to `out`.
fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let verifier: Arc<dyn Verifier> = if cfg.verify_sig {
        Arc::new(SchnorrVerifier::new())
    } else {
        Arc::new(AcceptAll)
    };
    let store = Store::open(&cfg.db_path, verifier)
        .with_context(|| format!("opening {}", cfg.db_path.display()))?;
    match cli.command {
        Commands::Init => {
            info!(db = %cfg.db_path.display(), events = store.count_events()?, "database ready");
        }
        Commands::Ingest { files } => {
            let (mut stored, mut duplicate, mut rejected) = (0usize, 0usize, 0usize);
            for f in files {
                for ev in load_events(Path::new(&f))? {
                    match store.ingest_event(&ev)? {
                        Ingest::Stored => stored += 1,
                        Ingest::Duplicate => duplicate += 1,
                        Ingest::Rejected => rejected += 1,
                    }
                }
            }
            writeln!(
                out,
                "ingested {stored}, duplicate {duplicate}, rejected {rejected}"
            )?;
        }
        Commands::Verify { sample } => {
            let checked = store.verify_sample(sample)?;
            writeln!(out, "verified {checked} events")?;
        }
        Commands::Ls { path } => {
            let fs = NostrFs::new(store);
            for name in fs.readdir(&path)? {
                writeln!(out, "{name}")?;
            }
        }
        Commands::Cat { path } => {
            let fs = NostrFs::new(store);
            cat(&fs, &path, out)?;
        }
        Commands::Stat { path } => {
            let fs = NostrFs::new(store);
            write_attr(&fs.getattr(&path)?, out)?;
        }
        Commands::Mount { mountpoint } => {
            let at = mountpoint.unwrap_or(cfg.mount_point);
            fs::create_dir_all(&at).with_context(|| format!("create {}", at.display()))?;
            fuse::mount(NostrFs::new(store), &at, cfg.allow_other)?;
        }
    }
    Ok(())
}

/// Parse a file holding either a single event or an array of events.
fn load_events(path: &Path) -> anyhow::Result<Vec<Event>> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    let events = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(events)
}

/// Stream a file through open/read/release the way a mounted reader would.
fn cat(fs: &NostrFs, path: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let fh = fs.open(path, AccessMode::ReadOnly)?;
    let mut buf = vec![0u8; CAT_WINDOW];
    let mut offset = 0u64;
    let res = loop {
        match fs.read(fh, &mut buf, CAT_WINDOW, offset) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if let Err(e) = out.write_all(&buf[..n]) {
                    break Err(e.into());
                }
                offset += n as u64;
            }
            Err(e) => break Err(e.into()),
        }
    };
    if let Err(e) = fs.release(fh) {
        warn!(fh, "release failed: {e}");
    }
    res
}

fn write_attr(attr: &Attr, out: &mut impl Write) -> anyhow::Result<()> {
    let kind = match attr.kind {
        NodeKind::Directory => "directory",
        NodeKind::File => "file",
    };
    writeln!(out, "type: {kind}")?;
    writeln!(out, "size: {}", attr.size)?;
    writeln!(out, "mode: {:04o}", attr.perm)?;
    writeln!(out, "links: {}", attr.nlink)?;
    writeln!(out, "access: {}", unix_secs(attr.atime))?;
    writeln!(out, "modify: {}", unix_secs(attr.mtime))?;
    writeln!(out, "change: {}", unix_secs(attr.ctime))?;
    Ok(())
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let db_path = base_dir.join("nostrfs-data").join("events.sqlite3");
    let mount_point = base_dir.join("mnt");
    let mut content = String::new();
    content.push_str(&format!("DB_PATH={}\n", display_path(&db_path)));
    content.push_str(&format!("MOUNT_POINT={}\n", display_path(&mount_point)));
    content.push_str("VERIFY_SIG=1\n");
    content.push_str("ALLOW_OTHER=0\n");
    fs::write(env_path, content)?;
    info!(path = %env_path.display(), "wrote default configuration");
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(not(test))]
fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}
