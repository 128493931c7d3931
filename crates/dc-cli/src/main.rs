//! dcfish: a Direct Connect client.
//!
//! Thin wiring over `dc-core`/`dc-transport`/`dc-files`: dial a hub, print
//! roster/chat activity, and serve whatever directory `--share` names to
//! peers that connect back. No download queue, no persistent database, no
//! terminal UI — those are out of scope.

mod config;
mod progress;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dc_core::hub::HandlerCtx;
use dc_core::{
    CcHandlerCtx, CcReply, CcSession, HubSession, MessageSink, NullHashStore, Priority, Runtime,
};
use dc_files::{filelist, FileMask, FileTree, NodeId, SearchQuery, SizeConstraint};
use dc_transport::{Delimiter, Framed};

use config::Config;
use progress::ConsoleSink;

#[derive(Parser)]
#[command(name = "dcfish")]
#[command(author, version, about = "A Direct Connect client", long_about = None)]
struct Cli {
    /// Configuration file path. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug-level logging regardless of the configured level.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a hub, print its roster and chat, and serve a share to peers.
    Connect {
        /// Hub address (`host:port`), overriding any `[[hub]]` entry.
        hub: Option<String>,

        /// Directory to share with peers. Unset means an empty share.
        #[arg(long)]
        share: Option<PathBuf>,

        /// Address to accept incoming peer connections on.
        #[arg(long, default_value = "0.0.0.0:0")]
        listen: String,

        /// Speak the modern (ADC-like) dialect instead of the legacy one.
        #[arg(long)]
        modern: bool,
    },

    /// Scan a directory and write its `files.xml.bz2` file-list.
    Share {
        /// Directory to scan.
        dir: PathBuf,

        /// Output path for the rendered file-list.
        #[arg(short, long, default_value = "files.xml.bz2")]
        output: PathBuf,
    },

    /// Search a directory (or a saved file-list) without a live hub.
    Search {
        /// Directory to scan, or a `files.xml.bz2`/`.xml` file-list to load.
        path: PathBuf,

        /// Search terms, all of which must appear in the matched path.
        terms: Vec<String>,

        /// Only match files of at least this many bytes.
        #[arg(long)]
        min_size: Option<u64>,

        /// Only match files of at most this many bytes.
        #[arg(long)]
        max_size: Option<u64>,

        /// Only match directories.
        #[arg(long)]
        dirs_only: bool,
    },

    /// Print the active configuration.
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    let log_level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Connect { hub, share, listen, modern } => {
            connect(hub, share, listen, modern, &config).await
        }
        Commands::Share { dir, output } => share(&dir, &output, &config),
        Commands::Search { path, terms, min_size, max_size, dirs_only } => {
            search(&path, &terms, min_size, max_size, dirs_only)
        }
        Commands::Status => status(&config),
    }
}

/// Recursively scan `fs_path` into `tree` under `parent`. TTH digests are
/// left unset: computing them is an external collaborator's job, out of
/// scope here (see `dc_files::tth`).
fn scan_dir(tree: &mut FileTree, parent: NodeId, fs_path: &Path) -> anyhow::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(fs_path)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        if metadata.is_dir() {
            let dir_id = tree.insert_dir(parent, name, false)?;
            scan_dir(tree, dir_id, &entry.path())?;
        } else if metadata.is_file() {
            tree.insert_file(parent, name, metadata.len(), None, mtime)?;
        }
    }
    Ok(())
}

fn build_share_tree(dir: &Path) -> anyhow::Result<FileTree> {
    let mut tree = FileTree::new();
    let root = tree.root();
    scan_dir(&mut tree, root, dir)?;
    Ok(tree)
}

fn share(dir: &Path, output: &Path, config: &Config) -> anyhow::Result<()> {
    let tree = build_share_tree(dir)?;
    let root = tree.root();
    let cid = config.global.cid_bytes()?;
    let compression = filelist::Compression::from_extension(output);

    filelist::save(output, &tree, root, &cid, "/", compression)?;

    let file_count = count_files(&tree, root);
    println!("Wrote {} ({} files, {} total)", output.display(), file_count, progress::format_bytes(tree.size(root)));
    Ok(())
}

fn count_files(tree: &FileTree, id: NodeId) -> usize {
    tree.children(id)
        .iter()
        .map(|&child| if tree.is_file(child) { 1 } else { count_files(tree, child) })
        .sum()
}

fn search(path: &Path, terms: &[String], min_size: Option<u64>, max_size: Option<u64>, dirs_only: bool) -> anyhow::Result<()> {
    let compression = filelist::Compression::from_extension(path);
    let tree = if path.is_dir() {
        build_share_tree(path)?
    } else {
        filelist::load(path, compression)?.0
    };

    let size = match (min_size, max_size) {
        (Some(min), _) => SizeConstraint::AtLeast(min),
        (None, Some(max)) => SizeConstraint::AtMost(max),
        (None, None) => SizeConstraint::Any,
    };
    let query = SearchQuery {
        size,
        mask: if dirs_only { FileMask::DirsOnly } else { FileMask::Any },
        extensions: Vec::new(),
        include: terms.to_vec(),
        max_results: 50,
    };

    let hits = tree.search(tree.root(), &query);
    if hits.is_empty() {
        println!("No matches.");
    }
    for hit in hits {
        let size = tree.size(hit.node);
        println!("{}\t{}", progress::format_bytes(size), hit.path);
    }
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    println!("dcfish {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Identity:");
    println!("  CID: {}", config.global.cid);
    println!("  PID: {}", config.global.pid);
    println!("  Slots: {}", config.global.slots);
    println!("  TLS policy: {:?}", config.global.tls_policy);
    println!();
    println!("Directories:");
    println!("  Downloads: {}", config.global.download_dir.display());
    println!("  Incoming:  {}", config.global.incoming_dir.display());
    println!();
    println!("Hubs ({}):", config.hubs.len());
    for hub in &config.hubs {
        println!("  {} as {}", hub.hubaddr, hub.nick);
    }
    Ok(())
}

/// Dial `hub_addr`, build the matching dialect's session, and drive it
/// until disconnected or interrupted.
async fn connect(hub: Option<String>, share_dir: Option<PathBuf>, listen: String, modern: bool, config: &Config) -> anyhow::Result<()> {
    let hub_addr = hub
        .or_else(|| config.hubs.first().map(|h| h.hubaddr.clone()))
        .ok_or_else(|| anyhow::anyhow!("no hub address given and none configured"))?;
    let hub_config = config.hub(&hub_addr).cloned();
    let nick = hub_config.as_ref().map_or_else(|| "dcfish".to_string(), |h| h.nick.clone());

    let share_dir = share_dir.unwrap_or_else(|| PathBuf::from("."));
    let tree = if share_dir.as_os_str() == "." && !share_dir.exists() {
        FileTree::new()
    } else if share_dir.exists() {
        build_share_tree(&share_dir)?
    } else {
        FileTree::new()
    };
    let cid = config.global.cid_bytes()?;
    let file_list_bytes = filelist::to_bytes(&tree, tree.root(), &cid, "/", filelist::Compression::Bzip2)?;

    let runtime = Arc::new(Runtime::new());
    let sink: Arc<dyn MessageSink> = Arc::new(ConsoleSink::new(&config.global.colors));
    let tree = Arc::new(tree);
    let file_list_bytes = Arc::new(file_list_bytes);
    let share_dir = Arc::new(share_dir);

    let listen_addr: SocketAddr = listen.parse()?;
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "accepting peer connections");

    let accept_runtime = Arc::clone(&runtime);
    let accept_tree = Arc::clone(&tree);
    let accept_file_list = Arc::clone(&file_list_bytes);
    let accept_share_dir = Arc::clone(&share_dir);
    let configured_slots = config.global.slots;
    tokio::task::spawn(async move {
        loop {
            let Ok((socket, peer)) = listener.accept().await else {
                break;
            };
            tracing::debug!(%peer, "accepted peer connection");
            let transport = Framed::from_stream(socket, Delimiter::Pipe);
            let session = CcSession::new(true, Vec::new());
            let runtime = Arc::clone(&accept_runtime);
            let tree = Arc::clone(&accept_tree);
            let file_list = Arc::clone(&accept_file_list);
            let share_dir = Arc::clone(&accept_share_dir);
            tokio::task::spawn(drive_cc_session(
                transport,
                session,
                runtime,
                tree,
                file_list,
                share_dir,
                configured_slots,
            ));
        }
    });

    let mut hub_session = if modern {
        HubSession::new_modern(nick, hub_addr.as_str(), hub_addr.as_str())
    } else {
        HubSession::new_legacy(nick, hub_addr.as_str(), hub_addr.as_str())
    };
    hub_session.cid = cid;
    hub_session.pid = config.global.pid_bytes()?;
    hub_session.advertised_slots = config.global.slots;
    if let Some(hub_config) = &hub_config {
        hub_session.password = hub_config.password.clone();
        hub_session.charset = dc_core::Charset::by_label(&hub_config.encoding);
    }

    let delimiter = if modern { Delimiter::Newline } else { Delimiter::Pipe };
    let mut transport = Framed::connect(&hub_addr, 411, delimiter).await?;

    loop {
        let handler_ctx = HandlerCtx {
            tree: &tree,
            configured_slots: config.global.slots,
            slots_in_use: runtime.slots_in_use(),
            sink: sink.as_ref(),
        };

        tokio::select! {
            frames = transport.read_frames() => {
                let frames = frames?;
                for frame in frames {
                    if let Err(err) = hub_session.handle_frame(&frame, &handler_ctx) {
                        tracing::warn!(%err, "hub protocol error");
                    }
                }
                for out in hub_session.outbox.drain(..) {
                    transport.send(out.0.as_bytes());
                }
                transport.flush().await?;
                if hub_session.disconnect_requested {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                sink.post(Priority::Medium, "disconnecting");
                break;
            }
        }
    }

    Ok(())
}

/// Drive one accepted C↔C connection until it closes or seals on error.
async fn drive_cc_session(
    mut transport: Framed,
    mut session: CcSession,
    runtime: Arc<Runtime>,
    tree: Arc<FileTree>,
    file_list_bytes: Arc<Vec<u8>>,
    share_dir: Arc<PathBuf>,
    configured_slots: u32,
) {
    let hash_store = NullHashStore;
    loop {
        let ctx = CcHandlerCtx {
            tree: &tree,
            share_base: &share_dir,
            file_list_bytes: &file_list_bytes,
            hash_store: &hash_store,
            configured_slots,
            slots_in_use: runtime.slots_in_use(),
        };

        let frames = match transport.read_frames().await {
            Ok(frames) => frames,
            Err(err) => {
                tracing::debug!(%err, "peer transport closed");
                break;
            }
        };
        let mut sealed = false;
        for frame in frames {
            let line = String::from_utf8_lossy(&frame).into_owned();
            match session.handle_line(&line, &ctx) {
                Ok(replies) => {
                    for reply in replies {
                        if let Err(err) = send_cc_reply(&mut transport, reply).await {
                            tracing::warn!(%err, "failed to send C\u{2194}C reply");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "C\u{2194}C protocol error");
                    sealed = true;
                }
            }
        }
        if let Err(err) = transport.flush().await {
            tracing::debug!(%err, "flush failed");
            break;
        }
        if sealed {
            break;
        }
    }
    transport.disconnect();
}

async fn send_cc_reply(transport: &mut Framed, reply: CcReply) -> anyhow::Result<()> {
    match reply {
        CcReply::Command(cmd) => transport.send(cmd.as_bytes()),
        CcReply::SendFile { command, path, offset, length } => {
            transport.send(command.as_bytes());
            transport.sendfile(&path, offset, length).await?;
        }
        CcReply::SendBytes { command, bytes } => {
            transport.send(command.as_bytes());
            transport.send_raw(&bytes);
        }
    }
    Ok(())
}
