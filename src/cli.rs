//! Command-line surfaces for the two binaries, plus the frame-trace writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::sync::mpsc;

/// Board client: load a board file, simulate it, optionally connect to a
/// relay so walls and portals can reach other boards.
#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct ClientArgs {
    /// relay host; omit to run standalone
    #[arg(long)]
    pub host: Option<String>,
    /// relay port
    #[arg(long, default_value_t = 10987)]
    pub port: u16,
    /// write one JSON snapshot per frame to this file
    #[arg(long)]
    pub trace_frames: Option<PathBuf>,
    /// board definition file
    #[arg(default_value = "boards/default.fb")]
    pub file: PathBuf,
}

/// Relay: route join and teleport messages between connected boards.
#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct RelayArgs {
    /// port to listen on
    #[arg(long, default_value_t = 10987)]
    pub port: u16,
}

/// Writer task for the frame trace: the engine posts JSON lines to the
/// returned channel and this task owns the buffered file handle.
pub fn spawn_trace_writer(
    path: &Path,
) -> io::Result<(
    mpsc::UnboundedSender<String>,
    tokio::task::JoinHandle<io::Result<()>>,
)> {
    let mut out = BufWriter::new(File::create(path)?);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let task = tokio::task::spawn(async move {
        while let Some(line) = rx.recv().await {
            writeln!(out, "{}", line)?;
        }
        out.flush()
    });
    Ok((tx, task))
}
