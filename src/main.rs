use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use pinball::cli::{spawn_trace_writer, ClientArgs};
use pinball::engine::{self, Event};
use pinball::game::parser;
use pinball::game::snapshot::KeyEvent;
use pinball::net;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{:?}", e.context("fatal error"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    env_logger::init();
    let args = ClientArgs::parse();

    let board = parser::parse_file(&args.file)
        .with_context(|| format!("cannot load board {:?}", args.file))?;
    info!("loaded board {} from {:?}", board.name(), args.file);
    debug!("{}", board);

    let conn = match &args.host {
        Some(host) => Some(net::connect(host, args.port, board.name()).await?),
        None => None,
    };

    let (trace, trace_task) = match &args.trace_frames {
        Some(path) => {
            let (tx, task) = spawn_trace_writer(path)
                .with_context(|| format!("cannot open trace file {:?}", path))?;
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    spawn_console(event_tx);

    engine::run(board, conn, event_rx, trace).await?;

    // The engine dropped its trace sender; wait for the writer to flush.
    if let Some(task) = trace_task {
        task.await?.context("trace writer failed")?;
    }
    Ok(())
}

/// The stdin console stands in for the windowed key listener: `quit` ends
/// the session, `keydown K` / `keyup K` inject key edges for boards wired
/// with key bindings.
fn spawn_console(events: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["quit"] => {
                    let _ = events.send(Event::Quit);
                    break;
                }
                ["keydown", key] => {
                    let _ = events.send(Event::Key(KeyEvent {
                        key: key.to_string(),
                        pressed: true,
                    }));
                }
                ["keyup", key] => {
                    let _ = events.send(Event::Key(KeyEvent {
                        key: key.to_string(),
                        pressed: false,
                    }));
                }
                [] => {}
                other => eprintln!("unknown console input {:?}", other.join(" ")),
            }
        }
    });
}
