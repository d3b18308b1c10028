use std::{io::BufRead, path::PathBuf, thread};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Sender, bounded};
use face_lock::{
    EnrolledIdentity, FaceLockConfig, Gallery, LockController,
    pipeline::{ControlSignal, StatusHandle, start_replay_stream, start_tracker},
};

const USAGE: &str = "usage: face-lock <target> <frames.jsonl> [--config FILE] [--gallery FILE] [--history-dir DIR] [--interactive]";

struct Args {
    target: String,
    frames: PathBuf,
    config: Option<PathBuf>,
    gallery: Option<PathBuf>,
    history_dir: Option<PathBuf>,
    interactive: bool,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut gallery = None;
    let mut history_dir = None;
    let mut interactive = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context(USAGE)?)),
            "--gallery" => gallery = Some(PathBuf::from(args.next().context(USAGE)?)),
            "--history-dir" => history_dir = Some(PathBuf::from(args.next().context(USAGE)?)),
            "--interactive" | "-i" => interactive = true,
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with('-') => bail!("unknown option {other}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let [target, frames]: [String; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!(USAGE))?;

    Ok(Args {
        target,
        frames: PathBuf::from(frames),
        config,
        gallery,
        history_dir,
        interactive,
    })
}

fn resolve_identity(gallery: Option<&Gallery>, name: &str) -> Result<EnrolledIdentity> {
    match gallery {
        Some(gallery) => gallery.get(name),
        // Without a gallery detections must arrive pre-scored.
        None => Ok(EnrolledIdentity::named(name)),
    }
}

fn spawn_operator_console(
    gallery: Option<Gallery>,
    control_tx: Sender<ControlSignal>,
    status: StatusHandle,
) {
    println!("Controls: r - release lock, t <name> - change target, s - show stats, q - quit");
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut parts = line.split_whitespace();
            let signal = match (parts.next(), parts.next()) {
                (Some("r"), _) => ControlSignal::Release,
                (Some("t"), Some(name)) => match resolve_identity(gallery.as_ref(), name) {
                    Ok(identity) => ControlSignal::Switch(identity),
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                },
                (Some("s"), _) => {
                    let latest = status.latest();
                    println!("{}", latest.display_text());
                    if let Some(file) = &latest.history_file {
                        println!("  history file: {file}");
                    }
                    if let Some(warning) = &latest.warning {
                        println!("  warning: {warning}");
                    }
                    continue;
                }
                (Some("q"), _) => ControlSignal::Shutdown,
                _ => continue,
            };

            let quit = matches!(signal, ControlSignal::Shutdown);
            if control_tx.try_send(signal).is_err() {
                log::warn!("control queue full or closed, input dropped");
            }
            if quit {
                break;
            }
        }
    });
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => FaceLockConfig::load(path)?,
        None => FaceLockConfig::default(),
    };
    if let Some(dir) = args.history_dir {
        config.history_dir = dir;
    }

    let gallery = args.gallery.as_deref().map(Gallery::load).transpose()?;
    if let Some(gallery) = &gallery {
        println!("Available enrolled identities: {}", gallery.names().join(", "));
    }
    let target = resolve_identity(gallery.as_ref(), &args.target)?;
    println!("Target selected: {}", target.name());

    let controller = LockController::with_file_history(config, target)?;

    let (frame_tx, frame_rx) = bounded(8);
    let (control_tx, control_rx) = bounded(16);
    let status = StatusHandle::default();

    let tracker = start_tracker(controller, frame_rx, control_rx, status.clone());
    let replay = start_replay_stream(args.frames, frame_tx)?;

    if args.interactive {
        spawn_operator_console(gallery, control_tx, status);
    } else {
        drop(control_tx);
    }

    let report = tracker
        .join()
        .map_err(|_| anyhow::anyhow!("tracker thread panicked"))?;
    replay.stop();

    println!(
        "Processed {} frames, {} lock session(s)",
        report.frames,
        report.sessions.len()
    );
    for session in &report.sessions {
        println!(
            "  {} -> {} ({} actions)",
            session.identity,
            session.file_name,
            session.counts.total()
        );
    }
    if report.unpersisted_lines > 0 {
        log::error!(
            "{} history line(s) were never persisted",
            report.unpersisted_lines
        );
    }

    Ok(())
}
