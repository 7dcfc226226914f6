//! Interactive console driver
//!
//! Presentation only: renders queue state and event-bus notifications,
//! and forwards menu choices to the orchestrator. No upload bookkeeping
//! lives here.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::uplink::{EventKind, Lifecycle, Uplink, UplinkEvent};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

const MENU: &[&str] = &[
    "Add files",
    "Show queue",
    "Upload all",
    "Cancel an upload",
    "List remote files",
    "Video info",
    "Extract frames",
    "Health check",
    "Reset",
    "Quit",
];

/// Drives the upload user experience from the terminal
pub(crate) struct Program {
    lifecycle: &'static Lifecycle,
}

impl Program {
    pub(crate) fn new(lifecycle: &'static Lifecycle) -> Self {
        Self { lifecycle }
    }

    pub(crate) async fn run(&self) -> Result<()> {
        println!("{}", style(format!("{NAME} v{VERSION}")).bold());

        let uplink = self.lifecycle.get_instance().await;
        wire_console_observers(&uplink);

        loop {
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("What next?")
                .items(MENU)
                .default(0)
                .interact()?;

            match MENU[choice] {
                "Add files" => self.add_files(&uplink)?,
                "Show queue" => show_queue(&uplink),
                "Upload all" => {
                    let batch = uplink.orchestrator().upload_all().await;
                    if let Some(error) = batch.error {
                        println!("{} {error}", style("Batch stopped:").red());
                    }
                    println!(
                        "{} of {} uploads accepted",
                        batch.outcomes.iter().filter(|o| o.success).count(),
                        batch.outcomes.len()
                    );
                }
                "Cancel an upload" => {
                    let remote_id: String = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt("Remote id")
                        .interact_text()?;
                    if let Err(e) = uplink.orchestrator().cancel(&remote_id).await {
                        println!("{} {e}", style("Cancellation failed:").red());
                    }
                }
                "List remote files" => match uplink.orchestrator().list_remote().await {
                    Ok(files) => {
                        for file in &files {
                            println!("  {file}");
                        }
                        println!("{} remote files", files.len());
                    }
                    Err(e) => println!("{} {e}", style("Listing failed:").red()),
                },
                "Video info" => {
                    let path: String = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt("Remote file path")
                        .interact_text()?;
                    match uplink.orchestrator().video_info(&path).await {
                        Ok(info) => println!("{info:#}"),
                        Err(e) => println!("{} {e}", style("Lookup failed:").red()),
                    }
                }
                "Extract frames" => {
                    let path: String = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt("Remote file path")
                        .interact_text()?;
                    let fps: f64 = Input::with_theme(&ColorfulTheme::default())
                        .with_prompt("Frames per second")
                        .default(1.0)
                        .interact_text()?;
                    match uplink.orchestrator().extract_frames(&path, fps).await {
                        Ok(result) => println!(
                            "Extracted {} frames",
                            result.frame_count.unwrap_or(result.frames.len() as u64)
                        ),
                        Err(e) => println!("{} {e}", style("Extraction failed:").red()),
                    }
                }
                "Health check" => {
                    if uplink.orchestrator().health_check().await {
                        println!("{}", style("Server is healthy").green());
                    } else {
                        println!("{}", style("Server is unreachable or unhealthy").red());
                    }
                }
                "Reset" => {
                    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                        .with_prompt("Cancel all uploads and clear the queue?")
                        .default(false)
                        .interact()?;
                    if confirmed {
                        self.lifecycle.reset().await;
                    }
                }
                "Quit" => {
                    self.lifecycle.destroy().await;
                    return Ok(());
                }
                _ => unreachable!(),
            }
        }
    }

    fn add_files(&self, uplink: &Arc<Uplink>) -> Result<()> {
        let input: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("File paths (space separated)")
            .interact_text()?;

        for path in input.split_whitespace() {
            match uplink.orchestrator().add_path(path) {
                Ok(record) => println!(
                    "  {} {} ({} bytes, {:?})",
                    style("queued").green(),
                    record.name,
                    record.size,
                    record.media_type
                ),
                Err(e) => println!("  {} {path}: {e}", style("refused").red()),
            }
        }
        Ok(())
    }
}

fn show_queue(uplink: &Arc<Uplink>) {
    let registry = uplink.registry();

    let pending = registry.pending();
    println!("{}", style(format!("Pending ({})", pending.len())).bold());
    for record in pending {
        println!("  {} {} ({} bytes)", record.id, record.name, record.size);
    }

    let active = registry.active();
    println!("{}", style(format!("Uploading ({})", active.len())).bold());
    for upload in active {
        let ack = upload.upload_result.message.as_deref().unwrap_or("accepted");
        println!("  {} {} ({ack})", upload.remote_id, upload.file.name);
    }

    let archive = registry.archive();
    println!("{}", style(format!("Done ({})", archive.len())).bold());
    for record in archive {
        println!("  {} {:?}", record.name, record.status);
    }
}

/// Progress bars and notifications fed from the event bus. Observers
/// only read snapshots; they never touch the registry.
fn wire_console_observers(uplink: &Arc<Uplink>) {
    let events = uplink.events();
    let multi = Arc::new(MultiProgress::new());
    let bars: Arc<Mutex<HashMap<String, ProgressBar>>> = Arc::new(Mutex::new(HashMap::new()));

    {
        let multi = multi.clone();
        let bars = bars.clone();
        events.subscribe(EventKind::UploadProgress, move |event| {
            let UplinkEvent::UploadProgress { remote_id, snapshot } = event else {
                return;
            };
            let mut bars = bars.lock();
            let bar = bars.entry(remote_id.clone()).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::with_template("{msg:12} [{bar:40}] {pos:>3}%")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar.set_message(remote_id.clone());
                bar
            });
            bar.set_position(snapshot.percent.clamp(0.0, 100.0) as u64);
        });
    }

    {
        let bars = bars.clone();
        events.subscribe(EventKind::ProcessingCompleted, move |event| {
            if let UplinkEvent::ProcessingCompleted { remote_id, name } = event {
                if let Some(bar) = bars.lock().remove(remote_id) {
                    bar.finish_with_message(format!("{name} done"));
                }
            }
        });
    }

    {
        let bars = bars.clone();
        events.subscribe(EventKind::ProcessingFailed, move |event| {
            if let UplinkEvent::ProcessingFailed { remote_id, message } = event {
                if let Some(bar) = bars.lock().remove(remote_id) {
                    bar.abandon_with_message(format!("failed: {message}"));
                }
            }
        });
    }

    {
        let bars = bars.clone();
        events.subscribe(EventKind::UploadCancelled, move |event| {
            if let UplinkEvent::UploadCancelled { remote_id, name } = event {
                if let Some(bar) = bars.lock().remove(remote_id) {
                    bar.abandon_with_message(format!("{name} cancelled"));
                }
            }
        });
    }

    events.subscribe(EventKind::UploadFailed, |event| {
        if let UplinkEvent::UploadFailed { name, message } = event {
            eprintln!("{} {name}: {message}", style("upload failed").red());
        }
    });

    events.subscribe(EventKind::ValidationFailed, |event| {
        if let UplinkEvent::ValidationFailed { name, errors } = event {
            eprintln!(
                "{} {name}: {}",
                style("not admitted").yellow(),
                errors.join("; ")
            );
        }
    });
}
