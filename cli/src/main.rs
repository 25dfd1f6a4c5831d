//! # labelprinter
//!
//! Command-line front end for USB label printers.
//!
//! ```bash
//! # Show supported printers that are plugged in
//! labelprinter list
//!
//! # Read the printer status (cassette width, faults)
//! labelprinter status --json
//!
//! # Follow status changes until Ctrl-C
//! labelprinter watch
//!
//! # Print an image on the loaded cassette, twice, dithered
//! labelprinter print logo.png --copies 2 --dither floyd-steinberg
//!
//! # Render the monochrome bitmap for a 12 mm label without printing
//! labelprinter preview logo.png --label 12 -o preview.png
//! ```

mod config;
mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use labelprinter::{
    DeviceId, DeviceRegistry, DitherMode, LabelSize, NusbHost, PrintRequest, PrinterTimings,
    QueryError, QueryResult, StatusHeartbeat, UsbDevice,
};

use crate::config::AppConfig;
use crate::service::PrinterService;

/// USB label printer utility
#[derive(Parser, Debug)]
#[command(name = "labelprinter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported printers that are attached
    List {
        /// Print the printer state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Query the printer status once
    Status {
        /// Printer to use, as bus/address (defaults to the first one found)
        #[arg(long)]
        device: Option<String>,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll the printer status until interrupted
    Watch {
        /// Printer to use, as bus/address
        #[arg(long)]
        device: Option<String>,

        /// Poll interval in milliseconds (minimum 50)
        #[arg(long, value_name = "MS")]
        interval: Option<u64>,
    },

    /// Print an image
    Print {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,

        /// Printer to use, as bus/address
        #[arg(long)]
        device: Option<String>,

        /// Number of copies
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        copies: u32,

        /// Binarization: none or floyd-steinberg
        #[arg(long)]
        dither: Option<DitherMode>,

        /// Black/white threshold in 0.0..=1.0, used without dithering
        #[arg(long)]
        threshold: Option<f32>,

        /// Expected label width in mm (defaults to the loaded cassette)
        #[arg(long)]
        label: Option<LabelSize>,
    },

    /// Write the transformed monochrome bitmap to a PNG file
    Preview {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,

        /// Label width in mm
        #[arg(long)]
        label: LabelSize,

        /// Output PNG file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Binarization: none or floyd-steinberg
        #[arg(long)]
        dither: Option<DitherMode>,

        /// Black/white threshold in 0.0..=1.0, used without dithering
        #[arg(long)]
        threshold: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load();

    match cli.command {
        Commands::List { json } => {
            let service = build_service(&config, config.timings);
            let state = service.refresh(None).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.available.is_empty() {
                println!("No supported printer found");
            } else {
                for (id, device) in &state.available {
                    let marker = if state.selected.as_ref() == Some(id) { "*" } else { " " };
                    println!("{marker} {}", describe(device));
                }
            }
        }
        Commands::Status { device, json } => {
            let service = build_service(&config, config.timings);
            let printer = open(&service, device).await?;
            let result = service.query().await;
            service.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status_json(&printer, &result))?);
            } else {
                println!("{}", describe(&printer));
                println!("{}", summarize(&result));
            }
            if let Err(QueryError::Communication(e)) = result {
                return Err(e).context("status query failed");
            }
        }
        Commands::Watch { device, interval } => {
            let timings = match interval {
                Some(ms) => config.timings.with_heartbeat_interval(Duration::from_millis(ms)),
                None => config.timings,
            };
            let service = Arc::new(build_service(&config, timings));
            open(&service, device).await?;
            watch(service).await?;
        }
        Commands::Print {
            image,
            device,
            copies,
            dither,
            threshold,
            label,
        } => {
            let source = load_image(&image)?;
            let service = build_service(&config, config.timings);
            let printer = open(&service, device).await?;

            let label = match label {
                Some(label) => label,
                None => loaded_label(service.query().await)?,
            };
            let request = PrintRequest::prepare(
                &source,
                label,
                copies,
                dither.unwrap_or(config.default_dither),
                threshold.unwrap_or(config.default_threshold),
            )?;
            tracing::info!(
                device = %printer.id,
                width = request.bitmap.width(),
                label = %label,
                dither = %request.dither,
                threshold = request.threshold,
                "Printing image"
            );

            let result = service.print(&request).await;
            service.close().await;
            result.context("print failed")?;
            println!("Printed {copies} label(s) on {label}");
        }
        Commands::Preview {
            image,
            label,
            output,
            dither,
            threshold,
        } => {
            let source = load_image(&image)?;
            let bitmap = image_processor::transform_for_label(
                &source,
                label.pixels(),
                dither.unwrap_or(config.default_dither),
                threshold.unwrap_or(config.default_threshold),
            )?;
            bitmap
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "Wrote {}x{} preview to {}",
                bitmap.width(),
                bitmap.height(),
                output.display()
            );
        }
    }

    Ok(())
}

fn build_service(config: &AppConfig, timings: PrinterTimings) -> PrinterService<NusbHost> {
    let registry = DeviceRegistry::new(config.allowed_devices.iter().copied());
    PrinterService::new(Arc::new(NusbHost::new()), registry, timings)
}

/// Enumerate, select `device` (or the default) and open it.
async fn open(service: &PrinterService<NusbHost>, device: Option<String>) -> anyhow::Result<UsbDevice> {
    let preferred = device.map(DeviceId);
    let state = service.refresh(preferred.as_ref()).await?;

    if let Some(id) = &preferred {
        if state.selected.as_ref() != Some(id) {
            bail!("printer {id} is not attached or not supported");
        }
    }

    service.connect().await.context("failed to open printer")
}

fn load_image(path: &Path) -> anyhow::Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("failed to read image {}", path.display()))
}

/// Label width of the loaded cassette, from a status query.
fn loaded_label(result: QueryResult) -> anyhow::Result<LabelSize> {
    match result {
        Ok(status) => Ok(status.label_size),
        Err(QueryError::Device(e)) => bail!("printer reports: {e}"),
        Err(e) => Err(e).context("failed to read the loaded label size"),
    }
}

fn describe(device: &UsbDevice) -> String {
    format!(
        "{}  {}  {}",
        device.id,
        device.identifier(),
        device.product.as_deref().unwrap_or("unknown model")
    )
}

fn summarize(result: &QueryResult) -> String {
    match result {
        Ok(status) if status.is_idle() => format!("ready, {} label", status.label_size),
        Ok(status) => format!(
            "busy (phase {}), {} label",
            status.phase_type, status.label_size
        ),
        Err(QueryError::Device(e)) => format!("error: {e}"),
        Err(QueryError::Communication(e)) => format!("unreachable: {e}"),
    }
}

fn status_json(device: &UsbDevice, result: &QueryResult) -> serde_json::Value {
    match result {
        Ok(status) => json!({ "device": device, "status": status }),
        Err(QueryError::Device(e)) => json!({
            "device": device,
            "error": e,
            "faults": e.faults().iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
        Err(QueryError::Communication(e)) => json!({
            "device": device,
            "communication_error": e.to_string(),
        }),
    }
}

async fn watch(service: Arc<PrinterService<NusbHost>>) -> anyhow::Result<()> {
    let token = CancellationToken::new();

    let events = Arc::clone(&service);
    let events_token = token.child_token();
    let event_task = tokio::spawn(async move { events.run_events(events_token).await });

    let heartbeat = StatusHeartbeat::spawn_with_token(service.manager().clone(), token.child_token());
    let mut rx = heartbeat.subscribe();
    let mut last = String::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(result) = rx.borrow_and_update().clone() else {
                    continue;
                };
                let line = summarize(&result);
                if line != last {
                    println!("{} {line}", chrono::Local::now().format("%H:%M:%S"));
                    last = line;
                }
            }
        }
    }

    token.cancel();
    heartbeat.stop().await;
    if let Err(e) = event_task.await {
        tracing::warn!("Device event task failed: {e}");
    }
    service.close().await;
    Ok(())
}
