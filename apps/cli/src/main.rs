use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use hwpdm_core::{
    Bitrate, ConfigurationFile, DeviceHandle, Operator, PdmEvent, PdmObserver, PdmPhase,
    PdmSession, SessionConfig, TracingObserver,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send configuration files to CAN connected Hardwire devices", long_about = None)]
struct Args {
    /// CAN channel index, opened as canN [default: 0]
    #[arg(short, long)]
    channel: Option<u32>,

    /// Bus bitrate (1M, 500K, 250K, 125K, 100K, 83K, 62K, 50K, 10K) [default: 250K]
    #[arg(short, long)]
    bitrate: Option<Bitrate>,

    /// Hardwire configuration file (.HWPDM)
    #[arg(short, long, required_unless_present = "list_channels")]
    filename: Option<PathBuf>,

    /// Tool settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Interface name to open instead of canN (e.g. vcan0)
    #[arg(long)]
    interface: Option<String>,

    /// Set the bitrate and bring the interface up (needs CAP_NET_ADMIN)
    #[arg(long)]
    configure_interface: bool,

    /// Give up after a chunk has been rejected this many times
    #[arg(long)]
    max_retries: Option<u32>,

    /// Do not ask for confirmation before sending
    #[arg(short, long)]
    yes: bool,

    /// List CAN channels and bitrates, then exit
    #[arg(long)]
    list_channels: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Settings file values, overridden by whatever was given on the command line.
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.settings {
            Some(path) => SessionConfig::load_from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(channel) = self.channel {
            config.channel = channel;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate = bitrate;
        }
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if self.configure_interface {
            config.manage_interface = true;
        }
        if self.max_retries.is_some() {
            config.max_chunk_retries = self.max_retries;
        }
        if self.yes {
            config.assume_yes = true;
        }
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Update failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let settings = args.session_config()?;

    if args.list_channels {
        return print_channels(&settings);
    }

    let Some(path) = &args.filename else {
        anyhow::bail!("No configuration file given");
    };
    let file = ConfigurationFile::load_from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    println!(
        "Config version: {}  Device model: {}  Lines: {}",
        file.configurator_version,
        file.device_model_version,
        file.raw_lines.len()
    );

    info!(
        interface = %settings.interface_name(),
        bitrate = %settings.bitrate,
        "Starting Hardwire PDM uploader"
    );
    let transport = open_transport(&settings)?;

    let session = PdmSession::with_observer(settings, Arc::new(ConsoleObserver::default()));
    let report = session.run(&transport, &file, &PromptOperator)?;

    println!("{}", style("Update completed").green().bold());
    println!(
        "{} chunks ({} bytes) sent to device {} in {:.1}s, {} resends",
        report.chunks_sent,
        report.payload_bytes,
        report.device.device_id,
        report.elapsed.as_secs_f64(),
        report.errors
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_transport(settings: &SessionConfig) -> Result<hwpdm_core::SocketCanTransport> {
    settings
        .open_transport()
        .with_context(|| format!("Failed to open CAN channel {}", settings.interface_name()))
}

#[cfg(not(target_os = "linux"))]
fn open_transport(_settings: &SessionConfig) -> Result<hwpdm_core::MockTransport> {
    anyhow::bail!("SocketCAN is only available on Linux")
}

#[cfg(target_os = "linux")]
fn print_channels(settings: &SessionConfig) -> Result<()> {
    let selected = settings.interface_name();
    let channels =
        hwpdm_core::transport::list_channels().context("Failed to list CAN interfaces")?;

    println!("CAN channels:");
    if channels.is_empty() {
        println!("   (none found)");
    }
    for channel in &channels {
        let mark = if channel.name == selected { "*" } else { " " };
        println!(" {mark} {:<10} {}", channel.name, channel.state);
    }
    print_bitrates(settings.bitrate);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn print_channels(settings: &SessionConfig) -> Result<()> {
    println!("CAN channels: SocketCAN is only available on Linux");
    print_bitrates(settings.bitrate);
    Ok(())
}

fn print_bitrates(selected: Bitrate) {
    println!("Bitrates:");
    for bitrate in Bitrate::ALL {
        let mark = if bitrate == selected { "*" } else { " " };
        println!(" {mark} {bitrate}");
    }
}

/// Terminal prompts for device choice and confirmation.
struct PromptOperator;

impl Operator for PromptOperator {
    fn choose_device(&self, devices: &[DeviceHandle]) -> Option<usize> {
        let items: Vec<String> = devices.iter().map(ToString::to_string).collect();
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select device to update")
            .items(&items)
            .default(0)
            .interact_opt()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Device prompt failed");
                None
            })
    }

    fn confirm_transfer(&self, device: &DeviceHandle) -> bool {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Send configuration to {device}?"))
            .default(false)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Confirmation prompt failed");
                false
            })
    }
}

/// Renders transfer progress as a bar and logs everything else.
#[derive(Default)]
struct ConsoleObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleObserver {
    fn update_bar(&self, current: u64, total: u64, errors: u32) {
        let mut bar_lock = self.bar.lock().unwrap();
        let bar = bar_lock.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            bar
        });
        bar.set_position(current);
        bar.set_message(format!("{errors} resends"));
        if current >= total {
            bar.finish_with_message(format!("sent, {errors} resends"));
        }
    }
}

impl PdmObserver for ConsoleObserver {
    fn on_event(&self, event: &PdmEvent) {
        match event {
            PdmEvent::Progress {
                phase: PdmPhase::Transfer,
                current,
                total,
                errors,
            } => self.update_bar(*current, *total, *errors),
            PdmEvent::DeviceFound { device } => {
                println!("Found {device}");
            }
            other => {
                let bar_lock = self.bar.lock().unwrap();
                match bar_lock.as_ref() {
                    Some(bar) if !bar.is_finished() => {
                        if matches!(other, PdmEvent::Error { .. }) {
                            bar.abandon();
                        }
                        bar.suspend(|| TracingObserver.on_event(other));
                    }
                    _ => TracingObserver.on_event(other),
                }
            }
        }
    }
}
