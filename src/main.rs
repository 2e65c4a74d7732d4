//! swarmit-ctl - fleet controller CLI.
//!
//! Mirrors `testbed/cli/main.py`'s click command group: one binary, a shared
//! set of transport/selection options, and one subcommand per controller
//! operation.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use swarmit_ctl::address::NodeAddress;
use swarmit_ctl::commands::ResetLocation;
use swarmit_ctl::constants::CHUNK_SIZE;
use swarmit_ctl::controller::{AdapterKind, Controller, ControllerSettings};
use swarmit_ctl::error::ControllerError;

#[derive(Parser)]
#[command(name = "swarmit-ctl", version, about = "Fleet controller for swarmit-style embedded nodes")]
struct Cli {
    /// Serial port the edge adapter connects to.
    #[arg(short, long, default_value = "")]
    port: String,

    /// Serial port baudrate.
    #[arg(short, long, default_value_t = 1_000_000)]
    baudrate: u32,

    /// MQTT broker host for the cloud adapter.
    #[arg(short = 'H', long = "mqtt-host", default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port for the cloud adapter.
    #[arg(short = 'P', long = "mqtt-port", default_value_t = 1883)]
    mqtt_port: u16,

    /// Use TLS for the MQTT connection.
    #[arg(short = 'T', long = "mqtt-use-tls")]
    mqtt_use_tls: bool,

    /// Network ID, as a hex string (e.g. "1200").
    #[arg(short, long = "network-id", default_value = "1200")]
    network_id: String,

    /// Which gateway transport to use.
    #[arg(short, long, value_enum, default_value_t = AdapterArg::Edge)]
    adapter: AdapterArg,

    /// Comma-separated list of 16-hex-char device addresses to target.
    /// Empty targets every known device.
    #[arg(short, long, default_value = "")]
    devices: String,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AdapterArg {
    Edge,
    Cloud,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fleet's current status.
    Status,
    /// Start the user application on ready devices.
    Start,
    /// Stop the user application on running/resetting devices.
    Stop,
    /// Reset positions, in the form `ADDR:x,y-ADDR:x,y` (metres).
    Reset { locations: String },
    /// Flash a firmware image.
    Flash {
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
        /// Start the application once the flash completes.
        #[arg(short = 's', long)]
        start: bool,
        /// Per-message ack timeout, in seconds.
        #[arg(short = 't', long = "ota-timeout", default_value_t = 0.7)]
        ota_timeout: f64,
        /// Per-message retry budget.
        #[arg(short = 'r', long = "ota-max-retries", default_value_t = 10)]
        ota_max_retries: u32,
        firmware: String,
    },
    /// Send a text message to the fleet.
    Message { message: String },
    /// Log inbound event notifications until interrupted.
    Monitor,
}

fn parse_devices(raw: &str) -> Result<Vec<NodeAddress>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| NodeAddress::parse_hex(s).map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

fn parse_locations(raw: &str) -> Result<HashMap<NodeAddress, ResetLocation>> {
    let mut locations = HashMap::new();
    for entry in raw.split('-').map(str::trim).filter(|s| !s.is_empty()) {
        let (addr_part, xy_part) = entry.split_once(':').context("expected ADDR:x,y")?;
        let (x_str, y_str) = xy_part.split_once(',').context("expected ADDR:x,y")?;
        let addr = NodeAddress::parse_hex(addr_part).map_err(|e| anyhow::anyhow!(e))?;
        let x: f64 = x_str.trim().parse().context("x must be a number")?;
        let y: f64 = y_str.trim().parse().context("y must be a number")?;
        locations.insert(addr, ResetLocation { pos_x: (x * 1e6) as i32, pos_y: (y * 1e6) as i32 });
    }
    Ok(locations)
}

fn build_settings(cli: &Cli) -> Result<ControllerSettings> {
    let network_id = u16::from_str_radix(cli.network_id.trim_start_matches("0x"), 16)
        .context("network-id must be a hex string")?;
    let devices = parse_devices(&cli.devices)?;

    Ok(ControllerSettings {
        serial_port: cli.port.clone(),
        serial_baudrate: cli.baudrate,
        mqtt_host: cli.mqtt_host.clone(),
        mqtt_port: cli.mqtt_port,
        mqtt_use_tls: cli.mqtt_use_tls,
        network_id,
        adapter: match cli.adapter {
            AdapterArg::Edge => AdapterKind::Edge,
            AdapterArg::Cloud => AdapterKind::Cloud,
        },
        devices,
        verbose: cli.verbose,
        ..ControllerSettings::default()
    })
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    log_builder.init();

    let settings = build_settings(&cli)?;

    match cli.command {
        Commands::Status => {
            let mut controller = Controller::new(settings)?;
            let status = controller.status()?;
            println!("{} device(s) known", status.len());
            let mut addrs: Vec<_> = status.keys().copied().collect();
            addrs.sort();
            for addr in addrs {
                let node = &status[&addr];
                println!(
                    "  {addr}  {:?}  {:?}  {}mV  pos=({}, {})",
                    node.device_type, node.lifecycle, node.battery_mv, node.pos_x, node.pos_y
                );
            }
            controller.terminate();
        }

        Commands::Start => {
            let mut controller = Controller::new(settings)?;
            controller.start()?;
            controller.terminate();
        }

        Commands::Stop => {
            let mut controller = Controller::new(settings)?;
            controller.stop()?;
            controller.terminate();
        }

        Commands::Reset { locations } => {
            let locations = parse_locations(&locations)?;
            let mut controller = Controller::new(settings)?;
            controller.reset(&locations)?;
            controller.terminate();
        }

        Commands::Flash { yes, start, ota_timeout, ota_max_retries, firmware } => {
            let firmware_bytes =
                fs::read(&firmware).with_context(|| format!("reading firmware file {firmware}"))?;
            if firmware_bytes.is_empty() {
                bail!("firmware file is empty");
            }

            let mut settings = settings;
            settings.ota_timeout = Duration::from_secs_f64(ota_timeout);
            settings.ota_max_retries = ota_max_retries;

            let mut controller = Controller::new(settings)?;
            let ready = controller.known_devices();
            if ready.is_empty() {
                controller.terminate();
                bail!("no device found");
            }

            if !yes
                && !confirm(&format!(
                    "Flash {} byte(s) ({} chunk(s) of {CHUNK_SIZE}) to {} device(s)?",
                    firmware_bytes.len(),
                    firmware_bytes.len().div_ceil(CHUNK_SIZE),
                    ready.len()
                ))?
            {
                controller.terminate();
                return Err(ControllerError::UserAbort.into());
            }

            let start_result = match controller.start_ota(&firmware_bytes) {
                Ok(result) => result,
                Err(err) => {
                    controller.stop().ok();
                    controller.terminate();
                    return Err(err.into());
                }
            };
            println!("image digest: {}", hex::encode_upper(start_result.image_digest));
            println!("{} acked the OTA_START handshake", start_result.acked.len());

            let transfer = controller.transfer(&firmware_bytes, &start_result.acked);
            let statuses = match transfer {
                Ok(statuses) => statuses,
                Err(ControllerError::TransferIncomplete { failed, total }) => {
                    controller.terminate();
                    bail!("firmware transfer incomplete for {} of {total} device(s): {failed:?}", failed.len());
                }
                Err(err) => {
                    controller.terminate();
                    return Err(err.into());
                }
            };
            let mut addrs: Vec<_> = statuses.keys().copied().collect();
            addrs.sort();
            for addr in addrs {
                let status = &statuses[&addr];
                let acked = status.chunks.iter().filter(|c| c.acked).count();
                println!("  {addr}  {acked}/{}", status.chunks.len());
            }

            if start {
                controller.start()?;
            }
            controller.terminate();
        }

        Commands::Message { message } => {
            let mut controller = Controller::new(settings)?;
            controller.message(&message)?;
            controller.terminate();
        }

        Commands::Monitor => {
            let mut controller = Controller::new(settings)?;
            controller.monitor()?;
            controller.terminate();
        }
    }

    Ok(())
}
