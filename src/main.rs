mod clock;
mod config;
mod device;
mod link;
mod security;
mod telemetry;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{DeviceConfig, DeviceConfigInput};
use device::Device;
use link::LinkManager;
use security::{SecurityMonitor, SysfsGpioInput};
use std::path::PathBuf;
use telemetry::{IioMeasurementSource, NoFixPosition, Sources, SysinfoMemory, TelemetryRouter};
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transport::{CellularTransport, MqttSession, NmcliLink, WirelessTransport};

#[derive(Parser, Debug)]
#[command(name = "wattscope-edge", about = "Dual-transport telemetry publisher")]
struct Cli {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Modem serial device (overrides the config file)
    #[arg(long)]
    modem_port: Option<String>,

    /// Modem baud rate (overrides the config file)
    #[arg(long)]
    modem_baud: Option<u32>,
}

fn resolve_config(cli: &Cli) -> Result<DeviceConfig> {
    let mut input = match &cli.config {
        Some(path) => config::load(path)?,
        None => DeviceConfigInput::default(),
    };
    if let Some(port) = &cli.modem_port {
        input.modem.port = Some(port.clone());
    }
    if let Some(baud) = cli.modem_baud {
        input.modem.baud = Some(baud);
    }
    input.resolve().map_err(|e| anyhow!("invalid config: {}", e))
}

fn open_modem(config: &DeviceConfig) -> Result<SerialStream> {
    tokio_serial::new(&config.modem_port, config.modem_baud)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .open_native_async()
        .with_context(|| format!("opening modem at {}", config.modem_port))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    info!("WattScope edge starting");
    info!("  Modem: {} @ {} baud", config.modem_port, config.modem_baud);
    info!("  Broker: {}", config.cellular.broker_host);
    info!("  Wireless: {} on {}", config.wireless.ssid, config.wireless_interface);

    let boot = Instant::now();
    let modem = open_modem(&config)?;
    let cellular = CellularTransport::new(modem, config.cellular.clone());
    let wireless = WirelessTransport::new(
        NmcliLink::new(config.wireless_interface.clone()),
        MqttSession::new(config.session.clone()),
        config.wireless.clone(),
    );
    let link = LinkManager::new(
        Box::new(cellular),
        Box::new(wireless),
        config.link.clone(),
        boot,
    );

    let sources = Sources {
        measurements: Box::new(IioMeasurementSource::new(
            config.sensors.iio_device.clone(),
            config.sensors.reference_volts,
            config.sensors.resolution_bits,
            config.sensors.channels.clone(),
        )),
        position: Box::new(NoFixPosition),
        system: Box::new(SysinfoMemory::new()),
    };
    let router = TelemetryRouter::new(config.router.clone(), boot);
    let door = SysfsGpioInput::new(config.door_gpio.clone());
    let security = SecurityMonitor::new(Box::new(door), boot);

    let mut device = Device::new(link, router, security, sources);
    device.start().await;

    tokio::select! {
        _ = device.run(config.pass_interval) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Signal handler failed: {}", e);
            }
            info!("Shutting down");
        }
    }

    device.shutdown().await;
    Ok(())
}
