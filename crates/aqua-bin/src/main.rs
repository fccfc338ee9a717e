//! CLI entry point for the aquarium dashboard.
//!
//! Provides command-line access to:
//! - Controller values (lights, top-off, raw `key=value` writes)
//! - The pull-paced camera stream
//! - Water temperature logging to InfluxDB
//!
//! # Usage
//!
//! ```bash
//! aquarium state
//! aquarium light moon
//! aquarium top-off 30
//! aquarium watch --fps 12 --snapshot /tmp/tank.jpg
//! aquarium log-temperature --influx-url http://influx.local:8086
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod watch;

use anyhow::{bail, Context, Result};
use aqua_client::{
    parse_assignment, resolve_address, ControllerState, ControllerValues, DeviceClient,
    InfluxWriter, LightMode, MeasurementSchedule, TemperatureLogger, W1Sensor, W1_DEVICES_DIR,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::{AquariumConfig, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "aquarium")]
#[command(about = "Aquarium controller dashboard", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Controller API base URL (overrides config and AQUARIUM_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the controller state
    State {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write raw controller values
    Set {
        /// Assignments such as `fan=1` or `mode=auto`
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
    },

    /// Switch the tank lights
    Light {
        /// Light mode
        mode: LightArg,
    },

    /// Run the top-off pump
    TopOff {
        /// Pump run time in seconds
        seconds: u64,
    },

    /// Stream the tank camera (stdin: show, hide, retry, status, quit)
    Watch {
        /// Camera websocket URL
        #[arg(long)]
        url: Option<String>,

        /// Target frame rate (1-120)
        #[arg(long)]
        fps: Option<u32>,

        /// Keep the latest frame in this file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Start with the stream hidden
        #[arg(long)]
        hidden: bool,
    },

    /// Log the water temperature to InfluxDB until Ctrl-C
    LogTemperature {
        /// `w1_slave` file of the probe
        #[arg(long)]
        sensor: Option<PathBuf>,

        /// InfluxDB server
        #[arg(long)]
        influx_url: Option<String>,

        /// InfluxDB database
        #[arg(long)]
        database: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LightArg {
    Sun,
    Moon,
    Off,
}

impl From<LightArg> for LightMode {
    fn from(arg: LightArg) -> Self {
        match arg {
            LightArg::Sun => Self::Sun,
            LightArg::Moon => Self::Moon,
            LightArg::Off => Self::Off,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AquariumConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::State { json } => {
            let client = device_client(&config, cli.api_url.as_deref())?;
            let state = client.get_state().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&client, &state);
            }
        }
        Commands::Set { assignments } => {
            let client = device_client(&config, cli.api_url.as_deref())?;
            let values = assignments
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<aqua_client::Result<ControllerValues>>()?;
            let state = client.send_values(&values).await?;
            print_state(&client, &state);
        }
        Commands::Light { mode } => {
            let client = device_client(&config, cli.api_url.as_deref())?;
            let state = client.set_light(mode.into()).await?;
            print_state(&client, &state);
        }
        Commands::TopOff { seconds } => {
            if seconds == 0 {
                bail!("top-off duration must be at least one second");
            }
            let client = device_client(&config, cli.api_url.as_deref())?;
            let state = client.top_off(Duration::from_secs(seconds)).await?;
            println!("Top-off scheduled for {seconds}s");
            print_state(&client, &state);
        }
        Commands::Watch {
            url,
            fps,
            snapshot,
            hidden,
        } => {
            let camera = config.camera;
            let target_fps = fps.unwrap_or(camera.target_fps);
            if !(1..=120).contains(&target_fps) {
                bail!("--fps must be between 1 and 120, got {target_fps}");
            }
            let options = watch::WatchOptions {
                url: url.unwrap_or(camera.websocket_url),
                target_fps,
                pull_token: camera.pull_token,
                snapshot: snapshot.or(camera.snapshot_path),
                hidden,
                connect_timeout: Duration::from_millis(config.controller.connect_timeout_ms),
            };
            let report = watch::run(options).await?;
            println!("{}", watch::summary(&report));
        }
        Commands::LogTemperature {
            sensor,
            influx_url,
            database,
        } => {
            let settings = config.temperature;
            let sensor = match sensor.or(settings.sensor_path) {
                Some(path) => W1Sensor::new(path),
                None => W1Sensor::discover(W1_DEVICES_DIR)?,
            };
            let influx_url = influx_url.unwrap_or(settings.influx_url);
            let writer = InfluxWriter::new(
                &influx_url,
                &database.unwrap_or(settings.database),
                Duration::from_millis(settings.write_timeout_ms),
            )?;
            let schedule = MeasurementSchedule::new(
                Duration::from_secs(settings.send_interval_secs),
                settings.aggregated_count,
            )?;

            println!(
                "Measuring every {:.1}s from {}, sending the median of {} readings to {} every {}s",
                schedule.measure_interval().as_secs_f64(),
                sensor.path().display(),
                schedule.batch_size(),
                writer.url(),
                settings.send_interval_secs,
            );
            let stats = TemperatureLogger::new(sensor, writer, schedule)
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
            println!(
                "{} readings ({} failed), {} points sent ({} failed)",
                stats.readings, stats.read_failures, stats.points_sent, stats.send_failures
            );
        }
    }

    Ok(())
}

fn device_client(config: &AquariumConfig, api_url: Option<&str>) -> Result<DeviceClient> {
    let address = resolve_address(api_url, config.controller.api_url.as_deref());
    tracing::debug!(address = %address, source = %address.source(), "Resolved controller address");
    Ok(DeviceClient::new(
        address,
        config.controller.controller_id.clone(),
        &config.controller.client_config(),
    )?)
}

fn print_state(client: &DeviceClient, state: &ControllerState) {
    println!("Controller: {} @ {}", client.controller_id(), client.address());
    println!("{:<20} {}", "lights", state.light_mode());
    for (name, value) in state.readings() {
        println!("{name:<20} {value}");
    }
}
