use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use lasergantry::{
    init_logging, list_all_ports, list_ports, Axis, Config, JogRequest, Machine, ReplayRequest,
    SettingKey, SharedClock, SimConfig, SimulatedGantry, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML or JSON); defaults to the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against the built-in gantry model instead of serial hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Emit log events as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like controller boards
    Ports {
        /// Include every port, not only USB serial adapters
        #[arg(long)]
        all: bool,
    },
    /// Current position and state
    Status,
    /// Firmware settings by name
    Settings,
    /// Write one firmware setting, by name (x_steps_per_mm) or index (100)
    Set { key: String, value: f64 },
    /// Home and calibrate Y then X, set the origin
    HomeAll {
        /// Skip tracing the workspace perimeter afterwards
        #[arg(long)]
        no_outline: bool,
    },
    /// Home and calibrate the short axis
    HomeX,
    /// Home and calibrate the long axis
    HomeY,
    /// Relative move
    Jog {
        #[arg(long, allow_hyphen_values = true)]
        x: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        y: Option<f64>,
        /// mm/min; defaults to the configured jog feed
        #[arg(long)]
        feed: Option<f64>,
    },
    /// Move to work coordinate (0, 0)
    Home {
        #[arg(long)]
        feed: Option<f64>,
    },
    /// Replay a G-code file centred near the current position
    Replay {
        file: PathBuf,
        #[arg(long)]
        feed: Option<f64>,
        #[arg(long)]
        movement_feed: Option<f64>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        origin_x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        origin_y: f64,
        /// 0-1000, written into every M3
        #[arg(long)]
        laser_power: Option<u32>,
        #[arg(long)]
        invert_y: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_ports(all: bool) -> anyhow::Result<()> {
    let ports = if all { list_all_ports()? } else { list_ports()? };
    print_json(&ports)
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_or_default(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    info!("Configuration: {}", path.display());
    Ok(config)
}

fn parse_setting_key(key: &str) -> anyhow::Result<SettingKey> {
    if let Ok(index) = key.trim_start_matches('$').parse::<u16>() {
        return SettingKey::from_index(index)
            .ok_or_else(|| anyhow!("Unknown setting index ${}", index));
    }
    Ok(key.parse()?)
}

fn connect(config: Config, simulate: bool) -> anyhow::Result<Machine> {
    if simulate {
        let gantry = SimulatedGantry::new(SimConfig::default());
        return Ok(Machine::simulated(config, &gantry)?);
    }
    let clock: SharedClock = Arc::new(SystemClock::new());
    Ok(Machine::connect(config, clock)?)
}

fn run(machine: &Machine, command: Command) -> anyhow::Result<()> {
    let config = machine.config();
    match command {
        Command::Ports { all } => print_ports(all),
        Command::Status => {
            let position = machine.status()?;
            let limits = machine.limit_states()?;
            print_json(&json!({ "position": position, "limits": limits }))
        }
        Command::Settings => {
            let settings = machine.settings()?;
            let named: std::collections::BTreeMap<&str, f64> =
                settings.iter().map(|(key, value)| (key.name(), value)).collect();
            print_json(&named)
        }
        Command::Set { key, value } => {
            let key = parse_setting_key(&key)?;
            machine.update_setting(key, value)?;
            print_json(&json!({ "setting": key.name(), "index": key.index(), "value": value }))
        }
        Command::HomeAll { no_outline } => print_json(&machine.home_all(!no_outline)?),
        Command::HomeX => print_json(&machine.home_axis(Axis::X)?),
        Command::HomeY => print_json(&machine.home_axis(Axis::Y)?),
        Command::Jog { x, y, feed } => {
            let request = JogRequest::new(x, y, feed.unwrap_or(config.motion.jog_feed));
            print_json(&machine.jog(&request)?)
        }
        Command::Home { feed } => {
            print_json(&machine.return_to_home(feed.unwrap_or(config.motion.rapid_feed))?)
        }
        Command::Replay {
            file,
            feed,
            movement_feed,
            origin_x,
            origin_y,
            laser_power,
            invert_y,
        } => {
            let program = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let defaults = ReplayRequest::from_settings(&config.motion);
            let request = ReplayRequest {
                feed: feed.unwrap_or(defaults.feed),
                movement_feed: movement_feed.unwrap_or(defaults.movement_feed),
                origin_x,
                origin_y,
                laser_power: laser_power.unwrap_or(defaults.laser_power),
                invert_y,
            };
            print_json(&machine.replay(&program, &request)?)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json)?;

    if let Command::Ports { all } = args.command {
        return print_ports(all);
    }

    let config = load_config(args.config)?;
    let machine = connect(config, args.simulate)?;

    let result = run(&machine, args.command);
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    if let Err(e) = machine.close() {
        error!("Closing connections: {}", e);
    }
    result
}
