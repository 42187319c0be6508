//! Linear Radar Client
//!
//! Opens a radar, prints its identification, configures it and reads depth
//! frames in continuous or trigger mode. Optionally captures a debug image.
//!
//! Usage:
//!   cargo run --example radar_client -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT         Serial port (default: first port found)
//!   --tcp HOST:PORT     Connect through a serial-over-IP bridge instead
//!   --simulate          Talk to the built-in simulated device
//!   --config FILE       Load session settings from a JSON file
//!   --power PCT         Laser power 0-100 (default: left to the device)
//!   --size N            Depth resolution (default: device maximum)
//!   --frames N          Number of frames to read (default: 100)
//!   --trigger           Use trigger mode instead of continuous streaming
//!   --save-image DIR    Capture a debug image and save it under DIR
//!   --list              List serial ports and exit
//!
//! Log output is controlled by RUST_LOG (e.g. RUST_LOG=radarlink_core=debug).

use anyhow::{bail, Context, Result};
use radarlink_core::demo::SimulatedRadar;
use radarlink_core::protocol::{
    list_ports, Clock, DeviceSession, RadarError, RadarMode, SessionConfig, SystemClock,
    TcpChannel, Transport,
};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

struct Options {
    port: Option<String>,
    tcp: Option<String>,
    simulate: bool,
    config: Option<String>,
    power: Option<u8>,
    size: Option<u16>,
    frames: u32,
    trigger: bool,
    save_image: Option<String>,
    list: bool,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options {
        port: None,
        tcp: None,
        simulate: false,
        config: None,
        power: None,
        size: None,
        frames: 100,
        trigger: false,
        save_image: None,
        list: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let flag = arg.as_str();
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{} needs a value", name))
        };
        match flag {
            "--port" | "-p" => opts.port = Some(value(flag)?),
            "--tcp" => opts.tcp = Some(value(flag)?),
            "--simulate" => opts.simulate = true,
            "--config" | "-c" => opts.config = Some(value(flag)?),
            "--power" | "-b" => {
                opts.power = Some(value(flag)?.parse().context("invalid laser power")?)
            }
            "--size" | "-s" => opts.size = Some(value(flag)?.parse().context("invalid size")?),
            "--frames" | "-n" => {
                opts.frames = value(flag)?.parse().context("invalid frame count")?
            }
            "--trigger" => opts.trigger = true,
            "--save-image" => opts.save_image = Some(value(flag)?),
            "--list" => opts.list = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other if !other.starts_with('-') => opts.port = Some(other.to_string()),
            other => bail!("unknown option: {}", other),
        }
    }
    Ok(Some(opts))
}

fn print_help() {
    println!("Linear Radar Client");
    println!();
    println!("Usage: radar_client [OPTIONS] [PORT]");
    println!();
    println!("  --port PORT         Serial port (default: first port found)");
    println!("  --tcp HOST:PORT     Connect through a serial-over-IP bridge");
    println!("  --simulate          Use the built-in simulated device");
    println!("  --config FILE       Session settings as JSON");
    println!("  --power PCT         Laser power 0-100");
    println!("  --size N            Depth resolution (default: device maximum)");
    println!("  --frames N          Frames to read (default: 100)");
    println!("  --trigger           Trigger mode instead of continuous streaming");
    println!("  --save-image DIR    Capture a debug image into DIR");
    println!("  --list              List serial ports and exit");
}

fn open_session(opts: &Options) -> Result<DeviceSession> {
    let mut config = match &opts.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    if opts.simulate {
        config.port_name = "simulator".into();
        let sim = SimulatedRadar::new(clock.clone()).handle();
        return Ok(DeviceSession::open_with(config, sim.connector(), clock)?);
    }

    if let Some(addr) = &opts.tcp {
        config.port_name = addr.clone();
        let connector = |addr: &str| -> Result<Box<dyn Transport>, RadarError> {
            let channel =
                TcpChannel::connect(addr).map_err(|e| RadarError::PortFailed(e.to_string()))?;
            Ok(Box::new(channel))
        };
        return Ok(DeviceSession::open_with(config, connector, clock)?);
    }

    if let Some(port) = &opts.port {
        config.port_name = port.clone();
    }
    if config.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(p) => config.port_name = p.name,
            None => bail!("no serial port found; pass --port or --simulate"),
        }
    }
    println!("Opening {} at {} baud...", config.port_name, config.baud_rate);
    Ok(DeviceSession::open_with_config(config)?)
}

fn run(opts: Options) -> Result<()> {
    if opts.list {
        for p in list_ports() {
            println!("{:<20} {}", p.name, p.product.unwrap_or_default());
        }
        return Ok(());
    }

    let mut radar = open_session(&opts)?;

    let info = radar.get_info()?;
    println!("Product name:    {}", info.name);
    println!("Product version: {}", info.version());
    println!("Serial number:   {}", info.serial_number);

    let fov = radar.get_fov()?;
    println!("FOV:             {:.1} degree", fov as f32 / 10.0);

    if let Some(power) = opts.power {
        radar.set_laser_power(power)?;
    }
    let size = match opts.size {
        Some(size) => size,
        None => {
            let max = radar.get_max_resolution()?;
            println!("Using max resolution: {} points", max);
            max
        }
    };
    radar.set_resolution(size)?;

    if let Some(dir) = &opts.save_image {
        println!("Capturing debug image...");
        let image = radar.fetch_debug_image()?;
        let path = image.save_timestamped(dir)?;
        println!(
            "Debug image {}x{} saved to {}",
            image.width,
            image.height,
            path.display()
        );
    }

    let mode = if opts.trigger {
        RadarMode::Trigger
    } else {
        RadarMode::Continuous
    };
    radar.set_mode(mode)?;
    if mode == RadarMode::Continuous {
        radar.start_depth()?;
    }

    let timeout = radar.io_timeout_ms();
    let started = Instant::now();
    let mut received = 0u32;
    for _ in 0..opts.frames {
        let frame = match mode {
            RadarMode::Continuous => radar.continuous_depth(timeout),
            _ => radar.trigger_depth(),
        };
        match frame {
            Ok(frame) => {
                received += 1;
                let nearest = frame.samples.iter().copied().min().unwrap_or(0);
                println!(
                    "t={:>10} ms  {} points  nearest {} mm",
                    frame.timestamp_ms,
                    frame.samples.len(),
                    nearest
                );
            }
            Err(RadarError::DepthUnavailable) => println!("no depth frame"),
            Err(e) => return Err(e.into()),
        }
    }

    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        println!("{} frames in {:.2} s ({:.1} fps)", received, secs, received as f64 / secs);
    }

    let stats = radar.stats();
    println!(
        "Link: {} bytes in, {} bytes out, {} resync drops, {} CRC drops",
        stats.rx_bytes, stats.tx_bytes, stats.resync_discards, stats.crc_failures
    );

    radar.close().context("closing radar")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match parse_args()? {
        Some(opts) => run(opts),
        None => Ok(()),
    }
}
