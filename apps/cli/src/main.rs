use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bklight_core::protocol::ack::to_hex;
use bklight_core::protocol::constants::{
    DEFAULT_BRIGHTNESS, FRAME_HEADER_SIZE, MAX_BRIGHTNESS, MIN_BRIGHTNESS,
};
use bklight_core::text::DEFAULT_FONT_SIZE;
use bklight_core::{
    BleTransport, DeviceConfig, DeviceSession, FrameHeader, MockTransport, Rotation, TextStyle,
    build_frame, raster, render_clock, render_text,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use image::{DynamicImage, Rgb};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "BK Light LED matrix tool", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send an image to the display
    Send {
        /// Image file (any size; fitted to 32x32)
        #[arg(long)]
        image: PathBuf,

        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        look: LookArgs,

        #[command(flatten)]
        delivery: DeliveryArgs,
    },
    /// Render centred text and send it
    Text {
        #[arg(long)]
        text: String,

        /// Text colour as RRGGBB
        #[arg(long, value_parser = parse_color, default_value = "FF0000")]
        color: Rgb<u8>,

        /// Background colour as RRGGBB
        #[arg(long, value_parser = parse_color, default_value = "000000")]
        background: Rgb<u8>,

        /// Glyph height in pixels
        #[arg(long, default_value_t = DEFAULT_FONT_SIZE)]
        font_size: u32,

        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        look: LookArgs,

        #[command(flatten)]
        delivery: DeliveryArgs,
    },
    /// Send the current local time as HH:MM
    Clock {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        look: LookArgs,

        #[command(flatten)]
        delivery: DeliveryArgs,
    },
    /// Encode an image into a frame without any device
    Frame {
        #[arg(long)]
        image: PathBuf,

        /// Write the encoded frame here
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        look: LookArgs,
    },
    /// Write a default config file
    InitConfig {
        /// Display MAC address
        #[arg(long)]
        address: String,

        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// Display MAC address (overrides the config file)
    #[arg(long)]
    address: Option<String>,

    /// TOML device config
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct DeliveryArgs {
    /// Extra attempts after a failed transfer
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Talk to a simulated display instead of Bluetooth
    #[arg(long)]
    fake: bool,
}

#[derive(clap::Args, Debug, Default)]
struct LookArgs {
    /// Mounting rotation in degrees: 0, 90, 180 or 270
    #[arg(long, value_parser = parse_rotation)]
    rotation: Option<Rotation>,

    /// Brightness factor in [0.1, 1.0]
    #[arg(long)]
    brightness: Option<f32>,
}

fn parse_rotation(value: &str) -> Result<Rotation, String> {
    let degrees: u16 = value.parse().map_err(|e| format!("{e}"))?;
    Rotation::try_from(degrees).map_err(|e| e.to_string())
}

/// `RRGGBB`, with or without a leading `#`.
fn parse_color(value: &str) -> Result<Rgb<u8>, String> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("expected RRGGBB, got {value:?}"));
    }
    let channel = |at: usize| u8::from_str_radix(&hex[at..at + 2], 16).map_err(|e| e.to_string());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

fn check_brightness(brightness: f32) -> Result<f32> {
    if !(MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&brightness) {
        bail!("brightness {brightness} outside [{MIN_BRIGHTNESS}, {MAX_BRIGHTNESS}]");
    }
    Ok(brightness)
}

/// Config file first, then command-line overrides.
fn resolve_config(device: &DeviceArgs, look: &LookArgs) -> Result<DeviceConfig> {
    let mut config = match (&device.config, &device.address) {
        (Some(path), _) => DeviceConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        (None, Some(address)) => DeviceConfig::new(address),
        (None, None) => bail!("either --address or --config is required"),
    };
    if let (Some(_), Some(address)) = (&device.config, &device.address) {
        config.address = address.to_uppercase();
    }
    if let Some(rotation) = look.rotation {
        config.rotation = rotation;
    }
    if let Some(brightness) = look.brightness {
        config.brightness = check_brightness(brightness)?;
    }
    config.validate()?;
    Ok(config)
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("opening image {}", path.display()))
}

/// Send with up to `retries` extra attempts; `send_image` reconnects when the
/// link is gone.
fn deliver<T: BleTransport>(
    mut session: DeviceSession<T>,
    image: &DynamicImage,
    retries: u32,
) -> Result<()> {
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match session.send_image(image) {
            Ok(()) => break Ok(()),
            Err(e) if attempt <= retries => {
                warn!(attempt, error = %e, "Transfer failed, retrying");
                if e.is_link_failure() {
                    session.disconnect();
                }
            }
            Err(e) => {
                break Err(e).with_context(|| format!("transfer failed after {attempt} attempt(s)"));
            }
        }
    };
    session.disconnect();
    result
}

#[cfg(feature = "ble")]
fn deliver_ble(config: DeviceConfig, image: &DynamicImage, retries: u32) -> Result<()> {
    let transport =
        bklight_core::BtleplugTransport::open().context("opening Bluetooth adapter")?;
    deliver(DeviceSession::new(transport, config), image, retries)
}

#[cfg(not(feature = "ble"))]
fn deliver_ble(_config: DeviceConfig, _image: &DynamicImage, _retries: u32) -> Result<()> {
    bail!("built without Bluetooth support; rebuild with `--features ble` or pass --fake")
}

fn send(
    image: DynamicImage,
    device: &DeviceArgs,
    look: &LookArgs,
    delivery: &DeliveryArgs,
) -> Result<()> {
    let config = resolve_config(device, look)?;
    info!(
        address = %config.address,
        rotation = %config.rotation,
        brightness = config.brightness,
        "Sending image"
    );

    if delivery.fake {
        info!("Using simulated display");
        let transport = MockTransport::responsive(&config.address);
        return deliver(DeviceSession::new(transport, config), &image, delivery.retries);
    }
    deliver_ble(config, &image, delivery.retries)
}

fn frame(image: &Path, output: Option<&Path>, look: &LookArgs) -> Result<()> {
    let image = load_image(image)?;
    let rotation = look.rotation.unwrap_or_default();
    let brightness = check_brightness(look.brightness.unwrap_or(DEFAULT_BRIGHTNESS))?;

    let payload = raster::prepare(&image, rotation, brightness)?;
    let frame = build_frame(&payload)?;
    let header = FrameHeader::from_bytes(&frame)?;

    println!("total_length:   {}", header.total_length);
    println!("payload_length: {}", header.payload_length);
    println!("checksum:       0x{:08X}", header.checksum);
    println!("header:         {}", to_hex(&frame[..FRAME_HEADER_SIZE]));

    if let Some(path) = output {
        std::fs::write(path, &frame)
            .with_context(|| format!("writing frame {}", path.display()))?;
        info!(path = %path.display(), bytes = frame.len(), "Frame written");
    }
    Ok(())
}

fn init_config(address: &str, output: &Path) -> Result<()> {
    let config = DeviceConfig::new(address);
    config.validate()?;
    config
        .save_to_file(output)
        .with_context(|| format!("writing config {}", output.display()))?;
    info!(path = %output.display(), address = %config.address, "Config written");
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Send {
            image,
            device,
            look,
            delivery,
        } => send(load_image(&image)?, &device, &look, &delivery),
        Command::Text {
            text,
            color,
            background,
            font_size,
            device,
            look,
            delivery,
        } => {
            let style = TextStyle {
                color,
                background,
                font_size,
            };
            let image = DynamicImage::ImageRgb8(render_text(&text, &style));
            send(image, &device, &look, &delivery)
        }
        Command::Clock {
            device,
            look,
            delivery,
        } => {
            let now = Local::now();
            info!(time = %now.format("%H:%M"), "Rendering clock");
            let image = DynamicImage::ImageRgb8(render_clock(&now));
            send(image, &device, &look, &delivery)
        }
        Command::Frame {
            image,
            output,
            look,
        } => frame(&image, output.as_deref(), &look),
        Command::InitConfig { address, output } => init_config(&address, &output),
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

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
