//! open-mouse CLI: command-line gaming mouse configuration tool.

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use open_mouse_core::config::SupervisorConfig;
use open_mouse_core::native::NativeBackend;
use open_mouse_core::protocol::LightingMode;
use open_mouse_core::safety::BRICKING_DISCLAIMER;
use open_mouse_core::setting::Setting;
use open_mouse_core::{ConnectionState, DeviceDescriptor, Error, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "open-mouse",
    version,
    about = "Open-source gaming mouse configuration"
)]
struct Cli {
    /// Index of the device to use, as printed by `list-devices`.
    #[arg(long, short, global = true, default_value_t = 0)]
    device: usize,
    /// JSON file with supervisor settings (retries, timeouts, health checks).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected gaming mice.
    ListDevices {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Connect and show how the device was opened.
    Info,
    /// Set DPI (100-20000).
    SetDpi { value: u16 },
    /// Set DPI stages (1 to 5 values, each 100-20000).
    SetDpiStages {
        #[arg(required = true, num_args = 1..)]
        values: Vec<u16>,
    },
    /// Set polling rate (125, 250, 500, or 1000 Hz).
    SetRate { value: u16 },
    /// Set lighting.
    SetRgb {
        /// Colour as #RRGGBB.
        color: String,
        /// static, breathing, spectrum, wave, or reactive.
        #[arg(long, default_value = "static")]
        mode: String,
        /// Brightness percent (0-100).
        #[arg(long, default_value_t = 100)]
        brightness: u8,
        /// Effect speed percent (0-100).
        #[arg(long, default_value_t = 50)]
        speed: u8,
    },
    /// Set lift-off distance in millimetres (1-3).
    SetLod { value: u8 },
    /// Enable or disable angle snapping.
    SetAngleSnapping {
        #[arg(value_parser = parse_on_off, action = ArgAction::Set)]
        state: bool,
    },
    /// Set button debounce time in milliseconds (2-16).
    SetDebounce { value: u8 },
    /// Remap a button to a vendor action code.
    SetButton { button: u8, action: u8 },
    /// Ask the device for its firmware version.
    FirmwareVersion,
    /// Enter or leave firmware-update (DFU) mode.
    Dfu {
        action: DfuAction,
        /// Confirm you have read the bricking disclaimer.
        #[arg(long)]
        i_understand: bool,
    },
    /// Stay connected and report state changes and errors.
    Watch {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DfuAction {
    Enter,
    Exit,
}

fn parse_on_off(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SupervisorConfig> {
    match path {
        Some(path) => Ok(SupervisorConfig::load(path)?),
        None => Ok(SupervisorConfig::default()),
    }
}

fn print_permission_hint(device: &DeviceDescriptor) {
    if cfg!(target_os = "linux") {
        eprintln!("Hint: grant your user access with a udev rule, for example:");
        eprintln!(
            "  SUBSYSTEM==\"hidraw\", ATTRS{{idVendor}}==\"{:04x}\", ATTRS{{idProduct}}==\"{:04x}\", MODE=\"0660\", TAG+=\"uaccess\"",
            device.vendor_id, device.product_id
        );
        eprintln!(
            "  SUBSYSTEM==\"usb\", ATTRS{{idVendor}}==\"{:04x}\", MODE=\"0660\", TAG+=\"uaccess\"",
            device.vendor_id
        );
        eprintln!("Then run: sudo udevadm control --reload-rules && sudo udevadm trigger");
    } else if cfg!(target_os = "windows") {
        eprintln!("Hint: run as administrator, or bind the interface to WinUSB (e.g. with Zadig).");
    } else {
        eprintln!("Hint: run with elevated privileges.");
    }
}

/// Scan, pick the requested device and connect to it.
fn open(cli: &Cli) -> Result<Supervisor> {
    let config = load_config(cli.config.as_ref())?;
    let backend = Arc::new(NativeBackend::new());
    let supervisor = Supervisor::new(backend, config, tracing::info_span!("supervisor"))?;

    let devices = supervisor.scan_devices();
    let device = devices.get(cli.device).ok_or_else(|| {
        if devices.is_empty() {
            anyhow!("No supported gaming mouse found")
        } else {
            anyhow!(
                "Device index {} out of range ({} found, see list-devices)",
                cli.device,
                devices.len()
            )
        }
    })?;

    match supervisor.try_connect(device) {
        Ok(strategy) => {
            tracing::info!(%strategy, device = %device, "Connected");
            Ok(supervisor)
        }
        Err(e) => {
            if matches!(e, Error::PermissionDenied(_)) {
                print_permission_hint(device);
            }
            Err(anyhow::Error::new(e).context(format!("connect to {device}")))
        }
    }
}

fn apply(cli: &Cli, setting: Setting) -> Result<()> {
    let supervisor = open(cli)?;
    let method = supervisor
        .try_apply(&setting)
        .with_context(|| format!("apply {setting}"))?;
    println!("Applied {setting} via {method}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::ListDevices { json } => {
            let devices = open_mouse_core::scan(&NativeBackend::new());
            if *json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No supported gaming mice found.");
                println!("Ensure your mouse is connected and you have access to its HID device.");
            } else {
                for (index, dev) in devices.iter().enumerate() {
                    println!("[{index}] {dev} [{}] path: {}", dev.protocol, dev.path);
                }
            }
        }
        Commands::Info => {
            let supervisor = open(&cli)?;
            for line in supervisor.get_connection_info() {
                println!("{line}");
            }
            let healthy = supervisor.test_connection();
            println!("Responding: {}", if healthy { "yes" } else { "no" });
        }
        Commands::SetDpi { value } => apply(&cli, Setting::Dpi(*value))?,
        Commands::SetDpiStages { values } => apply(&cli, Setting::DpiStages(values.clone()))?,
        Commands::SetRate { value } => apply(&cli, Setting::PollingRate(*value))?,
        Commands::SetRgb {
            color,
            mode,
            brightness,
            speed,
        } => {
            let mode = LightingMode::from_name(mode).ok_or_else(|| {
                let valid: Vec<&str> = LightingMode::ALL.iter().map(|m| m.label()).collect();
                anyhow!("Unknown lighting mode '{mode}'. Valid modes: {}", valid.join(", "))
            })?;
            apply(
                &cli,
                Setting::Rgb {
                    color: color.clone(),
                    mode,
                    brightness: *brightness,
                    speed: *speed,
                },
            )?
        }
        Commands::SetLod { value } => apply(&cli, Setting::LiftOffDistance(*value))?,
        Commands::SetAngleSnapping { state } => apply(&cli, Setting::AngleSnapping(*state))?,
        Commands::SetDebounce { value } => apply(&cli, Setting::Debounce(*value))?,
        Commands::SetButton { button, action } => apply(
            &cli,
            Setting::ButtonMapping {
                button: *button,
                action: *action,
            },
        )?,
        Commands::FirmwareVersion => {
            let supervisor = open(&cli)?;
            let method = supervisor.request_firmware_version()?;
            println!("Firmware version request sent via {method}");
        }
        Commands::Dfu {
            action,
            i_understand,
        } => {
            eprintln!("{BRICKING_DISCLAIMER}");
            if !*i_understand {
                bail!("Refusing to change firmware mode without --i-understand");
            }
            let supervisor = open(&cli)?;
            let method = match action {
                DfuAction::Enter => supervisor.enter_dfu_mode(true)?,
                DfuAction::Exit => supervisor.exit_dfu_mode(true)?,
            };
            println!("Firmware mode command sent via {method}");
        }
        Commands::Watch { seconds } => {
            let supervisor = open(&cli)?;
            supervisor.on_state_change(|state| println!("State: {state}"));
            supervisor.on_error(|error| eprintln!("Error: {error}"));
            println!("Watching for {seconds}s...");
            std::thread::sleep(Duration::from_secs(*seconds));

            let metrics = supervisor.metrics();
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            if supervisor.state() != ConnectionState::Connected {
                bail!("Device ended in state {}", supervisor.state());
            }
        }
    }

    Ok(())
}
