use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kbdscr::canvas::{find_system_font, load_font, RasterCanvas};
use kbdscr::config::{ShowConfig, SnapshotConfig};
use kbdscr::display::{self, RepaintRequest};
use kbdscr::evdev_util::find_key_devices;
use kbdscr::layouts::BUILTIN_LAYOUTS;
use kbdscr::settings::Settings;
use kbdscr::terminal::Terminal;
use kbdscr::{KeyState, Keyboard, LayoutSpec, WatchError, WatchHandler, WatchSession};
use fontdue::Font;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kbdscr")]
#[command(version)]
#[command(about = "Show live key and button state from evdev input devices", long_about = None)]
struct Cli {
    /// Settings file (default: ~/.config/kbdscr/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Font for key labels (overrides the settings file)
    #[arg(long, global = true)]
    font: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available layouts
    Layouts,

    /// List input devices that report keys or buttons
    Devices,

    /// Show key state live in the terminal
    Show {
        /// Layout name (see `kbdscr layouts`)
        #[arg(short, long)]
        layout: Option<String>,

        /// Event devices to watch (default: every device with keys)
        devices: Vec<PathBuf>,

        /// Seconds between input checks
        #[arg(short, long, default_value = "0.02")]
        time: f32,
    },

    /// Render one frame to a PNG file
    Snapshot {
        /// Layout name (see `kbdscr layouts`)
        #[arg(short, long)]
        layout: Option<String>,

        /// Output image path
        #[arg(short, long, default_value = "kbdscr.png")]
        output: PathBuf,

        /// Key codes to draw as pressed
        #[arg(short, long, value_delimiter = ',')]
        press: Vec<u16>,

        /// Key codes to draw as held
        #[arg(short = 'H', long, value_delimiter = ',')]
        hold: Vec<u16>,
    },
}

/// Feeds watcher events into the keyboard.
struct KeyboardSink(Arc<Keyboard>);

impl WatchHandler for KeyboardSink {
    fn key_state(&self, code: u16, state: KeyState) {
        if let Err(e) = self.0.set_state(code, state) {
            debug!("ignoring key event: {}", e);
        }
    }

    fn error(&self, err: WatchError) {
        warn!("{}", err);
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn resolve_layout(settings: &Settings, name: Option<String>) -> Result<LayoutSpec> {
    let Some(name) = name.or_else(|| settings.layout.clone()) else {
        bail!("no layout given; pick one from `kbdscr layouts`");
    };
    settings
        .find_layout(&name)
        .with_context(|| format!("initialize keyboard layout: could not find layout {}", name))
}

fn resolve_font(configured: Option<&Path>) -> Result<Option<Arc<Font>>> {
    let path = match configured {
        Some(path) => path.to_path_buf(),
        None => match find_system_font() {
            Some(path) => path,
            None => {
                warn!("no font found, key labels will not be drawn (set one with --font)");
                return Ok(None);
            }
        },
    };
    let font = load_font(&path)?;
    debug!("using font {}", path.display());
    Ok(Some(Arc::new(font)))
}

fn show(config: ShowConfig) -> Result<()> {
    let mut keyboard = Keyboard::new(config.layout).context("initialize keyboard layout")?;
    let font = resolve_font(config.font.as_deref())?;

    let repaint = RepaintRequest::new();
    let request = repaint.clone();
    keyboard.set_redraw_callback(move || request.request());
    let keyboard = Arc::new(keyboard);

    let devices = if config.devices.is_empty() {
        let found: Vec<PathBuf> = find_key_devices().into_iter().map(|d| d.path).collect();
        if found.is_empty() {
            bail!("no input devices with keys found (are you in the `input` group?)");
        }
        found
    } else {
        config.devices
    };
    info!("watching {} devices", devices.len());

    let watcher = WatchSession::start(devices, KeyboardSink(Arc::clone(&keyboard)))
        .context("start evdev watcher")?;

    let result = Terminal::new(true)
        .and_then(|mut term| display::run(&mut term, &keyboard, &repaint, font, config.time_step));

    info!("cleaning up");
    watcher.stop();
    result.context("run terminal display")
}

fn snapshot(config: SnapshotConfig) -> Result<()> {
    let keyboard = Keyboard::new(config.layout).context("initialize keyboard layout")?;
    for &code in &config.pressed {
        keyboard.set_state(code, KeyState::Pressed)?;
    }
    for &code in &config.held {
        keyboard.set_state(code, KeyState::Held)?;
    }

    let font = resolve_font(config.font.as_deref())?;
    let mut canvas = RasterCanvas::new(keyboard.width(), keyboard.height()).with_font(font);
    keyboard.draw(&mut canvas);
    canvas
        .save_png(&config.output)
        .with_context(|| format!("write {}", config.output.display()))?;
    info!(
        "wrote {}x{} frame to {}",
        keyboard.width(),
        keyboard.height(),
        config.output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    let font = cli.font.or_else(|| settings.font.clone());

    match cli.command {
        Commands::Layouts => {
            println!("Layouts:");
            for layout in BUILTIN_LAYOUTS {
                println!("    {:<16} {}", layout.name, layout.description);
            }
            for layout in &settings.layouts {
                println!("    {:<16} {}", layout.name, layout.description);
            }
        }
        Commands::Devices => {
            for device in find_key_devices() {
                println!("{:<24} {:>4} keys  {}", device.path.display(), device.keys, device.name);
            }
        }
        Commands::Show { layout, devices, time } => {
            let config = ShowConfig {
                layout: resolve_layout(&settings, layout)?,
                devices,
                font,
                time_step: time.max(0.001),
            };
            show(config)?;
        }
        Commands::Snapshot { layout, output, press, hold } => {
            let config = SnapshotConfig {
                layout: resolve_layout(&settings, layout)?,
                output,
                font,
                pressed: press,
                held: hold,
            };
            snapshot(config)?;
        }
    }

    Ok(())
}
