use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hogpad::config::{AppConfig, TransportMode};
use hogpad::dispatch::Dispatcher;
use hogpad::error::AppError;
use hogpad::events::EventBus;
use hogpad::report::{Axis, InputState};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// hogpad command line arguments
#[derive(Parser, Debug)]
#[command(name = "hogpad")]
#[command(version, about = "BLE HID-over-GATT / USB gadget HID peripheral daemon", long_about = None)]
struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport mode (overrides config file)
    #[arg(short, long, value_enum)]
    mode: Option<TransportMode>,

    /// Name advertised over BLE and used as the USB product string
    #[arg(short = 'n', long, value_name = "NAME")]
    name: Option<String>,

    /// Report rate in Hz (1-250)
    #[arg(short, long, value_name = "HZ")]
    rate: Option<u16>,

    /// Input device path, "auto" for detection, "none" to disable
    #[arg(short, long, value_name = "PATH")]
    input_device: Option<String>,

    /// Static random BLE address (first hex digit C-F)
    #[arg(long, value_name = "ADDR")]
    static_address: Option<String>,

    /// Skip programming a static BLE address even if configured
    #[arg(long)]
    no_static_address: bool,

    /// configfs gadget directory name
    #[arg(long, value_name = "NAME")]
    gadget_name: Option<String>,

    /// Bluetooth adapter name
    #[arg(long, value_name = "HCI")]
    adapter: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    if let Err(e) = run(args).await {
        tracing::error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: CliArgs) -> Result<(), AppError> {
    let config = assemble_config(&args)?;
    tracing::info!(
        "Starting hogpad v{}: mode={}, rate={}Hz",
        env!("CARGO_PKG_VERSION"),
        config.mode.name_str(),
        config.report_rate_hz
    );

    let events = Arc::new(EventBus::new());
    spawn_event_logger(events.clone());

    let mut dispatcher = Dispatcher::new(config, events);
    dispatcher.start().await?;
    let state = dispatcher.state();

    print_cli_help();

    let mut ticker = tokio::time::interval(dispatcher.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pattern_timer = tokio::time::interval(Duration::from_millis(500));
    let mut test_pattern: Option<TestPattern> = None;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut cli_open = true;
    let mut cli = CliState::default();

    let fault = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = dispatcher.tick().await {
                    break Some(e);
                }
            }
            _ = pattern_timer.tick() => {
                if let Some(pattern) = test_pattern.as_mut() {
                    pattern.step(&state);
                }
            }
            line = lines.next_line(), if cli_open => {
                match line {
                    Ok(Some(line)) => {
                        match cli.handle(line.trim(), &state, &mut test_pattern) {
                            CliAction::Continue => {}
                            CliAction::Quit => break None,
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("stdin closed, control CLI disabled");
                        cli_open = false;
                    }
                    Err(e) => {
                        tracing::debug!("stdin error: {}", e);
                        cli_open = false;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break None;
            }
        }
    };

    let stop_result = dispatcher.stop().await;
    match fault {
        Some(e) => Err(e),
        None => stop_result,
    }
}

/// Layer the configuration: file (if given) under CLI overrides
fn assemble_config(args: &CliArgs) -> Result<AppConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(ref name) = args.name {
        config.device_name = name.clone();
    }
    if let Some(rate) = args.rate {
        config.report_rate_hz = rate;
    }
    if let Some(ref input) = args.input_device {
        config.input_device = input.clone();
    }
    if args.no_static_address {
        config.static_address = None;
    } else if let Some(ref addr) = args.static_address {
        config.static_address = Some(addr.clone());
    }
    if let Some(ref gadget) = args.gadget_name {
        config.gadget_name = gadget.clone();
    }
    if let Some(ref adapter) = args.adapter {
        config.adapter = adapter.clone();
    }
    config.verbose = config.verbose || args.verbose > 0;

    config.validate()?;
    Ok(config)
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "hogpad=error",
        LogLevel::Warn => "hogpad=warn",
        LogLevel::Info => "hogpad=info",
        LogLevel::Debug => "hogpad=debug",
        LogLevel::Trace => "hogpad=trace,bluer=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Log bus events so faults and subscriptions are visible on the console
fn spawn_event_logger(events: Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "system event"),
                    Err(e) => tracing::debug!("unserializable event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_cli_help() {
    println!("--- control commands ---");
    println!("  b <0-10>       toggle gamepad button");
    println!("  a <0-3> <val>  set axis (-32768..32767)");
    println!("  k <hex>        toggle keyboard key by scan code (e.g. 'k 04')");
    println!("  m <dx> <dy>    move mouse");
    println!("  w <v> <h>      scroll wheel");
    println!("  t              start/stop test pattern");
    println!("  s              show current state");
    println!("  q              quit");
    println!("------------------------");
}

enum CliAction {
    Continue,
    Quit,
}

/// Toggle bookkeeping for the interactive CLI
#[derive(Default)]
struct CliState {
    held_buttons: HashSet<u8>,
    held_keys: HashSet<u8>,
}

impl CliState {
    fn handle(
        &mut self,
        line: &str,
        state: &Arc<InputState>,
        test_pattern: &mut Option<TestPattern>,
    ) -> CliAction {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["q"] => return CliAction::Quit,
            ["b", index] => match index.parse::<u8>() {
                Ok(index) if index < 11 => {
                    let pressed = self.held_buttons.insert(index);
                    if !pressed {
                        self.held_buttons.remove(&index);
                    }
                    state.set_button(index, pressed);
                    println!(
                        "button {} {}",
                        index,
                        if pressed { "pressed" } else { "released" }
                    );
                }
                _ => println!("invalid button index"),
            },
            ["a", axis, value] => {
                match (parse_axis(axis), value.parse::<i32>()) {
                    (Some(axis), Ok(value)) => {
                        state.set_axis(axis, value);
                        println!("axis {:?} = {}", axis, value);
                    }
                    _ => println!("invalid axis/value"),
                }
            }
            ["k", code] => match u8::from_str_radix(code, 16) {
                Ok(code) if code != 0 => {
                    let pressed = self.held_keys.insert(code);
                    if pressed {
                        state.press_key(code);
                    } else {
                        self.held_keys.remove(&code);
                        state.release_key(code);
                    }
                    println!(
                        "key {:#04x} {}",
                        code,
                        if pressed { "pressed" } else { "released" }
                    );
                }
                _ => println!("invalid scan code"),
            },
            ["m", dx, dy] => match (dx.parse::<i32>(), dy.parse::<i32>()) {
                (Ok(dx), Ok(dy)) => {
                    state.move_mouse(dx, dy);
                    println!("mouse move {} {}", dx, dy);
                }
                _ => println!("invalid deltas"),
            },
            ["w", v, h] => match (v.parse::<i32>(), h.parse::<i32>()) {
                (Ok(v), Ok(h)) => {
                    state.wheel(v, h);
                    println!("wheel {} {}", v, h);
                }
                _ => println!("invalid wheel deltas"),
            },
            ["t"] => {
                if test_pattern.take().is_some() {
                    state.reset();
                    println!("test pattern stopped");
                } else {
                    *test_pattern = Some(TestPattern::default());
                    println!("test pattern started (cycling buttons, sweeping axis)");
                }
            }
            ["s"] => println!("{}", state.describe()),
            _ => print_cli_help(),
        }
        CliAction::Continue
    }
}

fn parse_axis(s: &str) -> Option<Axis> {
    match s {
        "0" => Some(Axis::X),
        "1" => Some(Axis::Y),
        "2" => Some(Axis::Rx),
        "3" => Some(Axis::Ry),
        _ => None,
    }
}

/// Cycles through the gamepad buttons and sweeps axis X, for verifying the
/// path to the host without a physical controller.
struct TestPattern {
    button: u8,
    axis_value: i32,
    direction: i32,
}

impl Default for TestPattern {
    fn default() -> Self {
        Self {
            button: 0,
            axis_value: 0,
            direction: 1,
        }
    }
}

impl TestPattern {
    fn step(&mut self, state: &Arc<InputState>) {
        state.set_button(self.button, false);
        self.button = (self.button + 1) % 11;
        state.set_button(self.button, true);

        self.axis_value += self.direction * 4000;
        if self.axis_value >= 32000 {
            self.direction = -1;
        } else if self.axis_value <= -32000 {
            self.direction = 1;
        }
        state.set_axis(Axis::X, self.axis_value);
    }
}
