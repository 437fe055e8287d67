use anyhow::{Context, Result, bail};
use clap::Parser;
use loctek_bridge::{
    Bridge, Config, PresetDefinition,
    config::Timing,
    serial::{self, Port, WakeLine},
};
use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
    time::{Duration, Instant},
};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    task,
};

// Hold duration of `up` and `down` without an explicit duration
const DEFAULT_HOLD: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port connected to the control box, whose DTR line drives the wake-up line
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    desk: String,

    /// Serial port connected to the keypad
    #[arg(short, long, default_value = "/dev/ttyUSB1")]
    keypad: String,

    /// Preset definition (name and 8-byte command, e.g. `Standing=9b060210 00acac9d`)
    #[arg(short, long, value_parser = parse_preset)]
    preset: Vec<PresetDefinition>,

    /// Polling interval in milliseconds
    #[arg(short, long, default_value_t = 10)]
    tick: u64,

    /// Interval in seconds for keeping the control box awake while idle
    #[arg(long)]
    keep_alive: Option<u64>,
}

#[derive(Debug)]
enum Intent {
    Up(Duration),
    Down(Duration),
    Stop,
    Memory,
    Preset(String),
    Wake,
    Status,
}

#[derive(Copy, Clone, Debug)]
enum Hold {
    Up,
    Down,
}

fn parse_preset(s: &str) -> Result<PresetDefinition, String> {
    let (name, hex) = s
        .split_once('=')
        .ok_or_else(|| "expected NAME=HEX".to_string())?;
    let hex: String = hex
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    let hex = hex.strip_prefix("0x").unwrap_or(&hex);

    if !hex.is_ascii() || hex.len() != 16 {
        return Err("command must be exactly 8 hex bytes".to_string());
    }

    let mut command = [0x00; 8];

    for (i, byte) in command.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|err| err.to_string())?;
    }

    Ok(PresetDefinition::new(name.trim(), command))
}

fn parse_intent(line: &str) -> Result<Intent> {
    let (cmd, arg) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
    let hold = || -> Result<Duration> {
        if arg.is_empty() {
            Ok(DEFAULT_HOLD)
        } else {
            Ok(Duration::from_millis(
                arg.trim().parse().context("Invalid duration")?,
            ))
        }
    };

    Ok(match cmd {
        "up" => Intent::Up(hold()?),
        "down" => Intent::Down(hold()?),
        "stop" => Intent::Stop,
        "m" => Intent::Memory,
        "preset" if !arg.is_empty() => Intent::Preset(arg.trim().to_string()),
        "wake" => Intent::Wake,
        "status" => Intent::Status,
        _ => bail!("Unknown command: {line}"),
    })
}

fn print_status(bridge: &Bridge<Port, WakeLine>) {
    let height = bridge
        .height()
        .map_or_else(|| "unknown".to_string(), |h| h.to_string());

    println!(
        "status={} operation={} height={height} wake={} available={}",
        bridge.status(),
        bridge.operation(),
        bridge.wake_state(),
        bridge.is_available()
    );
}

fn run(mut bridge: Bridge<Port, WakeLine>, rx: &Receiver<Intent>, tick: Duration) -> Result<()> {
    let start = Instant::now();
    let mut hold: Option<(Hold, Duration)> = None;

    loop {
        let now = start.elapsed();

        loop {
            let intent = match rx.try_recv() {
                Ok(intent) => intent,
                // Keep running without stdin
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            };

            match intent {
                Intent::Up(duration) => hold = Some((Hold::Up, now + duration)),
                Intent::Down(duration) => hold = Some((Hold::Down, now + duration)),
                Intent::Stop => {
                    hold = None;
                    bridge.stop(now);
                }
                Intent::Memory => {
                    hold = None;
                    bridge.press_stop_button(now)?;
                }
                Intent::Preset(name) => {
                    if let Err(err) = bridge.press_preset(&name, now) {
                        eprintln!("Failed to recall preset {name}: {err}");
                    }
                }
                Intent::Wake => bridge.set_wake_switch(true, now)?,
                Intent::Status => print_status(&bridge),
            }
        }

        match hold {
            Some((Hold::Up, until)) if now < until => bridge.raise(now),
            Some((Hold::Down, until)) if now < until => bridge.lower(now),
            Some(_) => {
                hold = None;
                bridge.stop(now);
            }
            None => {}
        }

        bridge.poll(now).context("Bridge stopped")?;

        thread::sleep(tick);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = Config {
        presets: args.preset,
        stop_button: Some("M".to_string()),
        wake_switch: Some("Wake up".to_string()),
        timing: Timing {
            keep_alive: args.keep_alive.map(Duration::from_secs),
            ..Timing::default()
        },
        ..Config::default()
    };

    let tick = Duration::from_millis(args.tick);

    if tick >= config.timing.hold_watchdog {
        bail!(
            "Polling interval must be shorter than {} ms",
            config.timing.hold_watchdog.as_millis()
        );
    }

    let desk = serial::open(&args.desk)
        .with_context(|| format!("Failed to open desk port {}", args.desk))?;
    let keypad = serial::open(&args.keypad)
        .with_context(|| format!("Failed to open keypad port {}", args.keypad))?;
    let wake_line = desk.wake_line();
    let bridge = Bridge::new(config, keypad, desk, wake_line).context("Invalid configuration")?;

    for preset in bridge.presets() {
        println!("Preset {} at memory position {}", preset.name(), preset.slot());
    }

    let (tx, rx) = mpsc::channel();
    let worker = task::spawn_blocking(move || run(bridge, &rx, tick));
    let mut lines = BufReader::new(io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_intent(&line) {
            Ok(intent) => {
                if tx.send(intent).is_err() {
                    break;
                }
            }
            Err(err) => eprintln!("{err:#}"),
        }
    }

    drop(tx);

    worker.await?
}
