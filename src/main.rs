use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, bounded, select};
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use airboat_link::control::command::HELP;
use airboat_link::control::config::DEFAULT_CONFIG_FILE;
use airboat_link::control::{ConsoleCommand, ControlState, LinkConfig, LinkEvent, VehicleClient};
use airboat_link::runtime::PollerState;
use airboat_link::sim::SimulatedPeer;

struct Args {
    config_path: Option<PathBuf>,
    simulate: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args { config_path: None, simulate: false };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" => args.simulate = true,
            flag if flag.starts_with("--") => anyhow::bail!("unknown flag {}", flag),
            path if args.config_path.is_none() => args.config_path = Some(PathBuf::from(path)),
            extra => anyhow::bail!("unexpected argument {}", extra),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::load(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => LinkConfig::load(Path::new(DEFAULT_CONFIG_FILE)),
        None => Ok(LinkConfig::default()),
    }
}

/// Prints events until `stop_rx` fires or every event sender is gone.
fn spawn_printer(events: Receiver<LinkEvent>, stop_rx: Receiver<()>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("event-printer".to_string()).spawn(move || {
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => print_event(event),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => {
                    events.try_iter().for_each(print_event);
                    break;
                }
            }
        }
    })
}

fn print_event(event: LinkEvent) {
    match event {
        LinkEvent::Status(line) => println!("{}", line),
        event @ LinkEvent::Telemetry(_) => println!("telemetry: {}", event),
        event => println!("-- {}", event),
    }
}

fn send_control(client: &VehicleClient, state: &ControlState) {
    // Control updates made while disconnected only change local state.
    if client.is_connected() {
        let command = state.command();
        let _ = client.send_command(command.angle, command.speed);
    }
}

/// Returns false when the console should exit.
fn handle(client: &VehicleClient, state: &mut ControlState, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Connect(target) => {
            if let Some((host, port)) = target {
                if let Err(e) = client.configure(&host, &port) {
                    println!("{}", e);
                    return true;
                }
            }
            // Failures are reported on the event channel.
            let _ = client.open();
        }
        ConsoleCommand::Disconnect => client.close(),
        ConsoleCommand::Angle(angle) => {
            let applied = state.set_angle(angle);
            if applied as i32 != angle {
                println!("angle clamped to {}", applied);
            }
            send_control(client, state);
        }
        ConsoleCommand::Speed(speed) => {
            let applied = state.set_speed(speed);
            if applied as i32 != speed {
                println!("speed clamped to {}", applied);
            }
            send_control(client, state);
        }
        ConsoleCommand::Center => {
            state.center();
            send_control(client, state);
        }
        ConsoleCommand::Stop => {
            state.stop();
            send_control(client, state);
        }
        ConsoleCommand::Poll => {
            if client.polling_state() == PollerState::Running {
                println!("periodic polling is running; 'halt' it first");
            } else if let Err(e) = client.poll_telemetry_once().try_take().unwrap_or(Ok(None)) {
                println!("{}", e);
            }
        }
        ConsoleCommand::StartPolling(secs) => {
            let interval = secs.map(Duration::from_secs).unwrap_or(client.config().poll_schedule().interval);
            if let Err(e) = client.start_polling(interval) {
                println!("{}", e);
            }
        }
        ConsoleCommand::StopPolling => client.stop_polling(),
        ConsoleCommand::Status => {
            println!(
                "peer {} | {} | polling {:?} | angle {} | speed {}",
                client.peer(),
                if client.is_connected() { "connected" } else { "disconnected" },
                client.polling_state(),
                state.angle(),
                state.speed()
            );
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return false,
    }
    true
}

fn main() -> Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("airboat_link"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");

    let args = parse_args()?;
    let mut config = load_config(args.config_path.as_deref())?;

    let _peer = if args.simulate {
        let peer = SimulatedPeer::spawn_local().context("Failed to start simulated vehicle")?;
        info!("Simulated vehicle listening on {}", peer.local_addr());
        config.host = "127.0.0.1".to_string();
        config.port = peer.local_addr().port();
        Some(peer)
    } else {
        None
    };

    let client = VehicleClient::new(config).context("Failed to create vehicle client")?;
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let printer = spawn_printer(client.events(), stop_rx).context("Failed to start event printer")?;

    println!("airboat link console, peer {}. Type 'help' for commands.", client.peer());
    let mut state = ControlState::default();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                if !handle(&client, &mut state, command) {
                    break;
                }
            }
            Err(e) => println!("{}", e),
        }
        io::stdout().flush().ok();
    }

    if !client.shutdown() {
        warn!("Some link work was still running at exit");
    }
    let _ = stop_tx.send(());
    let _ = printer.join();
    info!("Bye");
    Ok(())
}
