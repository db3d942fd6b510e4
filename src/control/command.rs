//! Steering/propulsion control state and console command parsing.

use std::str::FromStr;

use crate::link::Command;

pub const MAX_ANGLE: u8 = 180;
pub const CENTER_ANGLE: u8 = 90;
pub const MAX_SPEED: u8 = 100;

/// Current rudder and throttle setting as the operator sees it.
///
/// Values are clamped here, before a [`Command`] is built; the link sends
/// whatever it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    angle: u8,
    speed: u8,
}

impl Default for ControlState {
    fn default() -> Self {
        Self { angle: CENTER_ANGLE, speed: 0 }
    }
}

impl ControlState {
    pub fn angle(&self) -> u8 {
        self.angle
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Returns the clamped angle actually stored.
    pub fn set_angle(&mut self, angle: i32) -> u8 {
        self.angle = angle.clamp(0, MAX_ANGLE as i32) as u8;
        self.angle
    }

    /// Returns the clamped speed actually stored.
    pub fn set_speed(&mut self, speed: i32) -> u8 {
        self.speed = speed.clamp(0, MAX_SPEED as i32) as u8;
        self.speed
    }

    pub fn center(&mut self) {
        self.angle = CENTER_ANGLE;
    }

    pub fn stop(&mut self) {
        self.speed = 0;
    }

    /// Full update carrying both angle and speed.
    pub fn command(&self) -> Command {
        Command::control(Some(self.angle), Some(self.speed))
    }
}

pub const HELP: &str = "\
commands:
  connect [host port]  open the link (optionally to a new peer)
  disconnect           close the link
  angle <0-180>        set rudder angle
  speed <0-100>        set motor speed
  center               rudder to 90
  stop                 speed to 0
  poll                 request one telemetry reading
  start [secs]         start periodic telemetry
  halt                 stop periodic telemetry
  status               show connection and control state
  help                 this text
  quit                 shut down and exit";

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Connect(Option<(String, String)>),
    Disconnect,
    Angle(i32),
    Speed(i32),
    Center,
    Stop,
    Poll,
    StartPolling(Option<u64>),
    StopPolling,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let args: Vec<&str> = words.collect();

        let number = |what: &str| -> Result<i32, String> {
            match args.as_slice() {
                [value] => value.parse().map_err(|_| format!("{} must be a number, got '{}'", what, value)),
                _ => Err(format!("usage: {} <value>", what)),
            }
        };

        let command = match (verb.to_ascii_lowercase().as_str(), args.len()) {
            ("connect", 0) => ConsoleCommand::Connect(None),
            ("connect", 2) => ConsoleCommand::Connect(Some((args[0].to_string(), args[1].to_string()))),
            ("connect", _) => return Err("usage: connect [host port]".to_string()),
            ("disconnect", 0) => ConsoleCommand::Disconnect,
            ("angle", _) => ConsoleCommand::Angle(number("angle")?),
            ("speed", _) => ConsoleCommand::Speed(number("speed")?),
            ("center", 0) => ConsoleCommand::Center,
            ("stop", 0) => ConsoleCommand::Stop,
            ("poll", 0) => ConsoleCommand::Poll,
            ("start", 0) => ConsoleCommand::StartPolling(None),
            ("start", 1) => ConsoleCommand::StartPolling(Some(
                args[0]
                    .parse()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| format!("interval must be a positive number of seconds, got '{}'", args[0]))?,
            )),
            ("halt", 0) => ConsoleCommand::StopPolling,
            ("status", 0) => ConsoleCommand::Status,
            ("help", 0) | ("?", 0) => ConsoleCommand::Help,
            ("quit", 0) | ("exit", 0) => ConsoleCommand::Quit,
            (other, _) => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(command)
    }
}
