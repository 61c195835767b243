//! Interactive daemon console
//!
//! Reads one command per line from stdin, sends it to the daemon and prints every
//! event the daemon reports. Useful for pairing buttons and finding their addresses
//! before writing the gateway settings.

use futures::StreamExt;
use std::io;
use std::str::SplitWhitespace;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::FramedRead;
use tracing::{error, info, warn};

use crate::controller::control_loop::TIMESTAMP_FORMAT;
use crate::daemon::{open_stream, ConnectError, DaemonError, DaemonHandle};
use crate::protocol::commands::AUTO_DISCONNECT_NEVER;
use crate::protocol::events::{Advertisement, ButtonInfo, DaemonInfo};
use crate::protocol::{
    BdAddr, Command, ConnectionStatus, DaemonCodec, Event, LatencyMode, ProtocolError,
};

pub const HELP_TEXT: &str = "\
Available commands:
getInfo - get various info about the server state and previously verified buttons
startScanWizard - start scan wizard
cancelScanWizard - cancel scan wizard
startScan - start a raw scanning of flic buttons
stopScan - stops raw scanning
connect xx:xx:xx:xx:xx:xx id - connect a button with a given id
disconnect id - disconnect a button with a given id
changeModeParameters id latency_mode auto_disconnect_time - change latency mode (normal, low, high) and auto disconnect time
forceDisconnect xx:xx:xx:xx:xx:xx - disconnect the specified button from all clients
getButtonInfo xx:xx:xx:xx:xx:xx - get button info for a verified button
createBatteryStatusListener xx:xx:xx:xx:xx:xx id - listen to battery status changes
removeBatteryStatusListener id - stop listening to battery status changes
delete xx:xx:xx:xx:xx:xx - delete a verified button
ping id - ping the server
help - prints this help text
quit - exit
";

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command '{0}', type help for a list")]
    Unknown(String),

    #[error("{command}: missing <{arg}>")]
    MissingArgument {
        command: &'static str,
        arg: &'static str,
    },

    #[error("{command}: invalid <{arg}> '{value}'")]
    InvalidArgument {
        command: &'static str,
        arg: &'static str,
        value: String,
    },

    #[error("{command}: {source}")]
    InvalidAddress {
        command: &'static str,
        source: ProtocolError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum InteractError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("Failed to read console input: {0}")]
    Stdin(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(Command),
    Help,
    Quit,
}

// Positional arguments of one console line
struct Args<'a> {
    command: &'static str,
    words: SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, arg: &'static str) -> Result<&'a str, ConsoleError> {
        self.words.next().ok_or(ConsoleError::MissingArgument {
            command: self.command,
            arg,
        })
    }

    fn invalid(&self, arg: &'static str, value: &str) -> ConsoleError {
        ConsoleError::InvalidArgument {
            command: self.command,
            arg,
            value: value.to_string(),
        }
    }

    fn addr(&mut self) -> Result<BdAddr, ConsoleError> {
        let command = self.command;
        self.next("address")?
            .parse()
            .map_err(|source| ConsoleError::InvalidAddress { command, source })
    }

    fn u32(&mut self, arg: &'static str) -> Result<u32, ConsoleError> {
        let value = self.next(arg)?;
        value.parse().map_err(|_| self.invalid(arg, value))
    }

    fn i16(&mut self, arg: &'static str) -> Result<i16, ConsoleError> {
        let value = self.next(arg)?;
        value.parse().map_err(|_| self.invalid(arg, value))
    }

    fn latency(&mut self) -> Result<LatencyMode, ConsoleError> {
        let value = self.next("latency_mode")?;
        let mode = match value.to_ascii_lowercase().trim_end_matches("latency") {
            "normal" => LatencyMode::Normal,
            "low" => LatencyMode::Low,
            "high" => LatencyMode::High,
            _ => return Err(self.invalid("latency_mode", value)),
        };
        Ok(mode)
    }
}

/// Parses one console line; blank lines yield `None`
pub fn parse_console_line(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command: &'static str = match name {
        "getInfo" => "getInfo",
        "startScanWizard" => "startScanWizard",
        "cancelScanWizard" => "cancelScanWizard",
        "startScan" => "startScan",
        "stopScan" => "stopScan",
        "connect" => "connect",
        "disconnect" => "disconnect",
        "changeModeParameters" => "changeModeParameters",
        "forceDisconnect" => "forceDisconnect",
        "getButtonInfo" => "getButtonInfo",
        "createBatteryStatusListener" => "createBatteryStatusListener",
        "removeBatteryStatusListener" => "removeBatteryStatusListener",
        "delete" => "delete",
        "ping" => "ping",
        "help" => return Ok(Some(ConsoleCommand::Help)),
        "quit" => return Ok(Some(ConsoleCommand::Quit)),
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };
    let mut args = Args { command, words };

    let cmd = match command {
        "getInfo" => Command::GetInfo,
        "startScanWizard" => Command::CreateScanWizard { scan_wizard_id: 0 },
        "cancelScanWizard" => Command::CancelScanWizard { scan_wizard_id: 0 },
        "startScan" => Command::CreateScanner { scan_id: 0 },
        "stopScan" => Command::RemoveScanner { scan_id: 0 },
        "connect" => {
            let bd_addr = args.addr()?;
            Command::CreateConnectionChannel {
                bd_addr,
                conn_id: args.u32("id")?,
                latency_mode: LatencyMode::Normal,
                auto_disconnect_time: AUTO_DISCONNECT_NEVER,
            }
        }
        "disconnect" => Command::RemoveConnectionChannel {
            conn_id: args.u32("id")?,
        },
        "changeModeParameters" => Command::ChangeModeParameters {
            conn_id: args.u32("id")?,
            latency_mode: args.latency()?,
            auto_disconnect_time: args.i16("auto_disconnect_time")?,
        },
        "forceDisconnect" => Command::ForceDisconnect {
            bd_addr: args.addr()?,
        },
        "getButtonInfo" => Command::GetButtonInfo {
            bd_addr: args.addr()?,
        },
        "createBatteryStatusListener" => {
            let bd_addr = args.addr()?;
            Command::CreateBatteryStatusListener {
                bd_addr,
                listener_id: args.u32("id")?,
            }
        }
        "removeBatteryStatusListener" => Command::RemoveBatteryStatusListener {
            listener_id: args.u32("id")?,
        },
        "delete" => Command::DeleteButton {
            bd_addr: args.addr()?,
        },
        _ => Command::Ping {
            ping_id: args.u32("id")?,
        },
    };
    Ok(Some(ConsoleCommand::Send(cmd)))
}

fn flag(value: bool, yes: &'static str, no: &'static str) -> &'static str {
    if value {
        yes
    } else {
        no
    }
}

fn describe_advertisement(adv: &Advertisement) -> String {
    format!(
        "ADV: {} {} {} {} {}{}{}",
        adv.bd_addr,
        adv.name,
        adv.rssi,
        flag(adv.is_private, "private", "public"),
        flag(adv.already_verified, "verified", "unverified"),
        flag(adv.already_connected_to_this_device, " already connected to this device", ""),
        flag(adv.already_connected_to_other_device, " already connected to other device", ""),
    )
}

fn describe_info(info: &DaemonInfo) -> String {
    let mut out = format!(
        "Got info: {}, {} ({}), max pending connections: {}, max conns: {}, current pending conns: {}, currently no space: {}",
        info.bluetooth_controller_state,
        info.my_bd_addr,
        info.my_bd_addr_type,
        info.max_pending_connections,
        info.max_concurrently_connected_buttons,
        info.current_pending_connections,
        flag(info.currently_no_space_for_new_connection, "y", "n"),
    );
    if info.verified_buttons.is_empty() {
        out.push_str("\nNo verified buttons yet");
    } else {
        out.push_str("\nVerified buttons:");
        for addr in &info.verified_buttons {
            out.push_str(&format!("\n{}", addr));
        }
    }
    out
}

fn describe_button_info(info: &ButtonInfo) -> String {
    let uuid: String = info.uuid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "Button info response: {} {} {} {} {} {}",
        info.bd_addr, uuid, info.color, info.serial_number, info.flic_version, info.firmware_version
    )
}

/// Human readable line for a daemon event
pub fn describe(event: &Event) -> String {
    match event {
        Event::Advertisement(adv) => describe_advertisement(adv),
        Event::CreateConnectionChannelResponse {
            conn_id,
            error,
            connection_status,
        } => format!("Create conn: {} {} {}", conn_id, error, connection_status),
        Event::ConnectionStatusChanged {
            conn_id,
            connection_status,
            disconnect_reason,
        } => {
            if *connection_status == ConnectionStatus::Disconnected {
                format!(
                    "Connection status changed: {} {} {}",
                    conn_id, connection_status, disconnect_reason
                )
            } else {
                format!("Connection status changed: {} {}", conn_id, connection_status)
            }
        }
        Event::ConnectionChannelRemoved {
            conn_id,
            removed_reason,
        } => format!("Connection removed: {} {}", conn_id, removed_reason),
        Event::Button { class, event } => format!(
            "{}: {}, {}, {}, {} seconds ago",
            class,
            event.conn_id,
            event.click_type,
            flag(event.was_queued, "queued", "not queued"),
            event.time_diff
        ),
        Event::NewVerifiedButton { bd_addr } => format!("New verified button: {}", bd_addr),
        Event::GetInfoResponse(info) => describe_info(info),
        Event::NoSpaceForNewConnection {
            max_concurrently_connected_buttons,
        } => format!(
            "No space for new connection, max: {}",
            max_concurrently_connected_buttons
        ),
        Event::GotSpaceForNewConnection {
            max_concurrently_connected_buttons,
        } => format!(
            "Got space for new connection, max: {}",
            max_concurrently_connected_buttons
        ),
        Event::BluetoothControllerStateChange { state } => {
            format!("Bluetooth state change: {}", state)
        }
        Event::PingResponse { ping_id } => format!("Ping response: {}", ping_id),
        Event::GetButtonInfoResponse(info) => describe_button_info(info),
        Event::ScanWizardFoundPrivateButton { .. } => {
            "Found private button. Please hold down it for 7 seconds to make it public.".to_string()
        }
        Event::ScanWizardFoundPublicButton { bd_addr, name, .. } => {
            format!("Found public button {} {}, connecting...", bd_addr, name)
        }
        Event::ScanWizardButtonConnected { .. } => {
            "Connected, now pairing and verifying...".to_string()
        }
        Event::ScanWizardCompleted { result, .. } => {
            format!("Scan wizard done with status {}", result)
        }
        Event::ButtonDeleted {
            bd_addr,
            deleted_by_this_client,
        } => format!(
            "Button {} deleted {}",
            bd_addr,
            flag(*deleted_by_this_client, "by this client", "not by this client")
        ),
        Event::BatteryStatus {
            listener_id,
            battery_percentage,
            timestamp,
        } => {
            let when = chrono::DateTime::from_timestamp(*timestamp, 0)
                .map(|t| t.with_timezone(&chrono::Local).format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_else(|| timestamp.to_string());
            format!(
                "Battery status report for id {}, percentage: {}%, timestamp: {}",
                listener_id, battery_percentage, when
            )
        }
        Event::Unknown { opcode } => format!("Unknown packet opcode: {}", opcode),
    }
}

async fn print_events(reader: OwnedReadHalf) {
    let mut frames = FramedRead::new(reader, DaemonCodec);
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(body) => match Event::decode(&body) {
                Ok(event) => println!("{}", describe(&event)),
                Err(e) => warn!("Undecodable packet of {} bytes: {}", body.len(), e),
            },
            Err(e) => {
                error!("Failed to read from daemon: {}", e);
                return;
            }
        }
    }
    info!("Daemon closed the connection");
}

/// Runs the console until `quit` or end of input
pub async fn run(host: &str, port: u16) -> Result<(), InteractError> {
    let stream = open_stream(host, port).await?;
    let (reader, writer) = stream.into_split();
    let mut daemon = DaemonHandle::from_writer(Box::new(writer));
    let printer = tokio::spawn(print_events(reader));

    print!("{}", HELP_TEXT);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_console_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Help)) => print!("{}", HELP_TEXT),
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(ConsoleCommand::Send(command))) => {
                let wizard = matches!(command, Command::CreateScanWizard { .. });
                daemon.send_command(command).await?;
                if wizard {
                    println!("Please click and hold down your Flic button!");
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    printer.abort();
    Ok(())
}
