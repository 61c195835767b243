use serde::{Deserialize, Serialize};
use std::fmt;

use super::codec::{WireReader, WireWriter};
use super::{
    BdAddr, BdAddrType, BluetoothControllerState, ClickType, ConnectionStatus,
    CreateConnectionChannelError, DisconnectReason, ProtocolError, RemovedReason,
    ScanWizardResult,
};

/// The four button opcodes differ only in which click types they report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonEventClass {
    UpOrDown,
    ClickOrHold,
    SingleOrDoubleClick,
    SingleOrDoubleClickOrHold,
}

impl ButtonEventClass {
    pub fn opcode(self) -> u8 {
        match self {
            ButtonEventClass::UpOrDown => 4,
            ButtonEventClass::ClickOrHold => 5,
            ButtonEventClass::SingleOrDoubleClick => 6,
            ButtonEventClass::SingleOrDoubleClickOrHold => 7,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            4 => Some(ButtonEventClass::UpOrDown),
            5 => Some(ButtonEventClass::ClickOrHold),
            6 => Some(ButtonEventClass::SingleOrDoubleClick),
            7 => Some(ButtonEventClass::SingleOrDoubleClickOrHold),
            _ => None,
        }
    }
}

impl fmt::Display for ButtonEventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ButtonEventClass::UpOrDown => "ButtonUpOrDown",
            ButtonEventClass::ClickOrHold => "ButtonClickOrHold",
            ButtonEventClass::SingleOrDoubleClick => "ButtonSingleOrDoubleClick",
            ButtonEventClass::SingleOrDoubleClickOrHold => "ButtonSingleOrDoubleClickOrHold",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub conn_id: u32,
    pub click_type: ClickType,
    pub was_queued: bool,
    pub time_diff: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub scan_id: u32,
    pub bd_addr: BdAddr,
    pub name: String,
    pub rssi: i8,
    pub is_private: bool,
    pub already_verified: bool,
    pub already_connected_to_this_device: bool,
    pub already_connected_to_other_device: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInfo {
    pub bluetooth_controller_state: BluetoothControllerState,
    pub my_bd_addr: BdAddr,
    pub my_bd_addr_type: BdAddrType,
    pub max_pending_connections: u8,
    pub max_concurrently_connected_buttons: i16,
    pub current_pending_connections: u8,
    pub currently_no_space_for_new_connection: bool,
    pub verified_buttons: Vec<BdAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonInfo {
    pub bd_addr: BdAddr,
    pub uuid: [u8; 16],
    pub color: String,
    pub serial_number: String,
    pub flic_version: u8,
    pub firmware_version: u32,
}

/// Notifications received from the device daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Advertisement(Advertisement),
    CreateConnectionChannelResponse {
        conn_id: u32,
        error: CreateConnectionChannelError,
        connection_status: ConnectionStatus,
    },
    ConnectionStatusChanged {
        conn_id: u32,
        connection_status: ConnectionStatus,
        disconnect_reason: DisconnectReason,
    },
    ConnectionChannelRemoved {
        conn_id: u32,
        removed_reason: RemovedReason,
    },
    Button {
        class: ButtonEventClass,
        event: ButtonEvent,
    },
    NewVerifiedButton {
        bd_addr: BdAddr,
    },
    GetInfoResponse(DaemonInfo),
    NoSpaceForNewConnection {
        max_concurrently_connected_buttons: u8,
    },
    GotSpaceForNewConnection {
        max_concurrently_connected_buttons: u8,
    },
    BluetoothControllerStateChange {
        state: BluetoothControllerState,
    },
    PingResponse {
        ping_id: u32,
    },
    GetButtonInfoResponse(ButtonInfo),
    ScanWizardFoundPrivateButton {
        scan_wizard_id: u32,
    },
    ScanWizardFoundPublicButton {
        scan_wizard_id: u32,
        bd_addr: BdAddr,
        name: String,
    },
    ScanWizardButtonConnected {
        scan_wizard_id: u32,
    },
    ScanWizardCompleted {
        scan_wizard_id: u32,
        result: ScanWizardResult,
    },
    ButtonDeleted {
        bd_addr: BdAddr,
        deleted_by_this_client: bool,
    },
    BatteryStatus {
        listener_id: u32,
        battery_percentage: i8,
        timestamp: i64,
    },
    /// Opcode this gateway does not know about
    Unknown {
        opcode: u8,
    },
}

impl Event {
    pub fn opcode(&self) -> u8 {
        match self {
            Event::Advertisement(_) => 0,
            Event::CreateConnectionChannelResponse { .. } => 1,
            Event::ConnectionStatusChanged { .. } => 2,
            Event::ConnectionChannelRemoved { .. } => 3,
            Event::Button { class, .. } => class.opcode(),
            Event::NewVerifiedButton { .. } => 8,
            Event::GetInfoResponse(_) => 9,
            Event::NoSpaceForNewConnection { .. } => 10,
            Event::GotSpaceForNewConnection { .. } => 11,
            Event::BluetoothControllerStateChange { .. } => 12,
            Event::PingResponse { .. } => 13,
            Event::GetButtonInfoResponse(_) => 14,
            Event::ScanWizardFoundPrivateButton { .. } => 15,
            Event::ScanWizardFoundPublicButton { .. } => 16,
            Event::ScanWizardButtonConnected { .. } => 17,
            Event::ScanWizardCompleted { .. } => 18,
            Event::ButtonDeleted { .. } => 19,
            Event::BatteryStatus { .. } => 20,
            Event::Unknown { opcode } => *opcode,
        }
    }

    /// Decodes one packet body (opcode + payload, length header already stripped)
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(body);
        let opcode = r.u8().map_err(|_| ProtocolError::EmptyPacket)?;

        if let Some(class) = ButtonEventClass::from_opcode(opcode) {
            let event = ButtonEvent {
                conn_id: r.u32()?,
                click_type: r.enumeration()?,
                was_queued: r.bool()?,
                time_diff: r.u32()?,
            };
            return Ok(Event::Button { class, event });
        }

        let event = match opcode {
            0 => Event::Advertisement(Advertisement {
                scan_id: r.u32()?,
                bd_addr: r.bd_addr()?,
                name: r.fixed_str()?,
                rssi: r.i8()?,
                is_private: r.bool()?,
                already_verified: r.bool()?,
                already_connected_to_this_device: r.bool()?,
                already_connected_to_other_device: r.bool()?,
            }),
            1 => Event::CreateConnectionChannelResponse {
                conn_id: r.u32()?,
                error: r.enumeration()?,
                connection_status: r.enumeration()?,
            },
            2 => Event::ConnectionStatusChanged {
                conn_id: r.u32()?,
                connection_status: r.enumeration()?,
                disconnect_reason: r.enumeration()?,
            },
            3 => Event::ConnectionChannelRemoved {
                conn_id: r.u32()?,
                removed_reason: r.enumeration()?,
            },
            8 => Event::NewVerifiedButton {
                bd_addr: r.bd_addr()?,
            },
            9 => {
                let bluetooth_controller_state = r.enumeration()?;
                let my_bd_addr = r.bd_addr()?;
                let my_bd_addr_type = r.enumeration()?;
                let max_pending_connections = r.u8()?;
                let max_concurrently_connected_buttons = r.i16()?;
                let current_pending_connections = r.u8()?;
                let currently_no_space_for_new_connection = r.bool()?;
                let count = r.u16()?;
                let verified_buttons = (0..count)
                    .map(|_| r.bd_addr())
                    .collect::<Result<Vec<_>, _>>()?;
                Event::GetInfoResponse(DaemonInfo {
                    bluetooth_controller_state,
                    my_bd_addr,
                    my_bd_addr_type,
                    max_pending_connections,
                    max_concurrently_connected_buttons,
                    current_pending_connections,
                    currently_no_space_for_new_connection,
                    verified_buttons,
                })
            }
            10 => Event::NoSpaceForNewConnection {
                max_concurrently_connected_buttons: r.u8()?,
            },
            11 => Event::GotSpaceForNewConnection {
                max_concurrently_connected_buttons: r.u8()?,
            },
            12 => Event::BluetoothControllerStateChange {
                state: r.enumeration()?,
            },
            13 => Event::PingResponse { ping_id: r.u32()? },
            14 => Event::GetButtonInfoResponse(ButtonInfo {
                bd_addr: r.bd_addr()?,
                uuid: r.array()?,
                color: r.fixed_str()?,
                serial_number: r.fixed_str()?,
                flic_version: r.u8()?,
                firmware_version: r.u32()?,
            }),
            15 => Event::ScanWizardFoundPrivateButton {
                scan_wizard_id: r.u32()?,
            },
            16 => Event::ScanWizardFoundPublicButton {
                scan_wizard_id: r.u32()?,
                bd_addr: r.bd_addr()?,
                name: r.fixed_str()?,
            },
            17 => Event::ScanWizardButtonConnected {
                scan_wizard_id: r.u32()?,
            },
            18 => Event::ScanWizardCompleted {
                scan_wizard_id: r.u32()?,
                result: r.enumeration()?,
            },
            19 => Event::ButtonDeleted {
                bd_addr: r.bd_addr()?,
                deleted_by_this_client: r.bool()?,
            },
            20 => Event::BatteryStatus {
                listener_id: r.u32()?,
                battery_percentage: r.i8()?,
                timestamp: r.i64()?,
            },
            opcode => Event::Unknown { opcode },
        };
        Ok(event)
    }

    /// Packet body as the daemon would send it
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new(self.opcode());
        match self {
            Event::Advertisement(adv) => {
                w.u32(adv.scan_id)
                    .bd_addr(adv.bd_addr)
                    .fixed_str(&adv.name)
                    .i8(adv.rssi)
                    .bool(adv.is_private)
                    .bool(adv.already_verified)
                    .bool(adv.already_connected_to_this_device)
                    .bool(adv.already_connected_to_other_device);
            }
            Event::CreateConnectionChannelResponse {
                conn_id,
                error,
                connection_status,
            } => {
                w.u32(*conn_id)
                    .enumeration(*error)
                    .enumeration(*connection_status);
            }
            Event::ConnectionStatusChanged {
                conn_id,
                connection_status,
                disconnect_reason,
            } => {
                w.u32(*conn_id)
                    .enumeration(*connection_status)
                    .enumeration(*disconnect_reason);
            }
            Event::ConnectionChannelRemoved {
                conn_id,
                removed_reason,
            } => {
                w.u32(*conn_id).enumeration(*removed_reason);
            }
            Event::Button { event, .. } => {
                w.u32(event.conn_id)
                    .enumeration(event.click_type)
                    .bool(event.was_queued)
                    .u32(event.time_diff);
            }
            Event::NewVerifiedButton { bd_addr } => {
                w.bd_addr(*bd_addr);
            }
            Event::GetInfoResponse(info) => {
                let count = u16::try_from(info.verified_buttons.len()).unwrap_or(u16::MAX);
                w.enumeration(info.bluetooth_controller_state)
                    .bd_addr(info.my_bd_addr)
                    .enumeration(info.my_bd_addr_type)
                    .u8(info.max_pending_connections)
                    .i16(info.max_concurrently_connected_buttons)
                    .u8(info.current_pending_connections)
                    .bool(info.currently_no_space_for_new_connection)
                    .u16(count);
                for addr in info.verified_buttons.iter().take(usize::from(count)) {
                    w.bd_addr(*addr);
                }
            }
            Event::NoSpaceForNewConnection {
                max_concurrently_connected_buttons,
            }
            | Event::GotSpaceForNewConnection {
                max_concurrently_connected_buttons,
            } => {
                w.u8(*max_concurrently_connected_buttons);
            }
            Event::BluetoothControllerStateChange { state } => {
                w.enumeration(*state);
            }
            Event::PingResponse { ping_id } => {
                w.u32(*ping_id);
            }
            Event::GetButtonInfoResponse(info) => {
                w.bd_addr(info.bd_addr)
                    .bytes(&info.uuid)
                    .fixed_str(&info.color)
                    .fixed_str(&info.serial_number)
                    .u8(info.flic_version)
                    .u32(info.firmware_version);
            }
            Event::ScanWizardFoundPrivateButton { scan_wizard_id }
            | Event::ScanWizardButtonConnected { scan_wizard_id } => {
                w.u32(*scan_wizard_id);
            }
            Event::ScanWizardFoundPublicButton {
                scan_wizard_id,
                bd_addr,
                name,
            } => {
                w.u32(*scan_wizard_id).bd_addr(*bd_addr).fixed_str(name);
            }
            Event::ScanWizardCompleted {
                scan_wizard_id,
                result,
            } => {
                w.u32(*scan_wizard_id).enumeration(*result);
            }
            Event::ButtonDeleted {
                bd_addr,
                deleted_by_this_client,
            } => {
                w.bd_addr(*bd_addr).bool(*deleted_by_this_client);
            }
            Event::BatteryStatus {
                listener_id,
                battery_percentage,
                timestamp,
            } => {
                w.u32(*listener_id).i8(*battery_percentage).i64(*timestamp);
            }
            Event::Unknown { .. } => {}
        }
        w.finish()
    }
}
