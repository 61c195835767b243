use super::codec::{frame, WireReader, WireWriter};
use super::{BdAddr, LatencyMode, ProtocolError};

/// Auto-disconnect time in seconds meaning "never".
pub const AUTO_DISCONNECT_NEVER: i16 = 511;

/// Requests the gateway sends to the device daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetInfo,
    CreateScanner {
        scan_id: u32,
    },
    RemoveScanner {
        scan_id: u32,
    },
    CreateConnectionChannel {
        conn_id: u32,
        bd_addr: BdAddr,
        latency_mode: LatencyMode,
        auto_disconnect_time: i16,
    },
    RemoveConnectionChannel {
        conn_id: u32,
    },
    ForceDisconnect {
        bd_addr: BdAddr,
    },
    ChangeModeParameters {
        conn_id: u32,
        latency_mode: LatencyMode,
        auto_disconnect_time: i16,
    },
    Ping {
        ping_id: u32,
    },
    GetButtonInfo {
        bd_addr: BdAddr,
    },
    CreateScanWizard {
        scan_wizard_id: u32,
    },
    CancelScanWizard {
        scan_wizard_id: u32,
    },
    DeleteButton {
        bd_addr: BdAddr,
    },
    CreateBatteryStatusListener {
        listener_id: u32,
        bd_addr: BdAddr,
    },
    RemoveBatteryStatusListener {
        listener_id: u32,
    },
}

impl Command {
    /// Connection channel for a configured slot, keyed by the slot index
    pub fn connect_slot(slot: u8, bd_addr: BdAddr) -> Self {
        Command::CreateConnectionChannel {
            conn_id: u32::from(slot),
            bd_addr,
            latency_mode: LatencyMode::Normal,
            auto_disconnect_time: AUTO_DISCONNECT_NEVER,
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::GetInfo => 0,
            Command::CreateScanner { .. } => 1,
            Command::RemoveScanner { .. } => 2,
            Command::CreateConnectionChannel { .. } => 3,
            Command::RemoveConnectionChannel { .. } => 4,
            Command::ForceDisconnect { .. } => 5,
            Command::ChangeModeParameters { .. } => 6,
            Command::Ping { .. } => 7,
            Command::GetButtonInfo { .. } => 8,
            Command::CreateScanWizard { .. } => 9,
            Command::CancelScanWizard { .. } => 10,
            Command::DeleteButton { .. } => 11,
            Command::CreateBatteryStatusListener { .. } => 12,
            Command::RemoveBatteryStatusListener { .. } => 13,
        }
    }

    /// Packet body: opcode followed by the fixed payload
    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = WireWriter::new(self.opcode());
        match *self {
            Command::GetInfo => {}
            Command::CreateScanner { scan_id } | Command::RemoveScanner { scan_id } => {
                w.u32(scan_id);
            }
            Command::CreateConnectionChannel {
                conn_id,
                bd_addr,
                latency_mode,
                auto_disconnect_time,
            } => {
                w.u32(conn_id)
                    .bd_addr(bd_addr)
                    .enumeration(latency_mode)
                    .i16(auto_disconnect_time);
            }
            Command::RemoveConnectionChannel { conn_id } => {
                w.u32(conn_id);
            }
            Command::ForceDisconnect { bd_addr }
            | Command::GetButtonInfo { bd_addr }
            | Command::DeleteButton { bd_addr } => {
                w.bd_addr(bd_addr);
            }
            Command::ChangeModeParameters {
                conn_id,
                latency_mode,
                auto_disconnect_time,
            } => {
                w.u32(conn_id)
                    .enumeration(latency_mode)
                    .i16(auto_disconnect_time);
            }
            Command::Ping { ping_id } => {
                w.u32(ping_id);
            }
            Command::CreateScanWizard { scan_wizard_id }
            | Command::CancelScanWizard { scan_wizard_id } => {
                w.u32(scan_wizard_id);
            }
            Command::CreateBatteryStatusListener {
                listener_id,
                bd_addr,
            } => {
                w.u32(listener_id).bd_addr(bd_addr);
            }
            Command::RemoveBatteryStatusListener { listener_id } => {
                w.u32(listener_id);
            }
        }
        w.finish()
    }

    /// Length header plus body, ready to be written to the socket
    pub fn encode_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        frame(&self.encode_body())
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = WireReader::new(body);
        let opcode = r.u8().map_err(|_| ProtocolError::EmptyPacket)?;
        let command = match opcode {
            0 => Command::GetInfo,
            1 => Command::CreateScanner { scan_id: r.u32()? },
            2 => Command::RemoveScanner { scan_id: r.u32()? },
            3 => Command::CreateConnectionChannel {
                conn_id: r.u32()?,
                bd_addr: r.bd_addr()?,
                latency_mode: r.enumeration()?,
                auto_disconnect_time: r.i16()?,
            },
            4 => Command::RemoveConnectionChannel { conn_id: r.u32()? },
            5 => Command::ForceDisconnect {
                bd_addr: r.bd_addr()?,
            },
            6 => Command::ChangeModeParameters {
                conn_id: r.u32()?,
                latency_mode: r.enumeration()?,
                auto_disconnect_time: r.i16()?,
            },
            7 => Command::Ping { ping_id: r.u32()? },
            8 => Command::GetButtonInfo {
                bd_addr: r.bd_addr()?,
            },
            9 => Command::CreateScanWizard {
                scan_wizard_id: r.u32()?,
            },
            10 => Command::CancelScanWizard {
                scan_wizard_id: r.u32()?,
            },
            11 => Command::DeleteButton {
                bd_addr: r.bd_addr()?,
            },
            12 => Command::CreateBatteryStatusListener {
                listener_id: r.u32()?,
                bd_addr: r.bd_addr()?,
            },
            13 => Command::RemoveBatteryStatusListener {
                listener_id: r.u32()?,
            },
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BdAddr {
        BdAddr::from_wire([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])
    }

    #[test]
    fn test_get_info_frame() {
        assert_eq!(Command::GetInfo.encode_frame().unwrap(), vec![0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_create_connection_channel_layout() {
        let frame = Command::connect_slot(3, addr()).encode_frame().unwrap();
        assert_eq!(
            frame,
            vec![
                0x0e, 0x00, // length 14
                0x03, // opcode
                0x03, 0x00, 0x00, 0x00, // conn_id
                0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // address, wire order
                0x00, // latency normal
                0xff, 0x01, // 511
            ]
        );
    }

    #[test]
    fn test_every_command_round_trips() {
        let commands = vec![
            Command::GetInfo,
            Command::CreateScanner { scan_id: 0 },
            Command::RemoveScanner { scan_id: u32::MAX },
            Command::CreateConnectionChannel {
                conn_id: u32::MAX,
                bd_addr: addr(),
                latency_mode: LatencyMode::High,
                auto_disconnect_time: i16::MIN,
            },
            Command::RemoveConnectionChannel { conn_id: 7 },
            Command::ForceDisconnect { bd_addr: addr() },
            Command::ChangeModeParameters {
                conn_id: 1,
                latency_mode: LatencyMode::Low,
                auto_disconnect_time: i16::MAX,
            },
            Command::Ping { ping_id: 0xdead_beef },
            Command::GetButtonInfo {
                bd_addr: BdAddr::default(),
            },
            Command::CreateScanWizard { scan_wizard_id: 2 },
            Command::CancelScanWizard { scan_wizard_id: 2 },
            Command::DeleteButton { bd_addr: addr() },
            Command::CreateBatteryStatusListener {
                listener_id: 9,
                bd_addr: addr(),
            },
            Command::RemoveBatteryStatusListener { listener_id: 9 },
        ];

        for command in commands {
            let body = command.encode_body();
            assert_eq!(body[0], command.opcode());
            assert_eq!(Command::decode(&body).unwrap(), command);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_and_short() {
        assert!(matches!(
            Command::decode(&[42]),
            Err(ProtocolError::UnknownCommand(42))
        ));
        assert!(matches!(
            Command::decode(&[7, 0x01]),
            Err(ProtocolError::Truncated { .. })
        ));
        assert!(matches!(Command::decode(&[]), Err(ProtocolError::EmptyPacket)));
    }
}
