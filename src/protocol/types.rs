use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

// Single-byte enumerations. Discriminants are the wire values.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(ProtocolError::InvalidEnum {
                        field: stringify!($name),
                        value: other,
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }
    };
}

wire_enum!(
    /// Connection latency requested for a connection channel
    LatencyMode {
        Normal = 0,
        Low = 1,
        High = 2,
    }
);

wire_enum!(
    CreateConnectionChannelError {
        NoError = 0,
        MaxPendingConnectionsReached = 1,
    }
);

wire_enum!(
    ConnectionStatus {
        Disconnected = 0,
        Connected = 1,
        Ready = 2,
    }
);

wire_enum!(
    DisconnectReason {
        Unspecified = 0,
        ConnectionEstablishmentFailed = 1,
        TimedOut = 2,
        BondingKeysMismatch = 3,
    }
);

wire_enum!(
    /// Why the daemon dropped a connection channel
    RemovedReason {
        RemovedByThisClient = 0,
        ForceDisconnectedByThisClient = 1,
        ForceDisconnectedByOtherClient = 2,
        ButtonIsPrivate = 3,
        VerifyTimeout = 4,
        InternetBackendError = 5,
        InvalidData = 6,
        CouldntLoadDevice = 7,
        DeletedByThisClient = 8,
        DeletedByOtherClient = 9,
        ButtonBelongsToOtherPartner = 10,
        DeletedFromButton = 11,
    }
);

wire_enum!(
    /// Raw button transition reported by the daemon
    ClickType {
        Down = 0,
        Up = 1,
        Click = 2,
        SingleClick = 3,
        DoubleClick = 4,
        Hold = 5,
    }
);

wire_enum!(
    BdAddrType {
        Public = 0,
        Random = 1,
    }
);

wire_enum!(
    ScanWizardResult {
        Success = 0,
        CancelledByUser = 1,
        FailedTimeout = 2,
        ButtonIsPrivate = 3,
        BluetoothUnavailable = 4,
        InternetBackendError = 5,
        InvalidData = 6,
        ButtonBelongsToOtherPartner = 7,
        ButtonAlreadyConnectedToOtherDevice = 8,
    }
);

wire_enum!(
    BluetoothControllerState {
        Detached = 0,
        Resetting = 1,
        Attached = 2,
    }
);

/// Bluetooth device address of a button
///
/// Stored in wire order: byte 0 is the least significant octet. The textual form
/// prints the most significant octet first, so the wire bytes
/// `[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]` display as `06:05:04:03:02:01`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub const LEN: usize = 6;

    pub const fn from_wire(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn to_wire(self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({})", self)
    }
}

impl FromStr for BdAddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAddress(s.to_string());
        let octets: Vec<&str> = s.trim().split(':').collect();
        if octets.len() != Self::LEN {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (i, octet) in octets.iter().enumerate() {
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            // Text is most significant first, wire order is the reverse
            bytes[Self::LEN - 1 - i] = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for BdAddr {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BdAddr> for String {
    fn from(value: BdAddr) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_reverses_wire_order() {
        let addr = BdAddr::from_wire([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(addr.to_string(), "06:05:04:03:02:01");
    }

    #[test]
    fn test_address_parse_and_format() {
        let addr: BdAddr = "80:E4:DA:7A:0B:1C".parse().unwrap();
        assert_eq!(addr.to_wire(), [0x1c, 0x0b, 0x7a, 0xda, 0xe4, 0x80]);
        assert_eq!(addr.to_string(), "80:e4:da:7a:0b:1c");
    }

    #[test]
    fn test_address_rejects_malformed_text() {
        assert!("80:e4:da:7a:0b".parse::<BdAddr>().is_err());
        assert!("80:e4:da:7a:0b:1".parse::<BdAddr>().is_err());
        assert!("80:e4:da:7a:0b:zz".parse::<BdAddr>().is_err());
        assert!("+f:00:00:00:00:00".parse::<BdAddr>().is_err());
        assert!("80:e4:da:7a:0b:-1".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_address_ordering_is_bytewise() {
        let low = BdAddr::from_wire([0x00, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let high = BdAddr::from_wire([0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(low < high);
    }

    #[test]
    fn test_enum_rejects_out_of_range() {
        assert_eq!(ClickType::try_from(5).unwrap(), ClickType::Hold);
        match ClickType::try_from(6) {
            Err(ProtocolError::InvalidEnum { field, value }) => {
                assert_eq!(field, "ClickType");
                assert_eq!(value, 6);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
