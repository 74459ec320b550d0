//! # Discovery Protocol Messages
//!
//! Datagrams exchanged on the discovery port are short UTF-8 strings:
//!
//! ```text
//! WHO_IS_SERVER                              probe, no fields
//! QUEUE_SERVER_HERE|<ip>|<identityHex>       announce, exactly 3 fields
//! ```
//!
//! Anything else is malformed and must be ignored by the receiver.

use std::net::Ipv4Addr;
use thiserror::Error;

use super::identity::InstanceIdentity;

pub const WHO_IS_TAG: &str = "WHO_IS_SERVER";
pub const ANNOUNCE_TAG: &str = "QUEUE_SERVER_HERE";

/// A discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceMessage {
    /// **Probe**: "is any server already active?"
    WhoIs,

    /// **Announce**: "I am the active server."
    ///
    /// # Fields
    /// - `address`: primary LAN address of the sender
    /// - `identity`: the sender's instance identity
    Announce {
        address: Ipv4Addr,
        identity: InstanceIdentity,
    },
}

/// Why a datagram was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    #[error("announce has {0} fields, expected 3")]
    FieldCount(usize),
    #[error("invalid sender address `{0}`")]
    Address(String),
    #[error("invalid sender identity `{0}`")]
    Identity(String),
}

impl AnnounceMessage {
    pub fn announce(address: Ipv4Addr, identity: InstanceIdentity) -> Self {
        Self::Announce { address, identity }
    }

    /// Encode the message as a datagram payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::WhoIs => WHO_IS_TAG.as_bytes().to_vec(),
            Self::Announce { address, identity } => {
                format!("{}|{}|{}", ANNOUNCE_TAG, address, identity.to_hex()).into_bytes()
            }
        }
    }

    /// Decode a received datagram payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::NotUtf8)?;
        let text = text.trim();

        if text == WHO_IS_TAG {
            return Ok(Self::WhoIs);
        }

        let fields: Vec<&str> = text.split('|').collect();
        if fields[0] != ANNOUNCE_TAG {
            return Err(WireError::UnknownTag(fields[0].to_string()));
        }
        if fields.len() != 3 {
            return Err(WireError::FieldCount(fields.len()));
        }

        let address = fields[1]
            .parse::<Ipv4Addr>()
            .map_err(|_| WireError::Address(fields[1].to_string()))?;
        let identity = fields[2]
            .parse::<InstanceIdentity>()
            .map_err(|_| WireError::Identity(fields[2].to_string()))?;

        Ok(Self::Announce { address, identity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_who_is_encoding() {
        assert_eq!(AnnounceMessage::WhoIs.to_bytes(), b"WHO_IS_SERVER".to_vec());
        assert_eq!(
            AnnounceMessage::from_bytes(b"WHO_IS_SERVER\n"),
            Ok(AnnounceMessage::WhoIs)
        );
    }

    #[test]
    fn test_announce_wire_format() {
        let identity = InstanceIdentity::generate();
        let msg = AnnounceMessage::announce(Ipv4Addr::new(192, 168, 1, 10), identity);
        let text = String::from_utf8(msg.to_bytes()).unwrap();

        assert_eq!(text, format!("QUEUE_SERVER_HERE|192.168.1.10|{}", identity.to_hex()));
        assert_eq!(AnnounceMessage::from_bytes(text.as_bytes()), Ok(msg));
    }

    #[test]
    fn test_malformed_datagrams_are_rejected() {
        let hex = InstanceIdentity::generate().to_hex();

        assert_eq!(
            AnnounceMessage::from_bytes(b"HELLO"),
            Err(WireError::UnknownTag("HELLO".to_string()))
        );
        assert_eq!(
            AnnounceMessage::from_bytes(b"QUEUE_SERVER_HERE|10.0.0.1"),
            Err(WireError::FieldCount(2))
        );
        assert_eq!(
            AnnounceMessage::from_bytes(format!("QUEUE_SERVER_HERE|10.0.0.1|{}|x", hex).as_bytes()),
            Err(WireError::FieldCount(4))
        );
        assert!(matches!(
            AnnounceMessage::from_bytes(format!("QUEUE_SERVER_HERE|10.0.0.300|{}", hex).as_bytes()),
            Err(WireError::Address(_))
        ));
        assert!(matches!(
            AnnounceMessage::from_bytes(b"QUEUE_SERVER_HERE|10.0.0.1|zz"),
            Err(WireError::Identity(_))
        ));
        assert_eq!(AnnounceMessage::from_bytes(&[0xff, 0xfe]), Err(WireError::NotUtf8));
    }
}
