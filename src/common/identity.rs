//! Per-process instance identity.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Random token generated once at startup.
///
/// Two processes on the same host share an IP address, so the identity is what
/// tells "my own announcement echoed back" apart from "another server".
/// Identities are totally ordered; between two fresh servers the lower one
/// wins an announcement race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceIdentity(Uuid);

impl InstanceIdentity {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 32 lowercase hex digits, the form carried on the wire.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for InstanceIdentity {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self)
    }
}

impl From<Uuid> for InstanceIdentity {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
