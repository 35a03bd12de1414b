pub mod flow;

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a flow sits relative to the configured local networks.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    /// Non-local source, local destination.
    Inbound,
    /// Local source, non-local destination.
    Outbound,
    /// Both ends local.
    Internal,
    /// Neither end local.
    External,
}

impl Locality {
    pub fn from_endpoints(src_is_local: bool, dst_is_local: bool) -> Self {
        match (src_is_local, dst_is_local) {
            (true, false) => Self::Outbound,
            (false, true) => Self::Inbound,
            (true, true) => Self::Internal,
            (false, false) => Self::External,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol plus port, e.g. `tcp/443`.
///
/// A reply label (`reply_tcp/443`) groups return traffic of an earlier
/// forward flow under one key regardless of the ephemeral port it arrives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortLabel {
    pub protocol: Protocol,
    pub port: u16,
    pub reply: bool,
}

impl PortLabel {
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            reply: false,
        }
    }

    /// The same label marked as reply traffic.
    pub fn as_reply(self) -> Self {
        Self {
            reply: true,
            ..self
        }
    }
}

impl fmt::Display for PortLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reply {
            f.write_str("reply_")?;
        }
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

impl Serialize for PortLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ethernet hardware address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
