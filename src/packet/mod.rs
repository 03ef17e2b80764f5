//! Outbound packet values handled by the interception pipeline.
//!
//! The pipeline is generic over [`OutboundPacket`]; [`PubrecPacket`] is the
//! acknowledgment sent in response to a QoS 2 PUBLISH and is the packet type
//! this crate ships an interception point for.

mod pubrec;
mod user_properties;

pub use pubrec::{PubrecPacket, PubrecReasonCode};
pub use user_properties::{UserProperties, UserProperty};

/// Maximum encoded length of an MQTT UTF-8 string.
pub const MAX_STRING_LEN: usize = 65_535;

/// Packet types that can carry an outbound interception point.
///
/// Registries key their chains by connection and kind.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Acknowledgment of a QoS 1 PUBLISH.
    Puback,
    /// First acknowledgment of a QoS 2 PUBLISH.
    Pubrec,
    /// Release of a QoS 2 PUBLISH.
    Pubrel,
    /// Final acknowledgment of a QoS 2 PUBLISH.
    Pubcomp,
}

impl PacketKind {
    /// Returns the kind name as a static string for metrics and logging.
    ///
    /// ```
    /// use interceptor_chain::packet::PacketKind;
    ///
    /// assert_eq!(PacketKind::Pubrec.as_str(), "pubrec");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Puback => "puback",
            Self::Pubrec => "pubrec",
            Self::Pubrel => "pubrel",
            Self::Pubcomp => "pubcomp",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// A protocol packet that interceptors may observe and mutate before it is
/// written to the peer.
///
/// Implementations are plain values: the pipeline clones them when an
/// interceptor is handed a mutable view and compares them to decide whether
/// the transport must re-encode the packet.
pub trait OutboundPacket: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Interception point this packet type belongs to.
    const KIND: PacketKind;
}
