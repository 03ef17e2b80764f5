//! PUBREC packet as seen by outbound interceptors.

use super::{OutboundPacket, PacketKind, UserProperties, user_properties::validate_string};
use crate::error::PacketError;

/// MQTT 5 reason codes valid in a PUBREC packet.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PubrecReasonCode {
    /// The message is accepted.
    #[default]
    Success,
    /// The message is accepted but there are no subscribers.
    NoMatchingSubscribers,
    /// The receiver does not wish to reveal the reason.
    UnspecifiedError,
    /// The PUBLISH is valid but the receiver is not willing to accept it.
    ImplementationSpecificError,
    /// The PUBLISH is not authorized.
    NotAuthorized,
    /// The topic name is not malformed but is not accepted.
    TopicNameInvalid,
    /// The packet identifier is already in use.
    PacketIdentifierInUse,
    /// An implementation or administrative quota has been exceeded.
    QuotaExceeded,
    /// The payload does not match the payload format indicator.
    PayloadFormatInvalid,
}

impl PubrecReasonCode {
    /// Wire value of the reason code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::NoMatchingSubscribers => 0x10,
            Self::UnspecifiedError => 0x80,
            Self::ImplementationSpecificError => 0x83,
            Self::NotAuthorized => 0x87,
            Self::TopicNameInvalid => 0x90,
            Self::PacketIdentifierInUse => 0x91,
            Self::QuotaExceeded => 0x97,
            Self::PayloadFormatInvalid => 0x99,
        }
    }

    /// Codes below `0x80` acknowledge the message.
    ///
    /// ```
    /// use interceptor_chain::packet::PubrecReasonCode;
    ///
    /// assert!(PubrecReasonCode::NoMatchingSubscribers.is_success());
    /// assert!(!PubrecReasonCode::QuotaExceeded.is_success());
    /// ```
    #[must_use]
    pub const fn is_success(self) -> bool { self.code() < 0x80 }
}

impl TryFrom<u8> for PubrecReasonCode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::Success,
            0x10 => Self::NoMatchingSubscribers,
            0x80 => Self::UnspecifiedError,
            0x83 => Self::ImplementationSpecificError,
            0x87 => Self::NotAuthorized,
            0x90 => Self::TopicNameInvalid,
            0x91 => Self::PacketIdentifierInUse,
            0x97 => Self::QuotaExceeded,
            0x99 => Self::PayloadFormatInvalid,
            other => return Err(PacketError::UnknownReasonCode(other)),
        })
    }
}

/// Outbound PUBREC packet.
///
/// The packet identifier is fixed by the QoS 2 flow and cannot be changed by
/// interceptors. The remaining fields are editable through validating
/// setters.
///
/// # Examples
///
/// ```
/// use interceptor_chain::packet::{PubrecPacket, PubrecReasonCode};
///
/// let mut packet = PubrecPacket::new(7, PubrecReasonCode::UnspecifiedError);
/// packet
///     .set_reason_code(PubrecReasonCode::QuotaExceeded)
///     .expect("error codes may be exchanged");
/// assert!(
///     packet
///         .set_reason_code(PubrecReasonCode::Success)
///         .is_err()
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubrecPacket {
    packet_identifier: u16,
    reason_code: PubrecReasonCode,
    reason_string: Option<String>,
    user_properties: UserProperties,
}

impl PubrecPacket {
    /// Create a packet with no reason string and no user properties.
    #[must_use]
    pub fn new(packet_identifier: u16, reason_code: PubrecReasonCode) -> Self {
        Self {
            packet_identifier,
            reason_code,
            reason_string: None,
            user_properties: UserProperties::new(),
        }
    }

    /// Packet identifier of the QoS 2 flow.
    #[must_use]
    pub fn packet_identifier(&self) -> u16 { self.packet_identifier }

    /// Current reason code.
    #[must_use]
    pub fn reason_code(&self) -> PubrecReasonCode { self.reason_code }

    /// Replace the reason code.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::ReasonCodeClassSwitch`] if the new code would
    /// turn an acknowledgment into a rejection or the other way round; the
    /// sender has already committed to one outcome of the QoS 2 flow.
    pub fn set_reason_code(&mut self, reason_code: PubrecReasonCode) -> Result<(), PacketError> {
        if reason_code.is_success() != self.reason_code.is_success() {
            return Err(PacketError::ReasonCodeClassSwitch {
                from: self.reason_code,
                to: reason_code,
            });
        }
        self.reason_code = reason_code;
        Ok(())
    }

    /// Current reason string, if any.
    #[must_use]
    pub fn reason_string(&self) -> Option<&str> { self.reason_string.as_deref() }

    /// Set or clear the reason string.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::InvalidString`] for strings that cannot be
    /// encoded.
    pub fn set_reason_string(&mut self, reason: Option<String>) -> Result<(), PacketError> {
        if let Some(reason) = reason.as_deref() {
            validate_string("reason string", reason)?;
        }
        self.reason_string = reason;
        Ok(())
    }

    /// User properties in wire order.
    #[must_use]
    pub fn user_properties(&self) -> &UserProperties { &self.user_properties }

    /// Mutable access to the user properties.
    pub fn user_properties_mut(&mut self) -> &mut UserProperties { &mut self.user_properties }
}

impl OutboundPacket for PubrecPacket {
    const KIND: PacketKind = PacketKind::Pubrec;
}
