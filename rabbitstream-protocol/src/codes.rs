//! Response codes.

use crate::error::ProtocolError;
use std::fmt;

/// Response codes returned by the broker.
///
/// These values are part of the protocol contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 1,
    StreamDoesNotExist = 2,
    SubscriptionIdAlreadyExists = 3,
    SubscriptionIdDoesNotExist = 4,
    StreamAlreadyExists = 5,
    StreamNotAvailable = 6,
    SaslMechanismNotSupported = 7,
    AuthenticationFailure = 8,
    SaslError = 9,
    SaslChallenge = 10,
    SaslAuthenticationFailureLoopback = 11,
    VirtualHostAccessFailure = 12,
    UnknownFrame = 13,
    FrameTooLarge = 14,
    InternalError = 15,
    AccessRefused = 16,
    PreconditionFailed = 17,
    PublisherDoesNotExist = 18,
    NoOffset = 19,
}

impl ResponseCode {
    /// Decodes a wire value, failing on codes outside the table.
    pub fn from_u16(value: u16) -> Result<Self, ProtocolError> {
        use ResponseCode::*;
        Result::Ok(match value {
            1 => Ok,
            2 => StreamDoesNotExist,
            3 => SubscriptionIdAlreadyExists,
            4 => SubscriptionIdDoesNotExist,
            5 => StreamAlreadyExists,
            6 => StreamNotAvailable,
            7 => SaslMechanismNotSupported,
            8 => AuthenticationFailure,
            9 => SaslError,
            10 => SaslChallenge,
            11 => SaslAuthenticationFailureLoopback,
            12 => VirtualHostAccessFailure,
            13 => UnknownFrame,
            14 => FrameTooLarge,
            15 => InternalError,
            16 => AccessRefused,
            17 => PreconditionFailed,
            18 => PublisherDoesNotExist,
            19 => NoOffset,
            other => return Err(ProtocolError::UnknownResponseCode(other)),
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_ok(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseCode::Ok => "OK",
            ResponseCode::StreamDoesNotExist => "STREAM_DOES_NOT_EXIST",
            ResponseCode::SubscriptionIdAlreadyExists => "SUBSCRIPTION_ID_ALREADY_EXISTS",
            ResponseCode::SubscriptionIdDoesNotExist => "SUBSCRIPTION_ID_DOES_NOT_EXIST",
            ResponseCode::StreamAlreadyExists => "STREAM_ALREADY_EXISTS",
            ResponseCode::StreamNotAvailable => "STREAM_NOT_AVAILABLE",
            ResponseCode::SaslMechanismNotSupported => "SASL_MECHANISM_NOT_SUPPORTED",
            ResponseCode::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            ResponseCode::SaslError => "SASL_ERROR",
            ResponseCode::SaslChallenge => "SASL_CHALLENGE",
            ResponseCode::SaslAuthenticationFailureLoopback => {
                "SASL_AUTHENTICATION_FAILURE_LOOPBACK"
            }
            ResponseCode::VirtualHostAccessFailure => "VIRTUAL_HOST_ACCESS_FAILURE",
            ResponseCode::UnknownFrame => "UNKNOWN_FRAME",
            ResponseCode::FrameTooLarge => "FRAME_TOO_LARGE",
            ResponseCode::InternalError => "INTERNAL_ERROR",
            ResponseCode::AccessRefused => "ACCESS_REFUSED",
            ResponseCode::PreconditionFailed => "PRECONDITION_FAILED",
            ResponseCode::PublisherDoesNotExist => "PUBLISHER_DOES_NOT_EXIST",
            ResponseCode::NoOffset => "NO_OFFSET",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_codes() {
        for value in 1..=19u16 {
            let code = ResponseCode::from_u16(value).unwrap();
            assert_eq!(code.as_u16(), value);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(matches!(
            ResponseCode::from_u16(0),
            Err(ProtocolError::UnknownResponseCode(0))
        ));
        assert!(matches!(
            ResponseCode::from_u16(20),
            Err(ProtocolError::UnknownResponseCode(20))
        ));
    }

    #[test]
    fn only_ok_is_ok() {
        assert!(ResponseCode::Ok.is_ok());
        assert!(!ResponseCode::StreamDoesNotExist.is_ok());
        assert!(!ResponseCode::AuthenticationFailure.is_ok());
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(ResponseCode::Ok.to_string(), "OK");
        assert_eq!(
            ResponseCode::StreamDoesNotExist.to_string(),
            "STREAM_DOES_NOT_EXIST"
        );
        assert_eq!(ResponseCode::NoOffset.to_string(), "NO_OFFSET");
    }
}
