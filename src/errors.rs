use std::io;
use std::net::SocketAddr;

/// All error types that can occur while discovering and driving bulbs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The discovery listener could not bind its port.
    #[error("unable to bind discovery listener: {0}")]
    TransportBind(io::Error),

    /// The discovery listener failed for a reason other than binding.
    #[error("discovery listener {action} error: {err}")]
    Listener { action: String, err: io::Error },

    /// A bulb or gateway call failed or timed out.
    #[error("device {name} unreachable during {action}: {err}")]
    DeviceUnreachable {
        name: String,
        action: String,
        err: io::Error,
    },

    /// A resolved bulb was dropped because its gateway could not be connected.
    #[error("gateway {address} for {name} unreachable: {err}")]
    GatewayUnreachable {
        name: String,
        address: SocketAddr,
        err: io::Error,
    },

    /// Resolution exhausted its attempts without finding the name.
    #[error("no device named {0:?} was found")]
    NameNotFound(String),

    /// The cached color of a bulb could not be read before a pulse.
    #[error("color of {0:?} is unknown")]
    ColorUnknown(String),

    /// The requested action id is not one the dispatcher knows.
    #[error("unknown action {0:?}")]
    UnknownAction(String),

    /// A request is missing a parameter or carries an invalid one.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to parse a [`crate::Color`] from a string.
    #[error("invalid color string: {0}")]
    InvalidColorString(String),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),
}

impl Error {
    /// Create a new listener error
    pub fn listener(action: &str, err: io::Error) -> Self {
        Error::Listener {
            action: action.to_string(),
            err,
        }
    }

    /// Map a failure to open the discovery listener.
    ///
    /// `AddrInUse` and `PermissionDenied` mean the port could not be bound;
    /// anything else is an ordinary listener failure.
    pub fn listen(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied => {
                Error::TransportBind(err)
            }
            _ => Error::listener("start", err),
        }
    }

    /// Create a new device unreachable error
    pub fn unreachable(name: &str, action: &str, err: io::Error) -> Self {
        Error::DeviceUnreachable {
            name: name.to_string(),
            action: action.to_string(),
            err,
        }
    }

    /// Create a new gateway unreachable error
    pub fn gateway_unreachable(name: &str, address: SocketAddr, err: io::Error) -> Self {
        Error::GatewayUnreachable {
            name: name.to_string(),
            address,
            err,
        }
    }

    /// Create a new invalid request error
    pub fn invalid_request(reason: &str) -> Self {
        Error::InvalidRequest(reason.to_string())
    }

    /// Whether this error is contained at the device boundary.
    ///
    /// Device-level errors end up in an [`crate::Outcome`]; the rest are
    /// returned to the caller.
    pub fn is_device_level(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnreachable { .. }
                | Error::GatewayUnreachable { .. }
                | Error::NameNotFound(_)
                | Error::ColorUnknown(_)
        )
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
