pub type Result<T> = std::result::Result<T, Error>;

/// The error type for MAPI and associated I/O operations, tagged by
/// origin so callers can tell a dead socket from a server complaint.
#[derive(Debug)]
pub enum Error {
    /// Underlying socket I/O failed (short read, timeout, EOF).
    Network(std::io::Error),
    /// The server answered with a `!` message.
    Server(String),
    /// The client could not make sense of what the server sent, or the
    /// caller asked for something the protocol cannot express.
    Driver {
        message: String,
        details: Option<String>,
    },
}

impl Error {
    pub(crate) fn driver(message: impl Into<String>) -> Self {
        Error::Driver {
            message: message.into(),
            details: None,
        }
    }

    pub(crate) fn driver_detailed(message: impl Into<String>, details: impl Into<String>) -> Self {
        Error::Driver {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// True when the failure came from the transport rather than the
    /// protocol or the server. The shell treats these as fatal.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Network(e) => write!(f, "network - {e}"),
            Error::Server(msg) => write!(f, "monetdb - {msg}"),
            Error::Driver {
                message,
                details: None,
            } => write!(f, "driver - {message}"),
            Error::Driver {
                message,
                details: Some(details),
            } => write!(f, "driver - {message}\n{details}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Network(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_display_shapes() {
        let e = Error::driver("no supported auth types");
        assert_eq!(e.to_string(), "driver - no supported auth types");

        let e = Error::driver_detailed("unknown response", "&9 what");
        assert_eq!(e.to_string(), "driver - unknown response\n&9 what");

        let e = Error::Server("syntax error".to_string());
        assert_eq!(e.to_string(), "monetdb - syntax error");

        let e = Error::Network(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "closed",
        ));
        assert!(e.is_network());
        assert!(e.to_string().starts_with("network - "));
    }
}
