use thiserror::Error;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A reply returned by the server on the control connection.
pub struct ServerReply {
    /// Three-digit reply code (for example `550`).
    pub code: u16,
    /// Full reply text as received, including the code prefix.
    ///
    /// Multi-line replies are joined with `\n`.
    pub text: String,
}

impl ServerReply {
    /// Creates a reply from its code and raw text.
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Parses the leading three-digit code of a raw reply.
    ///
    /// Returns `None` when the text does not start with a reply code.
    pub fn parse(text: &str) -> Option<Self> {
        let code = text.get(..3)?;
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let code = code.parse::<u16>().ok()?;
        Some(Self::new(code, text))
    }

    /// Returns the first digit of the reply code (`1`..=`5`).
    pub fn class(&self) -> u16 {
        self.code / 100
    }

    /// Returns the first line of the reply text.
    pub fn first_line(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }
}

impl std::fmt::Display for ServerReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.first_line())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
/// Errors returned by this crate.
pub enum FtpError {
    /// An I/O error occurred on the control or data connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The server hostname could not be resolved.
    #[error("failed to resolve {host}: {message}")]
    Resolve {
        /// Hostname that failed to resolve.
        host: String,
        /// Resolver message.
        message: String,
    },
    /// The server actively refused the connection while it was being established.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connection {
        /// Server hostname.
        host: String,
        /// Server port.
        port: u16,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// The server returned a transient negative reply (`4xx`).
    #[error("temporary error: {0}")]
    Temporary(ServerReply),
    /// The server returned a permanent negative reply (`5xx`).
    #[error("permanent error: {0}")]
    Permanent(ServerReply),
    /// The server returned a reply code the command did not expect.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(ServerReply),
    /// The server response did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Text could not be represented in the configured encoding.
    #[error("text encoding error: {0}")]
    Encoding(String),
    /// Every reconnect attempt failed with a transient error.
    #[error(
        "failed to execute a command on {host}:{port} after {attempts} reconnect(s), the last error was: {source}"
    )]
    TemporaryFailure {
        /// Server hostname.
        host: String,
        /// Server port.
        port: u16,
        /// Number of attempts made (the configured maximum).
        attempts: usize,
        /// The last transient error observed.
        source: Box<FtpError>,
    },
}

impl FtpError {
    /// Returns `true` if reconnecting and retrying may fix this error.
    ///
    /// Transient errors are dropped or refused connections, timeouts, name
    /// resolution failures, an unexpected end of stream and `4xx` replies.
    pub fn is_transient(&self) -> bool {
        match self {
            FtpError::Io(io) => matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::HostUnreachable
                    | std::io::ErrorKind::NetworkUnreachable
            ),
            FtpError::Resolve { .. } | FtpError::Connection { .. } | FtpError::Temporary(_) => {
                true
            }
            _ => false,
        }
    }

    /// Returns the server reply carried by this error, if any.
    pub fn reply(&self) -> Option<&ServerReply> {
        match self {
            FtpError::Temporary(reply)
            | FtpError::Permanent(reply)
            | FtpError::UnexpectedReply(reply) => Some(reply),
            FtpError::TemporaryFailure { source, .. } => source.reply(),
            _ => None,
        }
    }
}
