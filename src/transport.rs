//! The seam between a session and the underlying FTP implementation.
//!
//! A [`Connector`] opens control connections; each connection is a
//! [`Transport`]. Only the commands that need a data channel (listings and
//! transfers) and the basic channel plumbing have to be implemented: the
//! plain control commands have default implementations built on
//! [`Transport::send_command`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::FtpError;
use crate::reply::{expect_class, expect_completion, parse_213, parse_257, unexpected_reply};

/// A boxed, `Send` future borrowing a connection for `'a`.
///
/// Operations passed to [`crate::FtpSession::dispatch`] return this type.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text encoding used for commands, replies and path names.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 (RFC 2640).
    #[default]
    Utf8,
    /// ISO-8859-1, used by many older servers.
    Latin1,
}

impl TextEncoding {
    /// Returns the conventional label of this encoding.
    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// Encodes text for the wire.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, FtpError> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Latin1 => text
                .chars()
                .map(|ch| {
                    u8::try_from(u32::from(ch)).map_err(|_| {
                        FtpError::Encoding(format!("{ch:?} is not representable in latin-1"))
                    })
                })
                .collect(),
        }
    }

    /// Decodes text received from the wire.
    pub fn decode(self, bytes: &[u8]) -> Result<String, FtpError> {
        match self {
            TextEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|err| FtpError::Encoding(format!("invalid utf-8: {err}"))),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// Per-connection settings handed to a [`Connector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    /// Socket timeout; an idle control channel is considered dead after it.
    pub timeout: Duration,
    /// Encoding for command and reply text.
    pub encoding: TextEncoding,
}

/// Opens control connections to a server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection type produced by this connector.
    type Transport: Transport;

    /// Connects to `host:port` and reads the server greeting.
    ///
    /// A refused connection should be reported as an
    /// [`std::io::ErrorKind::ConnectionRefused`] I/O error and a name
    /// resolution failure as [`FtpError::Resolve`].
    async fn connect(
        &self,
        host: &str,
        port: u16,
        settings: &TransportSettings,
    ) -> Result<Self::Transport, FtpError>;
}

/// Lines of an `MLSD` listing, read one at a time from the data channel.
#[async_trait]
pub trait ListingStream: Send {
    /// Returns the next raw listing line, or `None` once the listing is complete.
    async fn next_line(&mut self) -> Result<Option<String>, FtpError>;
}

/// One established, logged-in-or-not control connection.
///
/// Every method may fail with the transient error classes listed on
/// [`FtpError::is_transient`]; a session reacts to those by reconnecting.
#[async_trait]
pub trait Transport: Send {
    /// Returns `false` once the control channel is known to be closed.
    ///
    /// This must be a local check; it must not send anything to the server.
    fn is_channel_open(&self) -> bool;

    /// Sends a raw command and returns the complete reply text.
    ///
    /// `1xx`..`3xx` replies are returned as `Ok`; `4xx` replies must map to
    /// [`FtpError::Temporary`] and `5xx` to [`FtpError::Permanent`] (see
    /// [`crate::reply::check_reply`]). Multi-line replies are joined with `\n`.
    async fn send_command(&mut self, cmd: &str) -> Result<String, FtpError>;

    /// Returns the names in a directory (`NLST`).
    async fn nlst(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError>;

    /// Returns the long listing lines of a directory (`LIST`).
    async fn dir(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError>;

    /// Starts an `MLSD` listing of `path`, requesting `facts` first if non-empty.
    async fn mlsd<'a>(
        &'a mut self,
        path: &str,
        facts: &[String],
    ) -> Result<Box<dyn ListingStream + 'a>, FtpError>;

    /// Enters passive mode and returns the advertised data address.
    async fn make_pasv(&mut self) -> Result<(String, u16), FtpError>;

    /// Runs a download command (for example `RETR name`) in binary mode.
    async fn retr_binary(
        &mut self,
        cmd: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        block_size: usize,
    ) -> Result<String, FtpError>;

    /// Runs a download or listing command in text mode, collecting the lines.
    async fn retr_lines(&mut self, cmd: &str, lines: &mut Vec<String>)
    -> Result<String, FtpError>;

    /// Runs an upload command (for example `STOR name`) in binary mode.
    async fn stor_binary(
        &mut self,
        cmd: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        block_size: usize,
    ) -> Result<String, FtpError>;

    /// Runs an upload command in text mode.
    async fn stor_lines(&mut self, cmd: &str, lines: &[String]) -> Result<String, FtpError>;

    /// Closes the connection without saying goodbye. Must be idempotent.
    async fn close(&mut self);

    /// Logs in with `USER`/`PASS`.
    async fn login(&mut self, user: &str, password: &str) -> Result<String, FtpError> {
        let mut reply = self.send_command(&format!("USER {user}")).await?;
        if reply.starts_with('3') {
            reply = self.send_command(&format!("PASS {password}")).await?;
        }
        expect_completion(reply)
    }

    /// Sends a command that must complete with a `2xx` reply.
    async fn void_command(&mut self, cmd: &str) -> Result<String, FtpError> {
        let reply = self.send_command(cmd).await?;
        expect_completion(reply)
    }

    /// Sends `ACCT`.
    async fn acct(&mut self, password: &str) -> Result<String, FtpError> {
        self.void_command(&format!("ACCT {password}")).await
    }

    /// Changes the working directory.
    async fn cwd(&mut self, path: &str) -> Result<String, FtpError> {
        match path {
            ".." => self.void_command("CDUP").await,
            "" => self.void_command("CWD .").await,
            _ => self.void_command(&format!("CWD {path}")).await,
        }
    }

    /// Returns the working directory.
    async fn pwd(&mut self) -> Result<String, FtpError> {
        let reply = self.send_command("PWD").await?;
        parse_257(&reply)
    }

    /// Renames `from` to `to`.
    async fn rename(&mut self, from: &str, to: &str) -> Result<String, FtpError> {
        let reply = self.send_command(&format!("RNFR {from}")).await?;
        expect_class(reply, 3)?;
        self.void_command(&format!("RNTO {to}")).await
    }

    /// Deletes a file.
    async fn delete(&mut self, path: &str) -> Result<String, FtpError> {
        let reply = self.send_command(&format!("DELE {path}")).await?;
        if reply.starts_with("250") || reply.starts_with("200") {
            Ok(reply)
        } else {
            Err(unexpected_reply(reply))
        }
    }

    /// Creates a directory and returns its path as reported by the server.
    async fn mkd(&mut self, path: &str) -> Result<String, FtpError> {
        let reply = self.void_command(&format!("MKD {path}")).await?;
        if reply.starts_with("257") {
            parse_257(&reply)
        } else {
            Ok(String::new())
        }
    }

    /// Removes a directory.
    async fn rmd(&mut self, path: &str) -> Result<String, FtpError> {
        self.void_command(&format!("RMD {path}")).await
    }

    /// Returns the size of a file, if the server reports one.
    async fn size(&mut self, path: &str) -> Result<Option<u64>, FtpError> {
        let reply = self.send_command(&format!("SIZE {path}")).await?;
        parse_213(&reply)
    }

    /// Announces an active-mode data address (`PORT`, IPv4 only).
    async fn send_port(&mut self, host: &str, port: u16) -> Result<String, FtpError> {
        let host = host.replace('.', ",");
        let cmd = format!("PORT {host},{},{}", port >> 8, port & 0xff);
        self.void_command(&cmd).await
    }

    /// Announces an active-mode data address (`EPRT`).
    async fn send_eprt(&mut self, host: &str, port: u16) -> Result<String, FtpError> {
        let af = if host.contains(':') { 2 } else { 1 };
        self.void_command(&format!("EPRT |{af}|{host}|{port}|"))
            .await
    }

    /// Aborts the running data transfer.
    async fn abort(&mut self) -> Result<String, FtpError> {
        let reply = self.send_command("ABOR").await?;
        if ["426", "225", "226"].iter().any(|code| reply.starts_with(code)) {
            Ok(reply)
        } else {
            Err(unexpected_reply(reply))
        }
    }

    /// Says goodbye (`QUIT`) and closes the connection.
    async fn quit(&mut self) -> Result<String, FtpError> {
        let result = self.void_command("QUIT").await;
        self.close().await;
        result
    }
}
