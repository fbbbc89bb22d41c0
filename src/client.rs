use std::fmt::Formatter;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::facts::{parse_mlsd_line, parse_mlst_response};
use crate::transport::{BoxFuture, Connector, Transport, TransportSettings};
use crate::{Access, FactEntry, Facts, FtpError, TextEncoding};

/// Block size used by binary transfers unless the caller picks another one.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

const DEFAULT_MAX_RECONNECTS: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A reusable configuration object for connecting to an FTP server.
///
/// Use [`FtpClient::session`] to create a [`FtpSession`].
#[derive(Clone)]
pub struct FtpClient<C> {
    access: Access,
    connector: C,
    max_reconnects: usize,
    timeout: Duration,
    encoding: TextEncoding,
}

/// A stateful FTP session that survives dropped control connections.
///
/// The session holds at most one connection. When a command fails with a
/// transient error (see [`FtpError::is_transient`]) the connection is
/// discarded, a new one is established, the last known working directory is
/// restored and the command is retried, up to
/// [`FtpClient::max_reconnects`] times.
///
/// Operations require `&mut self` and therefore run strictly one after
/// another. Share a session between tasks only behind a mutex.
pub struct FtpSession<C: Connector> {
    client: FtpClient<C>,
    conn: Option<C::Transport>,
    last_pwd: Option<String>,
}

impl<C> std::fmt::Debug for FtpClient<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient")
            .field("access", &self.access)
            .field("max_reconnects", &self.max_reconnects)
            .field("timeout", &self.timeout)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> std::fmt::Debug for FtpSession<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("client", &self.client)
            .field("connected", &self.conn.is_some())
            .field("last_pwd", &self.last_pwd)
            .finish()
    }
}

impl<C: Connector> FtpClient<C> {
    /// Creates a client configuration for a server and a connector.
    pub fn new(access: Access, connector: C) -> Self {
        Self {
            access,
            connector,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            timeout: DEFAULT_TIMEOUT,
            encoding: TextEncoding::default(),
        }
    }

    /// Returns the server address and credentials.
    pub fn access(&self) -> &Access {
        &self.access
    }

    /// Returns the connector used to open connections.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns the maximum number of attempts per operation.
    pub fn max_reconnects(&self) -> usize {
        self.max_reconnects
    }

    /// Returns the socket timeout handed to the transport.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the text encoding handed to the transport.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Sets the maximum number of attempts per operation.
    ///
    /// Values below `1` are raised to `1`.
    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: usize) -> Self {
        self.max_reconnects = max_reconnects.max(1);
        self
    }

    /// Sets the socket timeout handed to the transport.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the text encoding handed to the transport.
    #[must_use]
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Returns the settings passed to [`Connector::connect`].
    pub fn settings(&self) -> TransportSettings {
        TransportSettings {
            timeout: self.timeout,
            encoding: self.encoding,
        }
    }

    /// Turns this configuration into a disconnected session.
    ///
    /// The session connects lazily on its first operation.
    pub fn into_session(self) -> FtpSession<C> {
        FtpSession {
            client: self,
            conn: None,
            last_pwd: None,
        }
    }
}

impl<C: Connector + Clone> FtpClient<C> {
    /// Creates a disconnected session; it connects on its first operation.
    pub fn session(&self) -> FtpSession<C> {
        self.clone().into_session()
    }

    /// Creates a session and connects it right away.
    pub async fn open_session(&self) -> Result<FtpSession<C>, FtpError> {
        let mut session = self.session();
        session.connect().await?;
        Ok(session)
    }

    /// Runs `f` on a fresh session and closes the session afterwards.
    ///
    /// The session is closed whether `f` succeeds or fails. If `f` panics or
    /// the returned future is dropped before it completes, `close` is skipped
    /// and the connection is released by dropping the transport instead.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T, FtpError>
    where
        F: for<'a> FnOnce(&'a mut FtpSession<C>) -> BoxFuture<'a, Result<T, FtpError>>,
    {
        let mut session = self.session();
        let result = f(&mut session).await;
        session.close().await;
        result
    }
}

impl<C: Connector> FtpSession<C> {
    /// Returns the [`FtpClient`] configuration used by this session.
    pub fn client(&self) -> &FtpClient<C> {
        &self.client
    }

    /// Returns `true` while the session holds a connection.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns the working directory observed after the last successful operation.
    pub fn last_working_directory(&self) -> Option<&str> {
        self.last_pwd.as_deref()
    }

    /// Connects and logs in unless a live connection is already held.
    ///
    /// A held connection whose channel reports closed is discarded first. On
    /// a new connection the last known working directory is restored before
    /// the connection is used. If login fails, the new connection is closed and
    /// the error is returned. If the directory no longer exists, the logged-in
    /// connection is kept and the error is returned once; the session then
    /// works from the server's initial directory.
    pub async fn connect(&mut self) -> Result<(), FtpError> {
        if let Some(conn) = self.conn.as_mut()
            && !conn.is_channel_open()
        {
            debug!("control channel closed; discarding connection");
            conn.close().await;
            self.conn = None;
        }
        if self.conn.is_some() {
            return Ok(());
        }

        let access = &self.client.access;
        let settings = self.client.settings();
        let mut conn = match self
            .client
            .connector
            .connect(&access.host, access.port, &settings)
            .await
        {
            Ok(conn) => conn,
            Err(FtpError::Io(err)) if err.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(FtpError::Connection {
                    host: access.host.clone(),
                    port: access.port,
                    source: err,
                });
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = conn.login(&access.user, &access.password).await {
            conn.close().await;
            return Err(err);
        }
        debug!(host = %access.host, port = access.port, "connected");
        let conn = self.conn.insert(conn);

        let Some(pwd) = self.last_pwd.as_deref() else {
            return Ok(());
        };
        debug!(pwd, "restoring working directory");
        if let Err(err) = conn.cwd(pwd).await {
            if err.is_transient() {
                self.close().await;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Closes the connection, if any. Closing a disconnected session is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
    }

    /// Runs `f` against the live connection, reconnecting on transient errors.
    ///
    /// This does not update the cached working directory; see
    /// [`FtpSession::dispatch_tracked`].
    pub async fn dispatch<T, F>(&mut self, f: F) -> Result<T, FtpError>
    where
        F: for<'a> FnMut(&'a mut C::Transport) -> BoxFuture<'a, Result<T, FtpError>>,
    {
        self.with_retry("dispatch", f).await
    }

    /// Like [`FtpSession::dispatch`], then records the working directory.
    pub async fn dispatch_tracked<T, F>(&mut self, f: F) -> Result<T, FtpError>
    where
        F: for<'a> FnMut(&'a mut C::Transport) -> BoxFuture<'a, Result<T, FtpError>>,
    {
        self.with_retry_tracked("dispatch", f).await
    }

    async fn with_retry<T, F>(&mut self, op: &'static str, mut f: F) -> Result<T, FtpError>
    where
        F: for<'a> FnMut(&'a mut C::Transport) -> BoxFuture<'a, Result<T, FtpError>>,
    {
        let attempts = self.client.max_reconnects;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = if self.conn.is_none() {
                self.connect().await
            } else {
                Ok(())
            };
            let result = match result {
                Ok(()) => {
                    let conn = self.conn_mut()?;
                    f(conn).await
                }
                Err(err) => Err(err),
            };
            let err = match result {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };
            self.close().await;
            if attempt >= attempts {
                debug!(op, attempts, "giving up after repeated transient failures");
                return Err(FtpError::TemporaryFailure {
                    host: self.client.access.host.clone(),
                    port: self.client.access.port,
                    attempts,
                    source: Box::new(err),
                });
            }
            debug!(op, attempt, error = %err, "connection lost; reconnecting and retrying");
        }
    }

    async fn with_retry_tracked<T, F>(&mut self, op: &'static str, f: F) -> Result<T, FtpError>
    where
        F: for<'a> FnMut(&'a mut C::Transport) -> BoxFuture<'a, Result<T, FtpError>>,
    {
        let value = self.with_retry(op, f).await?;
        self.pwd().await?;
        Ok(value)
    }

    fn conn_mut(&mut self) -> Result<&mut C::Transport, FtpError> {
        self.conn
            .as_mut()
            .ok_or_else(|| FtpError::Protocol("not connected".into()))
    }

    /// Returns the working directory and caches it for reconnects.
    pub async fn pwd(&mut self) -> Result<String, FtpError> {
        let pwd = self
            .with_retry("pwd", |conn| Box::pin(async move { conn.pwd().await }))
            .await?;
        self.last_pwd = Some(pwd.clone());
        Ok(pwd)
    }

    /// Changes the working directory.
    pub async fn cwd(&mut self, dir: &str) -> Result<String, FtpError> {
        let dir = dir.to_string();
        self.with_retry_tracked("cwd", move |conn| {
            let dir = dir.clone();
            Box::pin(async move { conn.cwd(&dir).await })
        })
        .await
    }

    /// Sends a raw command and returns the reply text.
    pub async fn send_command(&mut self, cmd: &str) -> Result<String, FtpError> {
        let cmd = cmd.to_string();
        self.with_retry_tracked("send-command", move |conn| {
            let cmd = cmd.clone();
            Box::pin(async move { conn.send_command(&cmd).await })
        })
        .await
    }

    /// Sends a raw command that must complete with a `2xx` reply.
    pub async fn void_command(&mut self, cmd: &str) -> Result<String, FtpError> {
        let cmd = cmd.to_string();
        self.with_retry_tracked("void-command", move |conn| {
            let cmd = cmd.clone();
            Box::pin(async move { conn.void_command(&cmd).await })
        })
        .await
    }

    /// Sends `ACCT`.
    pub async fn acct(&mut self, password: &str) -> Result<String, FtpError> {
        let password = password.to_string();
        self.with_retry_tracked("acct", move |conn| {
            let password = password.clone();
            Box::pin(async move { conn.acct(&password).await })
        })
        .await
    }

    /// Announces an active-mode data address with `PORT`.
    pub async fn send_port(&mut self, host: &str, port: u16) -> Result<String, FtpError> {
        let host = host.to_string();
        self.with_retry_tracked("port", move |conn| {
            let host = host.clone();
            Box::pin(async move { conn.send_port(&host, port).await })
        })
        .await
    }

    /// Announces an active-mode data address with `EPRT`.
    pub async fn send_eprt(&mut self, host: &str, port: u16) -> Result<String, FtpError> {
        let host = host.to_string();
        self.with_retry_tracked("eprt", move |conn| {
            let host = host.clone();
            Box::pin(async move { conn.send_eprt(&host, port).await })
        })
        .await
    }

    /// Enters passive mode and returns the advertised data address.
    pub async fn make_pasv(&mut self) -> Result<(String, u16), FtpError> {
        self.with_retry_tracked("pasv", |conn| {
            Box::pin(async move { conn.make_pasv().await })
        })
        .await
    }

    /// Returns the names in `path` (or the working directory).
    pub async fn nlst(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        let path = path.map(str::to_string);
        self.with_retry_tracked("nlst", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.nlst(path.as_deref()).await })
        })
        .await
    }

    /// Returns the long listing lines of `path` (or the working directory).
    pub async fn dir(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        let path = path.map(str::to_string);
        self.with_retry_tracked("list", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.dir(path.as_deref()).await })
        })
        .await
    }

    /// Lists `path` with `MLSD` and returns every entry with its facts.
    ///
    /// The listing is read to the end before it is returned, so a reconnect
    /// restarts it from scratch and callers never see a partial listing. The
    /// whole listing is held in memory. Pass an empty `path` for the working
    /// directory and an empty `facts` slice for the server's default facts.
    pub async fn mlsd(
        &mut self,
        path: &str,
        facts: &[&str],
    ) -> Result<Vec<(String, Facts)>, FtpError> {
        let path = path.to_string();
        let facts: Vec<String> = facts.iter().map(|f| f.to_string()).collect();
        self.with_retry_tracked("mlsd", move |conn| {
            let path = path.clone();
            let facts = facts.clone();
            Box::pin(async move {
                let mut listing = conn.mlsd(&path, &facts).await?;
                let mut entries = Vec::new();
                while let Some(line) = listing.next_line().await? {
                    entries.push(parse_mlsd_line(&line));
                }
                Ok(entries)
            })
        })
        .await
    }

    /// Describes a single entry with `MLST`.
    ///
    /// If `facts` is non-empty, `OPTS MLST` selects them first. A malformed
    /// reply fails with [`FtpError::Protocol`] and is not retried.
    pub async fn mlst(&mut self, filename: &str, facts: &[&str]) -> Result<FactEntry, FtpError> {
        let filename = filename.to_string();
        let opts = if facts.is_empty() {
            None
        } else {
            Some(format!("OPTS MLST {};", facts.join(";")))
        };
        self.with_retry_tracked("mlst", move |conn| {
            let filename = filename.clone();
            let opts = opts.clone();
            Box::pin(async move {
                if let Some(opts) = opts {
                    conn.send_command(&opts).await?;
                }
                let response = conn.send_command(&format!("MLST {filename}")).await?;
                parse_mlst_response(&response)
            })
        })
        .await
    }

    /// Renames `from` to `to`.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<String, FtpError> {
        let from = from.to_string();
        let to = to.to_string();
        self.with_retry_tracked("rename", move |conn| {
            let from = from.clone();
            let to = to.clone();
            Box::pin(async move { conn.rename(&from, &to).await })
        })
        .await
    }

    /// Deletes a file.
    pub async fn delete(&mut self, path: &str) -> Result<String, FtpError> {
        let path = path.to_string();
        self.with_retry_tracked("delete", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.delete(&path).await })
        })
        .await
    }

    /// Creates a directory and returns its path as reported by the server.
    pub async fn mkd(&mut self, path: &str) -> Result<String, FtpError> {
        let path = path.to_string();
        self.with_retry_tracked("mkd", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.mkd(&path).await })
        })
        .await
    }

    /// Removes a directory.
    pub async fn rmd(&mut self, path: &str) -> Result<String, FtpError> {
        let path = path.to_string();
        self.with_retry_tracked("rmd", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.rmd(&path).await })
        })
        .await
    }

    /// Returns the size of a file, if the server reports one.
    pub async fn size(&mut self, path: &str) -> Result<Option<u64>, FtpError> {
        let path = path.to_string();
        self.with_retry_tracked("size", move |conn| {
            let path = path.clone();
            Box::pin(async move { conn.size(&path).await })
        })
        .await
    }

    /// Runs a binary download command (for example `RETR name`) into `out`.
    ///
    /// Each attempt downloads into a fresh buffer; `out` only receives the
    /// data of the attempt that succeeded. Returns the final reply.
    pub async fn retr_binary<W>(
        &mut self,
        cmd: &str,
        out: &mut W,
        block_size: usize,
    ) -> Result<String, FtpError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let cmd = cmd.to_string();
        let (reply, data) = self
            .with_retry_tracked("retr-binary", move |conn| {
                let cmd = cmd.clone();
                Box::pin(async move {
                    let mut buf = Vec::new();
                    let reply = conn.retr_binary(&cmd, &mut buf, block_size).await?;
                    Ok((reply, buf))
                })
            })
            .await?;
        out.write_all(&data).await?;
        out.flush().await?;
        Ok(reply)
    }

    /// Runs a text-mode download or listing command and returns the reply and lines.
    pub async fn retr_lines(&mut self, cmd: &str) -> Result<(String, Vec<String>), FtpError> {
        let cmd = cmd.to_string();
        self.with_retry_tracked("retr-lines", move |conn| {
            let cmd = cmd.clone();
            Box::pin(async move {
                let mut lines = Vec::new();
                let reply = conn.retr_lines(&cmd, &mut lines).await?;
                Ok((reply, lines))
            })
        })
        .await
    }

    /// Runs a binary upload command (for example `STOR name`) from `source`.
    ///
    /// `source` is read to the end once; every attempt re-sends that data
    /// from the start. Returns the final reply.
    pub async fn stor_binary<R>(
        &mut self,
        cmd: &str,
        source: &mut R,
        block_size: usize,
    ) -> Result<String, FtpError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let data: Arc<[u8]> = data.into();
        let cmd = cmd.to_string();
        self.with_retry_tracked("stor-binary", move |conn| {
            let cmd = cmd.clone();
            let data = Arc::clone(&data);
            Box::pin(async move {
                let mut source: &[u8] = &data;
                conn.stor_binary(&cmd, &mut source, block_size).await
            })
        })
        .await
    }

    /// Runs a text-mode upload command with the given lines.
    pub async fn stor_lines(&mut self, cmd: &str, lines: &[String]) -> Result<String, FtpError> {
        let cmd = cmd.to_string();
        let lines = lines.to_vec();
        self.with_retry_tracked("stor-lines", move |conn| {
            let cmd = cmd.clone();
            let lines = lines.clone();
            Box::pin(async move { conn.stor_lines(&cmd, &lines).await })
        })
        .await
    }

    /// Aborts the running data transfer.
    pub async fn abort(&mut self) -> Result<String, FtpError> {
        self.with_retry_tracked("abort", |conn| {
            Box::pin(async move { conn.abort().await })
        })
        .await
    }

    /// Sends `QUIT` and leaves the session disconnected.
    ///
    /// The connection is dropped whether or not `QUIT` succeeded; the session
    /// can be used again and will reconnect on its next operation.
    pub async fn quit(&mut self) -> Result<String, FtpError> {
        let result = self
            .with_retry("quit", |conn| Box::pin(async move { conn.quit().await }))
            .await;
        self.close().await;
        result
    }
}
