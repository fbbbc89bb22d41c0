//! An in-memory FTP server used by the integration tests.
//!
//! The server keeps a small virtual file system and speaks just enough of the
//! control protocol to exercise a session. It drops connections that stay
//! idle for longer than a configurable timeout, the way real servers do.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, VecDeque};
use std::io::{Error, ErrorKind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reconnecting_ftp::reply::check_reply;
use reconnecting_ftp::{
    Connector, FtpError, ListingStream, ServerReply, Transport, TransportSettings,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const USER: &str = "some-user";
pub const PASSWORD: &str = "some-password";
pub const MODIFY: &str = "20230101120000";

const KNOWN_FACTS: [&str; 3] = ["modify", "type", "size"];

enum Node {
    Dir,
    File(Vec<u8>),
}

struct State {
    nodes: BTreeMap<String, Node>,
    idle_timeout: Option<Duration>,
    connections: usize,
    closes: usize,
    refuse_next: usize,
    reset_next: usize,
    commands: Vec<String>,
}

/// Handle to the shared server state.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            state: Arc::new(Mutex::new(State {
                nodes,
                idle_timeout: None,
                connections: 0,
                closes: 0,
                refuse_next: 0,
                reset_next: 0,
                commands: Vec::new(),
            })),
        }
    }

    /// The fixture used by most tests: `/some-dir/some-subdir` and
    /// `/some-dir/some-file.txt` containing `hello\n`.
    pub fn with_fixture() -> Self {
        let server = Self::new();
        server.add_dir("/some-dir");
        server.add_dir("/some-dir/some-subdir");
        server.add_file("/some-dir/some-file.txt", b"hello\n");
        server
    }

    pub fn add_dir(&self, path: &str) {
        self.lock().nodes.insert(path.to_string(), Node::Dir);
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.lock()
            .nodes
            .insert(path.to_string(), Node::File(data.to_vec()));
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.lock().idle_timeout = Some(timeout);
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    /// Resets the connection on each of the next `n` commands.
    pub fn reset_next(&self, n: usize) {
        self.lock().reset_next = n;
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.lock().nodes.get(path), Some(Node::Dir))
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        _settings: &TransportSettings,
    ) -> Result<MemoryTransport, FtpError> {
        let mut state = self.server.lock();
        state.connections += 1;
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(FtpError::Io(Error::new(
                ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(MemoryTransport {
            server: self.server.clone(),
            open: true,
            last_activity: Instant::now(),
            idle_timeout: state.idle_timeout,
            cwd: "/".to_string(),
            pending_user: None,
            logged_in: false,
            rename_from: None,
            mlst_facts: KNOWN_FACTS.iter().map(|f| f.to_string()).collect(),
        })
    }
}

pub struct MemoryTransport {
    server: MemoryServer,
    open: bool,
    last_activity: Instant,
    idle_timeout: Option<Duration>,
    cwd: String,
    pending_user: Option<String>,
    logged_in: bool,
    rename_from: Option<String>,
    mlst_facts: Vec<String>,
}

struct MemoryListing {
    lines: VecDeque<String>,
}

#[async_trait]
impl ListingStream for MemoryListing {
    async fn next_line(&mut self) -> Result<Option<String>, FtpError> {
        Ok(self.lines.pop_front())
    }
}

fn not_found(path: &str) -> FtpError {
    FtpError::Permanent(ServerReply::new(
        550,
        format!("550 {path}: No such file or directory."),
    ))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn resolve(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{cwd}/{path}")
    };
    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(segment),
        }
    }
    format!("/{}", parts.join("/"))
}

fn fact_line(node: &Node, facts: &[String]) -> String {
    let mut out = String::new();
    for fact in facts {
        match (fact.as_str(), node) {
            ("modify", _) => out.push_str(&format!("modify={MODIFY};")),
            ("type", Node::Dir) => out.push_str("type=dir;"),
            ("type", Node::File(_)) => out.push_str("type=file;"),
            ("size", Node::File(data)) => out.push_str(&format!("size={};", data.len())),
            _ => {}
        }
    }
    out
}

impl MemoryTransport {
    /// Records a command and applies idle and fault rules before it runs.
    fn begin(&mut self, cmd: &str) -> Result<(), FtpError> {
        if !self.open {
            return Err(FtpError::Io(Error::new(
                ErrorKind::NotConnected,
                "connection already closed",
            )));
        }
        let mut state = self.server.lock();
        state.commands.push(cmd.to_string());
        if let Some(timeout) = self.idle_timeout
            && self.last_activity.elapsed() > timeout
        {
            self.open = false;
            return Err(FtpError::Io(Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the idle control connection",
            )));
        }
        if state.reset_next > 0 {
            state.reset_next -= 1;
            self.open = false;
            return Err(FtpError::Io(Error::new(
                ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.last_activity = Instant::now();
        Ok(())
    }

    fn require_login(&self) -> Result<(), FtpError> {
        if self.logged_in {
            Ok(())
        } else {
            Err(FtpError::Permanent(ServerReply::new(
                530,
                "530 Log in with USER and PASS first.",
            )))
        }
    }

    /// Returns the direct children of a directory, sorted by name.
    fn children(&self, path: Option<&str>) -> Result<Vec<(String, String)>, FtpError> {
        let dir = resolve(&self.cwd, path.unwrap_or(""));
        let state = self.server.lock();
        if !matches!(state.nodes.get(&dir), Some(Node::Dir)) {
            return Err(not_found(&dir));
        }
        let facts: Vec<String> = KNOWN_FACTS.iter().map(|f| f.to_string()).collect();
        let mut out = Vec::new();
        for (child, node) in &state.nodes {
            if child != "/" && parent_of(child) == dir {
                out.push((name_of(child).to_string(), fact_line(node, &facts)));
            }
        }
        Ok(out)
    }

    fn handle(&mut self, cmd: &str) -> String {
        let (verb, arg) = match cmd.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg),
            None => (cmd.to_ascii_uppercase(), ""),
        };
        match verb.as_str() {
            "USER" => {
                self.logged_in = false;
                self.pending_user = Some(arg.to_string());
                return "331 Username ok, send password.".to_string();
            }
            "PASS" => {
                return if self.pending_user.as_deref() == Some(USER) && arg == PASSWORD {
                    self.logged_in = true;
                    "230 Login successful.".to_string()
                } else {
                    "530 Authentication failed.".to_string()
                };
            }
            "QUIT" => return "221 Goodbye.".to_string(),
            _ => {}
        }
        if !self.logged_in {
            return "530 Log in with USER and PASS first.".to_string();
        }

        let target = resolve(&self.cwd, arg);
        let mut state = self.server.lock();
        match verb.as_str() {
            "NOOP" => "200 NOOP ok.".to_string(),
            "TYPE" => "200 Type set.".to_string(),
            "ACCT" => "202 No account needed.".to_string(),
            "ABOR" => "225 No transfer to abort.".to_string(),
            "PORT" | "EPRT" => "200 Active data connection established.".to_string(),
            "PWD" => format!(
                "257 \"{}\" is the current directory.",
                self.cwd.replace('"', "\"\"")
            ),
            "CWD" | "CDUP" => {
                let target = if verb == "CDUP" {
                    resolve(&self.cwd, "..")
                } else {
                    target
                };
                if matches!(state.nodes.get(&target), Some(Node::Dir)) {
                    self.cwd = target;
                    format!("250 \"{}\" is the current directory.", self.cwd)
                } else {
                    format!("550 {target}: No such file or directory.")
                }
            }
            "MKD" => {
                if state.nodes.contains_key(&target)
                    || !matches!(state.nodes.get(parent_of(&target)), Some(Node::Dir))
                {
                    format!("550 {target}: Cannot create directory.")
                } else {
                    state.nodes.insert(target.clone(), Node::Dir);
                    format!("257 \"{target}\" directory created.")
                }
            }
            "RMD" => {
                let has_children = state
                    .nodes
                    .keys()
                    .any(|key| key != "/" && parent_of(key) == target);
                if matches!(state.nodes.get(&target), Some(Node::Dir))
                    && !has_children
                    && target != "/"
                {
                    state.nodes.remove(&target);
                    "250 Directory removed.".to_string()
                } else {
                    format!("550 {target}: Cannot remove directory.")
                }
            }
            "DELE" => match state.nodes.get(&target) {
                Some(Node::File(_)) => {
                    state.nodes.remove(&target);
                    "250 File removed.".to_string()
                }
                _ => format!("550 {target}: No such file."),
            },
            "RNFR" => {
                if state.nodes.contains_key(&target) {
                    self.rename_from = Some(target);
                    "350 Ready for destination name.".to_string()
                } else {
                    format!("550 {target}: No such file or directory.")
                }
            }
            "RNTO" => {
                let Some(from) = self.rename_from.take() else {
                    return "503 Bad sequence of commands.".to_string();
                };
                let moved: Vec<String> = state
                    .nodes
                    .keys()
                    .filter(|key| **key == from || key.starts_with(&format!("{from}/")))
                    .cloned()
                    .collect();
                for key in moved {
                    if let Some(node) = state.nodes.remove(&key) {
                        let renamed = format!("{target}{}", &key[from.len()..]);
                        state.nodes.insert(renamed, node);
                    }
                }
                "250 Renaming ok.".to_string()
            }
            "SIZE" => match state.nodes.get(&target) {
                Some(Node::File(data)) => format!("213 {}", data.len()),
                _ => format!("550 {target}: No such file."),
            },
            "OPTS" => {
                let Some(list) = arg
                    .split_once(' ')
                    .filter(|(name, _)| name.eq_ignore_ascii_case("MLST"))
                    .map(|(_, list)| list)
                else {
                    return "501 Invalid OPTS.".to_string();
                };
                let requested: Vec<String> = list
                    .split(';')
                    .map(str::to_ascii_lowercase)
                    .filter(|fact| KNOWN_FACTS.contains(&fact.as_str()))
                    .collect();
                self.mlst_facts = KNOWN_FACTS
                    .iter()
                    .filter(|fact| requested.iter().any(|r| r.as_str() == **fact))
                    .map(|fact| fact.to_string())
                    .collect();
                format!("200 MLST OPTS {};", self.mlst_facts.join(";"))
            }
            "MLST" => match state.nodes.get(&target) {
                Some(node) => format!(
                    "250-Listing {target}\n {} {target}\n250 End.",
                    fact_line(node, &self.mlst_facts)
                ),
                None => format!("550 {target}: No such file or directory."),
            },
            _ => "500 Command not understood.".to_string(),
        }
    }

    fn file_for(&self, cmd: &str, verb: &str) -> Result<String, FtpError> {
        match cmd.split_once(' ') {
            Some((v, arg)) if v.eq_ignore_ascii_case(verb) => Ok(resolve(&self.cwd, arg)),
            _ => Err(FtpError::Permanent(ServerReply::new(
                500,
                "500 Command not understood.",
            ))),
        }
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, FtpError> {
        match self.server.lock().nodes.get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            _ => Err(not_found(path)),
        }
    }

    fn write_file(&self, path: &str, data: Vec<u8>) -> Result<(), FtpError> {
        let mut state = self.server.lock();
        if !matches!(state.nodes.get(parent_of(path)), Some(Node::Dir))
            || matches!(state.nodes.get(path), Some(Node::Dir))
        {
            return Err(FtpError::Permanent(ServerReply::new(
                553,
                format!("553 {path}: Cannot store file."),
            )));
        }
        state.nodes.insert(path.to_string(), Node::File(data));
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_channel_open(&self) -> bool {
        self.open
    }

    async fn send_command(&mut self, cmd: &str) -> Result<String, FtpError> {
        self.begin(cmd)?;
        let reply = self.handle(cmd);
        check_reply(reply)
    }

    async fn nlst(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        self.begin("NLST")?;
        self.require_login()?;
        Ok(self
            .children(path)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn dir(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        self.begin("LIST")?;
        self.require_login()?;
        Ok(self
            .children(path)?
            .into_iter()
            .map(|(name, facts)| {
                let kind = if facts.contains("type=dir") { 'd' } else { '-' };
                format!("{kind}rw-r--r-- 1 owner group Jan 01 12:00 {name}")
            })
            .collect())
    }

    async fn mlsd<'a>(
        &'a mut self,
        path: &str,
        facts: &[String],
    ) -> Result<Box<dyn ListingStream + 'a>, FtpError> {
        self.begin(&format!("MLSD {path}"))?;
        self.require_login()?;
        let selected: Vec<String> = if facts.is_empty() {
            self.mlst_facts.clone()
        } else {
            KNOWN_FACTS
                .iter()
                .filter(|fact| facts.iter().any(|f| f.eq_ignore_ascii_case(fact)))
                .map(|fact| fact.to_string())
                .collect()
        };
        let dir = resolve(&self.cwd, path);
        let lines = {
            let state = self.server.lock();
            if !matches!(state.nodes.get(&dir), Some(Node::Dir)) {
                return Err(not_found(&dir));
            }
            state
                .nodes
                .iter()
                .filter(|(child, _)| *child != "/" && parent_of(child) == dir)
                .map(|(child, node)| format!("{} {}", fact_line(node, &selected), name_of(child)))
                .collect()
        };
        Ok(Box::new(MemoryListing { lines }))
    }

    async fn make_pasv(&mut self) -> Result<(String, u16), FtpError> {
        self.begin("PASV")?;
        self.require_login()?;
        Ok(("127.0.0.1".to_string(), 50000))
    }

    async fn retr_binary(
        &mut self,
        cmd: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        block_size: usize,
    ) -> Result<String, FtpError> {
        self.begin(cmd)?;
        self.require_login()?;
        let path = self.file_for(cmd, "RETR")?;
        let data = self.read_file(&path)?;
        for chunk in data.chunks(block_size.max(1)) {
            sink.write_all(chunk).await?;
        }
        Ok("226 Transfer complete.".to_string())
    }

    async fn retr_lines(
        &mut self,
        cmd: &str,
        lines: &mut Vec<String>,
    ) -> Result<String, FtpError> {
        if cmd.eq_ignore_ascii_case("NLST") {
            lines.extend(self.nlst(None).await?);
        } else if cmd.eq_ignore_ascii_case("LIST") {
            lines.extend(self.dir(None).await?);
        } else {
            self.begin(cmd)?;
            self.require_login()?;
            let path = self.file_for(cmd, "RETR")?;
            let data = self.read_file(&path)?;
            lines.extend(String::from_utf8_lossy(&data).lines().map(str::to_string));
        }
        Ok("226 Transfer complete.".to_string())
    }

    async fn stor_binary(
        &mut self,
        cmd: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        _block_size: usize,
    ) -> Result<String, FtpError> {
        self.begin(cmd)?;
        self.require_login()?;
        let path = self.file_for(cmd, "STOR")?;
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        self.write_file(&path, data)?;
        Ok("226 Transfer complete.".to_string())
    }

    async fn stor_lines(&mut self, cmd: &str, lines: &[String]) -> Result<String, FtpError> {
        self.begin(cmd)?;
        self.require_login()?;
        let path = self.file_for(cmd, "STOR")?;
        let mut data = Vec::new();
        for line in lines {
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        self.write_file(&path, data)?;
        Ok("226 Transfer complete.".to_string())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.server.lock().closes += 1;
        }
    }
}
