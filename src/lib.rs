//! FTP sessions that survive dropped control connections.
//!
//! Servers close idle control connections, proxies reset them and networks
//! blip. An [`FtpSession`] wraps one connection and, when an operation fails
//! with a transient error, reconnects, logs in again, returns to the last
//! known working directory and retries the operation, up to a bounded number
//! of attempts.
//!
//! The wire protocol itself is behind the [`Connector`] and [`Transport`]
//! traits; plain control commands have default implementations so a
//! transport only has to provide the channel plumbing, listings and
//! transfers. The crate also ships a parser for machine-readable listing
//! facts ([`parse_mlst_response`], [`parse_mlsd_line`]).
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use reconnecting_ftp::{Access, Connector, FtpClient};
//!
//! async fn show<C: Connector + Clone>(connector: C) -> reconnecting_ftp::Result<()> {
//!     let access = Access::new("ftp.example.com", 21, "alice", "secret");
//!     let client = FtpClient::new(access, connector).with_max_reconnects(5);
//!
//!     let mut session = client.session();
//!     session.cwd("/pub").await?;
//!     // The server may drop the idle connection here; the session reconnects
//!     // and changes back to `/pub` before running the next command.
//!     let entry = session.mlst("readme.txt", &["type", "size"]).await?;
//!     println!("{} {:?}", entry.path, entry.fact("size"));
//!     session.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `serde`: enables `Serialize`/`Deserialize` for public data types.
//!
//! ## Logging
//!
//! Reconnects and directory restores are reported through [`tracing`] at the
//! `debug` level.

#![deny(unsafe_code)]

mod client;
mod error;
mod facts;
pub mod reply;
mod transport;
mod types;

pub use client::{DEFAULT_BLOCK_SIZE, FtpClient, FtpSession};
pub use error::{FtpError, ServerReply};
/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, FtpError>;
pub use facts::{parse_fact_list, parse_mlsd_line, parse_mlst_response};
pub use transport::{
    BoxFuture, Connector, ListingStream, TextEncoding, Transport, TransportSettings,
};
pub use types::{Access, FactEntry, Facts};
