//! Helpers for interpreting raw control-connection replies.
//!
//! Transport implementations use these to turn reply text into results with
//! the error classes the session's retry loop understands.

use crate::{FtpError, ServerReply};

/// Classifies a raw reply by its code.
///
/// `1xx`, `2xx` and `3xx` replies are returned unchanged; `4xx` becomes
/// [`FtpError::Temporary`] and `5xx` becomes [`FtpError::Permanent`].
pub fn check_reply(raw: String) -> Result<String, FtpError> {
    let Some(reply) = ServerReply::parse(&raw) else {
        return Err(FtpError::Protocol(format!(
            "reply does not start with a code: {raw:?}"
        )));
    };
    match reply.class() {
        1..=3 => Ok(raw),
        4 => Err(FtpError::Temporary(reply)),
        5 => Err(FtpError::Permanent(reply)),
        _ => Err(FtpError::Protocol(format!("unknown reply class: {raw:?}"))),
    }
}

/// Requires a positive completion (`2xx`) reply.
pub fn expect_completion(raw: String) -> Result<String, FtpError> {
    expect_class(raw, 2)
}

/// Requires a reply of the given class (`1`..=`5`).
pub fn expect_class(raw: String, class: u16) -> Result<String, FtpError> {
    match ServerReply::parse(&raw) {
        Some(reply) if reply.class() == class => Ok(raw),
        Some(reply) => Err(FtpError::UnexpectedReply(reply)),
        None => Err(FtpError::Protocol(format!(
            "reply does not start with a code: {raw:?}"
        ))),
    }
}

/// Builds the error for a reply the caller did not expect.
pub fn unexpected_reply(raw: String) -> FtpError {
    match ServerReply::parse(&raw) {
        Some(reply) => FtpError::UnexpectedReply(reply),
        None => FtpError::Protocol(format!("reply does not start with a code: {raw:?}")),
    }
}

/// Extracts the quoted directory name from a `257` reply (`PWD`, `MKD`).
///
/// Doubled quotes inside the name are unescaped. A `257` reply without a
/// quoted name yields an empty string.
pub fn parse_257(raw: &str) -> Result<String, FtpError> {
    let reply = ServerReply::parse(raw)
        .ok_or_else(|| FtpError::Protocol(format!("reply does not start with a code: {raw:?}")))?;
    if reply.code != 257 {
        return Err(FtpError::UnexpectedReply(reply));
    }
    let Some(rest) = raw.get(3..).and_then(|rest| rest.strip_prefix(" \"")) else {
        return Ok(String::new());
    };

    let mut name = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                break;
            }
        }
        name.push(ch);
    }
    Ok(name)
}

/// Parses a `213` reply to `SIZE`.
///
/// Returns `None` for any other positive reply, which some servers send when
/// the size is unknown.
pub fn parse_213(raw: &str) -> Result<Option<u64>, FtpError> {
    match ServerReply::parse(raw) {
        Some(reply) if reply.code == 213 => {
            let value = raw.get(3..).unwrap_or("").trim();
            value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| FtpError::Protocol(format!("invalid size reply: {raw:?}")))
        }
        Some(_) => Ok(None),
        None => Err(FtpError::Protocol(format!(
            "reply does not start with a code: {raw:?}"
        ))),
    }
}
