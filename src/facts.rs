//! Parsers for machine-readable listing facts (`MLST` and `MLSD`).
//!
//! A fact line looks like `modify=20230101120000;type=file;size=6; name`: a
//! semicolon-terminated list of `key=value` pairs, one space, then the path.
//! The protocol defines no escaping, so for `MLST` a space inside the fact
//! list or the path cannot be told apart from the separator; such replies are
//! rejected instead of guessed at. `MLSD` lines are read leniently.

use crate::{FactEntry, Facts, FtpError};

/// Parses the raw reply to `MLST <path>` into a [`FactEntry`].
///
/// Only the second line of the reply is consulted. Fact names are
/// lower-cased; values and the path are returned as transmitted.
///
/// # Examples
///
/// ```
/// # use reconnecting_ftp::parse_mlst_response;
/// let entry = parse_mlst_response(
///     "250- \n modify=20230101120000;type=file;size=6; /some-dir/some-file.txt",
/// )
/// .unwrap();
/// assert_eq!(entry.path, "/some-dir/some-file.txt");
/// assert_eq!(entry.fact("type"), Some("file"));
/// ```
pub fn parse_mlst_response(response: &str) -> Result<FactEntry, FtpError> {
    let mut lines = response.split('\n');
    let _status = lines.next();
    let Some(line) = lines.next() else {
        return Err(FtpError::Protocol(format!(
            "unexpected number of lines in an MLST response: {response:?}"
        )));
    };
    let line = line.strip_suffix('\r').unwrap_or(line);
    let line = line.trim_start_matches(' ');

    let parts: Vec<&str> = line.split(' ').collect();
    let [facts, path] = parts.as_slice() else {
        return Err(FtpError::Protocol(format!(
            "unexpected partition of MLST fact line by space: {response:?}"
        )));
    };

    let facts = parse_fact_list(facts).map_err(|_| {
        FtpError::Protocol(format!(
            "unexpected partition of MLST fact line by equal sign: {response:?}"
        ))
    })?;

    Ok(FactEntry {
        path: (*path).to_string(),
        facts,
    })
}

/// Parses one `MLSD` listing line into the entry name and its facts.
///
/// The line is split once on the first space, so names may contain spaces;
/// a line without a space has an empty name. Listings are read leniently:
/// each fact is split on its first `=`, so values may contain `=` and a
/// fact without one gets an empty value.
pub fn parse_mlsd_line(line: &str) -> (String, Facts) {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line.split_once(' ').unwrap_or((line, ""));
    let facts = facts.strip_suffix(';').unwrap_or(facts);

    let mut out = Facts::new();
    for fact in facts.split(';').filter(|fact| !fact.is_empty()) {
        let (key, value) = fact.split_once('=').unwrap_or((fact, ""));
        out.insert(key.to_lowercase(), value.to_string());
    }
    (name.to_string(), out)
}

/// Parses a semicolon-separated `key=value` list (trailing `;` allowed).
///
/// Every segment must contain exactly one `=`.
pub fn parse_fact_list(facts: &str) -> Result<Facts, FtpError> {
    let mut out = Facts::new();
    for part in facts.trim_end_matches(';').split(';') {
        let fact_parts: Vec<&str> = part.split('=').collect();
        let [key, value] = fact_parts.as_slice() else {
            return Err(FtpError::Protocol(format!(
                "unexpected fact segment: {part:?}"
            )));
        };
        out.insert(key.to_lowercase(), (*value).to_string());
    }
    Ok(out)
}
