//! Lossy UTF-8 decoding of source files.

use crate::{error::BuildError, logger::WarningSink};
use std::str;

/// Decode `raw`, replacing every invalid byte sequence with `?`.
///
/// Each replacement is reported as a warning at `docname` and the line the
/// sequence starts on, quoting the line with the offending bytes marked:
/// `prefix>>>\xff<<<suffix`.
pub fn decode_source(raw: &[u8], docname: &str, warnings: &WarningSink) -> Result<String, BuildError> {
    decode(raw, docname, None, warnings)
}

/// Like [`decode_source`] for text pulled into `docname` by a directive on
/// `line`; warnings point at that line.
pub fn decode_included(
    raw: &[u8],
    docname: &str,
    line: usize,
    warnings: &WarningSink,
) -> Result<String, BuildError> {
    decode(raw, docname, Some(line), warnings)
}

fn decode(
    raw: &[u8],
    docname: &str,
    at: Option<usize>,
    warnings: &WarningSink,
) -> Result<String, BuildError> {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut offset = 0;

    loop {
        match str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                return Ok(text);
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                let bad_len = err.error_len().unwrap_or(rest.len() - valid_up_to);

                text.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                text.push('?');

                let start = offset + valid_up_to;
                let end = start + bad_len;
                warn_undecodable(raw, start, end, docname, at, warnings)?;

                rest = &rest[valid_up_to + bad_len..];
                offset = end;
            }
        }
    }
}

fn warn_undecodable(
    raw: &[u8],
    start: usize,
    end: usize,
    docname: &str,
    at: Option<usize>,
    warnings: &WarningSink,
) -> Result<(), BuildError> {
    let line_start = raw[..start]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    let line_end = raw[end..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(raw.len(), |pos| end + pos);
    let line = at.unwrap_or_else(|| raw[..start].iter().filter(|&&b| b == b'\n').count() + 1);

    let bad: String = raw[start..end].iter().map(|b| format!("\\x{b:02x}")).collect();
    let context = format!(
        "{}>>>{bad}<<<{}",
        String::from_utf8_lossy(&raw[line_start..start]),
        String::from_utf8_lossy(&raw[end..line_end]),
    );

    warnings.warn_at(
        docname,
        Some(line),
        format!("undecodable source characters, replacing with \"?\": {context}"),
    )
}
