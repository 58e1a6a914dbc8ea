//! Library placeholder scanning.
//!
//! The compiler leaves a 40 character marker wherever a library address has to
//! be linked in. A marker starts on a byte boundary with `__`, carries the
//! library name (optionally prefixed with its source path and `:`) and is
//! right-padded with `_`:
//!
//! ```text
//! 6060...73__AccountingLib_________________________6300...
//! ```
//!
//! Names longer than [`MAX_NAME_LEN`] characters are cut by the compiler, so an
//! unpadded marker may hold a truncated name.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hex characters covered by a placeholder (one 20-byte address).
pub const PLACEHOLDER_HEX_LEN: usize = 40;

/// Bytes covered by a placeholder.
pub const PLACEHOLDER_BYTE_LEN: usize = PLACEHOLDER_HEX_LEN / 2;

/// Longest name a marker can hold between the `__` prefix and the end.
pub const MAX_NAME_LEN: usize = PLACEHOLDER_HEX_LEN - MARKER_PREFIX.len();

const MARKER_PREFIX: &[u8] = b"__";

/// One placeholder region found in a contract's bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LibraryPlaceholder {
    /// Contract whose bytecode holds the placeholder.
    pub contract_name: String,
    /// Offset in bytes from the start of the code (after any `0x`).
    pub byte_offset: usize,
    pub byte_length: usize,
    /// Library name decoded from the marker.
    pub referenced_library_name: String,
    /// The marker had no padding, so the name may have been cut.
    #[serde(default)]
    pub truncated: bool,
}

impl LibraryPlaceholder {
    /// Hex character range of the placeholder within the code.
    pub fn hex_range(&self) -> std::ops::Range<usize> {
        let start = self.byte_offset * 2;
        start..start + self.byte_length * 2
    }

    /// Whether `candidate` is a contract this placeholder can refer to.
    ///
    /// Padding and trailing underscores of a name look the same in a marker, so
    /// `SafeMath_` matches a marker decoded as `SafeMath`.
    pub fn refers_to(&self, candidate: &str) -> bool {
        if self.truncated {
            candidate.starts_with(&self.referenced_library_name)
        } else {
            candidate.trim_end_matches('_') == self.referenced_library_name
        }
    }
}

/// Split an optional `0x` prefix off a bytecode string.
pub(crate) fn split_hex_prefix(bytecode: &str) -> (&str, &str) {
    if bytecode.starts_with("0x") || bytecode.starts_with("0X") {
        bytecode.split_at(2)
    } else {
        ("", bytecode)
    }
}

/// Scan `bytecode` for library placeholders.
///
/// Returns every occurrence in order of appearance. Repeated references to the
/// same library are all reported.
pub fn scan_placeholders(contract_name: &str, bytecode: &str) -> Result<Vec<LibraryPlaceholder>> {
    let (_, code) = split_hex_prefix(bytecode);
    let code = code.as_bytes();

    let malformed = |hex_offset: usize| Error::MalformedPlaceholder {
        contract: contract_name.to_string(),
        offset: hex_offset / 2,
    };

    let mut placeholders = Vec::new();
    let mut cursor = 0;

    while let Some(found) = find_marker(&code[cursor..]) {
        let start = cursor + found;
        let end = start + PLACEHOLDER_HEX_LEN;

        if start % 2 != 0 || end > code.len() {
            return Err(malformed(start));
        }

        let region = &code[start..end];
        if !region.iter().copied().all(is_marker_char) {
            return Err(malformed(start));
        }

        let (name, truncated) = decode_name(region).ok_or_else(|| malformed(start))?;

        tracing::trace!(
            contract = %contract_name,
            library = %name,
            byte_offset = start / 2,
            "Found library placeholder"
        );

        placeholders.push(LibraryPlaceholder {
            contract_name: contract_name.to_string(),
            byte_offset: start / 2,
            byte_length: PLACEHOLDER_BYTE_LEN,
            referenced_library_name: name,
            truncated,
        });

        cursor = end;
    }

    Ok(placeholders)
}

/// Whether `bytecode` still holds any placeholder marker.
pub fn has_placeholders(bytecode: &str) -> bool {
    let (_, code) = split_hex_prefix(bytecode);
    find_marker(code.as_bytes()).is_some()
}

fn find_marker(code: &[u8]) -> Option<usize> {
    code.windows(MARKER_PREFIX.len())
        .position(|window| window == MARKER_PREFIX)
}

fn is_marker_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'$' | b'.' | b'/' | b':' | b'-')
}

/// Decode the library name from a 40 byte marker region.
fn decode_name(region: &[u8]) -> Option<(String, bool)> {
    let body = &region[MARKER_PREFIX.len()..];
    let truncated = body.last() != Some(&b'_');

    // Validated as ASCII by `is_marker_char`.
    let body = std::str::from_utf8(body).ok()?;
    let qualified = body.trim_end_matches('_');
    let name = qualified
        .rsplit_once(':')
        .map_or(qualified, |(_, name)| name);

    // A cut that falls inside the source path leaves no name to resolve.
    if name.is_empty() || name.contains(['/', '.', '-']) {
        return None;
    }

    Some((name.to_string(), truncated))
}
