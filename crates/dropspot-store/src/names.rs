//! Client-supplied file name handling.
//!
//! Every name that arrives from a peer (the declared name of an uploaded part,
//! the tail of a download URL) passes through [`sanitize`] before it is joined
//! to a directory. Only the final path segment survives, so the joined path
//! always sits directly inside the target directory.

use crate::error::{Result, StoreError};

/// Reduce a client-supplied name to its basename.
///
/// Both `/` and `\` count as separators regardless of platform, since the
/// name may come from a browser on any OS. Trailing separators are ignored
/// (`"docs/"` becomes `"docs"`). The result is rejected when nothing usable
/// is left: an empty string, `.`, `..`, or a name containing NUL.
pub fn sanitize(declared: &str) -> Result<String> {
    let base = declared
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .next_back()
        .unwrap_or("");

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(StoreError::InvalidName(declared.to_string()));
    }

    Ok(base.to_string())
}

/// Names starting with a dot are hidden from peers.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
