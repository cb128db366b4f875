pub(crate) mod logging;

use std::path::Path;

use anyhow::{bail, Result};

#[inline]
pub(crate) fn check_file_valid(s: impl AsRef<Path>) -> Result<()> {
    let s = s.as_ref();

    if s.is_dir() {
        bail!("'{}' is a folder, not a file", s.display());
    }

    if !s.is_file() {
        bail!("file '{}' doesn't exist", s.display());
    }

    Ok(())
}

/// Command line of this process, joined by spaces.
pub(crate) fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}
