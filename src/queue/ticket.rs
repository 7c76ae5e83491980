use std::fmt;
use std::path::{Path, PathBuf};

/// A monotonically allocated (wrapping) identifier for one queued message.
///
/// Formatted as a fixed-width 20-digit uppercase hex string for file naming,
/// so tickets sort lexicographically in allocation order between wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Path of the envelope file for this ticket inside `dir`.
    #[must_use]
    pub fn env_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{self}.env"))
    }

    /// Path of the data file for this ticket inside `dir`.
    #[must_use]
    pub fn dat_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{self}.dat"))
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020X}", self.0)
    }
}

impl From<u64> for Ticket {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
