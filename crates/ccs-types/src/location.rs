use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a stored object's encoded record lives.
///
/// `generation` names the store-file pair; `offset` and `length` delimit the
/// record inside that pair's data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnDiskLocation {
    pub generation: u64,
    pub offset: u64,
    pub length: u64,
}

impl OnDiskLocation {
    pub fn new(generation: u64, offset: u64, length: u64) -> Self {
        Self {
            generation,
            offset,
            length,
        }
    }

    /// One past the last byte of the record, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }

    /// Returns `true` if the record lies entirely inside a file of `file_len` bytes.
    pub fn fits_within(&self, file_len: u64) -> bool {
        self.length > 0 && self.end().is_some_and(|end| end <= file_len)
    }
}

impl fmt::Display for OnDiskLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gen {} @ {}+{}",
            self.generation, self.offset, self.length
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_bounds() {
        let loc = OnDiskLocation::new(1, 10, 20);
        assert!(loc.fits_within(30));
        assert!(loc.fits_within(100));
        assert!(!loc.fits_within(29));
    }

    #[test]
    fn empty_records_never_fit() {
        assert!(!OnDiskLocation::new(0, 0, 0).fits_within(10));
    }

    #[test]
    fn overflowing_location_does_not_fit() {
        let loc = OnDiskLocation::new(0, u64::MAX, 2);
        assert!(loc.end().is_none());
        assert!(!loc.fits_within(u64::MAX));
    }

    #[test]
    fn display_format() {
        assert_eq!(OnDiskLocation::new(3, 16, 9).to_string(), "gen 3 @ 16+9");
    }
}
