//! Host allocation classes and page arithmetic.

/// Regular page size.
pub const PAGE_SIZE_4K: usize = 4096;

/// Huge page size.
pub const PAGE_SIZE_2M: usize = 2 * 1024 * 1024;

/// Staging size the reference harness reserves (128 KiB).
pub const DEFAULT_MAX_SIZE: usize = 1 << 17;

/// Class of host memory a buffer is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocClass {
    /// Regular 4 KiB pages.
    #[default]
    Reg4K,
    /// 2 MiB huge pages.
    Huge2M,
}

impl AllocClass {
    /// Page size of this class in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        match self {
            Self::Reg4K => PAGE_SIZE_4K,
            Self::Huge2M => PAGE_SIZE_2M,
        }
    }

    /// Pages needed to hold `bytes` (rounded up).
    #[must_use]
    pub const fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_staging_size_needs_32_regular_pages() {
        assert_eq!(AllocClass::Reg4K.pages_for(DEFAULT_MAX_SIZE), 32);
        assert_eq!(AllocClass::Huge2M.pages_for(DEFAULT_MAX_SIZE), 1);
    }

    #[test]
    fn partial_pages_round_up() {
        assert_eq!(AllocClass::Reg4K.pages_for(1), 1);
        assert_eq!(AllocClass::Reg4K.pages_for(4097), 2);
        assert_eq!(AllocClass::Reg4K.pages_for(0), 0);
    }
}
