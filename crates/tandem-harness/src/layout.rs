use thiserror::Error;

/// Page size the legacy fixed 0x1000/0x2000 layout assumes.
pub const LEGACY_PAGE_SIZE: u64 = 0x1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("page size {0:#x} is not a power of two")]
    NotPowerOfTwo(u64),
}

/// Guest address layout of one test program: a one-page code segment
/// followed by a one-page data segment.
///
/// Computed once from the platform page size and carried by value into the
/// harness — there is no process-wide layout state, so independent harness
/// instances on parallel test workers cannot interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    page_size: u64,
    code_base: u64,
    data_base: u64,
}

impl AddressLayout {
    /// Layout for an explicit page size. Sizes below the legacy 4 KiB
    /// granule keep the legacy layout; larger pages shift both segments up
    /// so each still occupies exactly one page.
    pub fn with_page_size(page_size: u64) -> Result<Self, LayoutError> {
        if !page_size.is_power_of_two() {
            return Err(LayoutError::NotPowerOfTwo(page_size));
        }
        let granule = page_size.max(LEGACY_PAGE_SIZE);
        Ok(Self {
            page_size: granule,
            code_base: granule,
            data_base: granule * 2,
        })
    }

    /// Layout for the host's reported page size.
    pub fn host() -> Self {
        // Power-of-two is guaranteed for any sane sysconf result; the
        // fallback covers platforms without the query.
        Self::with_page_size(host_page_size()).unwrap_or(Self {
            page_size: LEGACY_PAGE_SIZE,
            code_base: LEGACY_PAGE_SIZE,
            data_base: LEGACY_PAGE_SIZE * 2,
        })
    }

    pub fn page_size(self) -> u64 {
        self.page_size
    }

    pub fn code_base(self) -> u64 {
        self.code_base
    }

    pub fn code_size(self) -> u64 {
        self.page_size
    }

    pub fn data_base(self) -> u64 {
        self.data_base
    }

    pub fn data_size(self) -> u64 {
        self.page_size
    }
}

#[cfg(unix)]
fn host_page_size() -> u64 {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as u64
    } else {
        LEGACY_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn host_page_size() -> u64 {
    LEGACY_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_kib_pages_use_the_legacy_bases() {
        let layout = AddressLayout::with_page_size(0x1000).unwrap();
        assert_eq!(layout.code_base(), 0x1000);
        assert_eq!(layout.data_base(), 0x2000);
        assert_eq!(layout.code_size(), 0x1000);
    }

    #[test]
    fn large_pages_shift_the_segments() {
        let layout = AddressLayout::with_page_size(0x4000).unwrap();
        assert_eq!(layout.code_base(), 0x4000);
        assert_eq!(layout.data_base(), 0x8000);
        assert_eq!(layout.data_size(), 0x4000);
    }

    #[test]
    fn sub_4k_pages_fall_back_to_legacy_layout() {
        let layout = AddressLayout::with_page_size(0x400).unwrap();
        assert_eq!(layout.code_base(), 0x1000);
        assert_eq!(layout.data_base(), 0x2000);
    }

    #[test]
    fn non_power_of_two_is_rejected() {
        assert_eq!(
            AddressLayout::with_page_size(0x1234),
            Err(LayoutError::NotPowerOfTwo(0x1234))
        );
        assert_eq!(
            AddressLayout::with_page_size(0),
            Err(LayoutError::NotPowerOfTwo(0))
        );
    }

    #[test]
    fn host_layout_segments_never_overlap() {
        let layout = AddressLayout::host();
        assert!(layout.code_base() + layout.code_size() <= layout.data_base());
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn segments_are_disjoint_for_any_power_of_two(shift in 0u32..40) {
                let layout = AddressLayout::with_page_size(1u64 << shift).unwrap();
                prop_assert!(layout.code_base() + layout.code_size() <= layout.data_base());
                prop_assert_eq!(layout.code_size(), layout.page_size());
                prop_assert_eq!(layout.data_size(), layout.page_size());
            }
        }
    }
}
