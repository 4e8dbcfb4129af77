/*!
 * The probe array: one page per possible byte value.
 */

use crate::error::Result;
use crate::mapping::Mapping;
use crate::timer;

/// How large is a page (4KB on x86_64)
pub const PAGE_SIZE : usize = 0x1000usize;

/// log2(PAGE_SIZE); the triggers index the probe with `value << PAGE_SHIFT`
pub const PAGE_SHIFT : u32 = 12;

/// One probe region per byte value
pub const REGIONS : usize = 256;

pub const L1D_LINESIZE : usize = 64;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/*
Probe layout:
|  region 0  |  region 1  |  ...  | region 255 |
+------------+------------+-------+------------+
| PAGE_SIZE  | PAGE_SIZE  |       | PAGE_SIZE  |

Only the first line of each region is ever touched. Regions are a page apart
so that the adjacent-line and stride prefetchers never pull in a neighbour.
*/

/**
 * 256 page-sized regions that can be evicted together and timed one by one.
 */
pub struct CacheProbe {
    mapping: Mapping,
}

impl CacheProbe {
    /**
     * Map the probe array.
     *
     * # Return Value
     * `Error::Map` if the 1MB region cannot be mapped.
     */
    pub fn new() -> Result<Self> {
        let mapping = Mapping::anonymous(PAGE_SIZE * REGIONS, "probe regions")?;
        return Ok(Self { mapping });
    }

    /// Base of region 0. Triggers index from here.
    #[inline(always)]
    pub fn base(&self) -> *const u8 {
        self.mapping.as_ptr()
    }

    /// Address of the first byte of `region`.
    #[inline(always)]
    pub fn region(&self, region: usize) -> *const u8 {
        debug_assert!(region < REGIONS);
        // SAFETY: region < REGIONS keeps us inside the mapping
        unsafe { self.base().add(region << PAGE_SHIFT) }
    }

    /// Flush every region out of the cache hierarchy.
    #[inline(always)]
    pub fn evict_all(&self) {
        for region in 0..REGIONS {
            // SAFETY: every region address is inside our mapping
            unsafe { timer::flush(self.region(region)) };
        }
    }

    /// Cycles taken by a single load from `region`.
    #[inline(always)]
    pub fn time_access(&self, region: usize) -> u64 {
        // SAFETY: every region address is inside our mapping
        unsafe { timer::time_access(self.region(region)) }
    }
}
