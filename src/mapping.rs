/*!
 * Anonymous page mappings backing the probe array and the trigger tables.
 */

use crate::cache::PAGE_SIZE;
use crate::error::{Error, Result};
use std::io;
use std::ptr;
use tracing::debug;

/**
 * A private, anonymous, read/write mapping that is unmapped on drop.
 *
 * Every page is written once on creation. Untouched anonymous pages are all
 * backed by the shared zero page, which would make distinct probe regions
 * alias the same physical lines.
 */
pub struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    /**
     * Map `len` bytes (rounded up to whole pages).
     *
     * # Arguments
     * * `len`: Requested size in bytes.
     * * `what`: Name of the resource, used in the error and the log line.
     *
     * # Return Value
     * The mapping, or `Error::Map` if the kernel refused it.
     */
    pub fn anonymous(len: usize, what: &'static str) -> Result<Self> {
        let len = (len.max(1) + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        // SAFETY: fresh anonymous mapping, no existing memory is affected
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(Error::Map { what, len, source: io::Error::last_os_error() });
        }

        let mapping = Self { ptr: ptr as *mut u8, len };
        for offset in (0..len).step_by(PAGE_SIZE) {
            // SAFETY: offset < len, inside the mapping we just created
            unsafe { ptr::write_volatile(mapping.ptr.add(offset), 0) };
        }

        debug!("Mapped {} at 0x{:X} ({} pages)", what, mapping.ptr as usize, mapping.len() / PAGE_SIZE);
        Ok(mapping)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped exactly once
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_whole_pages() {
        let mapping = Mapping::anonymous(PAGE_SIZE + 1, "test").unwrap();
        assert_eq!(mapping.len(), 2 * PAGE_SIZE);
        assert_eq!(mapping.as_ptr() as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn mapping_is_zeroed_and_writable() {
        let mapping = Mapping::anonymous(3 * PAGE_SIZE, "test").unwrap();
        let base = mapping.as_ptr() as *mut u8;
        unsafe {
            assert_eq!(*base.add(2 * PAGE_SIZE + 17), 0);
            *base.add(PAGE_SIZE) = 0xAB;
            assert_eq!(*base.add(PAGE_SIZE), 0xAB);
        }
    }
}
