//! Guard-paged fiber stacks. `mmap` the stack plus one extra page, then
//! `mprotect` the lowest page (highest address on a stack growing down is
//! the base; the guard sits at the far end from the stack pointer) to
//! `PROT_NONE` so an overrun stack faults instead of corrupting a
//! neighboring allocation.

use std::io;
use std::ptr;

const PAGE_SIZE: usize = 4096;

pub struct FiberStack {
    map: *mut libc::c_void,
    map_len: usize,
    usable_len: usize,
}

impl FiberStack {
    /// `size` is the usable stack size; a guard page is added on top.
    pub fn new(size: usize) -> io::Result<FiberStack> {
        let usable_len = size.next_multiple_of(PAGE_SIZE);
        let map_len = usable_len + PAGE_SIZE;

        let map = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if map == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Guard page at the low address; the stack itself grows down from
        // `map + map_len` toward it.
        let rc = unsafe { libc::mprotect(map, PAGE_SIZE, libc::PROT_NONE) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(map, map_len) };
            return Err(err);
        }

        Ok(FiberStack {
            map,
            map_len,
            usable_len,
        })
    }

    /// Top of stack (highest address), the value `makecontext` expects as
    /// the initial stack pointer base for a stack that grows down.
    pub fn top(&self) -> *mut u8 {
        unsafe { (self.map as *mut u8).add(self.map_len) }
    }

    pub fn usable_len(&self) -> usize {
        self.usable_len
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map, self.map_len);
        }
    }
}

// Safety: a FiberStack is only ever accessed by the single fiber/loop that
// owns it at a given time, via the context-switch protocol in `mod.rs`.
unsafe impl Send for FiberStack {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_requested_size() {
        let stack = FiberStack::new(64 * 1024).unwrap();
        assert!(stack.usable_len() >= 64 * 1024);
        assert!(!stack.top().is_null());
    }
}
