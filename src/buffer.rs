//! Circular transfer buffers and the wraparound fragmentation policy.
//!
//! Each rank owns two independent [`CircularBuffer`] instances, one for
//! outgoing and one for incoming traffic. A buffer is a page-aligned,
//! zero-filled allocation with a single cursor that advances modulo the
//! capacity. The payload content is never inspected by the benchmark; only
//! byte counts matter.
//!
//! A logical message that does not fit in the contiguous space before the
//! end of the buffer is split by [`FragmentPlan`] into a tail fragment and a
//! wrapped head fragment starting at offset zero. Producer and consumer
//! compute their plans independently against their own buffers, whose
//! capacities may differ, so their cursors are not guaranteed to stay in
//! lockstep.

use anyhow::{ensure, Context, Result};
use std::ptr::NonNull;

/// One physical on-wire transfer: a contiguous region of a circular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub len: usize,
}

/// The one or two fragments a logical message decomposes into.
///
/// Invariant: the fragment lengths always sum to the logical message size,
/// and a second fragment always starts at offset zero. Callers must have
/// validated `message_size <= capacity` at configuration time; the plan
/// itself does not re-validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPlan {
    first: Fragment,
    second: Option<Fragment>,
}

impl FragmentPlan {
    /// Split a message of `message_size` bytes starting at `offset` in a
    /// buffer of `capacity` bytes.
    pub fn new(offset: usize, capacity: usize, message_size: usize) -> Self {
        debug_assert!(offset < capacity);
        debug_assert!(message_size <= capacity);

        if offset + message_size <= capacity {
            Self {
                first: Fragment {
                    offset,
                    len: message_size,
                },
                second: None,
            }
        } else {
            let tail = capacity - offset;
            Self {
                first: Fragment { offset, len: tail },
                second: Some(Fragment {
                    offset: 0,
                    len: message_size - tail,
                }),
            }
        }
    }

    /// Iterate the fragments in on-wire order (tail before wrapped head).
    pub fn iter(&self) -> impl Iterator<Item = Fragment> {
        std::iter::once(self.first).chain(self.second)
    }

    pub fn fragment_count(&self) -> usize {
        if self.second.is_some() {
            2
        } else {
            1
        }
    }

    pub fn total_len(&self) -> usize {
        self.first.len + self.second.map_or(0, |f| f.len)
    }
}

/// A fixed-capacity byte buffer with a monotonically advancing cursor that
/// wraps modulo the capacity.
///
/// The backing memory is page-aligned (transports and NICs tend to behave
/// best with aligned registrations) and owned exclusively by this value;
/// it is released on drop, including on every error exit path.
pub struct CircularBuffer {
    base: NonNull<u8>,
    capacity: usize,
    offset: usize,
}

// The buffer is an exclusively owned allocation; moving it across threads is
// sound because all access goes through &self / &mut self.
unsafe impl Send for CircularBuffer {}

impl CircularBuffer {
    /// Reserve a page-aligned, zero-filled allocation of `capacity` bytes.
    ///
    /// Allocation failure is a setup-time error; callers treat it as fatal.
    pub fn allocate(capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, "buffer capacity must be at least 1 byte");

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        ensure!(page_size > 0, "failed to query the system page size");

        let mut mem: *mut libc::c_void = std::ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut mem, page_size as usize, capacity) };
        ensure!(
            rc == 0,
            "memory allocation of {} bytes failed (errno {})",
            capacity,
            rc
        );

        let base = NonNull::new(mem as *mut u8)
            .context("posix_memalign returned success with a null pointer")?;
        unsafe { std::ptr::write_bytes(base.as_ptr(), 0, capacity) };

        Ok(Self {
            base,
            capacity,
            offset: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The cursor position; always `< capacity` between operations.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Compute the cursor after a logical message of `amount` bytes.
    ///
    /// Pure; nothing is mutated until the caller commits the new offset
    /// after the transfers of the iteration have been issued.
    pub fn advance(&self, amount: usize) -> usize {
        (self.offset + amount) % self.capacity
    }

    /// Commit a cursor position previously computed with [`advance`].
    ///
    /// [`advance`]: CircularBuffer::advance
    pub fn commit(&mut self, new_offset: usize) {
        debug_assert!(new_offset < self.capacity);
        self.offset = new_offset;
    }

    /// Rewind the cursor to the start of the buffer.
    pub fn rewind(&mut self) {
        self.offset = 0;
    }

    /// Borrow the region described by a fragment for sending.
    pub fn region(&self, fragment: Fragment) -> &[u8] {
        debug_assert!(fragment.offset + fragment.len <= self.capacity);
        unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(fragment.offset), fragment.len)
        }
    }

    /// Borrow the region described by a fragment for receiving into.
    pub fn region_mut(&mut self, fragment: Fragment) -> &mut [u8] {
        debug_assert!(fragment.offset + fragment.len <= self.capacity);
        unsafe {
            std::slice::from_raw_parts_mut(self.base.as_ptr().add(fragment.offset), fragment.len)
        }
    }
}

impl Drop for CircularBuffer {
    fn drop(&mut self) {
        unsafe { libc::free(self.base.as_ptr() as *mut libc::c_void) }
    }
}

impl std::fmt::Debug for CircularBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .finish()
    }
}
