//! Dense amplitude storage with aligned memory for SIMD operations

use crate::error::{Result, StateError};
use num_complex::Complex64;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment of the amplitude buffer (64 bytes, one cache line / AVX-512 lane)
const SIMD_ALIGNMENT: usize = 64;

/// Dense buffer of `2^N` complex amplitudes
///
/// The buffer is heap-allocated with 64-byte alignment so paired amplitudes
/// can be loaded as packed vectors. Reads and writes go through the raw
/// allocation rather than a slice so that gate kernels running on several
/// workers can address the buffer concurrently.
///
/// Invariant: concurrent writers must touch disjoint indices. The masked
/// iterators in [`crate::parallel`] enumerate disjoint index pairs per
/// worker, which is how the engine upholds this.
///
/// # Example
///
/// ```
/// use qregsim_state::StateVector;
/// use num_complex::Complex64;
///
/// let sv = StateVector::new(4).unwrap();
/// sv.write(0, Complex64::new(1.0, 0.0));
/// assert_eq!(sv.read(0).re, 1.0);
/// ```
pub struct StateVector {
    /// Number of amplitudes (a power of two)
    dimension: u64,

    /// Pointer to the aligned amplitude data
    data: NonNull<Complex64>,

    /// Memory layout for deallocation
    layout: Layout,
}

impl StateVector {
    /// Allocate a zero-filled buffer of `dimension` amplitudes
    ///
    /// # Errors
    /// Returns an error if `dimension` is not a power of two or the
    /// allocation fails.
    pub fn new(dimension: u64) -> Result<Self> {
        if dimension == 0 || !dimension.is_power_of_two() {
            return Err(StateError::InvalidDimension { dimension });
        }

        let size = (dimension as usize) * std::mem::size_of::<Complex64>();
        let layout = Layout::from_size_align(size, SIMD_ALIGNMENT)
            .map_err(|_| StateError::Allocation { size })?;

        let data = unsafe {
            let ptr = alloc_zeroed(layout) as *mut Complex64;
            if ptr.is_null() {
                return Err(StateError::Allocation { size });
            }
            NonNull::new_unchecked(ptr)
        };

        Ok(Self {
            dimension,
            data,
            layout,
        })
    }

    /// Number of amplitudes in the buffer
    #[inline]
    pub fn dimension(&self) -> u64 {
        self.dimension
    }

    /// Read the amplitude at permutation index `i`
    #[inline]
    pub fn read(&self, i: u64) -> Complex64 {
        debug_assert!(i < self.dimension);
        unsafe { self.data.as_ptr().add(i as usize).read() }
    }

    /// Write the amplitude at permutation index `i`
    ///
    /// Takes `&self`: concurrent callers must target disjoint indices.
    #[inline]
    pub fn write(&self, i: u64, amp: Complex64) {
        debug_assert!(i < self.dimension);
        unsafe { self.data.as_ptr().add(i as usize).write(amp) }
    }

    /// Read the amplitude pair at `(i, j)`
    ///
    /// The paired form is what the 2×2 kernels consume; the two loads sit
    /// next to each other so the optimizer can pack them into one vector
    /// register when `j == i + 1`.
    #[inline]
    pub fn read2(&self, i: u64, j: u64) -> (Complex64, Complex64) {
        (self.read(i), self.read(j))
    }

    /// Write the amplitude pair at `(i, j)`
    #[inline]
    pub fn write2(&self, i: u64, a: Complex64, j: u64, b: Complex64) {
        self.write(i, a);
        self.write(j, b);
    }

    /// View the buffer as a slice
    #[inline]
    pub fn amplitudes(&self) -> &[Complex64] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.dimension as usize) }
    }

    /// View the buffer as a mutable slice
    #[inline]
    pub fn amplitudes_mut(&mut self) -> &mut [Complex64] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.dimension as usize) }
    }

    /// Zero every amplitude
    pub fn clear(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.data.as_ptr(), 0, self.dimension as usize);
        }
    }

    /// Copy the whole buffer in from `src`
    ///
    /// # Errors
    /// Returns an error if `src.len()` differs from the dimension.
    pub fn copy_in(&mut self, src: &[Complex64]) -> Result<()> {
        if src.len() as u64 != self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: src.len() as u64,
            });
        }
        self.amplitudes_mut().copy_from_slice(src);
        Ok(())
    }

    /// Copy a page of amplitudes in at `offset`
    pub fn copy_in_page(&mut self, src: &[Complex64], offset: u64) -> Result<()> {
        let end = offset + src.len() as u64;
        if end > self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: end,
            });
        }
        let lo = offset as usize;
        self.amplitudes_mut()[lo..lo + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy the whole buffer out into `dst`
    pub fn copy_out(&self, dst: &mut [Complex64]) -> Result<()> {
        if dst.len() as u64 != self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: dst.len() as u64,
            });
        }
        dst.copy_from_slice(self.amplitudes());
        Ok(())
    }

    /// Copy a page of amplitudes out starting at `offset`
    pub fn copy_out_page(&self, dst: &mut [Complex64], offset: u64) -> Result<()> {
        let end = offset + dst.len() as u64;
        if end > self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: end,
            });
        }
        let lo = offset as usize;
        dst.copy_from_slice(&self.amplitudes()[lo..lo + dst.len()]);
        Ok(())
    }

    /// Copy every amplitude from another buffer of the same dimension
    pub fn copy_from(&mut self, other: &StateVector) -> Result<()> {
        self.copy_in(other.amplitudes())
    }

    /// Swap this buffer's upper half with `other`'s lower half
    ///
    /// Both buffers must have the same dimension. This is the exchange step
    /// used when splicing two half-width registers.
    pub fn shuffle(&mut self, other: &mut StateVector) -> Result<()> {
        if other.dimension != self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: other.dimension,
            });
        }
        let half = (self.dimension >> 1) as usize;
        let upper = &mut self.amplitudes_mut()[half..];
        let lower = &mut other.amplitudes_mut()[..half];
        upper.swap_with_slice(lower);
        Ok(())
    }

    /// Fill `out` with the squared magnitude of every amplitude
    pub fn get_probs(&self, out: &mut [f64]) -> Result<()> {
        if out.len() as u64 != self.dimension {
            return Err(StateError::DimensionMismatch {
                expected: self.dimension,
                actual: out.len() as u64,
            });
        }
        for (p, amp) in out.iter_mut().zip(self.amplitudes()) {
            *p = amp.norm_sqr();
        }
        Ok(())
    }
}

impl Drop for StateVector {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr() as *mut u8, self.layout);
        }
    }
}

// Safety: the buffer is uniquely owned and writers are required to touch
// disjoint indices (see the type-level invariant).
unsafe impl Send for StateVector {}
unsafe impl Sync for StateVector {}
