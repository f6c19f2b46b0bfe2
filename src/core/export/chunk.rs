//! Chunked iteration over record references
//!
//! Bucket exports load entries one chunk at a time, so memory stays bounded
//! by the chunk size rather than the bucket size.

/// Splits `refs` into consecutive slices of at most `size` elements
///
/// A zero `size` is treated as one.
pub fn chunked<T>(refs: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    refs.chunks(size.max(1))
}

/// Number of chunks [`chunked`] yields: `ceil(len / size)`
pub fn chunk_count(len: usize, size: usize) -> usize {
    len.div_ceil(size.max(1))
}
