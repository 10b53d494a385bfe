use std::sync::Arc;

/// SharedBody is a reference-counted, sliceable message body.
///
/// It holds an `Arc<[u8]>` plus a (start, len) view, allowing cheap
/// zero-copy cropping of a full body into individual blocks while still
/// dereferencing to `&[u8]`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SharedBody {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl SharedBody {
    /// Creates a new SharedBody from a Vec by taking ownership.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let arc: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = arc.len();
        Self { data: arc, start: 0, len }
    }

    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a sub-slice view into the current buffer without copying.
    /// Panics if the requested range is out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Self {
        assert!(start <= self.len, "slice start out of bounds");
        assert!(start + len <= self.len, "slice end out of bounds");
        Self { data: self.data.clone(), start: self.start + start, len }
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the window covered by block `num` at the given block size,
    /// or `None` when the block starts at or beyond the end of the body.
    ///
    /// The final block of a body may be shorter than `block_size`.
    pub fn block(&self, num: u32, block_size: usize) -> Option<SharedBody> {
        let offset = num as usize * block_size;
        if offset >= self.len {
            return None;
        }
        let end = (offset + block_size).min(self.len);
        Some(self.slice(offset, end - offset))
    }

    /// Returns true when block `num` at the given block size exists.
    pub fn has_block(&self, num: u32, block_size: usize) -> bool {
        (num as usize * block_size) < self.len
    }

    /// Returns true when payload follows the end of block `num`.
    pub fn more_after(&self, num: u32, block_size: usize) -> bool {
        (num as usize + 1) * block_size < self.len
    }
}

impl From<Vec<u8>> for SharedBody {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl From<&[u8]> for SharedBody {
    fn from(s: &[u8]) -> Self {
        Self::from_vec(s.to_vec())
    }
}

impl AsRef<[u8]> for SharedBody {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
