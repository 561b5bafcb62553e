/// One fixed-size buffer in the chunk ring: the unit of publication from
/// the source thread to every client reading that source.
///
/// A slot with `len == 0` is still a valid publication: clients
/// observing it advance past it without delivering any bytes.
#[derive(Debug, Clone)]
pub struct Slot {
    data: Vec<u8>,
    len: usize,
    /// Number of clients that have not yet fully consumed this slot.
    ///
    /// Seeded to the source's client count at publication time (R2); never
    /// mutated retroactively when a client joins mid-chunk.
    clients_left: usize,
}

impl Slot {
    pub fn empty(readsize: usize) -> Self {
        Self {
            data: vec![0u8; readsize],
            len: 0,
            clients_left: 0,
        }
    }

    /// Capacity of the underlying buffer (`SOURCE_READSIZE`).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Published length of this slot. Only meaningful once `publish` has
    /// run for the current producer round (R3).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clients_left(&self) -> usize {
        self.clients_left
    }

    /// Mutable access to the backing buffer for the reader to fill before
    /// publication. Callers must stay within `capacity()`.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The bytes published so far, i.e. `data[..len]`.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Bytes available to a client cursor sitting at `offset` inside this
    /// slot.
    #[inline]
    pub fn bytes_from(&self, offset: usize) -> &[u8] {
        if offset >= self.len {
            &[]
        } else {
            &self.data[offset..self.len]
        }
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub(crate) fn set_clients_left(&mut self, n: usize) {
        self.clients_left = n;
    }

    pub(crate) fn decrement_clients_left(&mut self) {
        if self.clients_left > 0 {
            self.clients_left -= 1;
        }
    }
}
