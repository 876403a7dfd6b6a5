//! Double buffer shared between the transfer worker and the polling host.
//!
//! # Design
//! The worker appends into `active`; the host drains `pending` from `offset`.
//! When the host has emptied `pending` and only takes a prefix of `active`,
//! the two `Vec`s trade places with `mem::swap` so the worker immediately gets
//! a fresh buffer to append into and the unread suffix is kept without any
//! copy. Both roles hold the owning connection's lock while they touch the
//! pair, so the swap is never observed half done.

use std::mem;

#[derive(Debug, Default)]
pub struct TransferBuffers {
    active: Vec<u8>,
    pending: Vec<u8>,
    offset: usize,
}

impl TransferBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer side: append received bytes to the active buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.active.extend_from_slice(bytes);
    }

    /// Reader side: move up to `dst.len()` of the oldest unread bytes into
    /// `dst`. Returns the number of bytes copied, `0` when nothing is buffered.
    pub fn pull(&mut self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let unread = self.pending.len() - self.offset;
        if unread > 0 {
            let count = unread.min(dst.len());
            dst[..count].copy_from_slice(&self.pending[self.offset..self.offset + count]);
            self.offset += count;
            if self.offset >= self.pending.len() {
                self.pending.clear();
                self.offset = 0;
            }
            return count;
        }

        if self.active.is_empty() {
            return 0;
        }

        let count = self.active.len().min(dst.len());
        dst[..count].copy_from_slice(&self.active[..count]);
        if count == self.active.len() {
            self.active.clear();
            return count;
        }

        // Partial read: the remainder of `active` becomes the pending buffer
        // and the drained (empty) pending buffer is handed to the writer.
        self.pending.clear();
        mem::swap(&mut self.active, &mut self.pending);
        self.offset = count;
        count
    }

    /// Bytes not yet handed to the reader.
    pub fn len(&self) -> usize {
        self.pending.len() - self.offset + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset_both(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.offset = 0;
    }
}
