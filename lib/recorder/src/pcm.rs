use std::sync::{Arc, Mutex};

/// Byte mailbox between the audio server thread and the capture thread.
///
/// The audio callback appends raw PCM, the capture loop drains everything at
/// once with [`PcmAccumulator::pop_accumulated`].
#[derive(Debug, Clone, Default)]
pub struct PcmAccumulator {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl PcmAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        buf.extend_from_slice(bytes);
    }

    /// Takes all pending bytes, empty when nothing arrived since the last call.
    pub fn pop_accumulated(&self) -> Vec<u8> {
        let mut buf = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *buf)
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Carry-over buffer slicing PCM into whole codec blocks.
#[derive(Debug, Clone)]
pub struct AudioTail {
    block_size: usize,
    buf: Vec<u8>,
    pushed: u64,
    consumed: u64,
}

impl AudioTail {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            buf: Vec::new(),
            pushed: 0,
            consumed: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pushed += bytes.len() as u64;
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns every whole block, the remainder stays queued.
    pub fn take_blocks(&mut self) -> Vec<u8> {
        let whole = self.buf.len() / self.block_size * self.block_size;
        let rest = self.buf.split_off(whole);
        let blocks = std::mem::replace(&mut self.buf, rest);
        self.consumed += blocks.len() as u64;
        blocks
    }

    /// Removes whatever is left, padded with silence up to one block.
    pub fn take_padded(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }

        let mut last = std::mem::take(&mut self.buf);
        self.consumed += last.len() as u64;
        last.resize(self.block_size, 0);
        Some(last)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn total_pushed(&self) -> u64 {
        self.pushed
    }

    pub fn total_consumed(&self) -> u64 {
        self.consumed
    }
}
