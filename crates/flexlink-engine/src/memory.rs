use std::sync::{Mutex, PoisonError};

use crate::dispatch::Peripheral;

/// Word-granular RAM peripheral.
///
/// Storage is little-endian within each word, so byte lane `n` of a word
/// holds the byte at offset `4 * word + n`. Accesses past the end read as
/// zero and writes there are dropped.
#[derive(Debug)]
pub struct WordStore {
    words: Mutex<Vec<u32>>,
}

impl WordStore {
    /// A zero-initialised store of `size` bytes, rounded up to whole words.
    pub fn new(size: usize) -> Self {
        Self {
            words: Mutex::new(vec![0; size.div_ceil(4)]),
        }
    }

    /// A store of `size` bytes preloaded with `image` from offset 0.
    /// Bytes beyond `size` are ignored.
    pub fn with_image(size: usize, image: &[u8]) -> Self {
        let store = Self::new(size);
        {
            let mut words = store.words.lock().unwrap_or_else(PoisonError::into_inner);
            for (word, chunk) in words.iter_mut().zip(image.chunks(4)) {
                let mut bytes = [0u8; 4];
                bytes[..chunk.len()].copy_from_slice(chunk);
                *word = u32::from_le_bytes(bytes);
            }
        }
        store
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.words
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            * 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Peripheral for WordStore {
    fn read_word(&self, offset: u32) -> u32 {
        let words = self.words.lock().unwrap_or_else(PoisonError::into_inner);
        words.get((offset >> 2) as usize).copied().unwrap_or(0)
    }

    fn write_word(&self, offset: u32, data: u32, mask: u32) {
        let mut words = self.words.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(word) = words.get_mut((offset >> 2) as usize) {
            *word = (*word & !mask) | (data & mask);
        }
    }
}
