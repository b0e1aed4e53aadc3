//! Process-wide buffer pools (C1).
//!
//! WebSocket messages arrive in arbitrarily-sized fragments, so the receive
//! pipeline (`receiver.rs`) needs to grow a scratch buffer as fragments pile
//! up without re-allocating on every fragment. Buffers are bucketed by
//! power-of-two capacity so a `release`d buffer can be handed straight back
//! out to the next `rent` of the same size class, no matter which
//! connection asked for it.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

const DEFAULT_CAPACITY: usize = 4 * 1024;

fn size_class(min_capacity: usize) -> usize {
    min_capacity.max(DEFAULT_CAPACITY).next_power_of_two()
}

/// A rented byte buffer. Its length always equals its capacity - callers
/// write into `buf.as_mut_slice()[used..]` and track `used` themselves.
pub struct ByteBuf {
    data: Vec<u8>,
}

impl ByteBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Takes the first `len` bytes out as a plain owned `Vec`, consuming the
    /// loan. The allocation does not return to the pool - this is the exit
    /// point where a buffer stops being pool-tracked and becomes an
    /// ordinary value the application owns.
    pub fn into_vec(mut self, len : usize) -> Vec<u8> {
        self.data.truncate(len);
        self.data
    }
}

/// A rented text buffer. Unlike `ByteBuf` it tracks its own length, since
/// it's filled once (via `push_str`) rather than written into piecemeal.
pub struct CharBuf {
    data: String,
}

impl CharBuf {
    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn push_str(&mut self, s : &str) {
        self.data.push_str(s);
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn into_string(self) -> String {
        self.data
    }
}

/// Free-list of byte buffers, bucketed by power-of-two capacity.
pub struct BytePool {
    buckets: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

impl BytePool {
    /// The process-wide pool shared by every connection.
    pub fn global() -> &'static BytePool {
        static POOL : OnceLock<BytePool> = OnceLock::new();
        POOL.get_or_init(|| BytePool { buckets : Mutex::new(HashMap::new()) })
    }

    /// Rent a buffer whose length (== capacity) is at least `min_capacity`.
    /// `min_capacity == 0` means "the default size" (4 KiB).
    pub fn rent(&self, min_capacity : usize) -> ByteBuf {
        let cap = size_class(min_capacity);
        let mut buckets = self.buckets.lock().unwrap();
        let data = match buckets.get_mut(&cap).and_then(|free| free.pop()) {
            Some(mut data) => {
                data.resize(cap, 0);
                data
            }
            None => vec![0u8; cap],
        };
        ByteBuf { data }
    }

    /// Return a buffer to the pool. Consuming `buf` by value means it is not
    /// possible to release the same buffer twice from safe code.
    pub fn release(&self, buf : ByteBuf) {
        let cap = buf.data.len();
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(cap).or_default().push(buf.data);
    }

    /// Double the capacity of `buf` (or at least `used_len * 2`), preserving
    /// the first `used_len` bytes, and release the old buffer. A no-op (the
    /// same buffer, unchanged) if capacity is already `>= used_len * 2`.
    pub fn grow(&self, buf : ByteBuf, used_len : usize) -> ByteBuf {
        if buf.data.len() >= used_len * 2 {
            return buf;
        }
        let new_cap = (buf.data.len() * 2).max(used_len * 2);
        let mut grown = self.rent(new_cap);
        grown.data[.. used_len].copy_from_slice(&buf.data[.. used_len]);
        self.release(buf);
        grown
    }
}

/// Free-list of text buffers, bucketed by power-of-two capacity (measured
/// in bytes of `String` capacity, not char count).
pub struct CharPool {
    buckets: Mutex<HashMap<usize, Vec<String>>>,
}

impl CharPool {
    pub fn global() -> &'static CharPool {
        static POOL : OnceLock<CharPool> = OnceLock::new();
        POOL.get_or_init(|| CharPool { buckets : Mutex::new(HashMap::new()) })
    }

    /// Rent a text buffer with capacity for at least `min_capacity` bytes.
    pub fn rent(&self, min_capacity : usize) -> CharBuf {
        let cap = size_class(min_capacity);
        let mut buckets = self.buckets.lock().unwrap();
        let mut data = match buckets.get_mut(&cap).and_then(|free| free.pop()) {
            Some(data) => data,
            None => String::with_capacity(cap),
        };
        data.clear();
        CharBuf { data }
    }

    pub fn release(&self, buf : CharBuf) {
        let cap = buf.data.capacity();
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(cap).or_default().push(buf.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_gives_default_capacity_when_zero() {
        let pool = BytePool::global();
        let buf = pool.rent(0);
        assert_eq!(buf.capacity(), DEFAULT_CAPACITY);
        pool.release(buf);
    }

    #[test]
    fn rent_rounds_up_to_power_of_two() {
        let pool = BytePool::global();
        let buf = pool.rent(5_000);
        assert_eq!(buf.capacity(), 8192);
        pool.release(buf);
    }

    #[test]
    fn release_then_rent_reuses_the_buffer() {
        let pool = BytePool::global();
        let buf = pool.rent(16_384);
        let ptr = buf.as_slice().as_ptr();
        pool.release(buf);
        let buf2 = pool.rent(16_384);
        assert_eq!(buf2.as_slice().as_ptr(), ptr);
        pool.release(buf2);
    }

    #[test]
    fn grow_preserves_prefix_and_at_least_doubles() {
        let pool = BytePool::global();
        let mut buf = pool.rent(0);
        buf.as_mut_slice()[.. 4].copy_from_slice(b"ping");
        let grown = pool.grow(buf, 4);
        assert!(grown.capacity() >= DEFAULT_CAPACITY * 2);
        assert_eq!(&grown.as_slice()[.. 4], b"ping");
        pool.release(grown);
    }

    #[test]
    fn grow_is_noop_when_capacity_already_sufficient() {
        let pool = BytePool::global();
        let buf = pool.rent(0);
        let ptr = buf.as_slice().as_ptr();
        let grown = pool.grow(buf, 1);
        assert_eq!(grown.as_slice().as_ptr(), ptr);
        pool.release(grown);
    }

    #[test]
    fn char_pool_rents_and_reuses() {
        let pool = CharPool::global();
        let mut buf = pool.rent(64);
        buf.push_str("ping");
        assert_eq!(buf.as_str(), "ping");
        pool.release(buf);
        let buf2 = pool.rent(64);
        assert_eq!(buf2.as_str(), "");
    }
}
