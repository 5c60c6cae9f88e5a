//! Process-wide pool of scratch byte buffers.
//!
//! Rentals never outlive the read/write call that took them; the pool just
//! keeps a bounded free list so hot paths do not reallocate their spill
//! buffers on every value.

use std::sync::Mutex;
use std::vec::Vec;

static POOL: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

const MAX_POOLED: usize = 16;
const RENT_CAPACITY: usize = 4096;
const MAX_RETAINED_CAPACITY: usize = 1 << 20;

fn lock() -> std::sync::MutexGuard<'static, Vec<Vec<u8>>> {
    match POOL.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn rent() -> Vec<u8> {
    match lock().pop() {
        Some(buf) => buf,
        None => Vec::with_capacity(RENT_CAPACITY),
    }
}

pub(crate) fn give_back(mut buf: Vec<u8>) {
    if buf.capacity() == 0 || buf.capacity() > MAX_RETAINED_CAPACITY {
        return;
    }
    buf.clear();
    let mut pool = lock();
    if pool.len() < MAX_POOLED {
        pool.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rented_buffer_is_empty() {
        let buf = rent();
        assert!(buf.is_empty());
        give_back(buf);
    }

    #[test]
    fn returned_buffer_is_cleared() {
        let mut buf = rent();
        buf.extend_from_slice(b"junk");
        give_back(buf);
        let again = rent();
        assert!(again.is_empty());
        give_back(again);
    }
}
