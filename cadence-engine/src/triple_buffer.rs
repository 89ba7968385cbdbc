//! Lock-free triple buffer for publishing a single value from the scheduler
//! thread to a reader that must never block (the real-time audio callback).
//!
//! A triple buffer uses three slots to allow lock-free reading and writing:
//! - Writer writes to the back slot
//! - Writer atomically swaps back with middle when done
//! - Reader atomically swaps front with middle when it wants fresh data
//!
//! This ensures the writer never blocks and the reader gets the latest
//! complete value without tearing, satisfying §5's "no locks on the audio
//! thread" requirement for the one value (playhead position) the audio
//! callback needs to read.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Index encoding for triple buffer state.
/// Uses 2 bits per slot to track which logical buffer each physical slot represents.
/// State byte layout: [unused:2][back:2][middle:2][front:2]
const FRONT_SHIFT: u8 = 0;
const MIDDLE_SHIFT: u8 = 2;
const BACK_SHIFT: u8 = 4;
const SLOT_MASK: u8 = 0b11;
const FRESH_BIT: u8 = 0x80;

/// Shared triple buffer state (wraps 3 slots).
pub struct TripleBufferShared<T> {
    slots: [UnsafeCell<T>; 3],
    state: AtomicU8,
}

// Safety: exclusive access to each slot is guaranteed by the atomic state
// machine (only the index currently tagged "back" is ever mutated, only by
// the single writer; only the index tagged "front" is ever read, only by
// the single reader).
unsafe impl<T: Send> Send for TripleBufferShared<T> {}
unsafe impl<T: Send + Sync> Sync for TripleBufferShared<T> {}

impl<T: Clone + Default> TripleBufferShared<T> {
    pub fn new() -> Self {
        Self::new_with_fn(T::default)
    }

    pub fn new_with(value: T) -> Self {
        Self {
            slots: [
                UnsafeCell::new(value.clone()),
                UnsafeCell::new(value.clone()),
                UnsafeCell::new(value),
            ],
            state: initial_state(),
        }
    }

    fn new_with_fn(make: impl Fn() -> T) -> Self {
        Self {
            slots: [
                UnsafeCell::new(make()),
                UnsafeCell::new(make()),
                UnsafeCell::new(make()),
            ],
            state: initial_state(),
        }
    }

    fn decode_back(state: u8) -> usize {
        ((state >> BACK_SHIFT) & SLOT_MASK) as usize
    }

    fn decode_middle(state: u8) -> usize {
        ((state >> MIDDLE_SHIFT) & SLOT_MASK) as usize
    }

    fn decode_front(state: u8) -> usize {
        ((state >> FRONT_SHIFT) & SLOT_MASK) as usize
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn back_mut(&self) -> &mut T {
        let state = self.state.load(Ordering::Acquire);
        let back_idx = Self::decode_back(state);
        &mut *self.slots[back_idx].get()
    }

    fn publish(&self) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            let back_idx = Self::decode_back(state);
            let middle_idx = Self::decode_middle(state);
            let front_idx = Self::decode_front(state);

            let new_state = ((middle_idx as u8) << BACK_SHIFT)
                | ((back_idx as u8) << MIDDLE_SHIFT)
                | ((front_idx as u8) << FRONT_SHIFT)
                | FRESH_BIT;

            if self
                .state
                .compare_exchange_weak(state, new_state, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }

    fn has_fresh(&self) -> bool {
        (self.state.load(Ordering::Acquire) & FRESH_BIT) != 0
    }

    fn consume(&self) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            if (state & FRESH_BIT) == 0 {
                return;
            }

            let back_idx = Self::decode_back(state);
            let middle_idx = Self::decode_middle(state);
            let front_idx = Self::decode_front(state);

            let new_state = ((back_idx as u8) << BACK_SHIFT)
                | ((front_idx as u8) << MIDDLE_SHIFT)
                | ((middle_idx as u8) << FRONT_SHIFT);

            if self
                .state
                .compare_exchange_weak(state, new_state, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }

    unsafe fn front(&self) -> &T {
        let state = self.state.load(Ordering::Acquire);
        let front_idx = Self::decode_front(state);
        &*self.slots[front_idx].get()
    }
}

fn initial_state() -> AtomicU8 {
    // slot 0 = front, slot 1 = middle, slot 2 = back; no fresh data yet.
    AtomicU8::new((2 << BACK_SHIFT) | (1 << MIDDLE_SHIFT))
}

impl<T: Clone + Default> Default for TripleBufferShared<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer half, owned by the scheduler thread.
pub struct TripleBufferWriter<T> {
    shared: Arc<TripleBufferShared<T>>,
}

impl<T: Clone + Default> TripleBufferWriter<T> {
    pub fn write(&mut self, value: T) {
        unsafe {
            *self.shared.back_mut() = value;
        }
        self.shared.publish();
    }
}

/// Reader half, owned by the audio callback (or any single wait-free
/// reader).
pub struct TripleBufferReader<T> {
    shared: Arc<TripleBufferShared<T>>,
}

// Manual impl: `Arc<T>: Clone` regardless of `T: Clone`, so a reader handle
// can be cheaply duplicated (e.g. `EngineHandle` is `Clone`) without
// requiring the buffered value itself to satisfy any extra bound here.
impl<T> Clone for TripleBufferReader<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Clone + Default> TripleBufferReader<T> {
    pub fn has_fresh(&self) -> bool {
        self.shared.has_fresh()
    }

    pub fn read(&self) -> T {
        self.shared.consume();
        unsafe { self.shared.front().clone() }
    }

    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.shared.consume();
        unsafe { f(self.shared.front()) }
    }
}

pub fn triple_buffer<T: Clone + Default>() -> (TripleBufferWriter<T>, TripleBufferReader<T>) {
    let shared = Arc::new(TripleBufferShared::new());
    (
        TripleBufferWriter { shared: Arc::clone(&shared) },
        TripleBufferReader { shared },
    )
}

pub fn triple_buffer_with<T: Clone + Default>(
    value: T,
) -> (TripleBufferWriter<T>, TripleBufferReader<T>) {
    let shared = Arc::new(TripleBufferShared::new_with(value));
    (
        TripleBufferWriter { shared: Arc::clone(&shared) },
        TripleBufferReader { shared },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let (mut writer, reader) = triple_buffer::<i32>();
        writer.write(42);
        assert_eq!(reader.read(), 42);
    }

    #[test]
    fn multiple_writes_reader_sees_latest() {
        let (mut writer, reader) = triple_buffer::<i32>();
        writer.write(1);
        writer.write(2);
        writer.write(3);
        assert_eq!(reader.read(), 3);
    }

    #[test]
    fn no_fresh_data_after_consuming() {
        let (mut writer, reader) = triple_buffer::<i32>();
        writer.write(42);
        let _ = reader.read();
        assert!(!reader.has_fresh());
        assert_eq!(reader.read(), 42);
    }

    #[test]
    fn with_closure_avoids_clone() {
        let (mut writer, reader) = triple_buffer::<Vec<i32>>();
        writer.write(vec![1, 2, 3]);
        let sum: i32 = reader.with(|v| v.iter().sum());
        assert_eq!(sum, 6);
    }
}
