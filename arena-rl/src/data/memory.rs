use rand::{seq::IteratorRandom, Rng};
use ringbuffer::{AllocRingBuffer, RingBuffer};

/// Experience replay store.
pub trait Memory {
    type Item;

    fn push(&mut self, item: Self::Item);

    fn extend<I: IntoIterator<Item = Self::Item>>(&mut self, items: I) {
        for item in items {
            self.push(item);
        }
    }

    /// Up to `n` distinct stored items chosen uniformly at random.
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Self::Item>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity replay; once full, each push evicts the oldest item.
pub struct RingbufferMemory<T> {
    buffer: AllocRingBuffer<T>,
}

impl<T: Clone> RingbufferMemory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: AllocRingBuffer::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl<T: Clone> Memory for RingbufferMemory<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        self.buffer.push(item);
    }

    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<T> {
        self.buffer.iter().choose_multiple(rng, n).into_iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}
