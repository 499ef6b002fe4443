// Fixed-capacity FIFO ring buffer
// No locking of its own: the owner wraps it in a critical_section::Mutex
// whenever an interrupt handler can reach it.

use core::fmt;

pub struct TaskQueue<T, const N: usize> {
    buf: [Option<T>; N],
    head: usize, // next to read
    tail: usize, // next to write
    len: usize,
}

impl<T, const N: usize> TaskQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            buf: [const { None }; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Appends `item`, or hands it back untouched if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len >= N {
            return Err(item);
        }
        self.buf[self.tail] = Some(item);
        self.tail = (self.tail + 1) % N;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.buf[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        item
    }

    pub fn peek(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.buf[self.head].as_ref()
        }
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            None
        } else {
            self.buf[self.head].as_mut()
        }
    }

    /// Drops the oldest entry in place.
    pub fn delete_next(&mut self) {
        drop(self.pop());
    }

    pub fn available(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= N
    }

    pub fn free(&self) -> usize {
        N - self.len
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
        self.head = 0;
        self.tail = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.buf[(self.head + i) % N].as_ref())
    }
}

impl<T, const N: usize> Default for TaskQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> fmt::Debug for TaskQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len)
            .field("capacity", &N)
            .finish()
    }
}
