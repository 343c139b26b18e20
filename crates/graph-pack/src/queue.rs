//! Bounded producer/consumer transport over the codec.
//!
//! Messages are serialized at `add` time into a fixed-capacity byte ring,
//! so the queue's size is bounded in bytes, not message count. Two
//! counting semaphores track records available and records consumed; a
//! single lock guards the ring region. The codec itself is oblivious:
//! every `add` borrows a pooled writer, every `take` a pooled reader.
//!
//! Records are 4-byte big-endian length-prefixed. When a record does not
//! fit in the space left at the back of the ring, the ring wraps: the
//! current tail becomes the logical end and writing resumes at the front.

use std::sync::{Arc, Condvar, Mutex};

use crate::config::Config;
use crate::error::PackError;
use crate::reader::ObjectReader;
use crate::value::Value;
use crate::writer::ObjectWriter;

const HEADER_SIZE: usize = 4;

struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn release(&self) {
        *self.count.lock().unwrap() += 1;
        self.cv.notify_one();
    }
}

struct Ring {
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    queue_end: usize,
    pending: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            head: 0,
            tail: 0,
            queue_end: capacity,
            pending: 0,
        }
    }

    /// Appends one record if it fits, wrapping to the front when the back
    /// of the ring is too short.
    fn try_put(&mut self, record: &[u8]) -> bool {
        let need = record.len() + HEADER_SIZE;
        let capacity = self.buf.len();

        let at = if self.pending == 0 {
            self.head = 0;
            self.tail = 0;
            self.queue_end = capacity;
            if need > capacity {
                return false;
            }
            0
        } else if self.tail >= self.head {
            if need <= capacity - self.tail {
                self.tail
            } else if need < self.head {
                // Wrap: the unread region keeps the back of the ring.
                self.queue_end = self.tail;
                0
            } else {
                return false;
            }
        } else if need < self.head - self.tail {
            self.tail
        } else {
            return false;
        };

        self.buf[at..at + HEADER_SIZE].copy_from_slice(&(record.len() as u32).to_be_bytes());
        self.buf[at + HEADER_SIZE..at + need].copy_from_slice(record);
        self.tail = at + need;
        self.pending += 1;
        true
    }

    /// Removes the record at the head. Only called with `pending > 0`.
    fn get(&mut self) -> Vec<u8> {
        if self.head == self.queue_end {
            self.head = 0;
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&self.buf[self.head..self.head + HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;
        let start = self.head + HEADER_SIZE;
        let record = self.buf[start..start + len].to_vec();
        self.head = start + len;
        self.pending -= 1;
        record
    }
}

/// A bounded blocking queue whose backing store holds encoded bytes.
pub struct ByteQueue {
    conf: Arc<Config>,
    ring: Mutex<Ring>,
    added: Semaphore,
    taken: Semaphore,
}

impl ByteQueue {
    /// A queue bounded at `capacity` bytes of encoded records (headers
    /// included).
    pub fn new(conf: Arc<Config>, capacity: usize) -> Self {
        Self {
            conf,
            ring: Mutex::new(Ring::new(capacity)),
            added: Semaphore::new(0),
            taken: Semaphore::new(0),
        }
    }

    /// Serializes `value` and appends it, blocking while the ring is too
    /// full to hold the record.
    pub fn add(&self, value: &Value) -> Result<(), PackError> {
        let mut out = ObjectWriter::new(self.conf.clone());
        let record = out.write_object(value)?;
        if record.len() + HEADER_SIZE > self.ring.lock().unwrap().buf.len() {
            return Err(PackError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "record larger than queue capacity",
            )));
        }
        loop {
            if self.ring.lock().unwrap().try_put(&record) {
                self.added.release();
                return Ok(());
            }
            // Wait for a consumer to free space, then retry.
            self.taken.acquire();
        }
    }

    /// Removes the oldest record without decoding it, blocking while the
    /// queue is empty.
    pub fn take_bytes(&self) -> Vec<u8> {
        self.added.acquire();
        let record = self.ring.lock().unwrap().get();
        self.taken.release();
        record
    }

    /// Removes and decodes the oldest message, blocking while the queue
    /// is empty.
    pub fn take(&self) -> Result<Value, PackError> {
        let record = self.take_bytes();
        let mut input = ObjectReader::new(self.conf.clone(), &record);
        input.read_object()
    }
}
