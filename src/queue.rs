//! C2 — Command Queue
//!
//! A fixed-capacity SPSC ring for commands (I/O front-end → worker) and a
//! parallel ring for responses (worker → I/O front-end). Grounded in
//! `kernel/src/touch.rs`'s `EventRingBuffer` (same head/tail-with-wrap-mask
//! shape, producer advances write index, consumer advances read index) but
//! adapted from per-field atomics to the single shared mutex spec.md §4.2
//! calls for: "a mutex that also guards the producer- and consumer-visible
//! head/tail indices... yields strict SPSC ordering".

use crate::config::{QUEUE_CAPACITY, QUEUE_ENTRY_PAYLOAD};
use spin::Mutex;

/// One command destined for the worker.
#[derive(Clone, Copy)]
pub struct CommandEntry {
    pub cmd: u8,
    pub len: u8,
    pub payload: [u8; QUEUE_ENTRY_PAYLOAD],
}

impl CommandEntry {
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }
}

/// One response the worker hands back to the I/O front-end.
#[derive(Clone, Copy)]
pub struct ResponseEntry {
    pub cmd: u8,
    pub status: u8,
    pub data_len: u8,
    pub data: [u8; QUEUE_ENTRY_PAYLOAD],
}

impl ResponseEntry {
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }
}

struct Ring<T: Copy> {
    slots: [Option<T>; QUEUE_CAPACITY],
    head: usize, // next slot to pop
    tail: usize, // next slot to push
    count: usize,
}

impl<T: Copy> Ring<T> {
    fn new() -> Self {
        Ring {
            slots: [None; QUEUE_CAPACITY],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, item: T) -> bool {
        if self.count == QUEUE_CAPACITY {
            return false;
        }
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % QUEUE_CAPACITY;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % QUEUE_CAPACITY;
        self.count -= 1;
        item
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Mutex-coordinated pair of SPSC rings: the dispatcher (I/O side) is the
/// sole producer of commands and sole consumer of responses; the worker is
/// the sole consumer of commands and sole producer of responses. One lock
/// covers both rings' head/tail pairs — "a single small lock covering both
/// head/tail pairs is simpler than per-ring locks and has no measured
/// contention" (spec.md §9).
pub struct CommandQueue {
    commands: Mutex<Ring<CommandEntry>>,
    responses: Mutex<Ring<ResponseEntry>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            commands: Mutex::new(Ring::new()),
            responses: Mutex::new(Ring::new()),
        }
    }

    /// Enqueue a command for the worker. Returns `false` (queue full)
    /// rather than blocking — the dispatcher surfaces that as `Error` to
    /// the host per spec.md §4.2 ("no silent queuing").
    pub fn push_command(&self, cmd: u8, payload: &[u8]) -> bool {
        debug_assert!(payload.len() <= QUEUE_ENTRY_PAYLOAD);
        let mut buf = [0u8; QUEUE_ENTRY_PAYLOAD];
        let n = payload.len().min(QUEUE_ENTRY_PAYLOAD);
        buf[..n].copy_from_slice(&payload[..n]);
        let entry = CommandEntry {
            cmd,
            len: n as u8,
            payload: buf,
        };
        self.commands.lock().push(entry)
    }

    /// Worker-side: dequeue the next command, if any.
    pub fn pop_command(&self) -> Option<CommandEntry> {
        self.commands.lock().pop()
    }

    /// Worker-side: publish a response. Returns `false` both when the
    /// response ring is full and when `data` is too large for a single
    /// entry (`QUEUE_ENTRY_PAYLOAD` bytes, below `AI_INFER`'s 128-output
    /// ceiling in spec.md §4.4.2/§6) — the ring never truncates a payload
    /// silently.
    pub fn push_response(&self, cmd: u8, status: u8, data: &[u8]) -> bool {
        if data.len() > QUEUE_ENTRY_PAYLOAD {
            return false;
        }
        let mut buf = [0u8; QUEUE_ENTRY_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        let entry = ResponseEntry {
            cmd,
            status,
            data_len: data.len() as u8,
            data: buf,
        };
        self.responses.lock().push(entry)
    }

    /// I/O side: dequeue the next response, if any.
    pub fn pop_response(&self) -> Option<ResponseEntry> {
        self.responses.lock().pop()
    }

    pub fn command_queue_len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn response_queue_len(&self) -> usize {
        self.responses.lock().len()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_fifo_order() {
        let q = CommandQueue::new();
        assert!(q.push_command(0x50, &[1, 2, 3]));
        assert!(q.push_command(0x51, &[9]));
        let a = q.pop_command().unwrap();
        assert_eq!(a.cmd, 0x50);
        assert_eq!(a.payload(), &[1, 2, 3]);
        let b = q.pop_command().unwrap();
        assert_eq!(b.cmd, 0x51);
        assert_eq!(b.payload(), &[9]);
        assert!(q.pop_command().is_none());
    }

    #[test]
    fn full_queue_rejects_push() {
        let q = CommandQueue::new();
        for i in 0..QUEUE_CAPACITY {
            assert!(q.push_command(i as u8, &[]));
        }
        assert!(!q.push_command(0xFF, &[]));
        assert_eq!(q.command_queue_len(), QUEUE_CAPACITY);
    }

    #[test]
    fn responses_are_independent_of_commands() {
        let q = CommandQueue::new();
        q.push_response(0x50, 0x00, &[1, 2, 3, 4]);
        assert_eq!(q.command_queue_len(), 0);
        let r = q.pop_response().unwrap();
        assert_eq!(r.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn oversized_response_is_rejected_not_truncated() {
        let q = CommandQueue::new();
        let oversized = vec![0u8; QUEUE_ENTRY_PAYLOAD + 1];
        assert!(!q.push_response(0x50, 0x00, &oversized));
        assert_eq!(q.response_queue_len(), 0);
    }
}
