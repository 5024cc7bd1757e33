//! Request body sources pulled by the engine.
//!
//! The engine reads a body incrementally from its own threads, so a source is
//! shared (`Arc`) and never copied at dispatch time.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

/// A body the engine pulls on demand.
pub trait HttpRequestBodyStream: Send + Sync + fmt::Debug {
    /// Write up to `max_len` bytes of body into `out`.
    ///
    /// Returns `true` once the whole body has been written.
    fn send_request_body(&self, out: &mut BytesMut, max_len: usize) -> bool;

    /// Rewind to the start so the engine can resend (retries, redirects).
    ///
    /// Returns `false` if the source cannot be rewound.
    fn reset_position(&self) -> bool {
        false
    }

    /// Total length, if known up front.
    fn content_length(&self) -> Option<u64> {
        None
    }
}

/// A body backed by an in-memory buffer.
#[derive(Debug)]
pub struct BytesBodyStream {
    data: Bytes,
    position: Mutex<usize>,
}

impl BytesBodyStream {
    /// Create a body over `data`.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: Mutex::new(0),
        }
    }

    /// Bytes not yet handed to the engine.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - *self.position.lock()
    }
}

impl HttpRequestBodyStream for BytesBodyStream {
    fn send_request_body(&self, out: &mut BytesMut, max_len: usize) -> bool {
        let mut position = self.position.lock();
        let end = *position + max_len.min(self.data.len() - *position);
        out.put_slice(&self.data[*position..end]);
        *position = end;
        end == self.data.len()
    }

    fn reset_position(&self) -> bool {
        *self.position.lock() = 0;
        true
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
