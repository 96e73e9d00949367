//! Framing and unframing of MAPI messages.
//!
//! MAPI transports messages in frames of at most [`MAX_PAYLOAD`] bytes.
//! Each frame starts with a little-endian `u16` header encoding
//! `(len << 1) | fin`, where `fin` marks the last frame of a logical
//! message. Reads go through a buffer owned by the stream; writes that
//! exceed the frame limit are chunked transparently.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Maximum payload bytes a single frame may carry.
pub const MAX_PAYLOAD: usize = 8190;

/// A buffered MAPI stream over any blocking byte transport.
///
/// The read buffer is owned here and loaned out by [`read_frame`];
/// the returned slice is only valid until the next call that touches
/// the stream, which the borrow on `&mut self` enforces.
///
/// [`read_frame`]: MapiStream::read_frame
pub struct MapiStream<S> {
    stream: S,
    scratch: [u8; 2],
    read_buf: Box<[u8]>,
    send_buf: BytesMut,
}

impl<S> MapiStream<S> {
    pub fn from_stream(stream: S) -> Self {
        MapiStream {
            stream,
            scratch: [0; 2],
            read_buf: vec![0; MAX_PAYLOAD].into_boxed_slice(),
            send_buf: BytesMut::new(),
        }
    }

    /// Consumes the stream and returns the underlying transport.
    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S: Read> MapiStream<S> {
    /// Reads a single frame, returning its payload and fin flag.
    ///
    /// The payload slice aliases the stream's internal buffer; copy it
    /// if it has to survive any further call on this stream.
    pub fn read_frame(&mut self) -> Result<(&[u8], bool)> {
        self.stream.read_exact(&mut self.scratch)?;
        let header = u16::from_le_bytes(self.scratch);
        let fin = header & 1 == 1;
        let len = (header >> 1) as usize;

        if len > MAX_PAYLOAD {
            return Err(Error::driver_detailed(
                "frame length exceeds protocol maximum",
                len.to_string(),
            ));
        }

        self.stream.read_exact(&mut self.read_buf[..len])?;
        Ok((&self.read_buf[..len], fin))
    }

    /// Reads frames up to and including the fin frame and returns the
    /// concatenated payloads as text.
    ///
    /// A message whose first byte is `!` is a server-reported error and
    /// comes back as [`Error::Server`].
    pub fn read_message(&mut self) -> Result<String> {
        let mut message = BytesMut::new();
        loop {
            let (payload, fin) = self.read_frame()?;
            message.extend_from_slice(payload);
            if fin {
                break;
            }
        }

        let message = String::from_utf8_lossy(&message).into_owned();
        if let Some(rest) = message.strip_prefix('!') {
            let rest = rest.strip_suffix('\n').unwrap_or(rest);
            return Err(Error::Server(rest.to_string()));
        }
        Ok(message)
    }
}

impl<S: Write> MapiStream<S> {
    /// Sends the concatenation of `parts` as one logical message.
    ///
    /// Payloads up to [`MAX_PAYLOAD`] go out as a single fin frame; the
    /// parts are written straight to the socket without being joined
    /// first. Larger payloads are chunked, fin set only on the last
    /// frame.
    pub fn send(&mut self, parts: &[&str]) -> Result<()> {
        let total: usize = parts.iter().map(|p| p.len()).sum();

        if total <= MAX_PAYLOAD {
            let header = ((total as u16) << 1) | 1;
            self.stream.write_all(&header.to_le_bytes())?;
            for part in parts {
                self.stream.write_all(part.as_bytes())?;
            }
            self.stream.flush()?;
            return Ok(());
        }

        self.send_buf.clear();
        for part in parts {
            self.send_buf.put(part.as_bytes());
        }

        let mut data = &self.send_buf[..];
        while data.len() > MAX_PAYLOAD {
            let header = (MAX_PAYLOAD as u16) << 1;
            self.stream.write_all(&header.to_le_bytes())?;
            self.stream.write_all(&data[..MAX_PAYLOAD])?;
            data = &data[MAX_PAYLOAD..];
        }
        let header = ((data.len() as u16) << 1) | 1;
        self.stream.write_all(&header.to_le_bytes())?;
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }
}
