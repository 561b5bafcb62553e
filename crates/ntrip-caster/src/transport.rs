//! Uniform transport abstraction unifying plain TCP, HTTP chunked, RTP and
//! UDP-framed ingest/egress behind one byte-stream model.
//!
//! The source thread and the fan-out writer never see a raw socket type;
//! they see a [`Socket`] (one nonblocking read/recv/write surface) plus a
//! [`Framing`]/[`OutputFraming`] tag describing how to interpret bytes
//! crossing that socket.

use std::io;

/// What the source thread's ingest loop did on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAttempt {
    /// `n` new payload bytes landed in the target slot.
    Progress(usize),
    /// No bytes available this attempt (nonblocking read found nothing, or
    /// a chunk length-line is still incomplete). Not an error.
    Pending,
    /// The peer closed the connection (`recv` returned 0).
    Eof,
}

/// What a fan-out write attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAttempt {
    Wrote(usize),
    Broken,
}

/// The minimal socket surface the transport layer needs. Implemented for
/// real sockets by the binary crate and for an in-memory mock in tests.
pub trait Socket: Send {
    /// One nonblocking read attempt for byte-stream transports. `Ok(0)`
    /// means EOF, `Err(WouldBlock)` means nothing available yet.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// One nonblocking receive attempt for datagram transports (RTP/UDP).
    /// Returns the datagram length, truncated to `buf`'s capacity.
    fn try_recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read(buf)
    }

    /// Best-effort write; may return fewer bytes than requested.
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;
}

fn is_would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// Ingest-side HTTP chunked transfer-encoding decoder state.
///
/// Tracks how many body bytes remain in the chunk currently being read
/// (`left`), the accumulating hex length-line buffer, and whether the
/// next read must first consume the trailing CRLF of the chunk that just
/// finished (`finish`) — the caster tolerates producers that never send
/// the terminating `0\r\n\r\n`.
#[derive(Debug, Clone)]
pub struct HttpChunkState {
    left: i64,
    line: Vec<u8>,
    finish: bool,
}

impl HttpChunkState {
    pub fn new() -> Self {
        Self {
            left: 0,
            line: Vec::with_capacity(20),
            finish: false,
        }
    }

    /// Bytes still owed in the chunk currently being read.
    pub fn left(&self) -> i64 {
        self.left
    }

    /// Advance the decoder by one ingest attempt, writing at most
    /// `dest.len()` payload bytes starting at `dest[0]`.
    ///
    /// Follows the RFC 7230 chunked-transfer grammar: while `left <= 0`
    /// we're reading (or finishing) a length line one byte at a time;
    /// once `left > 0` we read payload bytes directly into `dest`.
    pub fn read_attempt(
        &mut self,
        sock: &mut dyn Socket,
        dest: &mut [u8],
    ) -> io::Result<ReadAttempt> {
        if self.left <= 0 {
            return self.pump_length_line(sock);
        }

        let want = dest.len().min(self.left as usize);
        if want == 0 {
            return Ok(ReadAttempt::Pending);
        }
        match sock.try_read(&mut dest[..want]) {
            Ok(0) => Ok(ReadAttempt::Eof),
            Ok(n) => {
                self.left -= n as i64;
                Ok(ReadAttempt::Progress(n))
            }
            Err(e) if is_would_block(&e) => Ok(ReadAttempt::Pending),
            Err(e) => Err(e),
        }
    }

    fn pump_length_line(&mut self, sock: &mut dyn Socket) -> io::Result<ReadAttempt> {
        let mut byte = [0u8; 1];
        match sock.try_read(&mut byte) {
            Ok(0) => Ok(ReadAttempt::Eof),
            Ok(_) => {
                match byte[0] {
                    b'\r' => {} // ignore, wait for the \n
                    b'\n' => {
                        if self.finish {
                            // This \n terminated the previous chunk's trailing CRLF.
                            self.finish = false;
                            self.line.clear();
                        } else {
                            let text = String::from_utf8_lossy(&self.line);
                            self.left = i64::from_str_radix(text.trim(), 16).unwrap_or(0);
                            self.line.clear();
                            self.finish = true;
                        }
                    }
                    b => {
                        if self.line.len() < 20 {
                            self.line.push(b);
                        }
                    }
                }
                Ok(ReadAttempt::Pending)
            }
            Err(e) if is_would_block(&e) => Ok(ReadAttempt::Pending),
            Err(e) => Err(e),
        }
    }
}

impl Default for HttpChunkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Egress-side HTTP chunked transfer-encoding state: how many
/// bytes are left to write in the chunk header we already sent for the
/// slot currently being streamed to this client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientChunkState {
    left: usize,
}

impl ClientChunkState {
    pub fn new() -> Self {
        Self { left: 0 }
    }

    pub fn left(&self) -> usize {
        self.left
    }

    pub fn start_slot(&mut self, slot_len: usize) {
        self.left = slot_len;
    }

    pub fn finish_slot(&mut self) {
        self.left = 0;
    }

    /// The `"%X\r\n"` length header that must precede a new slot's body.
    pub fn header_for(slot_len: usize) -> String {
        format!("{:X}\r\n", slot_len)
    }
}

/// Minimal RTP framing state for the client egress path: a
/// monotonically increasing sequence number, a running timestamp, and the
/// session SSRC assigned at source login.
#[derive(Debug, Clone, Copy)]
pub struct RtpOutState {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpOutState {
    pub fn new(ssrc: u32) -> Self {
        Self {
            sequence: 0,
            timestamp: 0,
            ssrc,
        }
    }

    /// Builds the 12-byte RTP header for the next packet and advances the
    /// sequence/timestamp counters. `payload_len` advances the timestamp
    /// so downstream jitter buffers see a plausible media clock.
    pub fn next_header(&mut self, payload_len: usize) -> [u8; 12] {
        let mut header = [0u8; 12];
        header[0] = 0x80; // version 2, no padding/extension/CSRC
        header[1] = 96; // payload type, matches source login's assignment
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(payload_len as u32);
        header
    }
}

/// Tag describing how the source thread should decode bytes arriving on
/// its ingest socket.
#[derive(Debug, Clone)]
pub enum Framing {
    PlainTcp,
    Chunked(HttpChunkState),
    /// One datagram per `read_attempt` call; the source ingest loop hands
    /// the payload straight to `ChunkRing::fill_chunks` rather than this
    /// type, since a datagram can span several slots.
    Rtp,
    /// Bytes are drained from a per-connection scratch buffer filled by a
    /// dedicated UDP reader thread.
    UdpFramed,
}

/// Tag describing how the fan-out writer should frame bytes going out to
/// one client.
#[derive(Debug, Clone)]
pub enum OutputFraming {
    PlainTcp,
    Chunked(ClientChunkState),
    Rtp(RtpOutState),
    UdpFramed,
}

/// In-memory [`Socket`] backed by a byte queue, shared by this module's
/// tests and by `source.rs`'s ingest tests.
#[cfg(test)]
pub(crate) struct MockSocket {
    pub(crate) inbound: std::collections::VecDeque<u8>,
    pub(crate) outbound: Vec<u8>,
}

#[cfg(test)]
impl MockSocket {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            inbound: bytes.iter().copied().collect(),
            outbound: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Socket for MockSocket {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }
}
