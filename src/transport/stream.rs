//! PhoNet frames over a byte stream.
//!
//! Outbound messages go through a dedicated writer task that receives
//! frames via an mpsc channel, so `send` never blocks and several frames
//! can be batched into one vectored write.
//!
//! # Architecture
//!
//! ```text
//! IsiClient 1 ─┐                                         ┌─► write half
//! IsiClient 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer ┘
//! IsiClient N ─┘
//!
//! read half ─► Reader (FrameBuffer) ─► mpsc::Sender<TransportEvent> ─► dispatch
//! ```
//!
//! EOF, a read error, a write error or a framing violation all end the
//! stream with a single [`TransportEvent::Closed`].

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{InboundMessage, OutboundMessage, Transport, TransportEvent, TransportEvents};
use crate::config::{DEFAULT_INBOUND_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};
use crate::error::{IsiError, Result};
use crate::protocol::{
    FrameBuffer, PhonetAddress, PhonetHeader, DEFAULT_MAX_FRAME_PAYLOAD, PHONET_HEADER_SIZE,
};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Read buffer size for the reader task.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Configuration for a stream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Device and object addressing for outgoing frames.
    pub addressing: PhonetAddress,
    /// Frames queued for the writer before `send` refuses.
    pub outbound_capacity: usize,
    /// Events queued for the dispatcher before the reader waits.
    pub inbound_capacity: usize,
    /// Largest ISI payload accepted in either direction.
    pub max_frame_payload: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addressing: PhonetAddress::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
        }
    }
}

/// A frame ready to be written to the stream.
#[derive(Debug)]
struct OutboundFrame {
    /// Pre-encoded header (8 bytes).
    header: [u8; PHONET_HEADER_SIZE],
    /// Transaction id + ISI message.
    payload: Bytes,
}

impl OutboundFrame {
    /// Total size of this frame (header + payload).
    #[inline]
    fn size(&self) -> usize {
        PHONET_HEADER_SIZE + self.payload.len()
    }
}

/// Transport writing PhoNet frames to a stream.
///
/// Dropping the transport closes the writer channel; the writer task
/// then finishes cleanly.
pub struct StreamTransport {
    tx: mpsc::Sender<OutboundFrame>,
    addressing: PhonetAddress,
    max_frame_payload: u16,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<()>,
}

impl StreamTransport {
    /// Split `stream`, spawn the reader and writer tasks and return the
    /// transport together with its event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, config: StreamConfig) -> (Self, TransportEvents)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let writer_events = events_tx.clone();
        let writer_task = tokio::spawn(async move {
            if let Err(e) = writer_loop(rx, write_half).await {
                tracing::error!("PhoNet writer error: {}", e);
                let _ = writer_events.send(TransportEvent::Closed).await;
            }
        });

        let max_payload = config.max_frame_payload;
        let reader_task = tokio::spawn(async move {
            if let Err(e) = read_loop(read_half, &events_tx, max_payload).await {
                tracing::error!("PhoNet reader error: {}", e);
            }
            let _ = events_tx.send(TransportEvent::Closed).await;
        });

        let transport = Self {
            tx,
            addressing: config.addressing,
            max_frame_payload: config.max_frame_payload,
            reader_task,
            _writer_task: writer_task,
        };

        (transport, events_rx)
    }

    /// Addressing applied to outgoing frames.
    #[inline]
    pub fn addressing(&self) -> &PhonetAddress {
        &self.addressing
    }
}

impl Transport for StreamTransport {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if message.payload.len() > usize::from(self.max_frame_payload) {
            return Err(IsiError::Transport(format!(
                "message of {} bytes exceeds frame payload limit {}",
                message.payload.len(),
                self.max_frame_payload
            )));
        }

        let header =
            PhonetHeader::for_payload(&self.addressing, message.resource, message.payload.len())
                .ok_or_else(|| IsiError::Transport("message does not fit a PhoNet frame".into()))?;

        let frame = OutboundFrame {
            header: header.encode(),
            payload: message.payload,
        };

        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                IsiError::Transport("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => IsiError::ConnectionClosed,
        })
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Reader loop - reassembles frames and forwards them as events.
async fn read_loop<R>(
    mut reader: R,
    events: &mpsc::Sender<TransportEvent>,
    max_payload: u16,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("PhoNet stream reached EOF");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => return Err(IsiError::Io(e)),
        };

        for frame in frame_buffer.push(&buf[..n])? {
            let message = InboundMessage {
                resource: frame.resource(),
                payload: frame.payload,
            };
            if events.send(TransportEvent::Message(message)).await.is_err() {
                // Dispatcher gone, nobody is listening any more.
                return Ok(());
            }
        }
    }
}

/// Writer loop - receives frames and writes them to the stream.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

/// Write a batch of frames using vectored writes, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(IsiError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_end = skipped + PHONET_HEADER_SIZE;
        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_end = skipped + frame.payload.len();
            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(skipped);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::duplex;

    fn frame(resource: u8, payload: &'static [u8]) -> OutboundFrame {
        let header =
            PhonetHeader::for_payload(&PhonetAddress::default(), resource, payload.len()).unwrap();
        OutboundFrame {
            header: header.encode(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(config.inbound_capacity, DEFAULT_INBOUND_CAPACITY);
        assert_eq!(config.max_frame_payload, DEFAULT_MAX_FRAME_PAYLOAD);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(0x06, b"hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(0x06, b"hello")];
        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), PHONET_HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_first_frame() {
        let batch = vec![frame(0x06, b"hello"), frame(0x1B, b"abc")];
        let slices = build_remaining_slices(&batch, PHONET_HEADER_SIZE + 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[1].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(0x06, b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (PHONET_HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_send_writes_phonet_frame() {
        let (local, mut remote) = duplex(4096);
        let (transport, _events) = StreamTransport::spawn(local, StreamConfig::default());

        transport
            .send(OutboundMessage {
                resource: 0x1B,
                payload: Bytes::from_static(&[0x01, 0x15, 0x07]),
            })
            .unwrap();

        let mut buf = [0u8; PHONET_HEADER_SIZE + 3];
        remote.read_exact(&mut buf).await.unwrap();

        let header = PhonetHeader::decode(&buf).unwrap();
        assert_eq!(header.resource, 0x1B);
        assert_eq!(header.payload_len(), 3);
        assert_eq!(&buf[PHONET_HEADER_SIZE..], &[0x01, 0x15, 0x07]);
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_message() {
        let (local, _remote) = duplex(4096);
        let config = StreamConfig {
            max_frame_payload: 4,
            ..StreamConfig::default()
        };
        let (transport, _events) = StreamTransport::spawn(local, config);

        let result = transport.send(OutboundMessage {
            resource: 0x06,
            payload: Bytes::from_static(&[0u8; 8]),
        });
        assert!(matches!(result, Err(IsiError::Transport(_))));
    }

    #[tokio::test]
    async fn test_reader_emits_messages() {
        let (local, mut remote) = duplex(4096);
        let (_transport, mut events) = StreamTransport::spawn(local, StreamConfig::default());

        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 3).unwrap();
        let bytes = build_frame(&header, &[0x04, 0x01, 0x01]);
        // Split across two writes to exercise reassembly.
        remote.write_all(&bytes[..6]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        remote.write_all(&bytes[6..]).await.unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.resource, 0x06);
                assert_eq!(&msg.payload[..], &[0x04, 0x01, 0x01]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_emits_closed_on_eof() {
        let (local, remote) = duplex(4096);
        let (_transport, mut events) = StreamTransport::spawn(local, StreamConfig::default());

        drop(remote);

        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_reader_emits_closed_on_bad_header() {
        let (local, mut remote) = duplex(4096);
        let (_transport, mut events) = StreamTransport::spawn(local, StreamConfig::default());

        // Length field of 1 cannot even cover the object bytes.
        remote
            .write_all(&[0x1B, 0x10, 0x00, 0x06, 0x00, 0x01, 0x00, 0x00])
            .await
            .unwrap();

        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
    }
}
