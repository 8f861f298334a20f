//! Live MJPEG delivery to one viewer
//!
//! Each viewer gets a [`StreamSession`]: a bus subscription plus the
//! `multipart/x-mixed-replace` framing browsers render as a moving image.

mod jpeg;

pub use jpeg::{encode_jpeg, DEFAULT_JPEG_QUALITY};

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use uuid::Uuid;

use crate::bus::{FrameBus, Subscription};
use crate::types::Frame;

/// Multipart boundary between JPEG parts
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the stream response; the boundary must match [`BOUNDARY`]
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frame one JPEG as a multipart part: boundary, headers, payload, CRLF
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// One viewer's delivery state
pub struct StreamSession {
    subscription: Subscription,
    jpeg_quality: u8,
    parts_sent: u64,
}

impl StreamSession {
    pub fn open(bus: &FrameBus, jpeg_quality: u8) -> Self {
        let subscription = bus.subscribe();
        log::info!(
            "Viewer {} connected ({} watching)",
            subscription.id(),
            bus.subscriber_count()
        );
        Self {
            subscription,
            jpeg_quality,
            parts_sent: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.subscription.id()
    }

    pub fn parts_sent(&self) -> u64 {
        self.parts_sent
    }

    /// Wait for the next frame and encode it as a multipart part.
    ///
    /// Frames that fail to encode are skipped. Returns `None` when the bus
    /// has let go of this session.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            let frame = self.subscription.recv().await?;
            match self.encode(frame).await {
                Some(part) => {
                    self.parts_sent += 1;
                    return Some(part);
                }
                None => continue,
            }
        }
    }

    async fn encode(&self, frame: Frame) -> Option<Bytes> {
        let quality = self.jpeg_quality;
        let sequence = frame.sequence;
        match tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await {
            Ok(Ok(jpeg)) => Some(multipart_part(&jpeg)),
            Ok(Err(e)) => {
                log::warn!("Viewer {}: skipping frame {}: {}", self.id(), sequence, e);
                None
            }
            Err(e) => {
                log::warn!("Viewer {}: encoder task failed: {}", self.id(), e);
                None
            }
        }
    }

    /// Response body for this session. Dropping the stream (the client went
    /// away) drops the session and unregisters it from the bus.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let part = session.next_part().await?;
            Some((Ok(part), session))
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        log::info!(
            "Viewer {} disconnected after {} frames",
            self.subscription.id(),
            self.parts_sent
        );
    }
}
