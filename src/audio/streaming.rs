//! Progressive download buffer for remote audio sources
//!
//! - `SharedBuffer`: Thread-safe growable byte buffer fed by the downloader
//! - `StreamingBuffer`: Read+Seek view over it for rodio's Decoder
//! - `StreamingEvent`: Download lifecycle events
//! - `start_download()`: Spawns the download task
//! - `wait_until_playable()`: Awaits enough data to start decoding
//!
//! The download task appends, the audio thread reads. Reads past the
//! downloaded range block until data arrives, the download fails or the
//! buffer is cancelled.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::mpsc;

/// Bytes that must be buffered before decoding starts
pub const PLAYABLE_THRESHOLD_BYTES: u64 = 400 * 1024;

/// How long a blocked reader sleeps between re-checks
const READ_WAIT_SLICE: Duration = Duration::from_millis(100);

// ============ Events ============

/// Events from the streaming downloader
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingEvent {
    /// Response headers received
    Started {
        content_type: Option<String>,
        content_length: Option<u64>,
    },
    /// Enough data downloaded, decoding can start
    Playable,
    /// Download progress (downloaded_bytes, total_bytes)
    Progress(u64, u64),
    /// Download complete
    Complete,
    /// Download failed
    Error(String),
}

/// Why a stream never became playable
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Transport or HTTP failure
    Download(String),
    /// Server answered with something that is not audio
    NotAudio(String),
    /// Nothing playable arrived in time
    Timeout,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Download(e) => write!(f, "Download failed: {}", e),
            StreamError::NotAudio(content_type) => {
                write!(f, "Source is not audio (content-type: {})", content_type)
            }
            StreamError::Timeout => write!(f, "Timed out waiting for audio data"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Whether a Content-Type header can carry decodable audio
///
/// Generic binary types pass, textual ones (error pages, JSON) do not.
pub fn is_audio_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("audio/")
        || mime == "application/octet-stream"
        || mime == "application/ogg"
        || mime == "video/mp4"
        || mime.is_empty()
}

// ============ Buffer ============

struct BufferState {
    data: RwLock<Vec<u8>>,
    /// From Content-Length, 0 when unknown
    total_size: AtomicU64,
    downloaded: AtomicU64,
    complete: AtomicBool,
    cancelled: AtomicBool,
    error: RwLock<Option<String>>,
    data_available: Condvar,
    wait_mutex: Mutex<()>,
}

/// Thread-safe shared buffer for streaming audio
#[derive(Clone)]
pub struct SharedBuffer {
    state: Arc<BufferState>,
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("total_size", &self.total_size())
            .field("downloaded", &self.downloaded())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Default for SharedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BufferState {
                data: RwLock::new(Vec::new()),
                total_size: AtomicU64::new(0),
                downloaded: AtomicU64::new(0),
                complete: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                error: RwLock::new(None),
                data_available: Condvar::new(),
                wait_mutex: Mutex::new(()),
            }),
        }
    }

    /// Append downloaded bytes and wake blocked readers
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.state.data.write().extend_from_slice(chunk);
        self.state
            .downloaded
            .fetch_add(chunk.len() as u64, Ordering::Release);
        self.state.data_available.notify_all();
    }

    fn check_readable(&self) -> io::Result<()> {
        if self.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "Download cancelled",
            ));
        }
        if let Some(err) = self.state.error.read().as_ref() {
            return Err(io::Error::other(err.clone()));
        }
        Ok(())
    }

    /// Read bytes at `position`, blocking until they are downloaded
    ///
    /// Returns `Ok(0)` only at end of a completed download.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut waits = 0u32;
        loop {
            self.check_readable()?;

            let downloaded = self.downloaded();
            if position < downloaded {
                let data = self.state.data.read();
                let start = position as usize;
                let to_read = buf.len().min((downloaded - position) as usize);
                buf[..to_read].copy_from_slice(&data[start..start + to_read]);
                return Ok(to_read);
            }
            if self.is_complete() {
                return Ok(0);
            }

            waits += 1;
            if waits == 1 {
                tracing::debug!(
                    "read_at: waiting for byte {} (downloaded {}/{})",
                    position,
                    downloaded,
                    self.total_size()
                );
            }
            let mut guard = self.state.wait_mutex.lock();
            let _ = self
                .state
                .data_available
                .wait_for(&mut guard, READ_WAIT_SLICE);
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.state.downloaded.load(Ordering::Acquire)
    }

    /// Expected size, 0 when the server did not say
    pub fn total_size(&self) -> u64 {
        self.state.total_size.load(Ordering::Acquire)
    }

    pub fn set_total_size(&self, size: u64) {
        self.state.total_size.store(size, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.state.complete.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Stop the download and fail pending reads
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.data_available.notify_all();
    }

    pub fn set_error(&self, error: String) {
        *self.state.error.write() = Some(error);
        self.state.data_available.notify_all();
    }

    pub fn mark_complete(&self) {
        self.state.complete.store(true, Ordering::Release);
        self.state.data_available.notify_all();
    }
}

/// Read+Seek cursor over a `SharedBuffer`
pub struct StreamingBuffer {
    shared: SharedBuffer,
    position: u64,
}

impl StreamingBuffer {
    pub fn new(shared: SharedBuffer) -> Self {
        Self {
            shared,
            position: 0,
        }
    }

    pub fn shared(&self) -> &SharedBuffer {
        &self.shared
    }
}

impl Read for StreamingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.shared.read_at(self.position, buf)?;
        self.position += bytes_read as u64;
        Ok(bytes_read)
    }
}

impl Seek for StreamingBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => {
                let size = if self.shared.is_complete() {
                    self.shared.downloaded()
                } else {
                    self.shared.total_size()
                };
                if size == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Cannot seek from end: unknown stream size",
                    ));
                }
                size as i64 + offset
            }
        };

        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek to negative position",
            ));
        }

        // Positions past the downloaded range are fine, reads will block
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

// ============ Download ============

/// Start downloading `url` into a fresh `SharedBuffer`
///
/// Returns immediately. Events go to `event_tx`; a closed receiver does
/// not stop the download, only `SharedBuffer::cancel` does.
pub fn start_download(
    client: reqwest::Client,
    url: String,
    event_tx: mpsc::Sender<StreamingEvent>,
) -> SharedBuffer {
    let buffer = SharedBuffer::new();
    let writer = buffer.clone();

    tokio::spawn(async move {
        let fail = |message: String| {
            let writer = writer.clone();
            let event_tx = event_tx.clone();
            async move {
                tracing::warn!("Stream download failed: {}", message);
                writer.set_error(message.clone());
                let _ = event_tx.send(StreamingEvent::Error(message)).await;
            }
        };

        let response = match client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => return fail(format!("HTTP {}", r.status())).await,
            Err(e) => return fail(e.to_string()).await,
        };

        let content_length = response.content_length();
        if let Some(len) = content_length {
            writer.set_total_size(len);
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = event_tx
            .send(StreamingEvent::Started {
                content_type,
                content_length,
            })
            .await;

        let mut stream = response.bytes_stream();
        let mut playable_sent = false;

        while let Some(chunk) = stream.next().await {
            if writer.is_cancelled() {
                tracing::debug!("Stream download cancelled at {} bytes", writer.downloaded());
                return;
            }
            match chunk {
                Ok(chunk) => {
                    writer.append(&chunk);
                    let downloaded = writer.downloaded();
                    if !playable_sent && downloaded >= PLAYABLE_THRESHOLD_BYTES {
                        playable_sent = true;
                        let _ = event_tx.send(StreamingEvent::Playable).await;
                    }
                    let _ = event_tx
                        .try_send(StreamingEvent::Progress(downloaded, writer.total_size()));
                }
                Err(e) => return fail(format!("Stream error: {}", e)).await,
            }
        }

        writer.mark_complete();
        tracing::debug!("Stream download complete: {} bytes", writer.downloaded());
        let _ = event_tx.send(StreamingEvent::Complete).await;
    });

    buffer
}

/// Wait until the download has enough data to decode
pub async fn wait_until_playable(
    event_rx: &mut mpsc::Receiver<StreamingEvent>,
    timeout: Duration,
) -> Result<(), StreamError> {
    let wait = async {
        while let Some(event) = event_rx.recv().await {
            match event {
                StreamingEvent::Started {
                    content_type: Some(content_type),
                    ..
                } if !is_audio_content_type(&content_type) => {
                    return Err(StreamError::NotAudio(content_type));
                }
                StreamingEvent::Playable | StreamingEvent::Complete => return Ok(()),
                StreamingEvent::Error(e) => return Err(StreamError::Download(e)),
                StreamingEvent::Started { .. } | StreamingEvent::Progress(..) => continue,
            }
        }
        Err(StreamError::Download("download task ended".to_string()))
    };
    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(Err(StreamError::Timeout))
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_read_at() {
        let buffer = SharedBuffer::new();
        buffer.append(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        let mut buf = [0u8; 5];
        assert_eq!(buffer.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(buf, [1, 2, 3, 4, 5]);
        assert_eq!(buffer.read_at(5, &mut buf).unwrap(), 5);
        assert_eq!(buf, [6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_shared_buffer_partial_read() {
        let buffer = SharedBuffer::new();
        buffer.append(&[1, 2, 3]);

        let mut buf = [0u8; 10];
        assert_eq!(buffer.read_at(0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_shared_buffer_eof_when_complete() {
        let buffer = SharedBuffer::new();
        buffer.append(&[1, 2, 3, 4, 5]);
        buffer.mark_complete();

        let mut buf = [0u8; 5];
        assert_eq!(buffer.read_at(5, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_cancel_fails_reads() {
        let buffer = SharedBuffer::new();
        buffer.append(&[1, 2, 3]);
        buffer.cancel();

        let mut buf = [0u8; 3];
        let err = buffer.read_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn test_error_fails_reads() {
        let buffer = SharedBuffer::new();
        buffer.set_error("HTTP 403".to_string());

        let mut buf = [0u8; 3];
        assert!(buffer.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_blocked_read_wakes_on_append() {
        let buffer = SharedBuffer::new();
        let writer = buffer.clone();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            let n = buffer.read_at(0, &mut buf).unwrap();
            buf[..n].to_vec()
        });

        std::thread::sleep(Duration::from_millis(20));
        writer.append(&[9, 8, 7]);
        assert_eq!(reader.join().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_blocked_read_wakes_on_cancel() {
        let buffer = SharedBuffer::new();
        let canceller = buffer.clone();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            buffer.read_at(0, &mut buf)
        });

        std::thread::sleep(Duration::from_millis(20));
        canceller.cancel();
        assert!(reader.join().unwrap().is_err());
    }

    #[test]
    fn test_streaming_buffer_read_advances() {
        let shared = SharedBuffer::new();
        shared.append(&[1, 2, 3, 4, 5, 6]);
        let mut streaming = StreamingBuffer::new(shared);

        let mut buf = [0u8; 3];
        streaming.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        streaming.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [4, 5, 6]);
    }

    #[test]
    fn test_streaming_buffer_seek() {
        let shared = SharedBuffer::new();
        shared.append(&[0; 50]);
        shared.set_total_size(100);
        let mut streaming = StreamingBuffer::new(shared);

        assert_eq!(streaming.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(streaming.seek(SeekFrom::Current(5)).unwrap(), 15);
        assert_eq!(streaming.seek(SeekFrom::Current(-5)).unwrap(), 10);
        assert_eq!(streaming.seek(SeekFrom::End(-10)).unwrap(), 90);
        assert!(streaming.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_seek_from_end_needs_size() {
        let mut streaming = StreamingBuffer::new(SharedBuffer::new());
        assert!(streaming.seek(SeekFrom::End(0)).is_err());
    }

    #[test]
    fn test_is_audio_content_type() {
        assert!(is_audio_content_type("audio/mpeg"));
        assert!(is_audio_content_type("audio/mp4; codecs=mp4a.40.2"));
        assert!(is_audio_content_type("application/octet-stream"));
        assert!(!is_audio_content_type("text/html; charset=utf-8"));
        assert!(!is_audio_content_type("application/json"));
    }

    #[tokio::test]
    async fn test_wait_until_playable_rejects_non_audio() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(StreamingEvent::Started {
            content_type: Some("text/html".to_string()),
            content_length: None,
        })
        .await
        .unwrap();

        let result = wait_until_playable(&mut rx, Duration::from_secs(1)).await;
        assert_eq!(result, Err(StreamError::NotAudio("text/html".to_string())));
    }

    #[tokio::test]
    async fn test_wait_until_playable_ok_on_complete() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(StreamingEvent::Progress(10, 10)).await.unwrap();
        tx.send(StreamingEvent::Complete).await.unwrap();
        assert!(wait_until_playable(&mut rx, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_until_playable_times_out() {
        let (_tx, mut rx) = mpsc::channel::<StreamingEvent>(4);
        let result = wait_until_playable(&mut rx, Duration::from_millis(20)).await;
        assert_eq!(result, Err(StreamError::Timeout));
    }
}
