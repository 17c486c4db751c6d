//! HTTP streaming backend.
//!
//! Each loaded clip is fetched with `reqwest`, decoded with `symphonia` and
//! written to a [`PcmSink`] chunk by chunk. The first decoded chunk reports
//! `Started`, the end of the stream reports `Ended`, and any fetch or decode
//! error reports `Failed`.
//!
//! The actual audio output is behind [`PcmSink`]: [`ClockSink`] paces the
//! stream at real time without producing sound, [`NullSink`] drains it as
//! fast as possible.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backend::{AudioBackend, AudioResource, EventSink};
use crate::{PlaybackError, SourceId};

/// Consecutive undecodable packets tolerated before giving up on a clip.
const DEFAULT_MAX_DECODE_ERRORS: usize = 16;

/// Interleaved PCM samples decoded from a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmChunk {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / usize::from(self.channels)
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

/// Destination of decoded audio.
#[async_trait]
pub trait PcmSink: Send {
    /// Consumes one chunk. Applies backpressure by taking as long as the
    /// chunk needs to be rendered.
    async fn write(&mut self, chunk: &PcmChunk) -> std::io::Result<()>;

    async fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Discards audio and waits for its duration, so clips end in real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockSink;

#[async_trait]
impl PcmSink for ClockSink {
    async fn write(&mut self, chunk: &PcmChunk) -> std::io::Result<()> {
        tokio::time::sleep(chunk.duration()).await;
        Ok(())
    }
}

/// Discards audio immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl PcmSink for NullSink {
    async fn write(&mut self, _chunk: &PcmChunk) -> std::io::Result<()> {
        Ok(())
    }
}

type SinkFactory = Arc<dyn Fn() -> Box<dyn PcmSink> + Send + Sync>;

/// [`AudioBackend`] playing HTTP(S) URLs.
#[derive(Clone)]
pub struct HttpStreamBackend {
    client: reqwest::Client,
    sink_factory: SinkFactory,
    max_decode_errors: usize,
}

impl HttpStreamBackend {
    /// Backend rendering to a [`ClockSink`].
    pub fn new() -> Self {
        Self::with_sink(|| Box::new(ClockSink))
    }

    /// Backend rendering each clip to a sink created by `factory`.
    pub fn with_sink<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn PcmSink> + Send + Sync + 'static,
    {
        Self {
            client: reqwest::Client::new(),
            sink_factory: Arc::new(factory),
            max_decode_errors: DEFAULT_MAX_DECODE_ERRORS,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_decode_errors(mut self, max: usize) -> Self {
        self.max_decode_errors = max;
        self
    }
}

impl Default for HttpStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpStreamBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStreamBackend")
            .field("max_decode_errors", &self.max_decode_errors)
            .finish_non_exhaustive()
    }
}

impl AudioBackend for HttpStreamBackend {
    fn load(&self, source: &SourceId, events: EventSink) -> Box<dyn AudioResource> {
        let cancel = CancellationToken::new();
        let (playing_tx, playing_rx) = watch::channel(false);

        let job = StreamJob {
            client: self.client.clone(),
            url: source.clone(),
            sink: (self.sink_factory)(),
            events,
            playing: playing_rx,
            max_decode_errors: self.max_decode_errors,
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(job.run(cancel.clone()));
            }
            Err(_) => {
                warn!(source = %source, "No tokio runtime, cannot stream audio");
                job.events
                    .failed(PlaybackError::network("no async runtime available"));
            }
        }

        Box::new(StreamResource {
            cancel,
            playing: playing_tx,
        })
    }
}

struct StreamResource {
    cancel: CancellationToken,
    playing: watch::Sender<bool>,
}

impl AudioResource for StreamResource {
    fn resume(&mut self) {
        self.playing.send_replace(true);
    }

    fn pause(&mut self) {
        self.playing.send_replace(false);
    }

    fn stop(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamResource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct StreamJob {
    client: reqwest::Client,
    url: SourceId,
    sink: Box<dyn PcmSink>,
    events: EventSink,
    playing: watch::Receiver<bool>,
    max_decode_errors: usize,
}

impl StreamJob {
    async fn run(mut self, cancel: CancellationToken) {
        let url = self.url.clone();
        let events = self.events.clone();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                trace!(source = %url, generation = events.generation(), "Stream cancelled");
                return;
            }
            result = self.stream() => result,
        };

        match result {
            Ok(()) => {
                debug!(source = %url, generation = events.generation(), "Stream ended");
                events.ended();
            }
            Err(e) => {
                debug!(source = %url, generation = events.generation(), error = %e, "Stream failed");
                events.failed(e);
            }
        }
    }

    async fn stream(&mut self) -> Result<(), PlaybackError> {
        let (data, extension, mime) = self.fetch().await?;
        let mut decoded = DecodedStream::open(
            data,
            extension.as_deref(),
            mime.as_deref(),
            self.max_decode_errors,
        )?;

        let mut started = false;
        while let Some(chunk) = decoded.next_chunk()? {
            if self.playing.wait_for(|playing| *playing).await.is_err() {
                return Err(PlaybackError::Aborted);
            }
            if !started {
                started = true;
                self.events.started();
            }
            self.sink
                .write(&chunk)
                .await
                .map_err(|e| PlaybackError::decode(format!("audio output error: {e}")))?;
        }

        if !started {
            return Err(PlaybackError::decode("no audio frames in stream"));
        }

        self.sink
            .flush()
            .await
            .map_err(|e| PlaybackError::decode(format!("audio output error: {e}")))
    }

    async fn fetch(&mut self) -> Result<(Bytes, Option<String>, Option<String>), PlaybackError> {
        let response = self
            .client
            .get(self.url.as_str())
            .send()
            .await
            .map_err(|e| PlaybackError::network(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::network(format!("HTTP {status}")));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let extension = Path::new(response.url().path())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let data = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::network(format!("body read failed: {e}")))?;

        if data.is_empty() {
            return Err(PlaybackError::decode("empty response body"));
        }

        trace!(
            source = %self.url,
            bytes = data.len(),
            mime = mime.as_deref().unwrap_or("-"),
            "Fetched audio clip"
        );

        Ok((data, extension, mime))
    }
}

/// Packet-by-packet decoder over an in-memory clip.
struct DecodedStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    decode_errors: usize,
    max_decode_errors: usize,
}

impl DecodedStream {
    fn open(
        data: Bytes,
        extension: Option<&str>,
        mime: Option<&str>,
        max_decode_errors: usize,
    ) -> Result<Self, PlaybackError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }
        if let Some(mime) = mime {
            hint.mime_type(mime);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::decode(format!("unsupported format: {e}")))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlaybackError::decode("no audio track"))?;

        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::decode(format!("unsupported codec: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            decode_errors: 0,
            max_decode_errors,
        })
    }

    /// Next non-empty chunk, or `None` at the end of the stream.
    fn next_chunk(&mut self) -> Result<Option<PcmChunk>, PlaybackError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(PlaybackError::decode(format!("read error: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    self.decode_errors += 1;
                    if self.decode_errors > self.max_decode_errors {
                        return Err(PlaybackError::decode(format!(
                            "too many corrupt packets: {e}"
                        )));
                    }
                    trace!(error = %e, "Skipping corrupt packet");
                    continue;
                }
                Err(e) => return Err(PlaybackError::decode(e.to_string())),
            };
            self.decode_errors = 0;

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            return Ok(Some(PcmChunk {
                samples: buffer.samples().to_vec(),
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
            }));
        }
    }
}
