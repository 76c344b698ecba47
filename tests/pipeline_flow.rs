use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use still_relay::config::RoutingPolicy;
use still_relay::error::{ConversionError, DispatchError, FetchError, RelayError};
use still_relay::media::staging::write_atomic;
use still_relay::media::{
    ConversionEngine, InboundAttachment, MediaSource, RemoteFile, StillConverter, Strategy,
};
use still_relay::relay::{
    ChatInfo, InboundMessage, JobOutcome, RelayPipeline, RelaySink, SenderInfo,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RELAY_CHAT: i64 = -100_777;

/// Serves a fixed payload or a fixed HTTP failure, optionally failing one
/// file id only.
struct FakeSource {
    payload: Result<Vec<u8>, u16>,
    missing_id: Option<String>,
    calls: AtomicUsize,
    targets: Mutex<Vec<PathBuf>>,
}

impl FakeSource {
    fn serving(bytes: Vec<u8>) -> Self {
        Self {
            payload: Ok(bytes),
            missing_id: None,
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            payload: Err(status),
            missing_id: None,
            calls: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    fn serving_except(missing_id: &str, bytes: Vec<u8>) -> Self {
        Self {
            missing_id: Some(missing_id.to_string()),
            ..Self::serving(bytes)
        }
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn fetch(&self, file: &RemoteFile, target: &Path) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets
            .lock()
            .expect("targets lock")
            .push(target.to_path_buf());
        let status = match &self.payload {
            _ if self.missing_id.as_deref() == Some(file.id.as_str()) => 404,
            Ok(bytes) => {
                write_atomic(target, bytes.clone()).await?;
                return Ok(bytes.len() as u64);
            }
            Err(status) => *status,
        };
        Err(FetchError::Status {
            status,
            reason: "Not Found".to_string(),
        })
    }
}

/// Starts a large staged write, then never finishes the download.
struct StallingSource {
    bytes: usize,
}

#[async_trait]
impl MediaSource for StallingSource {
    async fn fetch(&self, _file: &RemoteFile, target: &Path) -> Result<u64, FetchError> {
        write_atomic(target, vec![0u8; self.bytes]).await?;
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(self.bytes as u64)
    }
}

/// Stages its payload synchronously, so the fetch never yields.
struct InlineSource(Vec<u8>);

#[async_trait]
impl MediaSource for InlineSource {
    async fn fetch(&self, _file: &RemoteFile, target: &Path) -> Result<u64, FetchError> {
        std::fs::write(target, &self.0)?;
        Ok(self.0.len() as u64)
    }
}

/// Writes a small PNG regardless of input, recording the strategy used.
#[derive(Default)]
struct StubConverter {
    strategies: Mutex<Vec<Strategy>>,
}

#[async_trait]
impl StillConverter for StubConverter {
    async fn convert(
        &self,
        strategy: Strategy,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        assert!(input.exists(), "input must be staged before conversion");
        self.strategies
            .lock()
            .expect("strategies lock")
            .push(strategy);
        RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]))
            .save_with_format(output, ImageFormat::Png)
            .map_err(|e| ConversionError::Decode(e.to_string()))
    }
}

/// Records every dispatched still.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(i64, Vec<u8>, String)>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl RelaySink for RecordingSink {
    async fn send_still(
        &self,
        destination: i64,
        image: &Path,
        caption: &str,
    ) -> Result<(), DispatchError> {
        let bytes = std::fs::read(image).map_err(|e| DispatchError::Send(e.to_string()))?;
        self.sent
            .lock()
            .expect("sent lock")
            .push((destination, bytes, caption.to_string()));
        Ok(())
    }
}

fn staging_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "still-relay-flow-{label}-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create staging dir");
    dir
}

fn assert_empty(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .expect("read staging dir")
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    assert!(leftovers.is_empty(), "staging leaked: {leftovers:?}");
}

fn webp_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    RgbaImage::from_pixel(width, height, Rgba([20, 40, 60, 255]))
        .write_to(&mut buf, ImageFormat::WebP)
        .expect("encode webp");
    buf.into_inner()
}

fn private_message(chat_id: i64, attachment: InboundAttachment) -> InboundMessage {
    InboundMessage {
        message_id: 5,
        chat: Some(ChatInfo {
            id: chat_id,
            kind: "private".to_string(),
            title: None,
        }),
        sender: Some(SenderInfo {
            id: 1001,
            username: Some("alice".to_string()),
            first_name: Some("Alice".to_string()),
            last_name: None,
        }),
        text: None,
        attachment: Some(attachment),
    }
}

#[tokio::test]
async fn static_sticker_is_reencoded_and_relayed() {
    let dir = staging_dir("static");
    let source = FakeSource::serving(webp_bytes(64, 32));
    let sink = RecordingSink::default();
    let pipeline = RelayPipeline::new(
        source,
        ConversionEngine::new("ffmpeg", 1024),
        sink,
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Sticker {
            file: RemoteFile::new("s-static"),
            is_animated: false,
            is_video: false,
        },
    );
    let outcome = pipeline.handle(&message).await;
    assert!(matches!(outcome, JobOutcome::Done), "{outcome:?}");
    assert_empty(&dir);
}

#[tokio::test]
async fn relayed_still_is_png_with_caption() {
    let dir = staging_dir("png");
    let sink = Arc::new(RecordingSink::default());
    let pipeline = RelayPipeline::new(
        FakeSource::serving(webp_bytes(16, 16)),
        ConversionEngine::new("ffmpeg", 1024),
        SharedSink(sink.clone()),
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let mut message = private_message(
        42,
        InboundAttachment::Sticker {
            file: RemoteFile::new("s2"),
            is_animated: false,
            is_video: false,
        },
    );
    message.text = Some("hi".to_string());
    assert!(matches!(pipeline.handle(&message).await, JobOutcome::Done));

    let sent = sink.sent.lock().expect("sent lock");
    assert_eq!(sent.len(), 1);
    let (destination, bytes, caption) = &sent[0];
    assert_eq!(*destination, RELAY_CHAT);
    assert!(bytes.starts_with(b"\x89PNG"));
    assert_eq!(
        caption,
        "Extracted still from sticker\nFrom: @alice\nSource: private (42)\nText: hi"
    );
    drop(sent);
    assert_empty(&dir);
}

#[tokio::test]
async fn video_sticker_caption_names_kind_sender_and_source() {
    let dir = staging_dir("video-sticker");
    let source = Arc::new(FakeSource::serving(b"\x1aE\xdf\xa3webm".to_vec()));
    let converter = Arc::new(StubConverter::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = RelayPipeline::new(
        SharedSource(source.clone()),
        SharedConverter(converter.clone()),
        SharedSink(sink.clone()),
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Sticker {
            file: RemoteFile::new("s1"),
            is_animated: false,
            is_video: true,
        },
    );
    assert!(matches!(pipeline.handle(&message).await, JobOutcome::Done));

    let targets = source.targets.lock().expect("targets lock");
    assert!(targets[0].to_string_lossy().ends_with(".webm"));
    assert_eq!(
        *converter.strategies.lock().expect("strategies lock"),
        vec![Strategy::FrameExtract]
    );
    let sent = sink.sent.lock().expect("sent lock");
    assert!(sent[0].2.starts_with(
        "Extracted still from video sticker\nFrom: @alice\nSource: private (42)"
    ));
    assert_empty(&dir);
}

#[tokio::test]
async fn gif_document_is_staged_with_gif_extension() {
    let dir = staging_dir("gif-doc");
    let source = Arc::new(FakeSource::serving(b"GIF89a".to_vec()));
    let sink = Arc::new(RecordingSink::default());
    let pipeline = RelayPipeline::new(
        SharedSource(source.clone()),
        StubConverter::default(),
        SharedSink(sink.clone()),
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Document {
            file: RemoteFile::new("d1"),
            mime_type: Some("image/gif".to_string()),
            file_name: Some("x.GIF".to_string()),
        },
    );
    assert!(matches!(pipeline.handle(&message).await, JobOutcome::Done));

    let targets = source.targets.lock().expect("targets lock");
    assert_eq!(
        targets[0].extension().and_then(|e| e.to_str()),
        Some("gif")
    );
    let sent = sink.sent.lock().expect("sent lock");
    assert!(sent[0].2.starts_with("Extracted still from GIF (document)\n"));
    assert_empty(&dir);
}

#[tokio::test]
async fn not_found_download_fails_without_dispatch() {
    let dir = staging_dir("404");
    let converter = Arc::new(StubConverter::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = RelayPipeline::new(
        FakeSource::failing(404),
        SharedConverter(converter.clone()),
        SharedSink(sink.clone()),
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Animation {
            file: RemoteFile::new("gone"),
        },
    );
    let outcome = pipeline.handle(&message).await;
    assert!(
        matches!(
            outcome,
            JobOutcome::Failed(RelayError::Fetch(FetchError::Status { status: 404, .. }))
        ),
        "{outcome:?}"
    );
    assert!(converter.strategies.lock().expect("strategies lock").is_empty());
    assert_eq!(sink.count(), 0);
    assert_empty(&dir);
}

#[tokio::test]
async fn undecodable_sticker_fails_and_cleans_up() {
    let dir = staging_dir("corrupt");
    let sink = Arc::new(RecordingSink::default());
    let pipeline = RelayPipeline::new(
        FakeSource::serving(b"RIFF\x00\x00\x00\x00WEBPgarbage".to_vec()),
        ConversionEngine::new("ffmpeg", 1024),
        SharedSink(sink.clone()),
        Arc::new(RoutingPolicy::new(RELAY_CHAT)),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Sticker {
            file: RemoteFile::new("bad"),
            is_animated: false,
            is_video: false,
        },
    );
    let outcome = pipeline.handle(&message).await;
    assert!(
        matches!(outcome, JobOutcome::Failed(RelayError::Conversion(_))),
        "{outcome:?}"
    );
    assert_eq!(sink.count(), 0);
    assert_empty(&dir);
}

#[tokio::test]
async fn failing_job_does_not_affect_concurrent_job() {
    let dir = staging_dir("concurrent");
    let source = Arc::new(FakeSource::serving_except("bad", webp_bytes(8, 8)));
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Arc::new(
        RelayPipeline::new(
            SharedSource(source.clone()),
            StubConverter::default(),
            SharedSink(sink.clone()),
            Arc::new(RoutingPolicy::new(RELAY_CHAT)),
        )
        .with_staging_dir(&dir),
    );

    let sticker = |id: &str| InboundAttachment::Sticker {
        file: RemoteFile::new(id),
        is_animated: false,
        is_video: true,
    };
    let ok_msg = private_message(1, sticker("ok"));
    let bad_msg = private_message(2, sticker("bad"));

    let ok_task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.handle(&ok_msg).await }
    });
    let bad_task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.handle(&bad_msg).await }
    });

    let ok_outcome = ok_task.await.expect("ok task");
    let bad_outcome = bad_task.await.expect("bad task");
    assert!(matches!(ok_outcome, JobOutcome::Done), "{ok_outcome:?}");
    assert!(
        matches!(
            bad_outcome,
            JobOutcome::Failed(RelayError::Fetch(FetchError::Status { status: 404, .. }))
        ),
        "{bad_outcome:?}"
    );
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let sent = sink.sent.lock().expect("sent lock");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].2.contains("Source: private (1)"));
    drop(sent);
    assert_empty(&dir);
}

#[tokio::test]
async fn fetch_timeout_leaves_no_partial_download() {
    let dir = staging_dir("fetch-timeout");
    let sink = Arc::new(RecordingSink::default());
    let mut policy = RoutingPolicy::new(RELAY_CHAT);
    policy.step_timeout = Some(Duration::from_millis(5));
    let pipeline = RelayPipeline::new(
        StallingSource {
            bytes: 16 * 1024 * 1024,
        },
        StubConverter::default(),
        SharedSink(sink.clone()),
        Arc::new(policy),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Animation {
            file: RemoteFile::new("slow"),
        },
    );
    let outcome = pipeline.handle(&message).await;
    assert!(
        matches!(
            outcome,
            JobOutcome::Failed(RelayError::Timeout { stage: "fetch", .. })
        ),
        "{outcome:?}"
    );

    // Let the abandoned write finish before looking
    tokio::time::sleep(Duration::from_millis(750)).await;
    assert_eq!(sink.count(), 0);
    assert_empty(&dir);
}

#[tokio::test]
async fn convert_timeout_leaves_no_late_output() {
    let dir = staging_dir("convert-timeout");
    let sink = Arc::new(RecordingSink::default());
    let mut policy = RoutingPolicy::new(RELAY_CHAT);
    policy.step_timeout = Some(Duration::from_millis(1));
    let pipeline = RelayPipeline::new(
        InlineSource(webp_bytes(1024, 1024)),
        ConversionEngine::new("ffmpeg", 1024),
        SharedSink(sink.clone()),
        Arc::new(policy),
    )
    .with_staging_dir(&dir);

    let message = private_message(
        42,
        InboundAttachment::Sticker {
            file: RemoteFile::new("big"),
            is_animated: false,
            is_video: false,
        },
    );
    let outcome = pipeline.handle(&message).await;
    assert!(
        matches!(
            outcome,
            JobOutcome::Failed(RelayError::Timeout {
                stage: "convert",
                ..
            })
        ),
        "{outcome:?}"
    );

    // The re-encode keeps running on the blocking pool after the timeout
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sink.count(), 0);
    assert_empty(&dir);
}

struct SharedSource(Arc<FakeSource>);

#[async_trait]
impl MediaSource for SharedSource {
    async fn fetch(&self, file: &RemoteFile, target: &Path) -> Result<u64, FetchError> {
        self.0.fetch(file, target).await
    }
}

struct SharedConverter(Arc<StubConverter>);

#[async_trait]
impl StillConverter for SharedConverter {
    async fn convert(
        &self,
        strategy: Strategy,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        self.0.convert(strategy, input, output).await
    }
}

struct SharedSink(Arc<RecordingSink>);

#[async_trait]
impl RelaySink for SharedSink {
    async fn send_still(
        &self,
        destination: i64,
        image: &Path,
        caption: &str,
    ) -> Result<(), DispatchError> {
        self.0.send_still(destination, image, caption).await
    }
}
