//! Video pipeline end to end: scripted ffprobe/ffmpeg, progress parsing,
//! both dedup gates, subtitles and failure cleanup.

mod support;

use medex_core::exec::script::{ScriptedExec, ScriptedResult};
use medex_core::SlotUi;
use medex_model::Fingerprint;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use support::{base_options, harness, sha256_hex, with_shasum, write_file};
use tempfile::tempdir;

fn arg_after(args: &[String], flag: &str) -> Option<PathBuf> {
    let at = args.iter().position(|a| a == flag)?;
    args.get(at + 1).map(PathBuf::from)
}

fn probe_json(with_subtitles: bool) -> String {
    let mut streams = vec![
        r#"{ "codec_type": "video", "width": 1280, "height": 720, "display_aspect_ratio": "16:9" }"#
            .to_string(),
        r#"{ "codec_type": "audio" }"#.to_string(),
    ];
    if with_subtitles {
        streams.push(r#"{ "codec_type": "subtitle" }"#.to_string());
    }
    format!(
        r#"{{ "format": {{ "duration": "90.5" }}, "streams": [ {} ] }}"#,
        streams.join(", ")
    )
}

/// ffmpeg stands in for transcode, thumbnail, preview, volumedetect and
/// subtitle extraction; the argument shapes tell them apart.
fn ffmpeg_handler(transcoded: &'static [u8]) -> impl Fn(&[String]) -> ScriptedResult {
    move |args: &[String]| {
        let joined = args.join(" ");
        if joined.contains("volumedetect") {
            return ScriptedResult {
                stderr_lines: vec![
                    "[Parsed_volumedetect_0 @ 0x1] mean_volume: -23.5 dB".into(),
                    "[Parsed_volumedetect_0 @ 0x1] max_volume: -4.0 dB".into(),
                ],
                ..Default::default()
            };
        }
        if joined.contains("-vframes") {
            return ScriptedResult {
                write: Some((PathBuf::from(&args[args.len() - 1]), b"frame".to_vec())),
                ..Default::default()
            };
        }
        if joined.contains("fps=1/") {
            return ScriptedResult {
                write: Some((PathBuf::from(&args[args.len() - 1]), b"preview".to_vec())),
                ..Default::default()
            };
        }
        if joined.contains("0:s:m:language") {
            // Primary subtitle extraction is scripted to fail so the
            // fallback mapping gets exercised.
            return ScriptedResult::failure(1);
        }
        if joined.contains("0:s:0") {
            let srt = "1\n00:00:01,000 --> 00:00:02,000\nEmbedded line\n";
            return ScriptedResult {
                write: Some((PathBuf::from(&args[args.len() - 1]), srt.as_bytes().to_vec())),
                ..Default::default()
            };
        }
        // Transcode: fail for sources named bad*, otherwise write the
        // canonical bytes and report progress on stderr.
        let input = arg_after(args, "-i").unwrap_or_default();
        if input
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("bad"))
            .unwrap_or(false)
        {
            return ScriptedResult {
                code: 1,
                stderr_lines: vec!["Invalid data found when processing input".into()],
                ..Default::default()
            };
        }
        ScriptedResult {
            stderr_lines: vec![
                "  Duration: 00:01:30.50, start: 0.000000, bitrate: 1000 kb/s".into(),
                "frame=  100 fps= 30 q=28.0 size=     256kB time=00:00:41.36 bitrate= 244.8kbits/s"
                    .into(),
                "frame=  200 fps= 30 q=28.0 size=     512kB time=00:01:30.50 bitrate= 244.8kbits/s"
                    .into(),
            ],
            write: Some((PathBuf::from(&args[args.len() - 1]), transcoded.to_vec())),
            ..Default::default()
        }
    }
}

fn toolchain(with_subtitles: bool, transcoded: &'static [u8]) -> ScriptedExec {
    with_shasum(ScriptedExec::new())
        .on("ffprobe", move |_args| {
            ScriptedResult::stdout(probe_json(with_subtitles))
        })
        .on("ffmpeg", ffmpeg_handler(transcoded))
}

/// Records slot progress so transcode reporting is observable without a
/// terminal.
#[derive(Default)]
struct RecordingUi {
    totals: Mutex<Vec<f64>>,
    values: Mutex<Vec<f64>>,
}

impl SlotUi for RecordingUi {
    fn set_progress_total(&self, _slot: usize, total: f64) {
        self.totals.lock().unwrap().push(total);
    }

    fn set_progress_value(&self, _slot: usize, value: f64) {
        self.values.lock().unwrap().push(value);
    }
}

#[tokio::test]
async fn cold_video_produces_record_and_all_artifacts() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("movie.mp4"), b"raw camera bytes");

    let h = harness(base_options(&save), toolchain(false, b"canonical video"));
    let stats = h.indexer.scan_paths(&[root]).await.unwrap();

    assert_eq!(stats.videos, 1);
    assert_eq!(stats.converted, 1);
    assert_eq!(stats.failed, 0);

    let records = h.catalog.dump().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    let source_digest = sha256_hex(b"raw camera bytes");
    let output_digest = sha256_hex(b"canonical video");
    assert_eq!(record.id, Fingerprint::new(source_digest.as_str()));
    assert_eq!(record.hash, Fingerprint::new(output_digest.as_str()));
    assert!(record.sources.contains(&record.id));
    assert!(record.sources.contains(&record.hash));
    assert_eq!(record.duration, Some(90.5));
    assert_eq!((record.width, record.height), (Some(1280), Some(720)));
    let sound = record.sound.unwrap();
    assert!(!sound.silent);
    assert_eq!(sound.mean, -23.5);

    // Canonical artifact plus preview and thumbnail, sharded by id.
    let shard = &source_digest[..2];
    let rest = &source_digest[2..];
    assert_eq!(record.relative, format!("{shard}/{rest}.mp4"));
    assert_eq!(
        std::fs::read(save.join(&record.relative)).unwrap(),
        b"canonical video"
    );
    assert!(save.join(format!("{shard}/{rest}p.mp4")).is_file());
    assert!(save.join(format!("{shard}/{rest}p.png")).is_file());
    assert!(record.subtitles.is_none());
}

#[tokio::test]
async fn transcode_progress_is_reported_through_the_slot_ui() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("movie.mp4"), b"raw camera bytes");

    let ui = Arc::new(RecordingUi::default());
    let catalog = Arc::new(medex_core::MemoryCatalog::new());
    let backends = medex_core::Backends::new(catalog)
        .with_exec(Arc::new(toolchain(false, b"canonical video")))
        .with_ui(ui.clone());
    let indexer = medex_core::Indexer::new(base_options(&save), "test", backends).unwrap();
    indexer.scan_paths(&[root]).await.unwrap();

    // Total becomes known exactly once, from the Duration line.
    assert_eq!(ui.totals.lock().unwrap().as_slice(), &[90.5]);
    let values = ui.values.lock().unwrap();
    assert!(values.iter().any(|v| (v - 41.36).abs() < 1e-9));
    assert!(values.iter().any(|v| (v - 90.5).abs() < 1e-9));
}

#[tokio::test]
async fn identical_sources_fold_by_source_fingerprint() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("a.mp4"), b"same raw bytes");
    write_file(&root.join("b.mp4"), b"same raw bytes");

    let h = harness(base_options(&save), toolchain(false, b"canonical video"));
    let stats = h.indexer.scan_paths(&[root]).await.unwrap();

    assert_eq!(stats.converted, 1);
    assert_eq!(stats.duplicates, 1);
    let records = h.catalog.dump().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.occurrences.len(), 2);
}

#[tokio::test]
async fn distinct_sources_with_identical_output_fold_by_output_fingerprint() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("one.mp4"), b"first raw bytes");
    write_file(&root.join("two.mp4"), b"second raw bytes");

    // Serialise the slots so the second conversion sees the first record.
    let mut options = base_options(&save);
    options.concurrency = 1;
    let h = harness(options, toolchain(false, b"same canonical output"));
    let stats = h.indexer.scan_paths(&[root]).await.unwrap();

    assert_eq!(stats.converted, 1);
    assert_eq!(stats.duplicates, 1);

    let records = h.catalog.dump().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    let output_digest = sha256_hex(b"same canonical output");
    assert_eq!(record.hash, Fingerprint::new(output_digest.as_str()));
    assert!(record
        .sources
        .contains(&Fingerprint::new(sha256_hex(b"first raw bytes").as_str())));
    assert!(record
        .sources
        .contains(&Fingerprint::new(sha256_hex(b"second raw bytes").as_str())));
    assert_eq!(record.metadata.occurrences.len(), 2);

    // Exactly one canonical artifact tree survives.
    let shards: Vec<_> = std::fs::read_dir(&save)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(shards.len(), 1);
}

#[tokio::test]
async fn failed_transcodes_leave_no_partial_output() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("bad.mp4"), b"corrupt bytes");

    let h = harness(base_options(&save), toolchain(false, b"unused"));
    let stats = h.indexer.scan_paths(&[root]).await.unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.converted, 0);
    assert!(h.catalog.is_empty().await);
    // The shard directory was cleaned back out.
    assert!(!save.exists() || std::fs::read_dir(&save).unwrap().next().is_none());
}

#[tokio::test]
async fn sibling_subtitles_are_adopted_and_described() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("movie.mp4"), b"raw camera bytes");
    write_file(
        &root.join("movie.srt"),
        b"1\n00:00:01,000 --> 00:00:02,000\nHello from the side file\n",
    );

    let h = harness(base_options(&save), toolchain(false, b"canonical video"));
    h.indexer.scan_paths(&[root]).await.unwrap();

    let records = h.catalog.dump().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    let subtitles = record.subtitles.as_deref().unwrap();
    assert!(subtitles.ends_with(".srt"));
    assert!(save.join(subtitles).is_file());
    assert_eq!(record.description, "Hello from the side file");

    // The dedicated subtitles index received the text.
    let doc = h
        .search
        .document("subtitles", record.id.as_str())
        .await
        .unwrap();
    assert_eq!(doc["contents"], "Hello from the side file");
}

#[tokio::test]
async fn embedded_subtitles_fall_back_to_the_second_mapping() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    let save = dir.path().join("save");
    write_file(&root.join("embed.mp4"), b"raw camera bytes");

    let h = harness(base_options(&save), toolchain(true, b"canonical video"));
    h.indexer.scan_paths(&[root]).await.unwrap();

    let records = h.catalog.dump().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.subtitles.is_some());
    assert_eq!(record.description, "Embedded line");
    // Primary mapping ran and failed before the fallback.
    assert!(h
        .exec
        .calls()
        .iter()
        .any(|(_, args)| args.join(" ").contains("0:s:m:language")));
}
