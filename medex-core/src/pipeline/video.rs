//! Video conversion: probe, best-effort subtitle extraction, transcode with
//! live progress, post-convert dedup, thumbnail, sound detection, preview
//! clip, and finally the catalog record.

use super::{subtitles, PipelineContext};
use crate::config::VideoConfig;
use crate::error::{IndexError, Result};
use crate::slots::InFlight;
use medex_model::{IndexEvent, MediaKind, SoundInfo};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub async fn convert(ctx: &PipelineContext, slot: usize, file: &Path) -> Result<()> {
    let kind = MediaKind::Video;
    let cfg = &ctx.options.video;

    if ctx.skip(kind, file).await? {
        return Ok(());
    }

    let hasher = ctx.hasher(kind);
    let id = hasher.hash(file).await?;
    let occurrence = ctx.occurrence(id.clone(), file).await?;
    let name = occurrence.name.clone();

    if let InFlight::Adopted { owner } = ctx.slots.begin(slot, id.clone(), occurrence) {
        debug!("{} already converting in slot {owner}", id);
        ctx.stats.add_duplicate();
        ctx.events.publish(&IndexEvent::Duplicate {
            kind,
            id: id.to_string(),
            path: file.to_path_buf(),
        });
        return Ok(());
    }

    if let Some(mut model) = ctx.lookup(&id).await? {
        let occurrences = ctx.slots.finish(slot);
        ctx.duplicate(kind, &mut model, occurrences).await?;
        ctx.stats.add_duplicate();
        ctx.events.publish(&IndexEvent::Duplicate {
            kind,
            id: model.id.to_string(),
            path: file.to_path_buf(),
        });
        return Ok(());
    }

    ctx.ui.attach(slot, kind, &name);

    let source_info = probe(ctx, cfg, file).await?;

    let common = ctx.common(kind);
    let directory = common.save.join(id.shard());
    let output = directory.join(format!("{}.{}", id.rest(), cfg.format));
    let preview_path = directory.join(format!("{}p.{}", id.rest(), cfg.format));
    let thumbnail_path = directory.join(format!("{}p.{}", id.rest(), cfg.thumbnail_format));
    let subtitles_path = directory.join(format!("{}.{}", id.rest(), cfg.subtitle_format));
    ctx.ensure_dir(&directory).await?;

    let subtitle_text = extract_subtitles(ctx, cfg, file, &subtitles_path, &source_info).await;

    transcode(ctx, cfg, slot, file, &output, &subtitles_path, &directory).await?;
    ctx.set_mode(kind, &output).await?;

    // Two different sources can transcode to identical canonical bytes;
    // the output hash is the second dedup gate.
    let hash = hasher.hash(&output).await?;
    if let Some(mut model) = ctx.lookup(&hash).await? {
        let occurrences = ctx.slots.finish(slot);
        ctx.duplicate(kind, &mut model, occurrences).await?;
        ctx.discard(&output).await;
        ctx.discard(&subtitles_path).await;
        ctx.discard_dir(&directory).await;
        ctx.stats.add_duplicate();
        ctx.events.publish(&IndexEvent::Duplicate {
            kind,
            id: model.id.to_string(),
            path: file.to_path_buf(),
        });
        return Ok(());
    }

    let time = thumbnail_time(cfg.thumbnail_time, source_info.duration.unwrap_or(f64::NAN));
    let (bin, args) = cfg.thumbnail.render(&[
        ("input", output.display().to_string()),
        ("thumbnail", thumbnail_path.display().to_string()),
        ("time", format!("{time:04}")),
        ("geometry", cfg.thumbnail_geometry.clone()),
    ]);
    if let Err(source) = ctx.exec.run(&bin, &args).await {
        discard_artifacts(ctx, &[&thumbnail_path, &output, &subtitles_path], &directory).await;
        return Err(IndexError::ThumbnailFailed {
            path: file.to_path_buf(),
            source,
        });
    }
    ctx.set_mode(kind, &thumbnail_path).await?;

    // Canonical metadata comes from the converted artifact.
    let (size, _) = ctx.stat(&output).await?;
    let output_info = match probe(ctx, cfg, &output).await {
        Ok(info) => info,
        Err(err) => {
            discard_artifacts(ctx, &[&thumbnail_path, &output, &subtitles_path], &directory).await;
            return Err(err);
        }
    };

    let sound = if cfg.check_sound {
        let (bin, args) = cfg.sound.render(&[("input", output.display().to_string())]);
        match ctx.exec.run(&bin, &args).await {
            Ok(report) => sound_info(&report.stderr, cfg.sound_threshold),
            Err(source) => {
                discard_artifacts(ctx, &[&thumbnail_path, &output, &subtitles_path], &directory)
                    .await;
                return Err(IndexError::SoundCheckFailed {
                    path: file.to_path_buf(),
                    source,
                });
            }
        }
    } else {
        SoundInfo::silent()
    };

    let duration = output_info.duration.or(source_info.duration);
    let interval = preview_interval(duration, cfg.preview_duration);
    let (bin, args) = cfg.preview.render(&[
        ("input", output.display().to_string()),
        ("output", preview_path.display().to_string()),
        ("interval", interval.to_string()),
        ("geometry", cfg.preview_geometry.clone()),
    ]);
    if let Err(source) = ctx.exec.run(&bin, &args).await {
        discard_artifacts(
            ctx,
            &[&preview_path, &thumbnail_path, &output, &subtitles_path],
            &directory,
        )
        .await;
        return Err(IndexError::PreviewFailed {
            path: file.to_path_buf(),
            source,
        });
    }
    ctx.set_mode(kind, &preview_path).await?;

    let mut record = ctx.collect_record(slot, id.clone(), hash, kind)?;
    record.relative = ctx.relative(kind, &output);
    record.thumbnail = Some(ctx.relative(kind, &thumbnail_path));
    record.preview = Some(ctx.relative(kind, &preview_path));
    record.size = size;
    record.duration = duration;
    record.width = output_info.width.or(source_info.width);
    record.height = output_info.height.or(source_info.height);
    record.aspect = output_info.aspect.or(source_info.aspect);
    record.sound = Some(sound);

    if let Some(text) = &subtitle_text {
        record.subtitles = Some(ctx.relative(kind, &subtitles_path));
        if cfg.subtitles_to_description {
            record.description = text.clone();
            ctx.index_document(
                &cfg.subtitles_index,
                id.as_str(),
                json!({ "name": record.name, "contents": text }),
            )
            .await?;
        }
    }

    ctx.tag(kind, &mut record).await?;
    ctx.index_document(
        &cfg.index,
        id.as_str(),
        json!({ "name": record.name, "description": record.description }),
    )
    .await?;
    ctx.refresh_index(&cfg.index).await?;
    ctx.insert(&record).await?;
    ctx.merge_latecomers(kind, slot, &mut record).await?;

    let sources: Vec<_> = record
        .metadata
        .occurrences
        .iter()
        .map(|o| o.file.clone())
        .collect();
    ctx.delete_source(kind, file).await;
    ctx.mark_indexed(sources);
    ctx.stats.add_converted(kind);
    ctx.events.publish(&IndexEvent::Indexed {
        kind,
        id: id.to_string(),
        path: file.to_path_buf(),
    });
    Ok(())
}

/// Probe metadata the pipeline cares about.
#[derive(Debug, Clone, Default)]
struct ProbeInfo {
    duration: Option<f64>,
    width: Option<u64>,
    height: Option<u64>,
    aspect: Option<f64>,
    has_subtitle_stream: bool,
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    format: Option<RawFormat>,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    codec_type: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    display_aspect_ratio: Option<String>,
}

async fn probe(ctx: &PipelineContext, cfg: &VideoConfig, path: &Path) -> Result<ProbeInfo> {
    let (bin, args) = cfg.probe.render(&[("input", path.display().to_string())]);
    let output = ctx
        .exec
        .run(&bin, &args)
        .await
        .map_err(|err| IndexError::ProbeFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    parse_probe(&output.stdout).map_err(|reason| IndexError::ProbeFailed {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_probe(json: &str) -> std::result::Result<ProbeInfo, String> {
    let raw: RawProbe = serde_json::from_str(json).map_err(|err| err.to_string())?;
    let mut info = ProbeInfo {
        duration: raw
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite()),
        ..ProbeInfo::default()
    };
    for stream in &raw.streams {
        match stream.codec_type.as_deref() {
            Some("video") if info.width.is_none() => {
                info.width = stream.width;
                info.height = stream.height;
                info.aspect = stream
                    .display_aspect_ratio
                    .as_deref()
                    .and_then(parse_aspect)
                    .or_else(|| match (stream.width, stream.height) {
                        (Some(w), Some(h)) if h > 0 => Some(w as f64 / h as f64),
                        _ => None,
                    });
            }
            Some("subtitle") => info.has_subtitle_stream = true,
            _ => {}
        }
    }
    Ok(info)
}

fn parse_aspect(dar: &str) -> Option<f64> {
    let (w, h) = dar.split_once(':')?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    if h > 0.0 {
        Some(w / h)
    } else {
        None
    }
}

/// Copy a sibling subtitle file or extract an embedded stream, then reduce
/// it to plain text. Entirely best-effort: any failure means "no
/// subtitles", never a pipeline failure.
async fn extract_subtitles(
    ctx: &PipelineContext,
    cfg: &VideoConfig,
    source: &Path,
    target: &Path,
    info: &ProbeInfo,
) -> Option<String> {
    let kind = MediaKind::Video;
    let sibling = source.with_extension(&cfg.subtitle_format);
    let sibling_is_file = tokio::fs::metadata(&sibling)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    if sibling_is_file {
        if let Err(err) = ctx.copy(&sibling, target).await {
            warn!("{err}");
            return None;
        }
        if let Err(err) = ctx.set_mode(kind, target).await {
            warn!("{err}");
        }
    } else if info.has_subtitle_stream {
        let vars = [
            ("input", source.display().to_string()),
            ("file", target.display().to_string()),
            ("language", cfg.subtitle_language.clone()),
        ];
        let (bin, args) = cfg.subtitle.render(&vars);
        if ctx.exec.run(&bin, &args).await.is_err() {
            let (bin, args) = cfg.subtitle_fallback.render(&vars);
            if let Err(err) = ctx.exec.run(&bin, &args).await {
                warn!(
                    "{}",
                    IndexError::SubtitleExtractFailed {
                        path: source.to_path_buf(),
                        reason: err.to_string(),
                    }
                );
                return None;
            }
        }
        if let Err(err) = ctx.set_mode(kind, target).await {
            warn!("{err}");
        }
    } else {
        return None;
    }

    let raw = match tokio::fs::read(target).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            warn!("cannot read {}: {err}", target.display());
            ctx.discard(target).await;
            return None;
        }
    };
    match subtitles::text(&raw) {
        Some(text) => Some(text),
        None => {
            debug!("subtitles for {} failed sanity", source.display());
            ctx.discard(target).await;
            None
        }
    }
}

/// Run the convert template, feeding transcode progress to the slot UI.
/// The progress total is unknown until the tool reports `Duration:`.
async fn transcode(
    ctx: &PipelineContext,
    cfg: &VideoConfig,
    slot: usize,
    source: &Path,
    output: &Path,
    subtitles_path: &Path,
    directory: &Path,
) -> Result<()> {
    let mut vars = vec![
        ("input", source.display().to_string()),
        ("output", output.display().to_string()),
        ("format", cfg.format.clone()),
    ];
    if let Some(framerate) = cfg.framerate {
        vars.push(("framerate", framerate.to_string()));
    }
    let (bin, args) = cfg.convert.render(&vars);

    let ui = ctx.ui.clone();
    let mut total_known = false;
    let mut tail: Vec<String> = Vec::new();
    let mut on_line = |line: &str| {
        if tail.len() == 10 {
            tail.remove(0);
        }
        tail.push(line.to_string());
        if !total_known {
            if let Some(total) = duration_in(line) {
                total_known = true;
                ui.set_progress_total(slot, total);
            }
        }
        if let Some(value) = time_in(line) {
            ui.set_progress_value(slot, value);
        }
    };

    let code = ctx
        .exec
        .run_stream(&bin, &args, &mut on_line)
        .await
        .map_err(|err| IndexError::ConvertFailed {
            path: source.to_path_buf(),
            reason: err.to_string(),
        })?;
    drop(on_line);
    if code != 0 {
        discard_artifacts(ctx, &[output, subtitles_path], directory).await;
        return Err(IndexError::ConvertFailed {
            path: source.to_path_buf(),
            reason: format!("exit status {code}: {}", tail.join("\n")),
        });
    }
    Ok(())
}

async fn discard_artifacts(ctx: &PipelineContext, paths: &[&Path], directory: &Path) {
    for path in paths {
        ctx.discard(path).await;
    }
    ctx.discard_dir(directory).await;
}

/// Thumbnail capture point: the configured time, pulled inside the clip,
/// floored, and clamped to zero for degenerate durations. The finiteness
/// check comes first because `f64::min` ignores a NaN operand.
fn thumbnail_time(preferred: f64, duration: f64) -> u64 {
    if !duration.is_finite() {
        return 0;
    }
    let time = preferred.min(duration - 1.0);
    if !time.is_finite() || time < 0.0 {
        0
    } else {
        time.floor() as u64
    }
}

/// Frame-sampling interval for the preview clip.
fn preview_interval(duration: Option<f64>, preview_duration: f64) -> u64 {
    match duration {
        Some(duration) if duration.is_finite() && preview_duration > 0.0 => {
            ((duration / preview_duration).ceil() as u64).max(1)
        }
        _ => 1,
    }
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap())
}

fn parse_clock(value: &str) -> Option<f64> {
    let captures = clock_regex().captures(value)?;
    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `Duration: 00:42:30.48, start: ...` → seconds.
fn duration_in(line: &str) -> Option<f64> {
    let rest = line.split("Duration:").nth(1)?;
    parse_clock(rest.split(',').next()?.trim())
}

/// `... time=00:00:41.36 bitrate=...` → seconds.
fn time_in(line: &str) -> Option<f64> {
    let rest = line.split("time=").nth(1)?;
    parse_clock(rest.split_whitespace().next()?)
}

fn volume_in(stderr: &str, key: &str) -> Option<f64> {
    let line = stderr.lines().find(|line| line.contains(key))?;
    let value = line.split(':').nth(1)?.trim().trim_end_matches("dB").trim();
    value.parse().ok()
}

/// Parse volumedetect output; unparsable reports fall back to the silent
/// sentinel values.
fn sound_info(stderr: &str, threshold: f64) -> SoundInfo {
    let mean = volume_in(stderr, "mean_volume").unwrap_or(-91.0);
    let max = volume_in(stderr, "max_volume").unwrap_or(-91.0);
    SoundInfo {
        silent: mean <= threshold,
        mean,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_lines_parse_to_seconds() {
        assert_eq!(parse_clock("00:00:10.00").unwrap(), 10.0);
        assert_eq!(parse_clock("01:02:03.5").unwrap(), 3723.5);
        assert!(parse_clock("garbage").is_none());
    }

    #[test]
    fn duration_and_time_are_extracted_from_transcode_output() {
        let line = "  Duration: 00:42:30.48, start: 0.000000, bitrate: 5823 kb/s";
        assert!((duration_in(line).unwrap() - 2550.48).abs() < 1e-9);

        let line = "frame=  100 fps= 30 q=28.0 size=  256kB time=00:00:41.36 bitrate= 244.8kbits/s";
        assert!((time_in(line).unwrap() - 41.36).abs() < 1e-9);
        assert!(duration_in(line).is_none());
    }

    #[test]
    fn thumbnail_time_is_clamped() {
        assert_eq!(thumbnail_time(10.0, 120.0), 10);
        assert_eq!(thumbnail_time(10.0, 5.5), 4);
        assert_eq!(thumbnail_time(10.0, 1.0), 0);
        assert_eq!(thumbnail_time(10.0, 0.5), 0);
        assert_eq!(thumbnail_time(10.0, f64::NAN), 0);
        assert_eq!(thumbnail_time(10.0, f64::INFINITY), 0);
        assert_eq!(thumbnail_time(f64::INFINITY, f64::INFINITY), 0);
    }

    #[test]
    fn preview_interval_covers_degenerate_durations() {
        assert_eq!(preview_interval(Some(90.0), 30.0), 3);
        assert_eq!(preview_interval(Some(10.0), 30.0), 1);
        assert_eq!(preview_interval(None, 30.0), 1);
        assert_eq!(preview_interval(Some(f64::NAN), 30.0), 1);
    }

    #[test]
    fn volumedetect_output_parses() {
        let stderr = "\
[Parsed_volumedetect_0 @ 0x55] n_samples: 4096
[Parsed_volumedetect_0 @ 0x55] mean_volume: -23.5 dB
[Parsed_volumedetect_0 @ 0x55] max_volume: -4.0 dB
";
        let sound = sound_info(stderr, -90.0);
        assert!(!sound.silent);
        assert_eq!(sound.mean, -23.5);
        assert_eq!(sound.max, -4.0);

        let sound = sound_info("no volume report here", -90.0);
        assert!(sound.silent);
        assert_eq!(sound.mean, -91.0);
        assert_eq!(sound.max, -91.0);
    }

    #[test]
    fn probe_json_reduces_to_the_interesting_fields() {
        let json = r#"{
            "format": { "duration": "90.5" },
            "streams": [
                { "codec_type": "audio" },
                { "codec_type": "video", "width": 1920, "height": 1080,
                  "display_aspect_ratio": "16:9" },
                { "codec_type": "subtitle" }
            ]
        }"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.duration, Some(90.5));
        assert_eq!((info.width, info.height), (Some(1920), Some(1080)));
        assert!((info.aspect.unwrap() - 16.0 / 9.0).abs() < 1e-9);
        assert!(info.has_subtitle_stream);

        assert!(parse_probe("not json").is_err());
    }

    #[test]
    fn aspect_falls_back_to_frame_dimensions() {
        let json = r#"{ "streams": [ { "codec_type": "video", "width": 640, "height": 480 } ] }"#;
        let info = parse_probe(json).unwrap();
        assert!((info.aspect.unwrap() - 4.0 / 3.0).abs() < 1e-9);
    }
}
