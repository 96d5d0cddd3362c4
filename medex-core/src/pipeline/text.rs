//! Text normalisation: canonicalise the contents (optionally through the
//! configured processor), summarise, compress and catalog.

use super::PipelineContext;
use crate::config::CompressionKind;
use crate::error::{IndexError, Result};
use crate::slots::InFlight;
use medex_model::{IndexEvent, MediaKind};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tracing::debug;

pub async fn convert(ctx: &PipelineContext, slot: usize, file: &Path) -> Result<()> {
    let kind = MediaKind::Text;
    let cfg = &ctx.options.text;

    if ctx.skip(kind, file).await? {
        return Ok(());
    }

    let hasher = ctx.hasher(kind);
    let id = hasher.hash(file).await?;
    let occurrence = ctx.occurrence(id.clone(), file).await?;
    let name = occurrence.name.clone();
    let extension = occurrence.extension.clone();
    let source_size = occurrence.size;

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

    if source_size < cfg.minimum || cfg.maximum.is_some_and(|max| source_size > max) {
        debug!("{} is {source_size} bytes, out of range", file.display());
        ctx.stats.add_skipped();
        ctx.events.publish(&IndexEvent::Skipped {
            kind,
            path: file.to_path_buf(),
        });
        return Ok(());
    }

    ctx.ui.attach(slot, kind, &name);

    let bytes = tokio::fs::read(file)
        .await
        .map_err(|source| IndexError::io("read", file, source))?;
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if let Some(processor) = &ctx.hooks.processor {
        text = processor
            .process(file, text)
            .await
            .map_err(|err| IndexError::ConvertFailed {
                path: file.to_path_buf(),
                reason: format!("processor: {err}"),
            })?;
    }

    // The canonical hash covers the processed text, which can differ from
    // the source bytes. A known hash means this file is a re-encoding of an
    // already-indexed work.
    let hash = hasher.hash_text(&text).await?;
    if hash != id {
        if let Some(mut model) = ctx.lookup(&hash).await? {
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
    }

    let common = ctx.common(kind);
    let directory = common.save.join(id.shard());
    let mut file_name = if extension.is_empty() {
        id.rest().to_string()
    } else {
        format!("{}.{extension}", id.rest())
    };
    if let Some(suffix) = cfg.compression.suffix() {
        file_name = format!("{file_name}.{suffix}");
    }
    let output = directory.join(file_name);
    ctx.ensure_dir(&directory).await?;

    let description = match (&ctx.hooks.summarizer, cfg.summarize) {
        (Some(summarizer), sentences) if sentences > 0 => summarizer
            .summarize(&normalize(&text), sentences)
            .await
            .map_err(|err| IndexError::ConvertFailed {
                path: file.to_path_buf(),
                reason: format!("summarizer: {err}"),
            })?,
        _ => text.chars().take(cfg.summary_fallback).collect(),
    };

    ctx.index_document(
        &cfg.index,
        id.as_str(),
        json!({ "name": name, "description": description, "contents": text }),
    )
    .await?;
    ctx.refresh_index(&cfg.index).await?;

    let encoded = encode(&text, cfg.compression).map_err(|source| IndexError::io("compress", &output, source))?;
    tokio::fs::write(&output, encoded)
        .await
        .map_err(|source| IndexError::io("write", &output, source))?;
    ctx.set_mode(kind, &output).await?;
    let (size, _) = ctx.stat(&output).await?;

    let mut record = ctx.collect_record(slot, id.clone(), hash, kind)?;
    record.relative = ctx.relative(kind, &output);
    record.description = description;
    record.size = size;
    record.compression = cfg.compression.name().map(str::to_string);

    ctx.tag(kind, &mut record).await?;
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

/// Whitespace-collapsed, ASCII-only rendering fed to the summariser.
fn normalize(text: &str) -> String {
    let ascii: String = text.chars().filter(char::is_ascii).collect();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn encode(text: &str, compression: CompressionKind) -> std::io::Result<Vec<u8>> {
    match compression {
        CompressionKind::None => Ok(text.as_bytes().to_vec()),
        CompressionKind::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(text.as_bytes())?;
            encoder.finish()
        }
        CompressionKind::Brotli => {
            let mut buffer = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(&mut buffer, 4096, 5, 22);
                writer.write_all(text.as_bytes())?;
                writer.flush()?;
            }
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_strips_non_ascii() {
        assert_eq!(normalize("  a\tb\n\nc  "), "a b c");
        assert_eq!(normalize("héllo wörld"), "hllo wrld");
    }

    #[test]
    fn gzip_round_trips() {
        use std::io::Read;
        let encoded = encode("hello hello hello", CompressionKind::Gzip).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(encoded.as_slice());
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello hello hello");
    }

    #[test]
    fn brotli_output_is_nonempty_and_differs() {
        let encoded = encode("hello", CompressionKind::Brotli).unwrap();
        assert!(!encoded.is_empty());
        assert_ne!(encoded, b"hello");
    }
}
