//! Image conversion: copy the source into the content-addressed layout,
//! render a thumbnail (plus an animated preview for GIFs) and catalog it.

use super::{identify, PipelineContext};
use crate::error::{IndexError, Result};
use crate::slots::InFlight;
use medex_model::{IndexEvent, MediaKind};
use serde_json::json;
use std::path::Path;
use tracing::debug;

pub async fn convert(ctx: &PipelineContext, slot: usize, file: &Path) -> Result<()> {
    let kind = MediaKind::Image;
    let cfg = &ctx.options.image;

    if ctx.skip(kind, file).await? {
        return Ok(());
    }

    let id = ctx.hasher(kind).hash(file).await?;
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

    ctx.ui.attach(slot, kind, &name);

    // Examine: identify's verbose report carries the dimensions.
    let (bin, args) = cfg.identify.render(&[("input", file.display().to_string())]);
    let report = ctx
        .exec
        .run(&bin, &args)
        .await
        .map_err(|err| IndexError::ProbeFailed {
            path: file.to_path_buf(),
            reason: err.to_string(),
        })?;
    let attributes = identify::parse(&report.stdout);
    let (width, height, aspect) =
        identify::dimensions(&attributes).ok_or_else(|| IndexError::ProbeFailed {
            path: file.to_path_buf(),
            reason: "identify reported no geometry".into(),
        })?;

    if width < cfg.minimum.width || height < cfg.minimum.height {
        debug!("{} is {width}x{height}, below minimum", file.display());
        ctx.stats.add_skipped();
        ctx.events.publish(&IndexEvent::Skipped {
            kind,
            path: file.to_path_buf(),
        });
        return Ok(());
    }
    if let Some(maximum) = cfg.maximum {
        if width > maximum.width || height > maximum.height {
            debug!("{} is {width}x{height}, above maximum", file.display());
            ctx.stats.add_skipped();
            ctx.events.publish(&IndexEvent::Skipped {
                kind,
                path: file.to_path_buf(),
            });
            return Ok(());
        }
    }

    let common = ctx.common(kind);
    let directory = common.save.join(id.shard());
    let output = directory.join(artifact_name(id.rest(), &extension));
    let thumbnail = directory.join(format!("{}p.{}", id.rest(), cfg.thumbnail_format));

    ctx.ensure_dir(&directory).await?;
    ctx.copy(file, &output).await?;
    ctx.set_mode(kind, &output).await?;

    let (bin, args) = cfg.thumbnail.render(&[
        ("input", output.display().to_string()),
        ("thumbnail", thumbnail.display().to_string()),
        ("geometry", cfg.thumbnail_geometry.clone()),
    ]);
    if let Err(source) = ctx.exec.run(&bin, &args).await {
        ctx.discard(&thumbnail).await;
        ctx.discard(&output).await;
        ctx.discard_dir(&directory).await;
        return Err(IndexError::ThumbnailFailed {
            path: file.to_path_buf(),
            source,
        });
    }

    // Animated GIFs additionally get a downscaled animated preview.
    let mut preview = None;
    if extension == "gif" {
        let preview_path = directory.join(format!("{}p.{}", id.rest(), extension));
        let (bin, args) = cfg.preview.render(&[
            ("input", output.display().to_string()),
            ("output", preview_path.display().to_string()),
            ("geometry", cfg.preview_geometry.clone()),
        ]);
        if let Err(source) = ctx.exec.run(&bin, &args).await {
            ctx.discard(&preview_path).await;
            ctx.discard(&thumbnail).await;
            ctx.discard(&output).await;
            ctx.discard_dir(&directory).await;
            return Err(IndexError::PreviewFailed {
                path: file.to_path_buf(),
                source,
            });
        }
        preview = Some(ctx.relative(kind, &preview_path));
    }

    // For images the canonical bytes are the source bytes: hash == id.
    let mut record = ctx.collect_record(slot, id.clone(), id.clone(), kind)?;
    record.relative = ctx.relative(kind, &output);
    record.thumbnail = Some(ctx.relative(kind, &thumbnail));
    record.preview = preview;
    record.size = source_size;
    record.width = Some(width);
    record.height = Some(height);
    record.aspect = Some(aspect);

    ctx.tag(kind, &mut record).await?;
    ctx.index_document(
        &cfg.index,
        id.as_str(),
        json!({ "name": record.name, "description": record.description }),
    )
    .await?;
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

fn artifact_name(rest: &str, extension: &str) -> String {
    if extension.is_empty() {
        rest.to_string()
    } else {
        format!("{rest}.{extension}")
    }
}
