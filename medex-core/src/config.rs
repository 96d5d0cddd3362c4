//! Configuration tree and its resolution.
//!
//! The serde-facing [`Options`] mirrors the config file. A handful of
//! options (`can_skip`, `delete`, `drop_tags`, `mode`, `save`, `shasum`)
//! cascade from the global block into each type block when absent there;
//! [`Options::resolve`] computes the effective per-type configuration once
//! at startup, parsing command templates and the octal file mode along the
//! way so later stages never re-validate.

use crate::error::{IndexError, Result};
use crate::exec::CommandTemplate;
use async_trait::async_trait;
use medex_model::Record;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// User-supplied tagger hook, normalised to a single async shape.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, record: &mut Record) -> anyhow::Result<()>;
}

/// Content processor for the text pipeline; the returned text replaces the
/// file's contents before hashing and storage.
#[async_trait]
pub trait TextProcessor: Send + Sync {
    async fn process(&self, source: &Path, text: String) -> anyhow::Result<String>;
}

/// Summariser producing text descriptions.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, sentences: usize) -> anyhow::Result<String>;
}

/// Programmatic extension points, attached next to the declarative options.
#[derive(Clone, Default)]
pub struct Hooks {
    pub tagger: Option<Arc<dyn Tagger>>,
    pub processor: Option<Arc<dyn TextProcessor>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    /// Overrides the boolean `delete` option with a per-file predicate.
    pub delete_when: Option<Arc<dyn Fn(&Path) -> bool + Send + Sync>>,
}

/// Whether a source file is removed after successful indexing.
#[derive(Clone)]
pub enum DeletePolicy {
    Keep,
    Always,
    When(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl DeletePolicy {
    pub fn applies(&self, path: &Path) -> bool {
        match self {
            DeletePolicy::Keep => false,
            DeletePolicy::Always => true,
            DeletePolicy::When(predicate) => predicate(path),
        }
    }
}

impl fmt::Debug for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletePolicy::Keep => f.write_str("Keep"),
            DeletePolicy::Always => f.write_str("Always"),
            DeletePolicy::When(_) => f.write_str("When(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Dimensions {
    pub width: u64,
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Brotli,
    Gzip,
}

impl CompressionKind {
    /// Extra artifact suffix, when any.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            CompressionKind::None => None,
            CompressionKind::Brotli => Some("br"),
            CompressionKind::Gzip => Some("gz"),
        }
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            CompressionKind::None => None,
            CompressionKind::Brotli => Some("brotli"),
            CompressionKind::Gzip => Some("gzip"),
        }
    }
}

/// Options shared by every type block; `None` means "inherit the global
/// value".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypeOverrides {
    pub enabled: bool,
    pub pattern: Option<String>,
    pub exclude: Option<String>,
    pub can_skip: Option<bool>,
    pub delete: Option<bool>,
    pub drop_tags: Option<bool>,
    pub mode: Option<String>,
    pub save: Option<PathBuf>,
    pub shasum: Option<String>,
}

impl Default for TypeOverrides {
    fn default() -> Self {
        TypeOverrides {
            enabled: true,
            pattern: None,
            exclude: None,
            can_skip: None,
            delete: None,
            drop_tags: None,
            mode: None,
            save: None,
            shasum: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageThumbnailSection {
    pub format: String,
    pub geometry: String,
    pub template: String,
}

impl Default for ImageThumbnailSection {
    fn default() -> Self {
        ImageThumbnailSection {
            format: "png".into(),
            geometry: "320x320".into(),
            template: "convert $input -auto-orient -thumbnail $geometry -strip $thumbnail".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagePreviewSection {
    pub geometry: String,
    pub template: String,
}

impl Default for ImagePreviewSection {
    fn default() -> Self {
        ImagePreviewSection {
            geometry: "320x320".into(),
            template: "convert $input -coalesce -resize $geometry -layers optimize $output".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    #[serde(flatten)]
    pub common: TypeOverrides,
    pub minimum: Dimensions,
    pub maximum: Option<Dimensions>,
    pub identify: String,
    pub thumbnail: ImageThumbnailSection,
    pub preview: ImagePreviewSection,
    pub index: Option<String>,
}

impl Default for ImageSection {
    fn default() -> Self {
        ImageSection {
            common: TypeOverrides::default(),
            minimum: Dimensions::default(),
            maximum: None,
            identify: "identify -verbose $input".into(),
            thumbnail: ImageThumbnailSection::default(),
            preview: ImagePreviewSection::default(),
            index: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextSection {
    #[serde(flatten)]
    pub common: TypeOverrides,
    /// Minimum source size in bytes; smaller files are not indexed.
    pub minimum: u64,
    pub maximum: Option<u64>,
    pub compression: CompressionKind,
    /// Target summary length in sentences; 0 disables summarisation.
    pub summarize: usize,
    /// Description length, in characters, when no summariser runs.
    pub summary_fallback: usize,
    pub index: Option<String>,
}

impl Default for TextSection {
    fn default() -> Self {
        TextSection {
            common: TypeOverrides::default(),
            minimum: 1,
            maximum: None,
            compression: CompressionKind::None,
            summarize: 0,
            summary_fallback: 500,
            index: Some("text".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoThumbnailSection {
    pub format: String,
    /// Preferred capture point in seconds, clamped to the clip length.
    pub time: f64,
    pub geometry: String,
    pub template: String,
}

impl Default for VideoThumbnailSection {
    fn default() -> Self {
        VideoThumbnailSection {
            format: "png".into(),
            time: 10.0,
            geometry: "320:-1".into(),
            template: "ffmpeg -y -hide_banner -ss $time -i $input -vframes 1 -vf scale=$geometry $thumbnail"
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoPreviewSection {
    /// Target preview length in sampled frames; the sampling interval is
    /// `ceil(duration / duration_frames)`.
    pub duration: f64,
    pub geometry: String,
    pub template: String,
}

impl Default for VideoPreviewSection {
    fn default() -> Self {
        VideoPreviewSection {
            duration: 30.0,
            geometry: "320:-1".into(),
            template: "ffmpeg -y -hide_banner -i $input -an -vf fps=1/$interval,scale=$geometry $output"
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoundSection {
    pub check: bool,
    /// Mean volume (dB) at or below which a clip counts as silent.
    pub threshold: f64,
    pub template: String,
}

impl Default for SoundSection {
    fn default() -> Self {
        SoundSection {
            check: true,
            threshold: -90.0,
            template: "ffmpeg -hide_banner -i $input -af volumedetect -vn -f null -".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubtitleSection {
    pub format: String,
    pub language: String,
    pub template: String,
    pub fallback: String,
    /// Copy extracted subtitle text into the record description.
    pub to_description: bool,
    pub index: Option<String>,
}

impl Default for SubtitleSection {
    fn default() -> Self {
        SubtitleSection {
            format: "srt".into(),
            language: "eng".into(),
            template: "ffmpeg -y -hide_banner -i $input -map 0:s:m:language:$language $file".into(),
            fallback: "ffmpeg -y -hide_banner -i $input -map 0:s:0 $file".into(),
            to_description: true,
            index: Some("subtitles".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    #[serde(flatten)]
    pub common: TypeOverrides,
    /// Canonical container format.
    pub format: String,
    pub framerate: Option<u32>,
    pub probe: String,
    pub convert: String,
    pub thumbnail: VideoThumbnailSection,
    pub preview: VideoPreviewSection,
    pub sound: SoundSection,
    pub subtitles: SubtitleSection,
    pub index: Option<String>,
}

impl Default for VideoSection {
    fn default() -> Self {
        VideoSection {
            common: TypeOverrides::default(),
            format: "mp4".into(),
            framerate: None,
            probe: "ffprobe -v error -print_format json -show_format -show_streams $input".into(),
            convert:
                "ffmpeg -y -hide_banner -i $input -c:v libx264 -preset veryfast -crf 23 -c:a aac -movflags +faststart $output"
                    .into(),
            thumbnail: VideoThumbnailSection::default(),
            preview: VideoPreviewSection::default(),
            sound: SoundSection::default(),
            subtitles: SubtitleSection::default(),
            index: Some("video".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    pub concurrency: usize,
    pub exclude: Vec<String>,
    pub persistent: bool,
    /// Delay between passes in persistent mode, milliseconds.
    pub rescan: u64,
    pub sort: bool,
    pub recursive: bool,
    pub dotfiles: bool,
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
}

impl Default for ScannerSection {
    fn default() -> Self {
        ScannerSection {
            concurrency: 2,
            exclude: Vec::new(),
            persistent: false,
            rescan: 3_600_000,
            sort: false,
            recursive: true,
            dotfiles: false,
            max_depth: None,
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub enabled: bool,
    pub node: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    pub database: DatabaseSection,
    pub search: SearchSection,
}

/// The full declarative configuration, as deserialised from the config
/// file. Everything has a default; an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Size of the conversion slot pool.
    pub concurrency: usize,
    /// Indexed-path cache file; `None` disables the cache.
    pub cache: Option<PathBuf>,
    pub can_skip: bool,
    pub delete: bool,
    pub drop_tags: bool,
    /// Octal file mode applied to artifacts, e.g. "644".
    pub mode: String,
    pub save: PathBuf,
    pub scan: Vec<PathBuf>,
    /// Hash tool executable.
    pub shasum: String,
    pub scanner: ScannerSection,
    pub services: ServicesSection,
    pub image: ImageSection,
    pub text: TextSection,
    pub video: VideoSection,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            concurrency: 2,
            cache: None,
            can_skip: true,
            delete: false,
            drop_tags: false,
            mode: "644".into(),
            save: PathBuf::from("save"),
            scan: Vec::new(),
            shasum: "shasum".into(),
            scanner: ScannerSection::default(),
            services: ServicesSection::default(),
            image: ImageSection::default(),
            text: TextSection::default(),
            video: VideoSection::default(),
        }
    }
}

const IMAGE_PATTERN: &str = "*.{png,jpg,jpeg,gif,webp,bmp,tiff}";
const TEXT_PATTERN: &str = "*.{txt,md,text}";
const VIDEO_PATTERN: &str = "*.{mp4,mkv,avi,mov,webm,wmv,flv,m4v,mpg,mpeg,ts}";

/// Effective, validated options shared by all type pipelines.
#[derive(Debug, Clone)]
pub struct TypeCommon {
    pub enabled: bool,
    pub pattern: String,
    pub exclude: Option<String>,
    pub can_skip: bool,
    pub delete: DeletePolicy,
    pub drop_tags: bool,
    pub mode: u32,
    pub save: PathBuf,
    pub shasum: String,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub common: TypeCommon,
    pub minimum: Dimensions,
    pub maximum: Option<Dimensions>,
    pub identify: CommandTemplate,
    pub thumbnail_format: String,
    pub thumbnail_geometry: String,
    pub thumbnail: CommandTemplate,
    pub preview_geometry: String,
    pub preview: CommandTemplate,
    pub index: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TextConfig {
    pub common: TypeCommon,
    pub minimum: u64,
    pub maximum: Option<u64>,
    pub compression: CompressionKind,
    pub summarize: usize,
    pub summary_fallback: usize,
    pub index: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub common: TypeCommon,
    pub format: String,
    pub framerate: Option<u32>,
    pub probe: CommandTemplate,
    pub convert: CommandTemplate,
    pub thumbnail_format: String,
    pub thumbnail_time: f64,
    pub thumbnail_geometry: String,
    pub thumbnail: CommandTemplate,
    pub preview_duration: f64,
    pub preview_geometry: String,
    pub preview: CommandTemplate,
    pub check_sound: bool,
    pub sound_threshold: f64,
    pub sound: CommandTemplate,
    pub subtitle_format: String,
    pub subtitle_language: String,
    pub subtitle: CommandTemplate,
    pub subtitle_fallback: CommandTemplate,
    pub subtitles_to_description: bool,
    pub subtitles_index: Option<String>,
    pub index: Option<String>,
}

/// Options after cascade resolution and template parsing.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub version: String,
    pub concurrency: usize,
    pub cache: Option<PathBuf>,
    pub save: PathBuf,
    pub scan: Vec<PathBuf>,
    pub scanner: ScannerSection,
    pub services: ServicesSection,
    pub image: ImageConfig,
    pub text: TextConfig,
    pub video: VideoConfig,
}

impl Options {
    /// Resolve the cascade and parse every command template. Configuration
    /// problems surface here as [`IndexError::Fatal`], before any work
    /// starts.
    pub fn resolve(self, version: impl Into<String>, hooks: &Hooks) -> Result<Resolved> {
        let version = version.into();
        if self.concurrency == 0 {
            return Err(IndexError::Fatal("concurrency must be at least 1".into()));
        }
        if self.scanner.concurrency == 0 {
            return Err(IndexError::Fatal(
                "scanner.concurrency must be at least 1".into(),
            ));
        }

        let image = ImageConfig {
            common: resolve_common(&self, &self.image.common, IMAGE_PATTERN, hooks)?,
            minimum: self.image.minimum,
            maximum: self.image.maximum,
            identify: CommandTemplate::parse(&self.image.identify)?,
            thumbnail_format: self.image.thumbnail.format.clone(),
            thumbnail_geometry: self.image.thumbnail.geometry.clone(),
            thumbnail: CommandTemplate::parse(&self.image.thumbnail.template)?,
            preview_geometry: self.image.preview.geometry.clone(),
            preview: CommandTemplate::parse(&self.image.preview.template)?,
            index: self.image.index.clone(),
        };

        let text = TextConfig {
            common: resolve_common(&self, &self.text.common, TEXT_PATTERN, hooks)?,
            minimum: self.text.minimum,
            maximum: self.text.maximum,
            compression: self.text.compression,
            summarize: self.text.summarize,
            summary_fallback: self.text.summary_fallback,
            index: self.text.index.clone(),
        };

        let video = VideoConfig {
            common: resolve_common(&self, &self.video.common, VIDEO_PATTERN, hooks)?,
            format: self.video.format.clone(),
            framerate: self.video.framerate,
            probe: CommandTemplate::parse(&self.video.probe)?,
            convert: CommandTemplate::parse(&self.video.convert)?,
            thumbnail_format: self.video.thumbnail.format.clone(),
            thumbnail_time: self.video.thumbnail.time,
            thumbnail_geometry: self.video.thumbnail.geometry.clone(),
            thumbnail: CommandTemplate::parse(&self.video.thumbnail.template)?,
            preview_duration: self.video.preview.duration,
            preview_geometry: self.video.preview.geometry.clone(),
            preview: CommandTemplate::parse(&self.video.preview.template)?,
            check_sound: self.video.sound.check,
            sound_threshold: self.video.sound.threshold,
            sound: CommandTemplate::parse(&self.video.sound.template)?,
            subtitle_format: self.video.subtitles.format.clone(),
            subtitle_language: self.video.subtitles.language.clone(),
            subtitle: CommandTemplate::parse(&self.video.subtitles.template)?,
            subtitle_fallback: CommandTemplate::parse(&self.video.subtitles.fallback)?,
            subtitles_to_description: self.video.subtitles.to_description,
            subtitles_index: self.video.subtitles.index.clone(),
            index: self.video.index.clone(),
        };

        Ok(Resolved {
            version,
            concurrency: self.concurrency,
            cache: self.cache,
            save: self.save,
            scan: self.scan,
            scanner: self.scanner,
            services: self.services,
            image,
            text,
            video,
        })
    }
}

fn resolve_common(
    global: &Options,
    overrides: &TypeOverrides,
    default_pattern: &str,
    hooks: &Hooks,
) -> Result<TypeCommon> {
    let mode_str = overrides.mode.as_deref().unwrap_or(&global.mode);
    let mode = u32::from_str_radix(mode_str.trim_start_matches("0o"), 8)
        .map_err(|_| IndexError::Fatal(format!("invalid octal mode {mode_str:?}")))?;

    let delete_flag = overrides.delete.unwrap_or(global.delete);
    let delete = match (&hooks.delete_when, delete_flag) {
        (Some(predicate), _) => DeletePolicy::When(predicate.clone()),
        (None, true) => DeletePolicy::Always,
        (None, false) => DeletePolicy::Keep,
    };

    Ok(TypeCommon {
        enabled: overrides.enabled,
        pattern: overrides
            .pattern
            .clone()
            .unwrap_or_else(|| default_pattern.to_string()),
        exclude: overrides.exclude.clone(),
        can_skip: overrides.can_skip.unwrap_or(global.can_skip),
        delete,
        drop_tags: overrides.drop_tags.unwrap_or(global.drop_tags),
        mode,
        save: overrides.save.clone().unwrap_or_else(|| global.save.clone()),
        shasum: overrides
            .shasum
            .clone()
            .unwrap_or_else(|| global.shasum.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_fills_per_type_gaps() {
        let mut options = Options {
            can_skip: false,
            delete: true,
            mode: "640".into(),
            shasum: "sha256sum".into(),
            ..Options::default()
        };
        options.video.common.can_skip = Some(true);
        options.video.common.mode = Some("600".into());

        let resolved = options.resolve("test", &Hooks::default()).unwrap();

        // Image inherits everything.
        assert!(!resolved.image.common.can_skip);
        assert!(matches!(resolved.image.common.delete, DeletePolicy::Always));
        assert_eq!(resolved.image.common.mode, 0o640);
        assert_eq!(resolved.image.common.shasum, "sha256sum");
        // Video overrides what it set.
        assert!(resolved.video.common.can_skip);
        assert_eq!(resolved.video.common.mode, 0o600);
    }

    #[test]
    fn delete_predicate_beats_flag() {
        let hooks = Hooks {
            delete_when: Some(Arc::new(|path: &Path| path.ends_with("yes.txt"))),
            ..Hooks::default()
        };
        let resolved = Options::default().resolve("test", &hooks).unwrap();
        assert!(resolved
            .text
            .common
            .delete
            .applies(Path::new("/in/yes.txt")));
        assert!(!resolved.text.common.delete.applies(Path::new("/in/no.txt")));
    }

    #[test]
    fn bad_mode_and_zero_concurrency_are_fatal() {
        let options = Options {
            mode: "9z9".into(),
            ..Options::default()
        };
        assert!(options.resolve("test", &Hooks::default()).is_err());

        let options = Options {
            concurrency: 0,
            ..Options::default()
        };
        assert!(options.resolve("test", &Hooks::default()).is_err());
    }

    #[test]
    fn options_deserialize_from_toml_fragment() {
        let toml = r#"
            concurrency = 4
            delete = true

            [text]
            compression = "gzip"
            minimum = 16

            [video.thumbnail]
            time = 5.0
        "#;
        let options: Options = toml_fragment(toml);
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.text.compression, CompressionKind::Gzip);
        assert_eq!(options.text.minimum, 16);
        assert_eq!(options.video.thumbnail.time, 5.0);
    }

    // Deserialise through serde_json to avoid a toml dev-dependency here;
    // the CLI owns real TOML loading.
    fn toml_fragment(fragment: &str) -> Options {
        let mut root = serde_json::Map::new();
        let mut section: Option<Vec<String>> = None;
        for line in fragment.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(name) = line.strip_prefix('[') {
                let name = name.trim_end_matches(']');
                section = Some(name.split('.').map(str::to_string).collect());
                continue;
            }
            let (key, value) = line.split_once('=').unwrap();
            let value: serde_json::Value = serde_json::from_str(value.trim()).unwrap();
            let mut target = &mut root;
            if let Some(path) = &section {
                for part in path {
                    target = target
                        .entry(part.clone())
                        .or_insert_with(|| serde_json::Value::Object(Default::default()))
                        .as_object_mut()
                        .unwrap();
                }
            }
            target.insert(key.trim().to_string(), value);
        }
        serde_json::from_value(serde_json::Value::Object(root)).unwrap()
    }
}
