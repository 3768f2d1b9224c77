//! Destination pattern grammar and path rendering.
//!
//! A pattern mixes literal path text with `{...}` variables:
//! `/photos/{year}/{month}/{city}/{name}`. Substituted values are sanitised
//! for cross-platform safety and optionally case-transformed; literal
//! segments pass through untouched. Every rendered path is validated against
//! the destination root before it is returned.

use crate::path_safety::{self, validate_generated};
use chrono::Datelike;
use photocopy_common::{OrganizeConfig, PathCasing, PhotoCopyError, Result, SourceFile};
use std::path::{Component, Path, PathBuf};

/// A pattern variable recognised inside braces (case-insensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Year,
    Month,
    Day,
    Name,
    NameNoExt,
    Ext,
    Directory,
    Number,
    District,
    City,
    County,
    State,
    Country,
    Camera,
}

impl Variable {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "year" => Some(Variable::Year),
            "month" => Some(Variable::Month),
            "day" => Some(Variable::Day),
            "name" => Some(Variable::Name),
            "namenoext" => Some(Variable::NameNoExt),
            "ext" => Some(Variable::Ext),
            "directory" => Some(Variable::Directory),
            "number" => Some(Variable::Number),
            "district" => Some(Variable::District),
            "city" => Some(Variable::City),
            "county" => Some(Variable::County),
            "state" => Some(Variable::State),
            "country" => Some(Variable::Country),
            "camera" => Some(Variable::Camera),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Variable(Variable),
}

/// Split a pattern into literal and variable tokens. Unknown variables and
/// unbalanced braces are configuration errors.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut variable = String::new();
    let mut in_variable = false;

    for ch in pattern.chars() {
        match ch {
            '{' => {
                if in_variable {
                    return Err(PhotoCopyError::Config(format!(
                        "unbalanced braces in pattern '{}'",
                        pattern
                    )));
                }
                in_variable = true;
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
            }
            '}' => {
                if !in_variable {
                    return Err(PhotoCopyError::Config(format!(
                        "unbalanced braces in pattern '{}'",
                        pattern
                    )));
                }
                in_variable = false;
                let parsed = Variable::parse(&variable).ok_or_else(|| {
                    PhotoCopyError::Config(format!("unknown pattern variable '{{{}}}'", variable))
                })?;
                tokens.push(Token::Variable(parsed));
                variable.clear();
            }
            _ if in_variable => variable.push(ch),
            _ => literal.push(ch),
        }
    }

    if in_variable {
        return Err(PhotoCopyError::Config(format!(
            "unbalanced braces in pattern '{}'",
            pattern
        )));
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    Ok(tokens)
}

/// A parsed destination pattern together with its extracted root.
#[derive(Debug, Clone)]
pub struct DestinationPattern {
    pattern: String,
    tokens: Vec<Token>,
    root: PathBuf,
}

impl DestinationPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let tokens = parse_pattern(pattern)?;
        if tokens
            .iter()
            .any(|t| matches!(t, Token::Variable(Variable::Number)))
        {
            return Err(PhotoCopyError::Config(
                "{number} is only valid in the duplicates format".to_string(),
            ));
        }

        let root = path_safety::extract_destination_root(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            tokens,
            root,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// The collision-resolution suffix, e.g. `_{number}`. Only the `{number}`
/// variable carries meaning here.
#[derive(Debug, Clone)]
pub struct DuplicatesFormat {
    tokens: Vec<Token>,
}

impl DuplicatesFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let tokens = parse_pattern(format)?;
        let mut has_number = false;
        for token in &tokens {
            match token {
                Token::Variable(Variable::Number) => has_number = true,
                Token::Variable(_) => {
                    return Err(PhotoCopyError::Config(format!(
                        "duplicates format '{}' may only use {{number}}",
                        format
                    )));
                }
                Token::Literal(_) => {}
            }
        }
        if !has_number {
            return Err(PhotoCopyError::Config(format!(
                "duplicates format '{}' must contain {{number}}",
                format
            )));
        }
        Ok(Self { tokens })
    }

    pub fn render(&self, number: usize) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Variable(Variable::Number) => out.push_str(&number.to_string()),
                Token::Variable(_) => {}
            }
        }
        out
    }
}

/// Full configuration validation: the self-contained rules plus pattern
/// grammar and source/destination layout. Surfaced before any I/O.
pub fn validate_config(config: &OrganizeConfig, source_dir: &Path) -> Result<()> {
    config.validate_basic()?;
    let pattern = DestinationPattern::parse(&config.destination_pattern)?;
    DuplicatesFormat::parse(&config.duplicates_format)?;

    for glob_pattern in &config.exclude_patterns {
        glob::Pattern::new(glob_pattern).map_err(|e| {
            PhotoCopyError::Config(format!("invalid exclude pattern '{}': {}", glob_pattern, e))
        })?;
    }

    let source = path_safety::normalize(source_dir)?;
    let destination_root = path_safety::normalize(pattern.root())?;
    if source == destination_root {
        return Err(PhotoCopyError::Config(format!(
            "source directory equals the destination root: {}",
            source.display()
        )));
    }
    if destination_root.starts_with(&source) {
        return Err(PhotoCopyError::Config(format!(
            "destination root {} lies inside the source directory {}",
            destination_root.display(),
            source.display()
        )));
    }

    Ok(())
}

const INVALID_SEGMENT_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn sanitize_value(value: &str, replacement: char) -> String {
    value
        .chars()
        .filter(|c| !c.is_ascii_control())
        .map(|c| {
            if INVALID_SEGMENT_CHARS.contains(&c) {
                replacement
            } else {
                c
            }
        })
        .collect()
}

fn is_reserved_device_name(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment);
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|name| stem.eq_ignore_ascii_case(name))
}

fn split_words(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in value.chars() {
        if ch == ' ' || ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        } else {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.extend(chars.flat_map(char::to_lowercase));
            out
        }
        None => String::new(),
    }
}

fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for ch in value.chars() {
        if ch == ' ' || ch == '_' || ch == '-' || ch == '.' {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// Apply a casing transform to one substituted value. Diacritics survive
/// every transform because the conversion goes through `char::to_uppercase`
/// and `char::to_lowercase`.
pub fn apply_casing(casing: PathCasing, value: &str) -> String {
    match casing {
        PathCasing::Original => value.to_string(),
        PathCasing::Lowercase => value.to_lowercase(),
        PathCasing::Uppercase => value.to_uppercase(),
        PathCasing::TitleCase => title_case(value),
        PathCasing::PascalCase => split_words(value).iter().map(|w| capitalize(w)).collect(),
        PathCasing::CamelCase => {
            let words = split_words(value);
            let mut out = String::new();
            for (i, word) in words.iter().enumerate() {
                if i == 0 {
                    out.push_str(&word.to_lowercase());
                } else {
                    out.push_str(&capitalize(word));
                }
            }
            out
        }
        PathCasing::SnakeCase => split_words(value)
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("_"),
        PathCasing::KebabCase => split_words(value)
            .iter()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("-"),
        PathCasing::ScreamingSnakeCase => split_words(value)
            .iter()
            .map(|w| w.to_uppercase())
            .collect::<Vec<_>>()
            .join("_"),
    }
}

#[derive(Debug)]
struct SegmentBuilder {
    segments: Vec<(String, bool)>,
    current: String,
    dirty: bool,
}

impl SegmentBuilder {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            current: String::new(),
            dirty: false,
        }
    }

    fn push_literal_char(&mut self, ch: char) {
        if ch == '/' || ch == '\\' {
            self.flush();
        } else {
            self.current.push(ch);
        }
    }

    fn push_value(&mut self, value: &str) {
        self.current.push_str(value);
        self.dirty = true;
    }

    fn push_segment(&mut self, segment: &str) {
        self.flush();
        self.current.push_str(segment);
        self.dirty = true;
        self.flush();
    }

    fn flush(&mut self) {
        self.segments
            .push((std::mem::take(&mut self.current), self.dirty));
        self.dirty = false;
    }

    fn finish(mut self, empty_fallback: &str) -> PathBuf {
        self.flush();

        let mut out = String::new();
        for (index, (segment, dirty)) in self.segments.iter().enumerate() {
            let finished = if *dirty {
                finalize_segment(segment, empty_fallback)
            } else {
                segment.clone()
            };
            // Empty literal segments reconstruct a leading separator but are
            // otherwise collapsed (e.g. "a//b").
            if index > 0 {
                if finished.is_empty() && !dirty {
                    continue;
                }
                out.push(std::path::MAIN_SEPARATOR);
            }
            out.push_str(&finished);
        }
        PathBuf::from(out)
    }
}

fn finalize_segment(segment: &str, empty_fallback: &str) -> String {
    // `.` and `..` pass through untouched so traversal validation can see
    // and reject them.
    if segment == "." || segment == ".." {
        return segment.to_string();
    }

    let trimmed = segment.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return empty_fallback.to_string();
    }

    let mut out = trimmed.to_string();
    if is_reserved_device_name(&out) {
        out.push('_');
    }
    out
}

/// The relative path from `root` down (or up, via `..`) to `dir`. Both
/// paths are expected to be absolute.
fn relative_directory(dir: &Path, root: &Path) -> PathBuf {
    if let Ok(stripped) = dir.strip_prefix(root) {
        return stripped.to_path_buf();
    }

    let root_components: Vec<Component> = root.components().collect();
    let dir_components: Vec<Component> = dir.components().collect();
    let common = root_components
        .iter()
        .zip(dir_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..root_components.len() {
        out.push("..");
    }
    for component in &dir_components[common..] {
        out.push(component.as_os_str());
    }
    out
}

/// Renders destination paths for source files against a parsed pattern.
pub struct PathRenderer {
    pattern: DestinationPattern,
    casing: PathCasing,
    replacement: char,
    location_fallback: String,
    empty_segment: String,
}

impl PathRenderer {
    pub fn new(config: &OrganizeConfig) -> Result<Self> {
        let pattern = DestinationPattern::parse(&config.destination_pattern)?;
        Ok(Self {
            pattern,
            casing: config.path_casing,
            replacement: config.replacement_char,
            location_fallback: config.unknown_location_fallback.clone(),
            empty_segment: config.empty_segment_fallback.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        self.pattern.root()
    }

    pub fn pattern(&self) -> &DestinationPattern {
        &self.pattern
    }

    /// Evaluate the pattern for one file. The result is absolute, sanitised
    /// and guaranteed to lie within the destination root.
    pub fn render(&self, file: &SourceFile, source_root: &Path) -> Result<PathBuf> {
        let mut builder = SegmentBuilder::new();

        for token in &self.pattern.tokens {
            match token {
                Token::Literal(text) => {
                    for ch in text.chars() {
                        builder.push_literal_char(ch);
                    }
                }
                Token::Variable(Variable::Directory) => {
                    self.push_directory(&mut builder, file, source_root);
                }
                Token::Variable(variable) => {
                    let raw = self.variable_value(*variable, file);
                    let sanitized = sanitize_value(&raw, self.replacement);
                    builder.push_value(&apply_casing(self.casing, &sanitized));
                }
            }
        }

        let mut candidate = builder.finish(&self.empty_segment);
        // A pattern that begins with a variable renders relative; it roots
        // at the directory extract_destination_root resolved.
        if !candidate.is_absolute() {
            candidate = self.pattern.root().join(candidate);
        }
        validate_generated(&candidate, self.pattern.root()).map_err(|violation| {
            PhotoCopyError::UnsafePath(format!(
                "{}: {}",
                violation,
                candidate.display()
            ))
        })?;
        Ok(candidate)
    }

    /// `{directory}` substitutes the file's parent relative to the source
    /// root with separators preserved; each sub-segment is sanitised on its
    /// own, and `.`/`..` segments pass through for validation to reject.
    fn push_directory(&self, builder: &mut SegmentBuilder, file: &SourceFile, source_root: &Path) {
        let parent = match file.path.parent() {
            Some(parent) => parent,
            None => return,
        };
        let relative = relative_directory(parent, source_root);
        for component in relative.components() {
            let segment = component.as_os_str().to_string_lossy();
            if segment.is_empty() {
                continue;
            }
            if segment == "." {
                continue;
            }
            if segment == ".." {
                builder.push_segment("..");
                continue;
            }
            let sanitized = sanitize_value(&segment, self.replacement);
            builder.push_segment(&apply_casing(self.casing, &sanitized));
        }
    }

    fn variable_value(&self, variable: Variable, file: &SourceFile) -> String {
        let timestamp = file.timestamp();
        match variable {
            Variable::Year => format!("{:04}", timestamp.year()),
            Variable::Month => format!("{:02}", timestamp.month()),
            Variable::Day => format!("{:02}", timestamp.day()),
            Variable::Name => file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Variable::NameNoExt => file
                .path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Variable::Ext => file
                .path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            Variable::Camera => file.camera.clone().unwrap_or_default(),
            Variable::District => self.location_value(file, |l| l.district.as_deref()),
            Variable::City => self.location_value(file, |l| l.city.as_deref()),
            Variable::County => self.location_value(file, |l| l.county.as_deref()),
            Variable::State => self.location_value(file, |l| l.state.as_deref()),
            Variable::Country => self.location_value(file, |l| l.country.as_deref()),
            // Rejected at parse time for destination patterns.
            Variable::Number | Variable::Directory => String::new(),
        }
    }

    fn location_value<'a>(
        &self,
        file: &'a SourceFile,
        select: impl Fn(&'a photocopy_common::LocationData) -> Option<&'a str>,
    ) -> String {
        file.location
            .as_ref()
            .and_then(|l| select(l))
            .unwrap_or(&self.location_fallback)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use photocopy_common::LocationData;

    fn test_config(pattern: &str) -> OrganizeConfig {
        OrganizeConfig {
            destination_pattern: pattern.to_string(),
            ..OrganizeConfig::default()
        }
    }

    fn photo(path: &str) -> SourceFile {
        SourceFile::new(
            PathBuf::from(path),
            100,
            Utc.with_ymd_and_hms(2023, 7, 4, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_parse_rejects_unknown_variable() {
        let err = parse_pattern("/dest/{bogus}").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_parse_rejects_unbalanced_braces() {
        assert!(parse_pattern("/dest/{year").is_err());
        assert!(parse_pattern("/dest/year}").is_err());
        assert!(parse_pattern("/dest/{{year}").is_err());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let tokens = parse_pattern("{YEAR}/{Name}").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Variable(Variable::Year),
                Token::Literal("/".to_string()),
                Token::Variable(Variable::Name),
            ]
        );
    }

    #[test]
    fn test_number_rejected_in_destination_pattern() {
        assert!(DestinationPattern::parse("/dest/{name}{number}").is_err());
    }

    #[test]
    fn test_duplicates_format() {
        let format = DuplicatesFormat::parse("_{number}").unwrap();
        assert_eq!(format.render(3), "_3");

        assert!(DuplicatesFormat::parse("_copy").is_err());
        assert!(DuplicatesFormat::parse("_{name}{number}").is_err());
    }

    #[test]
    fn test_render_dates_and_name() {
        let renderer = PathRenderer::new(&test_config("/dest/{year}/{month}/{name}")).unwrap();
        let file = photo("/src/IMG_1234.JPG");
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/2023/07/IMG_1234.JPG"));
    }

    #[test]
    fn test_render_prefers_exif_timestamp() {
        let renderer = PathRenderer::new(&test_config("/dest/{year}/{name}")).unwrap();
        let file = photo("/src/a.jpg")
            .with_exif_timestamp(Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/2019/a.jpg"));
    }

    #[test]
    fn test_render_location_fallback() {
        let renderer = PathRenderer::new(&test_config("/dest/{country}/{city}/{name}")).unwrap();
        let file = photo("/src/a.jpg").with_location(Some(LocationData {
            country: Some("Iceland".to_string()),
            ..LocationData::default()
        }));
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/Iceland/Unknown/a.jpg"));
    }

    #[test]
    fn test_render_sanitizes_invalid_characters() {
        let renderer = PathRenderer::new(&test_config("/dest/{camera}/{name}")).unwrap();
        let file = photo("/src/a.jpg").with_camera(Some("Canon <R5>: best?".to_string()));
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/Canon _R5__ best_/a.jpg"));
    }

    #[test]
    fn test_render_empty_camera_segment_becomes_unknown() {
        let renderer = PathRenderer::new(&test_config("/dest/{camera}/{name}")).unwrap();
        let file = photo("/src/a.jpg");
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/Unknown/a.jpg"));
    }

    #[test]
    fn test_render_reserved_device_name() {
        let renderer = PathRenderer::new(&test_config("/dest/{name}")).unwrap();
        let file = photo("/src/CON.jpg");
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/CON.jpg_"));
    }

    #[test]
    fn test_render_trims_trailing_dots() {
        let renderer = PathRenderer::new(&test_config("/dest/{camera}/{name}")).unwrap();
        let file = photo("/src/a.jpg").with_camera(Some("Sony...".to_string()));
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/Sony/a.jpg"));
    }

    #[test]
    fn test_render_directory_preserves_structure() {
        let renderer = PathRenderer::new(&test_config("/dest/{directory}/{name}")).unwrap();
        let file = photo("/src/2021/holiday/a.jpg");
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/2021/holiday/a.jpg"));
    }

    #[test]
    fn test_render_directory_traversal_rejected() {
        let renderer = PathRenderer::new(&test_config("/dest/{directory}/{name}")).unwrap();
        // Parent resolves outside the source root, so {directory} becomes
        // "../escape" and validation must reject the traversal segment.
        let file = photo("/escape/a.jpg");
        let err = renderer.render(&file, Path::new("/src")).unwrap_err();
        assert!(matches!(err, PhotoCopyError::UnsafePath(_)));
        assert!(err.to_string().contains("TraversalSegment"));
    }

    #[test]
    fn test_casing_preserves_diacritics() {
        assert_eq!(apply_casing(PathCasing::Uppercase, "café"), "CAFÉ");
        assert_eq!(apply_casing(PathCasing::Lowercase, "ZÜRICH"), "zürich");
        assert_eq!(apply_casing(PathCasing::TitleCase, "ñandú bird"), "Ñandú Bird");
    }

    #[test]
    fn test_casing_transforms() {
        assert_eq!(apply_casing(PathCasing::PascalCase, "my photo set"), "MyPhotoSet");
        assert_eq!(apply_casing(PathCasing::CamelCase, "my photo set"), "myPhotoSet");
        assert_eq!(apply_casing(PathCasing::SnakeCase, "My Photo Set"), "my_photo_set");
        assert_eq!(apply_casing(PathCasing::KebabCase, "My Photo Set"), "my-photo-set");
        assert_eq!(
            apply_casing(PathCasing::ScreamingSnakeCase, "my photo"),
            "MY_PHOTO"
        );
        assert_eq!(apply_casing(PathCasing::SnakeCase, "camelCaseValue"), "camel_case_value");
    }

    #[test]
    fn test_casing_applies_to_values_not_literals() {
        let config = OrganizeConfig {
            destination_pattern: "/dest/Literal/{camera}/{name}".to_string(),
            path_casing: PathCasing::Lowercase,
            ..OrganizeConfig::default()
        };
        let renderer = PathRenderer::new(&config).unwrap();
        let file = photo("/src/A.JPG").with_camera(Some("CANON".to_string()));
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/Literal/canon/a.jpg"));
    }

    #[test]
    fn test_render_combining_diacritics_preserved() {
        let renderer = PathRenderer::new(&test_config("/dest/{namenoext}{ext}")).unwrap();
        // "noe" + combining diaeresis + "l": the mark must survive rendering.
        let file = photo("/src/noe\u{0308}l.jpg");
        let rendered = renderer.render(&file, Path::new("/src")).unwrap();
        assert_eq!(rendered, PathBuf::from("/dest/noe\u{0308}l.jpg"));
    }

    #[test]
    fn test_validate_config_layout_rules() {
        let config = test_config("/src/photos/{name}");
        // Destination inside source.
        assert!(validate_config(&config, Path::new("/src")).is_err());

        // Source equals destination root.
        let config = test_config("/src/{name}");
        assert!(validate_config(&config, Path::new("/src")).is_err());

        let config = test_config("/dest/{name}");
        validate_config(&config, Path::new("/src")).unwrap();
    }
}
