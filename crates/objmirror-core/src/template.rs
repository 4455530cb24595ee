//! Destination URL templates
//!
//! Templates are URL patterns with substitution tokens evaluated against the
//! source object's metadata:
//!
//! - `$name` — source file name without its final extension
//! - `$ext` — final extension, without the dot
//! - `$timestamp` — current epoch seconds
//! - `$date` — current UTC date, `YYYY-MM-DD`
//! - `$uuid` — fresh v4 UUID
//! - `$mod{n}` — zero-indexed part number, zero-padded to width `n`
//!   (partitioned transfers only)

use chrono::Utc;
use uuid::Uuid;

use objmirror_common::{url, MirrorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Name,
    Ext,
    Timestamp,
    Date,
    Uuid,
    Part { width: usize },
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        if pos > 0 {
            segments.push(Segment::Literal(&rest[..pos]));
        }
        let after = &rest[pos + 1..];
        if let Some(braced) = after.strip_prefix("mod{") {
            let close = braced.find('}').ok_or_else(|| {
                MirrorError::template(template, "unterminated $mod{n} token")
            })?;
            let width: usize = braced[..close].parse().map_err(|_| {
                MirrorError::template(template, "the $mod width must be a number")
            })?;
            if width == 0 {
                return Err(MirrorError::template(template, "the $mod width must be nonzero"));
            }
            segments.push(Segment::Part { width });
            rest = &braced[close + 1..];
            continue;
        }
        let word_len = after
            .find(|c: char| !c.is_ascii_lowercase())
            .unwrap_or(after.len());
        let token = &after[..word_len];
        let segment = match token {
            "name" => Segment::Name,
            "ext" => Segment::Ext,
            "timestamp" => Segment::Timestamp,
            "date" => Segment::Date,
            "uuid" => Segment::Uuid,
            _ => {
                return Err(MirrorError::template(
                    template,
                    format!("unknown token '${}'", token),
                ));
            }
        };
        segments.push(segment);
        rest = &after[word_len..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Validate a template's token syntax
pub fn validate(template: &str) -> Result<()> {
    let segments = parse(template)?;
    if !segments
        .iter()
        .any(|s| matches!(s, Segment::Literal(text) if text.contains("://")))
        && url::split(template).is_none()
    {
        return Err(MirrorError::template(
            template,
            "template must resolve to a scheme-qualified URL",
        ));
    }
    Ok(())
}

/// Whether the template contains a `$mod{n}` part token
pub fn has_part_token(template: &str) -> bool {
    matches!(parse(template), Ok(segments) if segments.iter().any(|s| matches!(s, Segment::Part { .. })))
}

/// Expand a template against a source object name and optional part index
pub fn expand(template: &str, object_name: &str, part: Option<usize>) -> Result<String> {
    let now = Utc::now();
    let mut result = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => result.push_str(text),
            Segment::Name => result.push_str(url::file_stem(object_name)),
            Segment::Ext => result.push_str(url::extension(object_name).unwrap_or("")),
            Segment::Timestamp => result.push_str(&now.timestamp().to_string()),
            Segment::Date => result.push_str(&now.format("%Y-%m-%d").to_string()),
            Segment::Uuid => result.push_str(&Uuid::new_v4().to_string()),
            Segment::Part { width } => {
                let index = part.ok_or_else(|| {
                    MirrorError::template(template, "$mod{n} used outside a partitioned transfer")
                })?;
                result.push_str(&format!("{:0width$}", index, width = width));
            }
        }
    }
    Ok(result)
}
