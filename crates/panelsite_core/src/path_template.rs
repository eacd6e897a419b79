//! Asset path patterns such as `images/chapter {chapter}/{page:02}.{ext}`.

use serde::Serialize;
use thiserror::Error;

use crate::model::ChapterId;

pub const DEFAULT_PATH_TEMPLATE: &str = "images/chapter {chapter}/{page:02}.{ext}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder in path template '{0}'")]
    Unterminated(String),
    #[error("unknown placeholder '{{{placeholder}}}' in path template '{template}'")]
    UnknownPlaceholder { template: String, placeholder: String },
    #[error("path template '{0}' must reference {{page}}")]
    MissingPage(String),
    #[error("path template '{0}' must be relative")]
    Absolute(String),
    #[error("path template '{0}' must stay inside the site root (no '..' segments)")]
    ParentDir(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Chapter,
    Page { width: usize },
    Ext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct PathTemplate {
    pattern: String,
    #[serde(skip)]
    segments: Vec<Segment>,
}

impl From<PathTemplate> for String {
    fn from(value: PathTemplate) -> Self {
        value.pattern
    }
}

impl PathTemplate {
    pub fn parse(pattern: &str) -> Result<Self, TemplateError> {
        if pattern.starts_with('/') || pattern.starts_with('\\') {
            return Err(TemplateError::Absolute(pattern.to_string()));
        }
        if pattern.split(['/', '\\']).any(|part| part == "..") {
            return Err(TemplateError::ParentDir(pattern.to_string()));
        }
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;
        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(pattern.to_string()))?;
            let placeholder = &after[..close];
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_placeholder(pattern, placeholder)?);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments
            .iter()
            .any(|segment| matches!(segment, Segment::Page { .. }))
        {
            return Err(TemplateError::MissingPage(pattern.to_string()));
        }
        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn render(&self, chapter: &ChapterId, page: u32, ext: &str) -> String {
        let mut out = String::with_capacity(self.pattern.len() + 8);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Chapter => out.push_str(&chapter.to_string()),
                Segment::Page { width } => out.push_str(&format!("{page:0width$}")),
                Segment::Ext => out.push_str(ext),
            }
        }
        out
    }

    /// Directory holding every page of `chapter`, when the file name part of
    /// the pattern does not depend on the chapter.
    pub fn chapter_dir(&self, chapter: &ChapterId) -> Option<String> {
        let (dir_pattern, file_pattern) = self.pattern.rsplit_once('/')?;
        if file_pattern.contains("{chapter}") || dir_pattern.contains("{page") {
            return None;
        }
        let rendered = self.render(chapter, 0, "");
        rendered.rsplit_once('/').map(|(dir, _)| dir.to_string())
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_PATH_TEMPLATE).expect("default path template is valid")
    }
}

fn parse_placeholder(pattern: &str, placeholder: &str) -> Result<Segment, TemplateError> {
    let unknown = || TemplateError::UnknownPlaceholder {
        template: pattern.to_string(),
        placeholder: placeholder.to_string(),
    };
    match placeholder {
        "chapter" => Ok(Segment::Chapter),
        "page" => Ok(Segment::Page { width: 0 }),
        "ext" => Ok(Segment::Ext),
        other => {
            let spec = other.strip_prefix("page:").ok_or_else(unknown)?;
            let digits = spec.strip_prefix('0').ok_or_else(unknown)?;
            let width = digits.parse::<usize>().map_err(|_| unknown())?;
            if width == 0 || width > 9 {
                return Err(unknown());
            }
            Ok(Segment::Page { width })
        }
    }
}
