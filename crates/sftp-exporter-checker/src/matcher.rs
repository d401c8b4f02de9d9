//! File name matching against glob patterns, optionally date-templated.

use chrono::{DateTime, Local};
use glob::Pattern;
use sftp_exporter_core::config::file_glob;
use sftp_exporter_core::dates::{DateError, DatedTemplate};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("invalid glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        source: glob::PatternError,
    },
}

/// Patterns concretized for one cycle. A name matches if any pattern does.
#[derive(Debug, Clone)]
pub struct Matcher {
    patterns: Vec<Pattern>,
}

impl Matcher {
    /// Render each template against `now` and compile the results.
    pub fn compile(templates: &[DatedTemplate], now: DateTime<Local>) -> Result<Self, MatchError> {
        let patterns = templates
            .iter()
            .map(|template| {
                let rendered = template.render(now)?;
                file_glob(&rendered).map_err(|source| MatchError::Glob {
                    pattern: rendered,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Render the folder templates of one cycle.
pub fn resolve_folders(templates: &[DatedTemplate], now: DateTime<Local>) -> Result<Vec<String>, DateError> {
    templates.iter().map(|t| t.render(now)).collect()
}
