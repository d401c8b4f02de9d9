//! Relative base dates and strftime-style templates.
//!
//! Folder and pattern templates can be rendered against a date expressed
//! in plain English ("today", "yesterday", "3 days ago"). The expression is
//! resolved relative to the cycle's start time.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use chrono_english::{parse_date_string, Dialect};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("cannot understand base date {expr:?}: {reason}")]
    BaseDate { expr: String, reason: String },
    #[error("invalid date format in template {0:?}")]
    Template(String),
}

/// Resolve a human relative date expression against `now`.
///
/// Numeric dates are read month first, so `9/11` is September 11.
pub fn resolve_base_date(expr: &str, now: DateTime<Local>) -> Result<DateTime<Local>, DateError> {
    parse_date_string(expr, now, Dialect::Us).map_err(|e| DateError::BaseDate {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Render a strftime template against `date`.
///
/// Characters outside of `%` directives are kept verbatim, so glob
/// metacharacters survive rendering.
pub fn render_template(template: &str, date: &DateTime<Local>) -> Result<String, DateError> {
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return Err(DateError::Template(template.to_string()));
    }
    Ok(date
        .format_with_items(StrftimeItems::new(template))
        .to_string())
}

/// A template plus the optional base date it is rendered against.
///
/// With no base date the template is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedTemplate {
    pub template: String,
    pub base_date: Option<String>,
}

impl DatedTemplate {
    pub fn verbatim(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            base_date: None,
        }
    }

    pub fn dated(template: impl Into<String>, base_date: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            base_date: Some(base_date.into()),
        }
    }

    pub fn render(&self, now: DateTime<Local>) -> Result<String, DateError> {
        match &self.base_date {
            None => Ok(self.template.clone()),
            Some(expr) => {
                let date = resolve_base_date(expr, now)?;
                render_template(&self.template, &date)
            }
        }
    }
}
