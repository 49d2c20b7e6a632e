//! Minimal URI template expansion.
//!
//! Supports the two forms partner links use:
//!
//! - `{name}`: simple expansion, percent-encoded, empty when absent
//! - `{?a,b}` / `{&a,b}`: form-style query expansion, absent names omitted

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated expression in template '{0}'")]
    Unterminated(String),

    #[error("unsupported expression '{{{0}}}'")]
    Unsupported(String),

    #[error("expanded template is not a valid URL: {0}")]
    InvalidUrl(String),
}

pub type TemplateParams<'a> = BTreeMap<&'a str, String>;

pub fn expand(template: &str, params: &TemplateParams<'_>) -> Result<Url, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
        expand_expression(&after[..end], params, &mut out)?;
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Url::parse(&out).map_err(|e| TemplateError::InvalidUrl(format!("{out}: {e}")))
}

fn expand_expression(
    expr: &str,
    params: &TemplateParams<'_>,
    out: &mut String,
) -> Result<(), TemplateError> {
    let (lead, names) = match expr.chars().next() {
        Some('?') => (Some('?'), &expr[1..]),
        Some('&') => (Some('&'), &expr[1..]),
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => (None, expr),
        _ => return Err(TemplateError::Unsupported(expr.to_string())),
    };

    let names: Vec<&str> = names.split(',').map(str::trim).collect();
    if names.iter().any(|n| n.is_empty() || !n.chars().all(is_varchar)) {
        return Err(TemplateError::Unsupported(expr.to_string()));
    }

    match lead {
        None => {
            let values: Vec<String> = names
                .iter()
                .filter_map(|n| params.get(n))
                .map(|v| pct_encode(v))
                .collect();
            out.push_str(&values.join(","));
        }
        Some(mut sep) => {
            for name in names {
                if let Some(value) = params.get(name) {
                    out.push(sep);
                    out.push_str(name);
                    out.push('=');
                    out.push_str(&pct_encode(value));
                    sep = '&';
                }
            }
        }
    }
    Ok(())
}

fn is_varchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Everything outside the RFC 3986 unreserved set.
const RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn pct_encode(value: &str) -> String {
    utf8_percent_encode(value, RESERVED).to_string()
}
