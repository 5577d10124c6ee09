//! Turning a [`SourceConfig`] plus a keyword/page into a concrete request.

use std::collections::BTreeMap;

use crate::source::{BodyEncoding, HttpMethod, SourceConfig};

/// Header set every request starts from. Source headers override these
/// per key (case-insensitively) but never remove the rest.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Connection", "keep-alive"),
];

/// Request body, already substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Form(BTreeMap<String, String>),
    Json(BTreeMap<String, String>),
}

/// A fully resolved HTTP request: no placeholders left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

impl FetchRequest {
    /// A plain GET with only the default headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: merge_headers(&BTreeMap::new()),
            body: None,
        }
    }

    /// Build the request for one page of a keyword search against `config`.
    pub fn for_page(config: &SourceConfig, keyword: &str, page: u32, limit: usize) -> Self {
        let url = substitute(&config.url_template, keyword, page, limit);
        let body = match config.method {
            HttpMethod::Get => None,
            HttpMethod::Post => config.body_template.as_ref().map(|template| {
                let fields = substitute_fields(template, keyword, page, limit);
                match config.body_encoding {
                    BodyEncoding::Form => RequestBody::Form(fields),
                    BodyEncoding::Json => RequestBody::Json(fields),
                }
            }),
        };

        Self {
            method: config.method,
            url,
            headers: merge_headers(&config.headers),
            body,
        }
    }
}

/// Replace every `{keyword}`, `{page}` and `{limit}` token in `template`.
///
/// Substitution is literal: the keyword is not URL-encoded, and tokens that
/// appear inside inserted values are left alone.
pub fn substitute(template: &str, keyword: &str, page: u32, limit: usize) -> String {
    let page = page.to_string();
    let limit = limit.to_string();
    let tokens = [("{keyword}", keyword), ("{page}", page.as_str()), ("{limit}", limit.as_str())];

    let mut out = String::with_capacity(template.len() + keyword.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tokens.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Apply [`substitute`] to each value of a body template.
pub fn substitute_fields(
    template: &BTreeMap<String, String>,
    keyword: &str,
    page: u32,
    limit: usize,
) -> BTreeMap<String, String> {
    template
        .iter()
        .map(|(key, value)| (key.clone(), substitute(value, keyword, page, limit)))
        .collect()
}

/// The default header set with `custom` laid over it.
pub fn merge_headers(custom: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = DEFAULT_HEADERS
        .iter()
        .filter(|(name, _)| !custom.keys().any(|key| key.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    merged.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
