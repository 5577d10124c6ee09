use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::traits::Cleaner;
use htmd::HtmlToMarkdown;

const SKIPPED_TAGS: [&str; 10] = [
    "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg", "form",
];

/// Reduces a fetched page to Markdown before it goes into a prompt.
///
/// Page chrome (scripts, navigation, footers, forms) is dropped and runs of
/// blank lines are squeezed to one.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(SKIPPED_TAGS.to_vec())
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))?;
        Ok(squeeze_blank_lines(&markdown))
    }
}

fn squeeze_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() {
            if !blank_run && !out.is_empty() {
                out.push('\n');
            }
            blank_run = true;
            continue;
        }
        blank_run = false;
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}
