//! Selector-driven extraction built on `scraper`.

use harvest_core::error::AppError;
use harvest_core::models::ExtractedRecord;
use harvest_core::source::{FieldSelectors, Selectors, SourceConfig};
use harvest_core::traits::ExtractionStrategy;
use scraper::{ElementRef, Html, Selector};

/// The generic strategy: interprets a source's CSS selectors.
///
/// Title, url and summary are the matched element's text; the image is its
/// `src` (or `data-src`) attribute.
///
/// With a container selector, each matching node yields one record and
/// the field selectors are resolved inside it. Without one, each field
/// selector runs once over the whole document and record `i` is assembled
/// from the `i`-th match of every list.
///
/// Known limitation of the second mode: nothing checks that the four lists
/// line up. If one selector matches an extra node (an ad, a header) every
/// later record pairs fields from different items. Prefer a container
/// selector whenever the page has one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorStrategy;

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &str {
        "selector"
    }

    fn extract(&self, html: &str, config: &SourceConfig) -> Result<Vec<ExtractedRecord>, AppError> {
        let document = Html::parse_document(html);

        let records = match &config.selectors {
            Selectors::Container { container, fields } => {
                let container = Selector::parse(container).map_err(|e| {
                    AppError::ExtractionError(format!(
                        "Invalid container selector '{container}': {e}"
                    ))
                })?;
                let fields = CompiledFields::new(fields);
                document
                    .select(&container)
                    .map(|node| fields.record_in(node, &config.name))
                    .collect()
            }
            Selectors::Independent { fields } => {
                positional_records(&document, &CompiledFields::new(fields), &config.name)
            }
        };

        Ok(drop_untitled(records))
    }
}

/// Field selectors parsed once per page. A selector that fails to parse
/// behaves like one that matches nothing.
struct CompiledFields {
    title: Option<Selector>,
    url: Option<Selector>,
    summary: Option<Selector>,
    image: Option<Selector>,
}

impl CompiledFields {
    fn new(fields: &FieldSelectors) -> Self {
        Self {
            title: compile(fields.title.as_deref()),
            url: compile(fields.url.as_deref()),
            summary: compile(fields.summary.as_deref()),
            image: compile(fields.image.as_deref()),
        }
    }

    fn record_in(&self, scope: ElementRef<'_>, source: &str) -> ExtractedRecord {
        ExtractedRecord {
            title: first_in(scope, &self.title).map(element_text).unwrap_or_default(),
            url: first_in(scope, &self.url).map(element_text).unwrap_or_default(),
            summary: first_in(scope, &self.summary).map(element_text).unwrap_or_default(),
            image: first_in(scope, &self.image).map(image_src).unwrap_or_default(),
            source: source.to_string(),
        }
    }
}

/// Pairs the four absolute selectors by match index. Nothing checks that
/// the i-th title, url, summary and image belong to the same item, so
/// selectors that match different counts produce mixed-up records.
fn positional_records(
    document: &Html,
    fields: &CompiledFields,
    source: &str,
) -> Vec<ExtractedRecord> {
    let titles = select_all(document, &fields.title);
    let urls = select_all(document, &fields.url);
    let summaries = select_all(document, &fields.summary);
    let images = select_all(document, &fields.image);

    let count = titles
        .len()
        .max(urls.len())
        .max(summaries.len())
        .max(images.len());

    (0..count)
        .map(|i| ExtractedRecord {
            title: titles.get(i).copied().map(element_text).unwrap_or_default(),
            url: urls.get(i).copied().map(element_text).unwrap_or_default(),
            summary: summaries.get(i).copied().map(element_text).unwrap_or_default(),
            image: images.get(i).copied().map(image_src).unwrap_or_default(),
            source: source.to_string(),
        })
        .collect()
}

fn select_all<'a>(document: &'a Html, selector: &Option<Selector>) -> Vec<ElementRef<'a>> {
    selector
        .as_ref()
        .map(|s| document.select(s).collect())
        .unwrap_or_default()
}

/// First match of `selector` inside `scope`.
pub(crate) fn first_in<'a>(scope: ElementRef<'a>, selector: &Option<Selector>) -> Option<ElementRef<'a>> {
    selector.as_ref().and_then(|s| scope.select(s).next())
}

pub(crate) fn compile(selector: Option<&str>) -> Option<Selector> {
    let selector = selector?;
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(%selector, error = %e, "Ignoring invalid field selector");
            None
        }
    }
}

/// Visible text with whitespace runs collapsed and ends trimmed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `src`, falling back to `data-src` for lazy-loaded images.
pub(crate) fn image_src(element: ElementRef<'_>) -> String {
    let value = element.value();
    [value.attr("src"), value.attr("data-src")]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Records without a title are never returned.
pub(crate) fn drop_untitled(records: Vec<ExtractedRecord>) -> Vec<ExtractedRecord> {
    records.into_iter().filter(|r| !r.title.is_empty()).collect()
}
