//! Hand-tuned strategies for well-known search engines, plus the default
//! registry that maps `source_type` to a strategy.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use harvest_core::crawler::StrategyRegistry;
use harvest_core::error::AppError;
use harvest_core::models::ExtractedRecord;
use harvest_core::request::{FetchRequest, RequestBody, merge_headers, substitute};
use harvest_core::source::{HttpMethod, SourceConfig};
use harvest_core::traits::ExtractionStrategy;
use scraper::{ElementRef, Html, Selector};

use crate::extract::{SelectorStrategy, drop_untitled, element_text, first_in};

/// Search URL used for every Baidu source regardless of its template.
pub const BAIDU_URL_TEMPLATE: &str = "https://www.baidu.com/s?wd={keyword}&pn={page}&ie=utf-8";

/// DuckDuckGo's JavaScript-free endpoint.
pub const DUCKDUCKGO_URL: &str = "https://html.duckduckgo.com/html/";

const DUCKDUCKGO_PAGE_SIZE: u32 = 30;

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

struct EngineSelectors {
    result: Option<Selector>,
    title: Option<Selector>,
    link: Option<Selector>,
    summary: Option<Selector>,
    summary_fallback: Option<Selector>,
}

impl EngineSelectors {
    fn summary(&self, result: ElementRef<'_>) -> String {
        first_in(result, &self.summary)
            .or_else(|| first_in(result, &self.summary_fallback))
            .map(element_text)
            .unwrap_or_default()
    }

    fn results<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        self.result
            .as_ref()
            .map(|s| document.select(s).collect())
            .unwrap_or_default()
    }
}

static BAIDU: LazyLock<EngineSelectors> = LazyLock::new(|| EngineSelectors {
    result: selector("div.result"),
    title: selector("h3.t"),
    link: selector("a"),
    summary: selector("div.c-abstract"),
    summary_fallback: selector("div.c-span-last"),
});

static DUCKDUCKGO: LazyLock<EngineSelectors> = LazyLock::new(|| EngineSelectors {
    result: selector("div.result"),
    title: selector("a.result__a"),
    link: None,
    summary: selector("a.result__snippet"),
    summary_fallback: selector("div.result__snippet"),
});

/// Baidu web search: `div.result` blocks with an `h3.t` title whose link
/// carries the URL, summary from `div.c-abstract` or `div.c-span-last`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaiduStrategy;

impl ExtractionStrategy for BaiduStrategy {
    fn name(&self) -> &str {
        "baidu"
    }

    fn request(&self, config: &SourceConfig, keyword: &str, page: u32, limit: usize) -> FetchRequest {
        FetchRequest {
            method: HttpMethod::Get,
            url: substitute(BAIDU_URL_TEMPLATE, keyword, page, limit),
            headers: merge_headers(&config.headers),
            body: None,
        }
    }

    fn extract(&self, html: &str, _config: &SourceConfig) -> Result<Vec<ExtractedRecord>, AppError> {
        let document = Html::parse_document(html);
        let records = BAIDU
            .results(&document)
            .into_iter()
            .filter_map(|result| {
                let title = first_in(result, &BAIDU.title)?;
                let url = first_in(title, &BAIDU.link)
                    .and_then(|a| a.value().attr("href"))
                    .unwrap_or_default()
                    .to_string();
                Some(ExtractedRecord {
                    title: element_text(title),
                    url,
                    summary: BAIDU.summary(result),
                    image: String::new(),
                    source: "baidu".to_string(),
                })
            })
            .collect();
        Ok(drop_untitled(records))
    }
}

/// DuckDuckGo HTML search, posted as a form (`q`, `kl`, and `s` offset for
/// later pages).
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDuckGoStrategy;

impl ExtractionStrategy for DuckDuckGoStrategy {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn request(&self, config: &SourceConfig, keyword: &str, page: u32, _limit: usize) -> FetchRequest {
        let mut form = BTreeMap::from([
            ("q".to_string(), keyword.to_string()),
            ("kl".to_string(), "cn-zh".to_string()),
        ]);
        if page > 1 {
            form.insert(
                "s".to_string(),
                (page - 1).saturating_mul(DUCKDUCKGO_PAGE_SIZE).to_string(),
            );
        }

        FetchRequest {
            method: HttpMethod::Post,
            url: DUCKDUCKGO_URL.to_string(),
            headers: merge_headers(&config.headers),
            body: Some(RequestBody::Form(form)),
        }
    }

    fn extract(&self, html: &str, _config: &SourceConfig) -> Result<Vec<ExtractedRecord>, AppError> {
        let document = Html::parse_document(html);
        let records = DUCKDUCKGO
            .results(&document)
            .into_iter()
            .filter_map(|result| {
                let link = first_in(result, &DUCKDUCKGO.title)?;
                Some(ExtractedRecord {
                    title: element_text(link),
                    url: link.value().attr("href").unwrap_or_default().to_string(),
                    summary: DUCKDUCKGO.summary(result),
                    image: String::new(),
                    source: "duckduckgo".to_string(),
                })
            })
            .collect();
        Ok(drop_untitled(records))
    }
}

/// Generic selector strategy for any type, specialized ones for `baidu`
/// and `duckduckgo`.
pub fn builtin_strategies() -> StrategyRegistry {
    StrategyRegistry::new(Arc::new(SelectorStrategy))
        .register("baidu", Arc::new(BaiduStrategy))
        .register("duckduckgo", Arc::new(DuckDuckGoStrategy))
}
