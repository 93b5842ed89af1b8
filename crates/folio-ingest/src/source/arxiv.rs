//! arXiv export API: Atom feed paged by `start` / `max_results`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_fetch::{FetchError, HttpClient, SourceName, StatusClass, classify_status};
use once_cell::sync::OnceCell;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;

use super::{MetadataSource, Page, Query};
use crate::record::RawRecord;

pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
/// Per-request ceiling of the export API.
pub const MAX_PAGE_SIZE: usize = 2000;

const DATE_LOWER: &str = "190001010000";
const DATE_UPPER: &str = "299912312359";

static ABS_ID: OnceCell<Regex> = OnceCell::new();

fn abs_id_pattern() -> Result<&'static Regex, FetchError> {
    ABS_ID
        .get_or_try_init(|| Regex::new(r"arxiv\.org/abs/(.+)$"))
        .map_err(|e| FetchError::Malformed(e.to_string()))
}

pub struct ArxivSource<C> {
    client:      Arc<C>,
    base_url:    String,
    name:        SourceName,
    file_source: SourceName,
}

impl<C> ArxivSource<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            base_url: ARXIV_API_URL.to_string(),
            name: SourceName::new("arxiv"),
            file_source: SourceName::new("arxiv-pdf"),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn page_url(&self, query: &Query, offset: usize, limit: usize) -> Result<String, FetchError> {
        let params = [
            ("search_query", build_search_query(query)),
            ("start", offset.to_string()),
            ("max_results", limit.min(MAX_PAGE_SIZE).to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ];
        url::Url::parse_with_params(&self.base_url, &params)
            .map(String::from)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", self.base_url)))
    }
}

/// `search_query` expression: categories OR'ed, keywords OR'ed over all
/// fields, and a submission-date window, each group AND'ed together.
pub fn build_search_query(query: &Query) -> String {
    let mut clauses = Vec::new();

    if !query.categories.is_empty() {
        let cats: Vec<_> = query.categories.iter().map(|c| format!("cat:{c}")).collect();
        clauses.push(format!("({})", cats.join(" OR ")));
    }
    if !query.keywords.is_empty() {
        let words: Vec<_> = query
            .keywords
            .iter()
            .map(|k| format!("all:\"{}\"", k.replace('"', "")))
            .collect();
        clauses.push(format!("({})", words.join(" OR ")));
    }
    if query.date_from.is_some() || query.date_to.is_some() {
        let bound = |d: Option<DateTime<Utc>>, open: &str| {
            d.map(|d| d.format("%Y%m%d%H%M").to_string())
                .unwrap_or_else(|| open.to_string())
        };
        clauses.push(format!(
            "submittedDate:[{} TO {}]",
            bound(query.date_from, DATE_LOWER),
            bound(query.date_to, DATE_UPPER)
        ));
    }

    if clauses.is_empty() {
        return "cat:cs.AI".to_string();
    }
    clauses.join(" AND ")
}

impl<C: HttpClient> MetadataSource for ArxivSource<C> {
    fn name(&self) -> &SourceName { &self.name }

    fn file_source(&self) -> &SourceName { &self.file_source }

    fn max_page_size(&self) -> usize { MAX_PAGE_SIZE }

    async fn fetch_page(&self, query: &Query, offset: usize, limit: usize) -> Result<Page, FetchError> {
        let url = self.page_url(query, offset, limit)?;
        tracing::debug!(%url, offset, limit, "requesting arXiv page");

        let response = self.client.get(&url).await?;
        if classify_status(response.status) != StatusClass::Success {
            return Err(FetchError::Status {
                status: response.status,
                url,
            });
        }
        let body = response.text().await?;
        parse_feed(&body, &self.name)
    }
}

#[derive(Clone, Copy, Debug)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    TotalResults,
}

#[derive(Default)]
struct EntryBuilder {
    entry_id:         Option<String>,
    title:            Option<String>,
    summary:          Option<String>,
    published:        Option<String>,
    updated:          Option<String>,
    authors:          Vec<String>,
    primary_category: Option<String>,
    categories:       Vec<String>,
    pdf_url:          Option<String>,
}

impl EntryBuilder {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Id => self.entry_id = Some(text),
            Field::Title => self.title = Some(text),
            Field::Summary => self.summary = Some(text),
            Field::Published => self.published = Some(text),
            Field::Updated => self.updated = Some(text),
            Field::AuthorName => self.authors.push(text),
            Field::TotalResults => {}
        }
    }

    fn attributes(&mut self, element: &BytesStart<'_>) {
        match element.name().as_ref() {
            b"link" => {
                let is_pdf = attr(element, b"type").as_deref() == Some("application/pdf")
                    || attr(element, b"title").as_deref() == Some("pdf");
                if is_pdf && self.pdf_url.is_none() {
                    self.pdf_url = attr(element, b"href");
                }
            }
            b"category" => {
                if let Some(term) = attr(element, b"term") {
                    if !self.categories.contains(&term) {
                        self.categories.push(term);
                    }
                }
            }
            b"arxiv:primary_category" => self.primary_category = attr(element, b"term"),
            _ => {}
        }
    }

    fn build(self, source: &SourceName, id_pattern: &Regex) -> RawRecord {
        let source_id = self.entry_id.as_deref().and_then(|id| {
            id_pattern
                .captures(id.trim())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        });
        RawRecord {
            source_name: source.clone(),
            source_id,
            title: self.title,
            abstract_text: self.summary,
            authors: self.authors,
            categories: self.categories,
            primary_category: self.primary_category,
            published: self.published,
            updated: self.updated,
            file_url: self.pdf_url,
        }
    }
}

fn attr(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Parses an arXiv Atom feed into raw records. Entries whose id is not an
/// `arxiv.org/abs/` link (such as API error entries) come back without a
/// source id and are rejected by normalization.
pub fn parse_feed(xml: &str, source: &SourceName) -> Result<Page, FetchError> {
    let id_pattern = abs_id_pattern()?;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = Page::default();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                text.clear();
                field = None;
                let name = e.name();
                if name.as_ref() == b"entry" {
                    entry = Some(EntryBuilder::default());
                    continue;
                }
                match entry.as_mut() {
                    None => {
                        if name.as_ref() == b"opensearch:totalResults" {
                            field = Some(Field::TotalResults);
                        }
                    }
                    Some(builder) => match name.as_ref() {
                        b"author" => in_author = true,
                        b"name" if in_author => field = Some(Field::AuthorName),
                        b"id" => field = Some(Field::Id),
                        b"title" => field = Some(Field::Title),
                        b"summary" => field = Some(Field::Summary),
                        b"published" => field = Some(Field::Published),
                        b"updated" => field = Some(Field::Updated),
                        _ => builder.attributes(&e),
                    },
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(builder) = entry.as_mut() {
                    builder.attributes(&e);
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| FetchError::Malformed(format!("bad text in feed: {e}")))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(c)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(builder) = entry.take() {
                        page.records.push(builder.build(source, id_pattern));
                    }
                    field = None;
                }
                b"author" => in_author = false,
                _ => {
                    if let Some(done) = field.take() {
                        let value = std::mem::take(&mut text);
                        match (done, entry.as_mut()) {
                            (Field::TotalResults, _) => {
                                page.total_results = value.trim().parse().ok();
                            }
                            (_, Some(builder)) => builder.set(done, value),
                            _ => {}
                        }
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FetchError::Malformed(format!(
                    "XML parse error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    tracing::trace!(entries = page.records.len(), total = ?page.total_results, "parsed arXiv feed");
    Ok(page)
}
