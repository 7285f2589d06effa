//! RSS 2.0 and Atom ingestion.
//!
//! Feeds skip the link extractor entirely: each entry already carries a title,
//! link, description and date, so it maps straight onto an [`ArticleRecord`]
//! scored with the feed formula.

use crate::dates::{normalize_date, today};
use crate::models::{ArticleRecord, FeedEntry};
use crate::scoring::Scorer;
use crate::utils::{clean_text, source_domain, strip_tags};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::error::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    Content,
    Published,
    Updated,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        Some(match tag {
            b"title" => Field::Title,
            b"link" => Field::Link,
            b"description" | b"summary" => Field::Description,
            b"content:encoded" | b"content" => Field::Content,
            b"pubDate" | b"published" | b"dc:date" => Field::Published,
            b"updated" => Field::Updated,
            _ => return None,
        })
    }
}

/// Parse every `<item>` (RSS) or `<entry>` (Atom) in `xml`.
///
/// Markup inside descriptions and content is stripped; entities and CDATA
/// sections are resolved. Channel-level elements are ignored.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, Box<dyn Error>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<(Field, Vec<u8>)> = None;
    let mut buf = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let tag = name.as_ref();
                if tag == b"item" || tag == b"entry" {
                    current = Some(FeedEntry::default());
                } else if let Some(entry) = current.as_mut() {
                    if field.is_none() {
                        if tag == b"link" {
                            if let Some(href) = atom_href(&e) {
                                entry.link = href;
                            }
                        }
                        if let Some(f) = Field::from_tag(tag) {
                            field = Some((f, tag.to_vec()));
                            buf.clear();
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    if e.name().as_ref() == b"link" && entry.link.is_empty() {
                        if let Some(href) = atom_href(&e) {
                            entry.link = href;
                        }
                    }
                }
            }
            Event::Text(t) if field.is_some() => buf.push_str(&String::from_utf8_lossy(&t)),
            Event::CData(c) if field.is_some() => buf.push_str(&String::from_utf8_lossy(&c)),
            Event::GeneralRef(r) if field.is_some() => {
                let name = String::from_utf8_lossy(&r);
                match resolve_entity(&name) {
                    Some(ch) => buf.push(ch),
                    None => {
                        buf.push('&');
                        buf.push_str(&name);
                        buf.push(';');
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let tag = name.as_ref();
                if let Some((f, open)) = &field {
                    if open.as_slice() == tag {
                        if let Some(entry) = current.as_mut() {
                            commit(entry, *f, &buf);
                        }
                        field = None;
                    }
                } else if tag == b"item" || tag == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

fn commit(entry: &mut FeedEntry, field: Field, raw: &str) {
    match field {
        Field::Title => entry.title = strip_tags(raw),
        Field::Link => {
            let link = raw.trim();
            if !link.is_empty() {
                entry.link = link.to_string();
            }
        }
        Field::Description => entry.description = strip_tags(raw),
        Field::Content => entry.content = strip_tags(raw),
        Field::Published => entry.published = Some(raw.trim().to_string()),
        Field::Updated => {
            if entry.published.is_none() {
                entry.published = Some(raw.trim().to_string());
            }
        }
    }
}

/// `href` of an Atom `<link>` unless it points somewhere other than the article.
fn atom_href(e: &BytesStart) -> Option<String> {
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"href" => href = Some(value),
            b"rel" => alternate = value == "alternate",
            _ => {}
        }
    }
    href.filter(|h| alternate && !h.trim().is_empty())
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Turn the first `cap` entries of a feed into scored records.
#[instrument(level = "info", skip(entries, scorer), fields(entries = entries.len()))]
pub fn feed_records(
    entries: Vec<FeedEntry>,
    feed_url: &str,
    scorer: &Scorer,
    cap: usize,
    now: DateTime<Utc>,
) -> Vec<ArticleRecord> {
    let source = source_domain(feed_url).unwrap_or_default();
    let records: Vec<ArticleRecord> = entries
        .into_iter()
        .take(cap)
        .filter_map(|entry| entry_record(entry, &source, scorer, now))
        .collect();
    debug!(count = records.len(), %source, "Feed records built");
    records
}

/// One scored record from a structured entry; `None` without title or link.
pub(crate) fn entry_record(
    entry: FeedEntry,
    source: &str,
    scorer: &Scorer,
    now: DateTime<Utc>,
) -> Option<ArticleRecord> {
    let title = clean_text(&entry.title);
    if title.is_empty() || entry.link.is_empty() {
        warn!(link = %entry.link, "Entry missing title or link");
        return None;
    }
    let publication_date = entry
        .published
        .as_deref()
        .map(|raw| normalize_date(raw, now))
        .unwrap_or_else(|| today(now));
    let mut record = ArticleRecord::skeleton(title, entry.link, source.to_string(), publication_date);
    record.fetched_at = now;
    record.score = scorer.score_feed(&record.title, &entry.description);
    record.content = body_of(&entry.content, &entry.description);
    record.summary = (!entry.description.is_empty()).then_some(entry.description);
    Some(record)
}

fn body_of(content: &str, description: &str) -> String {
    match (content.is_empty(), description.is_empty()) {
        (true, _) => description.to_string(),
        (false, true) => content.to_string(),
        (false, false) if content.contains(description) => content.to_string(),
        (false, false) => format!("{content}\n\n{description}"),
    }
}
