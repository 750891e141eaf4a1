use std::{
    path::{Component, Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use pulldown_cmark::{html, Options, Parser};
use regex::{Regex, RegexBuilder};

use super::data::ContentItem;

#[derive(Debug, Default, PartialEq)]
pub(super) struct FrontMatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub layout: Option<String>,
}

static HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\A---\r?\n(.*?)^---[ \t]*(?:\r?\n|\z)(.*)\z")
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
        .unwrap()
});

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(v) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return v;
        }
    }
    value
}

fn parse_date(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").context("Invalid date format")?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

/// Splits a leading `---` block of `key: value` lines from the body.
pub(super) fn parse_front_matter(content: &str) -> anyhow::Result<(FrontMatter, &str)> {
    let mut front = FrontMatter::default();
    let Some(caps) = HEADER_PATTERN.captures(content) else {
        return Ok((front, content));
    };

    for line in caps[1].lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            bail!("Invalid header: {}", line);
        };
        let value = unquote(value.trim());

        match name.trim() {
            "title" => front.title = Some(value.to_string()),
            "tags" | "tag" => {
                let value = value
                    .strip_prefix('[')
                    .and_then(|v| v.strip_suffix(']'))
                    .unwrap_or(value);
                front.tags = value
                    .split(',')
                    .map(|t| unquote(t.trim()).to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            "date" => front.date = Some(parse_date(value)?),
            "layout" => front.layout = Some(value.to_string()),
            _ => {}
        }
    }

    let body = caps.get(2).map_or("", |m| m.as_str());
    Ok((front, body))
}

pub(super) fn render_markdown(body: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(body, options));
    out
}

/// `blog/a.md` goes to `blog/a/index.html`, `blog/index.md` to `blog/index.html`.
pub(super) fn output_path(input_path: &Path) -> PathBuf {
    let dir = input_path.parent().unwrap_or(Path::new(""));
    match input_path.file_stem() {
        Some(stem) if stem != "index" => dir.join(stem).join("index.html"),
        _ => dir.join("index.html"),
    }
}

pub(super) fn url_of(out_path: &Path) -> String {
    let mut url = String::from("/");
    for c in out_path.parent().into_iter().flat_map(Path::components) {
        if let Component::Normal(s) = c {
            url.push_str(&s.to_string_lossy());
            url.push('/');
        }
    }
    url
}

/// The order content is handed to collections in: oldest first, then by path.
pub(super) fn sort_content(items: &mut [ContentItem]) {
    items.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.input_path.cmp(&b.input_path))
    });
}
