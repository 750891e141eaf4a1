//! Widget scripts attached to a page only when the page needs them.
//!
//! Each [`ScriptRule`] pairs a selector with a script URL. When the selector
//! matches at least one element of a rendered page, an async `<script>` tag
//! for that URL is appended to the page body. Rules are evaluated
//! independently and the tags carry no ordering between them.
//!
//! Evaluation happens once per rendered page at build time. Running
//! [`load_widget_scripts`] twice on the same document appends the tags twice.

use std::{fmt, io::Cursor, str::FromStr, sync::LazyLock};

use anyhow::{bail, Result};
use log::{debug, warn};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};

/// A script injected into a page. Never tracked after it is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptTag {
    pub src: String,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Word(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrCondition {
    name: String,
    op: AttrOp,
}

impl AttrCondition {
    fn matches(&self, value: &str) -> bool {
        match &self.op {
            AttrOp::Exists => true,
            AttrOp::Equals(v) => value == v,
            // empty operands never match, as in CSS
            AttrOp::Prefix(v) => !v.is_empty() && value.starts_with(v.as_str()),
            AttrOp::Suffix(v) => !v.is_empty() && value.ends_with(v.as_str()),
            AttrOp::Contains(v) => !v.is_empty() && value.contains(v.as_str()),
            AttrOp::Word(v) => value.split_ascii_whitespace().any(|w| w == v),
        }
    }
}

/// A simple CSS selector: `tag`, `.class`, `[attr]` and `[attr<op>value]`
/// parts with no combinators, e.g. `code[class^='language-']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selector {
    source: String,
    tag: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn take_ident(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_ident_char(c)).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_attr(inner: &str) -> Result<AttrCondition> {
    let (name, rest) = take_ident(inner.trim());
    if name.is_empty() {
        bail!("missing attribute name in [{inner}]");
    }
    let name = name.to_ascii_lowercase();
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(AttrCondition {
            name,
            op: AttrOp::Exists,
        });
    }

    let (op, value) = match rest.split_once('=') {
        Some((op, value)) => (op.trim(), value.trim()),
        None => bail!("invalid attribute condition [{inner}]"),
    };
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value)
        .to_string();

    let op = match op {
        "" => AttrOp::Equals(value),
        "^" => AttrOp::Prefix(value),
        "$" => AttrOp::Suffix(value),
        "*" => AttrOp::Contains(value),
        "~" => AttrOp::Word(value),
        _ => bail!("unsupported attribute operator {op}= in [{inner}]"),
    };
    Ok(AttrCondition { name, op })
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            bail!("empty selector");
        }

        let (tag, mut rest) = take_ident(source);
        let mut selector = Selector {
            source: source.to_string(),
            tag: (!tag.is_empty()).then(|| tag.to_ascii_lowercase()),
            classes: vec![],
            attrs: vec![],
        };
        if let Some(r) = rest.strip_prefix('*').filter(|_| tag.is_empty()) {
            rest = r;
        }

        while !rest.is_empty() {
            if let Some(r) = rest.strip_prefix('.') {
                let (class, r) = take_ident(r);
                if class.is_empty() {
                    bail!("missing class name in selector {source:?}");
                }
                selector.classes.push(class.to_string());
                rest = r;
            } else if let Some(r) = rest.strip_prefix('[') {
                let Some(end) = r.find(']') else {
                    bail!("unclosed [ in selector {source:?}");
                };
                selector.attrs.push(parse_attr(&r[..end])?);
                rest = &r[end + 1..];
            } else {
                bail!("unsupported selector syntax {rest:?} in {source:?}");
            }
        }

        Ok(selector)
    }
}

impl Selector {
    fn matches_element(&self, elem: &BytesStart<'_>) -> bool {
        if let Some(tag) = &self.tag {
            if !elem.local_name().as_ref().eq_ignore_ascii_case(tag.as_bytes()) {
                return false;
            }
        }

        let attr = |name: &str| -> Option<String> {
            // HTML rules: unquoted and valueless attributes are fine
            elem.html_attributes()
                .flatten()
                .find(|a| a.key.as_ref().eq_ignore_ascii_case(name.as_bytes()))
                .map(|a| String::from_utf8_lossy(&a.value).into_owned())
        };

        if !self.classes.is_empty() {
            let Some(class) = attr("class") else {
                return false;
            };
            let has_all = self
                .classes
                .iter()
                .all(|c| class.split_ascii_whitespace().any(|w| w == c));
            if !has_all {
                return false;
            }
        }

        self.attrs
            .iter()
            .all(|cond| attr(&cond.name).is_some_and(|v| cond.matches(&v)))
    }
}

/// The page-side capabilities the loader needs.
pub(crate) trait Document {
    /// Whether at least one element matches `selector`.
    fn query_selector(&self, selector: &Selector) -> bool;
    fn append_script(&mut self, tag: ScriptTag);
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptRule {
    pub selector: Selector,
    pub src: &'static str,
}

impl ScriptRule {
    fn new(selector: &str, src: &'static str) -> Self {
        Self {
            selector: selector
                .parse()
                .unwrap_or_else(|e| panic!("invalid built-in selector {selector:?}: {e}")),
            src,
        }
    }
}

pub(crate) static WIDGET_RULES: LazyLock<Vec<ScriptRule>> = LazyLock::new(|| {
    vec![
        ScriptRule::new("blockquote.twitter-tweet", "//platform.twitter.com/widgets.js"),
        ScriptRule::new("code[class^='language-']", "/js/prism.js"),
    ]
});

/// Appends an async script tag for every rule whose selector matches `doc`.
pub(crate) fn load_widget_scripts<D: Document>(doc: &mut D, rules: &[ScriptRule]) {
    for rule in rules {
        if doc.query_selector(&rule.selector) {
            debug!("{} matched, loading {}", rule.selector, rule.src);
            doc.append_script(ScriptTag {
                src: rule.src.to_string(),
                is_async: true,
            });
        }
    }
}

fn create_html_reader(content: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(false);
    reader.config_mut().enable_all_checks(false);
    reader
}

/// Logs a parse error and tells whether reading can go on. Stray `&` in
/// inline scripts or raw text is reported as an error but can be skipped;
/// a second error at the same position means the reader is stuck.
fn skip_error(
    reader: &Reader<&[u8]>,
    last_error: &mut Option<u64>,
    err: &quick_xml::Error,
) -> bool {
    warn!(
        "HTML parse error at position {}: {err}. skipping...",
        reader.error_position()
    );
    let at = reader.buffer_position();
    if *last_error == Some(at) {
        return false;
    }
    *last_error = Some(at);
    true
}

/// A rendered HTML page. Scripts appended to it are placed right before
/// `</body>` when the page is turned back into text.
#[derive(Debug)]
pub(crate) struct HtmlDocument {
    source: String,
    scripts: Vec<ScriptTag>,
}

impl HtmlDocument {
    pub fn new(source: String) -> Self {
        Self {
            source,
            scripts: vec![],
        }
    }

    /// Byte offset of the last `</body>` tag, if any.
    fn body_end(&self) -> Option<usize> {
        let mut reader = create_html_reader(self.source.as_bytes());
        let mut found = None;
        let mut last_error = None;
        loop {
            match reader.read_event() {
                Ok(Event::End(e)) if e.local_name().as_ref().eq_ignore_ascii_case(b"body") => {
                    let end = reader.buffer_position() as usize;
                    found = self.source[..end].rfind("</");
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) if skip_error(&reader, &mut last_error, &e) => {}
                Err(_) => break,
            }
        }
        found
    }

    fn render_scripts(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        for script in &self.scripts {
            let mut elem = BytesStart::new("script");
            elem.push_attribute(("src", script.src.as_str()));
            if script.is_async {
                elem.push_attribute(("async", ""));
            }
            writer.write_event(Event::Start(elem))?;
            // keeps the tag from being read as self-closing
            writer.write_event(Event::Text(BytesText::new(" ")))?;
            writer.write_event(Event::End(BytesEnd::new("script")))?;
        }
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    pub fn scripts(&self) -> &[ScriptTag] {
        &self.scripts
    }

    pub fn into_html(self) -> Result<String> {
        if self.scripts.is_empty() {
            return Ok(self.source);
        }
        let tags = self.render_scripts()?;
        let at = self.body_end().unwrap_or(self.source.len());

        let mut out = String::with_capacity(self.source.len() + tags.len());
        out.push_str(&self.source[..at]);
        out.push_str(&tags);
        out.push_str(&self.source[at..]);
        Ok(out)
    }
}

impl Document for HtmlDocument {
    fn query_selector(&self, selector: &Selector) -> bool {
        let mut reader = create_html_reader(self.source.as_bytes());
        let mut last_error = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e) | Event::Empty(e)) if selector.matches_element(&e) => {
                    return true;
                }
                Ok(Event::Eof) => return false,
                Ok(_) => {}
                Err(e) if skip_error(&reader, &mut last_error, &e) => {}
                Err(_) => {
                    debug!("giving up on {selector}");
                    return false;
                }
            }
        }
    }

    fn append_script(&mut self, tag: ScriptTag) {
        self.scripts.push(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWEET_JS: &str = "//platform.twitter.com/widgets.js";
    const PRISM_JS: &str = "/js/prism.js";

    #[derive(Default)]
    struct FakeDocument {
        present: Vec<&'static str>,
        appended: Vec<ScriptTag>,
    }

    impl Document for FakeDocument {
        fn query_selector(&self, selector: &Selector) -> bool {
            self.present.contains(&selector.source.as_str())
        }

        fn append_script(&mut self, tag: ScriptTag) {
            self.appended.push(tag);
        }
    }

    fn srcs(tags: &[ScriptTag]) -> Vec<&str> {
        let mut v: Vec<_> = tags.iter().map(|t| t.src.as_str()).collect();
        v.sort();
        v
    }

    fn page(body: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>t</title></head>\n<body>\n{body}\n</body>\n</html>\n"
        )
    }

    #[test]
    fn parses_rule_table_selectors() {
        let s: Selector = "blockquote.twitter-tweet".parse().unwrap();
        assert_eq!(s.tag.as_deref(), Some("blockquote"));
        assert_eq!(s.classes, vec!["twitter-tweet"]);

        let s: Selector = "code[class^='language-']".parse().unwrap();
        assert_eq!(s.tag.as_deref(), Some("code"));
        assert_eq!(
            s.attrs,
            vec![AttrCondition {
                name: "class".into(),
                op: AttrOp::Prefix("language-".into())
            }]
        );
    }

    #[test]
    fn rejects_unsupported_selectors() {
        assert!("".parse::<Selector>().is_err());
        assert!("div p".parse::<Selector>().is_err());
        assert!("a[href".parse::<Selector>().is_err());
        assert!("a[href|='en']".parse::<Selector>().is_err());
        assert!("a.".parse::<Selector>().is_err());
    }

    #[test]
    fn tweet_only_page_loads_tweet_widget() {
        let mut doc = HtmlDocument::new(page(
            "<blockquote class=\"twitter-tweet\"><p>hi</p></blockquote>\n<code>plain</code>",
        ));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(
            doc.scripts(),
            &[ScriptTag {
                src: TWEET_JS.into(),
                is_async: true
            }]
        );
    }

    #[test]
    fn both_widgets_load_independently() {
        let mut doc = HtmlDocument::new(page(
            "<pre><code class=\"language-rust\">fn main() {}</code></pre>\n\
             <blockquote class=\"quote twitter-tweet\"><a href=\"#\">t</a></blockquote>",
        ));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(doc.scripts()), vec![TWEET_JS, PRISM_JS]);
        assert!(doc.scripts().iter().all(|t| t.is_async));
    }

    #[test]
    fn plain_page_loads_nothing() {
        let source = page("<p>Just <em>text</em>.</p><blockquote>not a tweet</blockquote>");
        let mut doc = HtmlDocument::new(source.clone());
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert!(doc.scripts().is_empty());
        assert_eq!(doc.into_html().unwrap(), source);
    }

    #[test]
    fn class_prefix_matches_whole_attribute_value() {
        // `^=` looks at the start of the attribute, not at each class
        let mut doc = HtmlDocument::new(page("<code class=\"hl language-js\">x</code>"));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert!(doc.scripts().is_empty());
    }

    #[test]
    fn every_rule_is_checked_against_the_document() {
        let mut doc = FakeDocument {
            present: vec!["code[class^='language-']"],
            ..Default::default()
        };
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(&doc.appended), vec![PRISM_JS]);
    }

    #[test]
    fn running_twice_injects_twice() {
        let mut doc = FakeDocument {
            present: vec!["blockquote.twitter-tweet"],
            ..Default::default()
        };
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(&doc.appended), vec![TWEET_JS, TWEET_JS]);
    }

    #[test]
    fn scripts_land_before_closing_body() {
        let mut doc = HtmlDocument::new(page(
            "<blockquote class=\"twitter-tweet\">t</blockquote>",
        ));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        let html = doc.into_html().unwrap();
        assert!(html.contains(&format!(
            "</blockquote>\n<script src=\"{TWEET_JS}\" async=\"\"> </script></body>"
        )));
        assert!(html.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn scripts_append_at_end_without_body() {
        let mut doc = HtmlDocument::new("<blockquote class=\"twitter-tweet\">t</blockquote>".into());
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(
            doc.into_html().unwrap(),
            format!("<blockquote class=\"twitter-tweet\">t</blockquote><script src=\"{TWEET_JS}\" async=\"\"> </script>")
        );
    }

    #[test]
    fn stray_ampersand_in_head_script_does_not_hide_widgets() {
        let source = "<!DOCTYPE html>\n<html>\n<head><script>if (window.a && window.b) {}</script></head>\n<body>\n<blockquote class=\"twitter-tweet\">t</blockquote>\n</body>\n</html>\n";
        let mut doc = HtmlDocument::new(source.into());
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(doc.scripts()), vec![TWEET_JS]);

        let html = doc.into_html().unwrap();
        assert!(html.ends_with(&format!(
            "</blockquote>\n<script src=\"{TWEET_JS}\" async=\"\"> </script></body>\n</html>\n"
        )), "{html}");
    }

    #[test]
    fn raw_ampersand_in_text_keeps_scripts_inside_body() {
        let mut doc = HtmlDocument::new(page(
            "<blockquote class=\"twitter-tweet\">t</blockquote>\n<p>Q&A</p>\n<pre><code class=\"language-sh\">a && b</code></pre>",
        ));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(doc.scripts()), vec![TWEET_JS, PRISM_JS]);

        let html = doc.into_html().unwrap();
        assert!(html.contains("</code></pre>\n<script "), "{html}");
        assert!(html.ends_with("</script></body>\n</html>\n"), "{html}");
    }

    #[test]
    fn malformed_markup_never_fails_the_page() {
        let source =
            page("<p>a < b & c</p><div <<>\n<blockquote class=\"twitter-tweet\">t</blockquote>");
        let mut doc = HtmlDocument::new(source.clone());
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        let html = doc.into_html().unwrap();
        // whatever was detected, the original markup is kept intact
        assert!(html.starts_with(&source[..source.find("</body>").unwrap()]), "{html}");

        let mut plain = HtmlDocument::new("<p>&&& <<</p>".into());
        load_widget_scripts(&mut plain, &WIDGET_RULES);
        assert!(plain.scripts().is_empty());
        assert_eq!(plain.into_html().unwrap(), "<p>&&& <<</p>");
    }

    #[test]
    fn unquoted_and_valueless_attributes_match() {
        let doc = HtmlDocument::new(page(
            "<blockquote class=twitter-tweet data-dnt>t</blockquote>",
        ));
        assert!(doc.query_selector(&"blockquote.twitter-tweet".parse().unwrap()));
        assert!(doc.query_selector(&"blockquote[data-dnt]".parse().unwrap()));

        let mut doc = HtmlDocument::new(page("<code class=language-rust>x</code>"));
        load_widget_scripts(&mut doc, &WIDGET_RULES);
        assert_eq!(srcs(doc.scripts()), vec![PRISM_JS]);
    }

    #[test]
    fn matches_empty_elements_and_other_operators() {
        let doc = HtmlDocument::new(page("<img src=\"/a.svg\" alt=\"logo\"/>"));
        for (selector, expected) in [
            ("img[src$='.svg']", true),
            ("img[src*='a.s']", true),
            ("img[alt]", true),
            ("img[alt=logo]", true),
            ("img[title]", false),
            ("[alt~=\"logo\"]", true),
            ("*[src^='/']", true),
            ("IMG", true),
        ] {
            assert_eq!(
                doc.query_selector(&selector.parse().unwrap()),
                expected,
                "{selector}"
            );
        }
    }
}
