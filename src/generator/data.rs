use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A Markdown source file known to the generator.
#[derive(Serialize, Debug, Clone)]
pub(crate) struct ContentItem {
    /// Path relative to the content root.
    pub input_path: PathBuf,
    pub title: String,
    pub tags: Vec<String>,
    pub date: DateTime<Utc>,
    pub layout: Option<String>,
    pub url: String,

    #[serde(skip_serializing)]
    pub out_path: PathBuf,
    #[serde(skip_serializing)]
    pub body: String,
}

#[derive(Serialize, Debug)]
pub(super) struct SiteData<'a> {
    pub name: &'a str,
    pub url: &'a str,
}

#[derive(Serialize, Debug)]
pub(super) struct Collections<'a> {
    pub posts: &'a [&'a ContentItem],
}

#[derive(Serialize, Debug)]
pub(super) struct PageData<'a> {
    pub site: SiteData<'a>,
    pub page: Option<&'a ContentItem>,
    pub content: String,
    pub collections: Collections<'a>,
}
