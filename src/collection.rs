use std::{
    path::{Component, Path},
    sync::LazyLock,
};

use glob::{MatchOptions, Pattern};

use crate::generator::data::ContentItem;

const POSTS_GLOB: &str = "blog/*.md";

static POSTS_PATTERN: LazyLock<Pattern> =
    LazyLock::new(|| Pattern::new(POSTS_GLOB).expect("POSTS_GLOB is a valid pattern"));

// `*` must not cross a `/`, so `blog/*.md` stays one level deep.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// Only `.` segments are dropped: `../blog/a.md` and `/blog/a.md` are not posts.
fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::CurDir => None,
            Component::RootDir => Some("".into()),
            other => Some(other.as_os_str().to_string_lossy()),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn matches(pattern: &Pattern, item: &ContentItem) -> bool {
    pattern.matches_with(&normalize(&item.input_path), MATCH_OPTIONS)
}

/// Items whose input path matches `pattern`, in the order they were given.
pub(crate) fn filtered_by_glob<'a>(
    items: &'a [ContentItem],
    pattern: &Pattern,
) -> Vec<&'a ContentItem> {
    items.iter().filter(|i| matches(pattern, i)).collect()
}

/// The `posts` collection: every `blog/*.md` item, in reverse of the order
/// received. This does not sort; callers decide the incoming order.
pub(crate) fn build_post_collection(items: &[ContentItem]) -> Vec<&ContentItem> {
    let mut posts = filtered_by_glob(items, &POSTS_PATTERN);
    posts.reverse();
    posts
}
