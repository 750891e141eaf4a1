use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context as _};
use chrono::{DateTime, Utc};
use fs_extra::dir::CopyOptions;
use log::{debug, info};

use crate::{
    collection::build_post_collection,
    context::Context,
    scripts::{load_widget_scripts, HtmlDocument, WIDGET_RULES},
};

pub(crate) mod data;
mod utils;

use data::{Collections, ContentItem, PageData, SiteData};
use utils::{output_path, parse_front_matter, render_markdown, sort_content, url_of};

fn preprocess_file(content_dir: &Path, file_path: &Path) -> anyhow::Result<ContentItem> {
    let path = content_dir.join(file_path);
    let content = std::fs::read_to_string(&path)?;
    let (front, body) = parse_front_matter(&content)?;

    let date = match front.date {
        Some(date) => date,
        None => DateTime::<Utc>::from(std::fs::metadata(&path)?.modified()?),
    };
    let title = front.title.unwrap_or_else(|| {
        file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let out_path = output_path(file_path);

    Ok(ContentItem {
        input_path: file_path.to_path_buf(),
        title,
        tags: front.tags,
        date,
        layout: front.layout,
        url: url_of(&out_path),
        out_path,
        body: body.to_string(),
    })
}

fn owned_dirs(ctx: &Context) -> Vec<PathBuf> {
    ctx.passthrough_dirs
        .iter()
        .map(|d| ctx.content_dir.join(d))
        .chain([ctx.out_dir.clone(), ctx.template_dir.clone()])
        .filter_map(|d| d.canonicalize().ok())
        .collect()
}

/// Every Markdown file under the content root, skipping hidden entries and
/// the directories the generator itself owns.
fn scan_content(ctx: &Context) -> anyhow::Result<Vec<ContentItem>> {
    let skipped = owned_dirs(ctx);
    let mut items = vec![];

    let mut q = VecDeque::new();
    q.push_back(PathBuf::new());
    while let Some(path) = q.pop_front() {
        let current_searching_directory_path = ctx.content_dir.join(&path);

        for entry in std::fs::read_dir(&current_searching_directory_path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;

            if meta.is_dir() {
                let full = entry.path().canonicalize()?;
                if skipped.contains(&full) {
                    debug!("Skipping {:?}", entry.path());
                    continue;
                }
                q.push_back(path.join(entry.file_name()));
            } else if meta.is_file() && entry.path().extension().is_some_and(|e| e == "md") {
                let file_path = path.join(entry.file_name());
                let item = preprocess_file(&ctx.content_dir, &file_path)
                    .with_context(|| format!("while preprocessing {:?}", &file_path))?;
                items.push(item);
            }
        }
    }

    Ok(items)
}

fn copy_passthrough(ctx: &Context) -> anyhow::Result<()> {
    let mut cp_opts = CopyOptions::new();
    cp_opts.overwrite = true;

    for dir in ctx.passthrough_dirs.iter() {
        let src = ctx.content_dir.join(dir);
        if !src.is_dir() {
            info!("Passthrough directory({src:?}) does not exist. ignoring...");
            continue;
        }
        // fs_extra copies `src` as a child of the destination
        let dest = ctx.out_dir.join(dir);
        let dest_parent = dest.parent().unwrap_or(&ctx.out_dir);
        fs_extra::dir::create_all(dest_parent, false)?;
        fs_extra::dir::copy(&src, dest_parent, &cp_opts)
            .with_context(|| format!("while copying {src:?}"))?;
        debug!("Copied {src:?} to {dest:?}");
    }
    Ok(())
}

fn site_data(ctx: &Context) -> SiteData<'_> {
    SiteData {
        name: &ctx.blog_name,
        url: &ctx.blog_url,
    }
}

fn layout_for(item: &ContentItem, posts: &[&ContentItem]) -> String {
    if let Some(layout) = &item.layout {
        return layout.clone();
    }
    if item.input_path == Path::new("index.md") {
        "index".to_string()
    } else if posts.iter().any(|p| p.input_path == item.input_path) {
        "post".to_string()
    } else {
        "page".to_string()
    }
}

fn write_page(
    ctx: &Context,
    template: &str,
    data: &PageData,
    out_path: &Path,
) -> anyhow::Result<()> {
    let html = ctx
        .handlebars
        .render(template, data)
        .with_context(|| format!("while rendering {out_path:?} with {template:?}"))?;

    let mut doc = HtmlDocument::new(html);
    load_widget_scripts(&mut doc, &WIDGET_RULES);
    if !doc.scripts().is_empty() {
        debug!("{} widget script(s) for {out_path:?}", doc.scripts().len());
    }

    let path = ctx.out_dir.join(out_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, doc.into_html()?)?;
    Ok(())
}

// `blog/a.md` and `blog/a/index.md` both land on `blog/a/index.html`
fn check_output_collisions(items: &[ContentItem]) -> anyhow::Result<()> {
    let mut claimed: HashMap<&Path, &Path> = HashMap::new();
    for item in items {
        if let Some(first) = claimed.insert(&item.out_path, &item.input_path) {
            bail!(
                "{:?} and {:?} both render to {:?}",
                first,
                item.input_path,
                item.out_path
            );
        }
    }
    Ok(())
}

pub(crate) fn generate_site(ctx: &Context) -> anyhow::Result<()> {
    if ctx.out_dir.exists() {
        fs_extra::dir::remove(&ctx.out_dir)?;
    }
    std::fs::create_dir_all(&ctx.out_dir)?;

    copy_passthrough(ctx)?;

    let mut items = scan_content(ctx)?;
    sort_content(&mut items);
    info!("Found {} content file(s)", items.len());
    check_output_collisions(&items)?;

    let posts = build_post_collection(&items);
    info!("{} post(s) in the posts collection", posts.len());

    for item in items.iter() {
        let layout = layout_for(item, &posts);
        let data = PageData {
            site: site_data(ctx),
            page: Some(item),
            content: render_markdown(&item.body),
            collections: Collections { posts: &posts },
        };
        write_page(ctx, &layout, &data, &item.out_path)
            .with_context(|| format!("while generating from {:?}", item.input_path))?;
    }

    // the home page is template-only unless some content already claims it
    if !items.iter().any(|i| i.out_path == Path::new("index.html")) {
        let data = PageData {
            site: site_data(ctx),
            page: None,
            content: String::new(),
            collections: Collections { posts: &posts },
        };
        write_page(ctx, "index", &data, Path::new("index.html"))
            .context("while generating index.html")?;
    }

    info!("Site written to {:?}", ctx.out_dir);
    Ok(())
}

pub(crate) fn generate() -> anyhow::Result<()> {
    generate_site(Context::instance())
}
