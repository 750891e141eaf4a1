use std::path::PathBuf;

use anyhow::bail;
use clap::{command, value_parser, Arg, ArgAction};
use context::Context;
use generator::generate;
use log::info;
use renderer::generate_renderer;

mod collection;
mod context;
mod generator;
mod renderer;
mod scripts;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = command!()
        .args([
            Arg::new("content_dir")
                .long("content")
                .value_name("DIR")
                .help("Directory path of content. Every Markdown file under it becomes a page.")
                .value_parser(value_parser!(PathBuf))
                .default_value("."),
            Arg::new("out_dir")
                .long("out")
                .value_name("DIR")
                .help("Directory path of output. Existing contents will be removed.")
                .value_parser(value_parser!(PathBuf))
                .default_value("_site"),
            Arg::new("template_dir")
                .long("template")
                .value_name("DIR")
                .help("Directory of templates (index.hbs, post.hbs, page.hbs and layout.hbs)")
                .value_parser(value_parser!(PathBuf))
                .default_value("template"),
            Arg::new("passthrough")
                .long("passthrough")
                .value_name("DIR")
                .help("Directory under the content directory copied as it is. May be repeated.")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .default_values(["css", "fonts", "js"]),
        ])
        .get_matches();

    let content_dir: &PathBuf = matches.get_one("content_dir").expect("has a default");
    if !content_dir.is_dir() {
        bail!("content_dir must be a directory.");
    }
    let out_dir: &PathBuf = matches.get_one("out_dir").expect("has a default");
    if out_dir.exists() && !out_dir.is_dir() {
        bail!("if out_dir exists, it must be directory.");
    }
    let template_dir: &PathBuf = matches.get_one("template_dir").expect("has a default");
    if !template_dir.is_dir() {
        bail!("template_dir must be a directory.")
    }
    let passthrough_dirs: Vec<PathBuf> = matches
        .get_many::<PathBuf>("passthrough")
        .map(|dirs| dirs.cloned().collect())
        .unwrap_or_default();

    let handlebars = generate_renderer(template_dir)?;

    Context::init(Context {
        content_dir: content_dir.to_owned(),
        out_dir: out_dir.to_owned(),
        template_dir: template_dir.to_owned(),
        passthrough_dirs,
        blog_name: std::env::var("BLOG_NAME").unwrap_or_default(),
        blog_url: std::env::var("BLOG_URL").unwrap_or_default(),
        handlebars,
    })?;

    info!("Building {content_dir:?} into {out_dir:?}");
    generate()
}
