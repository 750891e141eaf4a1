use std::{path::PathBuf, sync::OnceLock};

#[derive(Debug)]
pub(crate) struct Context {
    pub content_dir: PathBuf,
    pub out_dir: PathBuf,
    pub template_dir: PathBuf,
    pub passthrough_dirs: Vec<PathBuf>,

    pub blog_name: String,
    pub blog_url: String,

    pub handlebars: handlebars::Handlebars<'static>,
}

static CONTEXT: OnceLock<Context> = OnceLock::new();

impl Context {
    pub fn init(context: Context) -> anyhow::Result<()> {
        CONTEXT
            .set(context)
            .map_err(|_| anyhow::anyhow!("context is already initialized"))
    }

    pub fn instance() -> &'static Context {
        CONTEXT.get().expect("context is initialized in main")
    }
}
