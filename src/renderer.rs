use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use handlebars::{handlebars_helper, Handlebars};
use log::warn;

const HUMAN_DATE_FORMAT: &str = "%B %-d, %Y";
const MACHINE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Templates every site has to provide, besides the `layout` partial.
pub(crate) const TEMPLATES: [&str; 3] = ["index", "post", "page"];

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })
}

// dates are always shown in UTC
fn format_date(value: &str, format: &str) -> String {
    match parse_date(value) {
        Some(date) => date.format(format).to_string(),
        None => {
            warn!("Cannot format {value:?} as a date. leaving it as is.");
            value.to_string()
        }
    }
}

handlebars_helper!(human_date: |date: str| format_date(date, HUMAN_DATE_FORMAT));
handlebars_helper!(machine_date: |date: str| format_date(date, MACHINE_DATE_FORMAT));

pub(crate) fn register_helpers(handlebars: &mut Handlebars<'static>) {
    handlebars.register_helper("humanDate", Box::new(human_date));
    handlebars.register_helper("machineDate", Box::new(machine_date));
}

pub(super) fn generate_renderer(template_dir: &Path) -> anyhow::Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    register_helpers(&mut handlebars);
    for name in TEMPLATES {
        let file_name = format!("{name}.hbs");
        handlebars
            .register_template_file(name, template_dir.join(&file_name))
            .context(file_name)?;
    }
    handlebars.register_partial(
        "layout",
        std::fs::read_to_string(template_dir.join("layout.hbs")).context("layout.hbs")?,
    )?;

    Ok(handlebars)
}
