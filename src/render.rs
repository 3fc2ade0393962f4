//! Serialize a migrated page into one of the supported output formats.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Error;
use crate::model::{BlockRecord, PageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Json,
    Markdown,
    Html,
    Plain,
}

impl RenderFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderFormat::Json => "json",
            RenderFormat::Markdown => "markdown",
            RenderFormat::Html => "html",
            RenderFormat::Plain => "plain",
        }
    }
}

impl FromStr for RenderFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(RenderFormat::Json),
            "markdown" | "md" => Ok(RenderFormat::Markdown),
            "html" => Ok(RenderFormat::Html),
            "plain" | "text" => Ok(RenderFormat::Plain),
            other => Err(Error::Validation(format!("unknown format '{other}'"))),
        }
    }
}

/// Render a page and its blocks (in migration order) as a string.
pub fn render_page(
    page: &PageRecord,
    blocks: &[BlockRecord],
    format: RenderFormat,
) -> Result<String, Error> {
    match format {
        RenderFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "page": page,
            "blocks": blocks,
        }))?),
        RenderFormat::Markdown => Ok(render_markdown(page, blocks)),
        RenderFormat::Html => Ok(render_html(page, blocks)),
        RenderFormat::Plain => Ok(render_plain(page, blocks)),
    }
}

/// Nesting depth of each block, derived from the parent→children edges.
fn depths(blocks: &[BlockRecord]) -> HashMap<&str, usize> {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    for block in blocks {
        let base = depth.get(block.id.as_str()).copied().unwrap_or(0);
        for child in &block.child_ids {
            depth.insert(child.as_str(), base + 1);
        }
    }
    depth
}

fn render_markdown(page: &PageRecord, blocks: &[BlockRecord]) -> String {
    let depth = depths(blocks);
    let mut out = String::new();
    if !page.title.is_empty() {
        out.push_str(&format!("# {}\n", page.title));
    }
    let mut numbered = 0usize;
    for block in blocks {
        if block.block_type != "numbered_list_item" {
            numbered = 0;
        }
        let indent = "  ".repeat(depth.get(block.id.as_str()).copied().unwrap_or(0));
        let line = match block.block_type.as_str() {
            "heading_1" => format!("# {}", block.text),
            "heading_2" => format!("## {}", block.text),
            "heading_3" => format!("### {}", block.text),
            "bulleted_list_item" => format!("{indent}- {}", block.text),
            "numbered_list_item" => {
                numbered += 1;
                format!("{indent}{numbered}. {}", block.text)
            }
            "to_do" => {
                let checked = block.payload.get("checked").and_then(|v| v.as_bool());
                let mark = if checked.unwrap_or(false) { "x" } else { " " };
                format!("{indent}- [{mark}] {}", block.text)
            }
            "quote" => format!("> {}", block.text),
            "code" => {
                let language = block
                    .payload
                    .get("language")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                format!("```{language}\n{}\n```", block.text)
            }
            "divider" => "---".to_string(),
            _ => {
                if block.text.is_empty() {
                    continue;
                }
                block.text.clone()
            }
        };
        out.push('\n');
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_html(page: &PageRecord, blocks: &[BlockRecord]) -> String {
    let mut out = String::new();
    if !page.title.is_empty() {
        out.push_str(&format!("<h1>{}</h1>\n", escape_html(&page.title)));
    }
    let mut open_list: Option<&str> = None;
    for block in blocks {
        let list_tag = match block.block_type.as_str() {
            "bulleted_list_item" => Some("ul"),
            "numbered_list_item" => Some("ol"),
            _ => None,
        };
        if open_list != list_tag {
            if let Some(tag) = open_list {
                out.push_str(&format!("</{tag}>\n"));
            }
            if let Some(tag) = list_tag {
                out.push_str(&format!("<{tag}>\n"));
            }
            open_list = list_tag;
        }
        let text = escape_html(&block.text);
        match block.block_type.as_str() {
            "heading_1" => out.push_str(&format!("<h1>{text}</h1>\n")),
            "heading_2" => out.push_str(&format!("<h2>{text}</h2>\n")),
            "heading_3" => out.push_str(&format!("<h3>{text}</h3>\n")),
            "bulleted_list_item" | "numbered_list_item" => {
                out.push_str(&format!("<li>{text}</li>\n"));
            }
            "quote" => out.push_str(&format!("<blockquote>{text}</blockquote>\n")),
            "code" => out.push_str(&format!("<pre><code>{text}</code></pre>\n")),
            "divider" => out.push_str("<hr/>\n"),
            _ => {
                if !text.is_empty() {
                    out.push_str(&format!("<p>{text}</p>\n"));
                }
            }
        }
    }
    if let Some(tag) = open_list {
        out.push_str(&format!("</{tag}>\n"));
    }
    out
}

fn render_plain(page: &PageRecord, blocks: &[BlockRecord]) -> String {
    let mut parts = Vec::new();
    if !page.title.is_empty() {
        parts.push(page.title.clone());
    }
    for block in blocks {
        if !block.text.is_empty() {
            parts.push(block.text.clone());
        }
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn page(title: &str) -> PageRecord {
        PageRecord {
            id: "p1".into(),
            title: title.into(),
            properties: BTreeMap::new(),
            created_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_edited_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            url: None,
        }
    }

    fn block(id: &str, block_type: &str, text: &str) -> BlockRecord {
        BlockRecord {
            id: id.into(),
            page_id: "p1".into(),
            block_type: block_type.into(),
            payload: json!({}),
            child_ids: Vec::new(),
            has_children: false,
            text: text.into(),
            created_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_edited_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!("md".parse::<RenderFormat>().unwrap(), RenderFormat::Markdown);
        assert_eq!("TEXT".parse::<RenderFormat>().unwrap(), RenderFormat::Plain);
        assert!("pdf".parse::<RenderFormat>().is_err());
    }

    #[test]
    fn markdown_renders_headings_lists_and_dividers() {
        let blocks = vec![
            block("a", "heading_1", "Intro"),
            block("b", "paragraph", "Hello"),
            block("c", "bulleted_list_item", "first"),
            block("d", "numbered_list_item", "one"),
            block("e", "numbered_list_item", "two"),
            block("f", "divider", ""),
        ];
        let md = render_markdown(&page("Doc"), &blocks);
        assert!(md.starts_with("# Doc\n"));
        assert!(md.contains("\n# Intro\n"));
        assert!(md.contains("\n- first\n"));
        assert!(md.contains("\n1. one\n"));
        assert!(md.contains("\n2. two\n"));
        assert!(md.contains("\n---\n"));
    }

    #[test]
    fn markdown_indents_nested_list_items() {
        let mut parent = block("a", "bulleted_list_item", "outer");
        parent.child_ids = vec!["b".into()];
        parent.has_children = true;
        let blocks = vec![parent, block("b", "bulleted_list_item", "inner")];
        let md = render_markdown(&page(""), &blocks);
        assert!(md.contains("\n- outer\n"));
        assert!(md.contains("\n  - inner\n"));
    }

    #[test]
    fn html_groups_consecutive_list_items_and_escapes() {
        let blocks = vec![
            block("a", "bulleted_list_item", "x < y"),
            block("b", "bulleted_list_item", "z"),
            block("c", "paragraph", "after"),
        ];
        let html = render_html(&page("T"), &blocks);
        assert!(html.contains("<ul>\n<li>x &lt; y</li>\n<li>z</li>\n</ul>"));
        assert!(html.contains("<p>after</p>"));
    }

    #[test]
    fn plain_skips_empty_projections() {
        let blocks = vec![
            block("a", "paragraph", "Hello"),
            block("b", "divider", ""),
            block("c", "paragraph", "World"),
        ];
        assert_eq!(render_plain(&page("T"), &blocks), "T\n\nHello\n\nWorld");
    }

    #[test]
    fn json_round_trips_records() {
        let blocks = vec![block("a", "paragraph", "Hello")];
        let rendered = render_page(&page("T"), &blocks, RenderFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["page"]["title"], "T");
        assert_eq!(value["blocks"][0]["text"], "Hello");
    }
}
