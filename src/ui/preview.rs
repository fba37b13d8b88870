//! Plain-text rendering of drafts and topic lists.

use console::style;

use crate::draft::Draft;
use crate::store::Suggestion;

const MIN_WIDTH: usize = 40;
const MAX_WIDTH: usize = 100;

/// Wrap width for the current terminal, clamped to a readable range.
pub fn preview_width() -> usize {
    let (_, cols) = console::Term::stdout().size();
    (cols as usize).saturating_sub(4).clamp(MIN_WIDTH, MAX_WIDTH)
}

/// Boxed preview of a draft: the post text (edit if any), then the image URL.
pub fn render_draft(draft: &Draft, width: usize) -> String {
    let rule = style("─".repeat(width)).dim().to_string();
    let mut out = String::new();

    out.push_str(&format!(
        "{} {}\n",
        style("Flow").bold(),
        style(draft.flow_id.as_str()).dim()
    ));
    out.push_str(&rule);
    out.push('\n');

    match draft.final_text() {
        Some(text) => {
            for paragraph in text.split('\n') {
                if paragraph.trim().is_empty() {
                    out.push('\n');
                    continue;
                }
                for line in textwrap::wrap(paragraph, width) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            if draft.edited_text.is_some() {
                out.push_str(&format!("{}\n", style("(edited)").italic().dim()));
            }
        }
        None => out.push_str(&format!("{}\n", style("No text yet").dim())),
    }

    out.push_str(&rule);
    out.push('\n');
    match draft.image_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => out.push_str(&format!(
            "{} {}\n",
            style("Image:").bold(),
            style(url).cyan().underlined()
        )),
        None => out.push_str(&format!("{}\n", style("Image: not generated").dim())),
    }
    out
}

/// Table of suggestions, used ones dimmed.
pub fn render_topics(topics: &[Suggestion], width: usize) -> String {
    if topics.is_empty() {
        return format!("{}\n", style("No suggested topics.").dim());
    }

    let id_width = topics.iter().map(|t| t.id.len()).max().unwrap_or(2).max(2);
    let text_width = width.saturating_sub(id_width + 3).max(20);
    let mut out = String::new();

    for topic in topics {
        let body = format!("{}  {}", topic.topic, style(format!("for {}", topic.audience)).dim());
        let mut lines = textwrap::wrap(&body, text_width).into_iter();
        let first = lines.next().map(|l| l.into_owned()).unwrap_or_default();
        let id = format!("{:>width$}", topic.id, width = id_width);

        if topic.used {
            out.push_str(&format!(
                "{}  {} {}\n",
                style(id).dim(),
                style(first).dim(),
                style("(used)").dim().italic()
            ));
        } else {
            out.push_str(&format!("{}  {}\n", style(id).bold(), first));
        }
        for rest in lines {
            out.push_str(&format!("{}  {}\n", " ".repeat(id_width), rest));
        }
    }
    out
}
