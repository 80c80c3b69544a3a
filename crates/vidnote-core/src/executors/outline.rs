//! Parsing of model responses and Markdown outlines.

use crate::domain::MindmapNode;

const DEFAULT_OUTLINE_CHILD: &str = "No detailed structure";

/// Sections of a summarize response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSections {
    pub summary: String,
    pub outline: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Summary,
    Outline,
}

fn heading(line: &str) -> Option<Section> {
    let rest = line.strip_prefix("##")?;
    if rest.starts_with('#') {
        return None;
    }
    let name = rest.trim().to_ascii_lowercase();
    if name.starts_with("summary") {
        Some(Section::Summary)
    } else if name.starts_with("mind map") || name.starts_with("mindmap") {
        Some(Section::Outline)
    } else {
        None
    }
}

/// Split a response into its `## Summary` and `## Mind Map` sections.
///
/// Blank lines and code-fence markers inside a section are dropped. A
/// response without any recognized heading is taken as the summary.
pub fn parse_response(response: &str) -> ResponseSections {
    let mut sections = ResponseSections::default();
    let mut current: Option<Section> = None;
    let mut summary = Vec::new();
    let mut outline = Vec::new();

    for line in response.lines() {
        let stripped = line.trim();
        if let Some(section) = heading(stripped) {
            current = Some(section);
            continue;
        }
        if stripped.is_empty() || stripped.starts_with("```") {
            continue;
        }
        match current {
            Some(Section::Summary) => summary.push(line),
            Some(Section::Outline) => outline.push(line),
            None => {}
        }
    }

    if current.is_none() {
        sections.summary = response.trim().to_string();
        return sections;
    }
    sections.summary = summary.join("\n").trim().to_string();
    sections.outline = outline.join("\n").trim_end().to_string();
    sections
}

/// Normalize an outline into a Markdown bullet list.
///
/// Code fences and headings are dropped, `*`/`+` bullets become `-`, and
/// stray text lines become items at their own indentation. An empty result
/// falls back to a two-node outline under `title`.
pub fn clean_outline(raw: &str, title: &str) -> String {
    let mut lines = Vec::new();
    for line in raw.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with("```") || stripped.starts_with('#') {
            continue;
        }
        let indent = normalize_indent(line);
        let item = if stripped.starts_with('-') {
            stripped.to_string()
        } else if let Some(rest) = stripped
            .strip_prefix("* ")
            .or_else(|| stripped.strip_prefix("+ "))
        {
            format!("- {}", rest.trim())
        } else {
            format!("- {stripped}")
        };
        lines.push(format!("{indent}{item}"));
    }

    let result = lines.join("\n");
    if result.trim().is_empty() {
        let title = if title.trim().is_empty() {
            "Video content"
        } else {
            title.trim()
        };
        return format!("- {title}\n  - {DEFAULT_OUTLINE_CHILD}");
    }
    dedent(&result)
}

/// Leading whitespace as ASCII spaces. Tabs and ideographic spaces count
/// as two columns.
fn normalize_indent(line: &str) -> String {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| match c {
            '\t' | '\u{3000}' => "  ",
            _ => " ",
        })
        .collect()
}

/// Leading whitespace, in characters.
fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Shift every line left by the smallest indentation.
fn dedent(text: &str) -> String {
    let min = text.lines().map(indent_of).min().unwrap_or(0);
    text.lines()
        .map(|l| l.char_indices().nth(min).map_or("", |(i, _)| &l[i..]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a cleaned outline into a tree.
///
/// Two spaces per level. With a single top-level item that item is the
/// root; otherwise the items hang under a root named `title`.
pub fn parse_tree(outline: &str, title: &str) -> MindmapNode {
    let items: Vec<(usize, String)> = outline
        .lines()
        .filter_map(|line| {
            let text = line.trim_start().strip_prefix('-')?.trim();
            (!text.is_empty()).then(|| (indent_of(line) / 2, text.to_string()))
        })
        .collect();

    let mut pos = 0;
    let mut top = build(&items, &mut pos, 0);
    if top.len() == 1 {
        top.remove(0)
    } else {
        MindmapNode {
            text: title.to_string(),
            children: top,
        }
    }
}

fn build(items: &[(usize, String)], pos: &mut usize, depth: usize) -> Vec<MindmapNode> {
    let mut nodes = Vec::new();
    while let Some((level, text)) = items.get(*pos) {
        if *level < depth {
            break;
        }
        *pos += 1;
        let children = build(items, pos, level + 1);
        nodes.push(MindmapNode {
            text: text.clone(),
            children,
        });
    }
    nodes
}
