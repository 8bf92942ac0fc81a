//! Line-oriented markdown rendering for chat transcripts.
//!
//! Supports the subset the assistant actually emits: `##`/`###` headings,
//! `-`/`*` list items, `**bold**` runs, and plain paragraphs. Everything
//! else passes through as literal text.

use serde::Serialize;

/// Visual emphasis applied to headings, keyed by who authored the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accent {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Span {
    Text { text: String },
    Bold { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Heading {
        level: u8,
        accent: Accent,
        spans: Vec<Span>,
    },
    Paragraph {
        spans: Vec<Span>,
    },
    List {
        items: Vec<Vec<Span>>,
    },
}

/// Render message text into display blocks. Consecutive list items coalesce
/// into one list; any other line kind (or a blank line) closes the open list.
pub fn render(text: &str, is_user: bool) -> Vec<Block> {
    let accent = if is_user { Accent::User } else { Accent::Model };
    let mut blocks = Vec::new();
    let mut items: Vec<Vec<Span>> = Vec::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("### ") {
            flush_list(&mut blocks, &mut items);
            blocks.push(Block::Heading {
                level: 3,
                accent,
                spans: parse_spans(rest),
            });
        } else if let Some(rest) = line.strip_prefix("## ") {
            flush_list(&mut blocks, &mut items);
            blocks.push(Block::Heading {
                level: 2,
                accent,
                spans: parse_spans(rest),
            });
        } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            items.push(parse_spans(rest));
        } else if line.trim().is_empty() {
            flush_list(&mut blocks, &mut items);
        } else {
            flush_list(&mut blocks, &mut items);
            blocks.push(Block::Paragraph {
                spans: parse_spans(line),
            });
        }
    }
    flush_list(&mut blocks, &mut items);
    blocks
}

fn flush_list(blocks: &mut Vec<Block>, items: &mut Vec<Vec<Span>>) {
    if !items.is_empty() {
        blocks.push(Block::List {
            items: std::mem::take(items),
        });
    }
}

/// Split a line into text and bold spans. A `**` opener pairs with the
/// nearest following `**`; an opener with no closer stays literal text.
fn parse_spans(line: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find("**") {
        match rest[open + 2..].find("**") {
            Some(close) => {
                if open > 0 {
                    spans.push(Span::Text {
                        text: rest[..open].to_string(),
                    });
                }
                spans.push(Span::Bold {
                    text: rest[open + 2..open + 2 + close].to_string(),
                });
                rest = &rest[open + 2 + close + 2..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        spans.push(Span::Text {
            text: rest.to_string(),
        });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Span {
        Span::Text { text: s.to_string() }
    }

    fn bold(s: &str) -> Span {
        Span::Bold { text: s.to_string() }
    }

    #[test]
    fn test_headings_take_priority_over_paragraphs() {
        let blocks = render("### Titre\n## Sous-titre", false);
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 3,
                    accent: Accent::Model,
                    spans: vec![text("Titre")],
                },
                Block::Heading {
                    level: 2,
                    accent: Accent::Model,
                    spans: vec![text("Sous-titre")],
                },
            ]
        );
    }

    #[test]
    fn test_heading_accent_follows_author() {
        let blocks = render("### Question", true);
        assert!(matches!(
            blocks[0],
            Block::Heading { accent: Accent::User, .. }
        ));
    }

    #[test]
    fn test_consecutive_list_items_group_into_one_list() {
        let blocks = render("- un\n- deux\n* trois", false);
        assert_eq!(
            blocks,
            vec![Block::List {
                items: vec![vec![text("un")], vec![text("deux")], vec![text("trois")]],
            }]
        );
    }

    #[test]
    fn test_non_list_line_closes_the_open_list() {
        let blocks = render("- un\nsuite\n- deux", false);
        assert_eq!(
            blocks,
            vec![
                Block::List { items: vec![vec![text("un")]] },
                Block::Paragraph { spans: vec![text("suite")] },
                Block::List { items: vec![vec![text("deux")]] },
            ]
        );
    }

    #[test]
    fn test_blank_line_closes_list_without_emitting_block() {
        let blocks = render("- un\n\n- deux", false);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], Block::List { .. }));
        assert!(matches!(blocks[1], Block::List { .. }));
    }

    #[test]
    fn test_plain_line_becomes_one_paragraph() {
        let blocks = render("Le droit administratif régit l'administration", false);
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                spans: vec![text("Le droit administratif régit l'administration")],
            }]
        );
    }

    #[test]
    fn test_single_bold_run_has_no_literal_markers() {
        assert_eq!(parse_spans("**x**"), vec![bold("x")]);
    }

    #[test]
    fn test_bold_runs_split_into_spans() {
        assert_eq!(
            parse_spans("le **service public** et la **police**"),
            vec![
                text("le "),
                bold("service public"),
                text(" et la "),
                bold("police"),
            ]
        );
    }

    #[test]
    fn test_unmatched_bold_marker_stays_literal() {
        assert_eq!(parse_spans("un **mot"), vec![text("un **mot")]);
    }

    #[test]
    fn test_empty_bold_run_is_allowed() {
        assert_eq!(parse_spans("a****b"), vec![text("a"), bold(""), text("b")]);
    }

    #[test]
    fn test_bold_inside_heading_and_list_item() {
        let blocks = render("### Le **juge**\n- **CE** 1873", false);
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 3,
                    accent: Accent::Model,
                    spans: vec![text("Le "), bold("juge")],
                },
                Block::List {
                    items: vec![vec![bold("CE"), text(" 1873")]],
                },
            ]
        );
    }

    #[test]
    fn test_empty_text_renders_nothing() {
        assert!(render("", false).is_empty());
        assert!(render("\n\n", false).is_empty());
    }
}
