//! Markdown-aware structural parser.

use chrono::Datelike;

use crate::config::ParserConfig;
use crate::types::{ParsedChunk, Result, SpanKind, StructureMetadata};

/// Converts raw page content into normalized chunks with metadata.
pub trait DocumentParser: Send + Sync {
    /// Parse fetched content into chunks. An empty result is not an error;
    /// the executor records it as `parse_empty`.
    fn parse(&self, content: &str, content_type: &str) -> Result<Vec<ParsedChunk>>;
}

/// Default parser for markdown-ish content.
///
/// Headings become the heading path of subsequent chunks; tables and fenced
/// code blocks are preserved as structured spans instead of being flattened
/// into prose; prose is cut into overlapping word windows.
pub struct StructuralParser {
    chunk_words: usize,
    chunk_overlap: usize,
}

impl StructuralParser {
    /// Build a parser from config.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(config.chunk_words, config.chunk_overlap)
    }

    /// Build a parser with explicit window parameters.
    pub fn new(chunk_words: usize, chunk_overlap: usize) -> Self {
        let chunk_words = chunk_words.max(1);
        Self {
            chunk_words,
            chunk_overlap: chunk_overlap.min(chunk_words - 1),
        }
    }

    /// Cut prose into word windows, stepping by `chunk_words - overlap`.
    fn window_prose(&self, text: &str, heading_path: &[String], out: &mut Vec<ParsedChunk>) {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return;
        }
        let step = self.chunk_words - self.chunk_overlap;

        let mut start = 0;
        while start < words.len() {
            let end = (start + self.chunk_words).min(words.len());
            let body = words[start..end].join(" ");
            out.push(ParsedChunk {
                published_hint: detect_year(&body),
                text: body,
                structure: StructureMetadata {
                    heading_path: heading_path.to_vec(),
                    kind: SpanKind::Prose,
                },
            });
            if end == words.len() {
                break;
            }
            start += step;
        }
    }

    fn push_span(
        &self,
        lines: &[String],
        kind: SpanKind,
        heading_path: &[String],
        out: &mut Vec<ParsedChunk>,
    ) {
        let body = lines.join("\n");
        if body.trim().is_empty() {
            return;
        }
        out.push(ParsedChunk {
            published_hint: detect_year(&body),
            text: body,
            structure: StructureMetadata {
                heading_path: heading_path.to_vec(),
                kind,
            },
        });
    }
}

impl DocumentParser for StructuralParser {
    fn parse(&self, content: &str, _content_type: &str) -> Result<Vec<ParsedChunk>> {
        let mut chunks = Vec::new();
        // (level, title) stack forming the current heading path
        let mut headings: Vec<(usize, String)> = Vec::new();
        let mut prose = String::new();
        let mut table: Vec<String> = Vec::new();
        let mut code: Vec<String> = Vec::new();
        let mut in_code = false;

        // Publication signal near the top of the document, used as fallback
        // for chunks that carry no year of their own
        let doc_hint = content
            .lines()
            .take(40)
            .find_map(detect_year_in_line);

        for line in content.lines() {
            let path: Vec<String> = headings.iter().map(|(_, t)| t.clone()).collect();

            if in_code {
                if line.trim_start().starts_with("```") {
                    in_code = false;
                    self.push_span(&code, SpanKind::Code, &path, &mut chunks);
                    code.clear();
                } else {
                    code.push(line.to_string());
                }
                continue;
            }

            if line.trim_start().starts_with("```") {
                self.window_prose(&prose, &path, &mut chunks);
                prose.clear();
                self.push_span(&table, SpanKind::Table, &path, &mut chunks);
                table.clear();
                in_code = true;
                continue;
            }

            let trimmed = line.trim_start();
            if let Some(title) = heading_title(trimmed) {
                self.window_prose(&prose, &path, &mut chunks);
                prose.clear();
                self.push_span(&table, SpanKind::Table, &path, &mut chunks);
                table.clear();

                let level = trimmed.chars().take_while(|c| *c == '#').count();
                while headings.last().is_some_and(|(l, _)| *l >= level) {
                    headings.pop();
                }
                headings.push((level, title));
                continue;
            }

            if trimmed.starts_with('|') {
                self.window_prose(&prose, &path, &mut chunks);
                prose.clear();
                table.push(trimmed.to_string());
                continue;
            }

            if !table.is_empty() {
                self.push_span(&table, SpanKind::Table, &path, &mut chunks);
                table.clear();
            }

            if !trimmed.is_empty() {
                prose.push_str(trimmed);
                prose.push(' ');
            }
        }

        let path: Vec<String> = headings.iter().map(|(_, t)| t.clone()).collect();
        self.window_prose(&prose, &path, &mut chunks);
        self.push_span(&table, SpanKind::Table, &path, &mut chunks);
        // An unterminated code fence still yields its content
        self.push_span(&code, SpanKind::Code, &path, &mut chunks);

        for chunk in &mut chunks {
            if chunk.published_hint.is_none() {
                chunk.published_hint = doc_hint;
            }
        }

        Ok(chunks)
    }
}

fn heading_title(line: &str) -> Option<String> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Most recent plausible year mentioned in the text, if any.
fn detect_year(text: &str) -> Option<i32> {
    text.lines().filter_map(detect_year_in_line).max()
}

fn detect_year_in_line(line: &str) -> Option<i32> {
    let current = chrono::Utc::now().year();
    line.split(|c: char| !c.is_ascii_digit())
        .filter(|tok| tok.len() == 4)
        .filter_map(|tok| tok.parse::<i32>().ok())
        .filter(|year| (1995..=current + 1).contains(year))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StructuralParser {
        StructuralParser::new(50, 10)
    }

    #[test]
    fn test_heading_path_tracking() {
        let doc = "# Guide\n\nIntro text here.\n\n## Install\n\nRun the installer.\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();

        let intro = chunks.iter().find(|c| c.text.contains("Intro")).unwrap();
        assert_eq!(intro.structure.heading_path, vec!["Guide"]);

        let install = chunks.iter().find(|c| c.text.contains("installer")).unwrap();
        assert_eq!(install.structure.heading_path, vec!["Guide", "Install"]);
    }

    #[test]
    fn test_sibling_heading_replaces_path() {
        let doc = "## A\ntext a\n## B\ntext b\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();
        let b = chunks.iter().find(|c| c.text.contains("text b")).unwrap();
        assert_eq!(b.structure.heading_path, vec!["B"]);
    }

    #[test]
    fn test_table_preserved_as_span() {
        let doc = "# Prices\n\n| Model | Price |\n|---|---|\n| X | $10 |\n\nAfter table.\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();

        let table = chunks
            .iter()
            .find(|c| c.structure.kind == SpanKind::Table)
            .unwrap();
        assert!(table.text.contains("| X | $10 |"));
        // Rows stay as rows, not prose
        assert!(table.text.contains('\n'));
    }

    #[test]
    fn test_code_fence_preserved() {
        let doc = "Some intro.\n```rust\nfn main() {}\n```\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();
        let code = chunks
            .iter()
            .find(|c| c.structure.kind == SpanKind::Code)
            .unwrap();
        assert_eq!(code.text, "fn main() {}");
    }

    #[test]
    fn test_prose_windowing_overlaps() {
        let words: Vec<String> = (0..120).map(|i| format!("w{}", i)).collect();
        let doc = words.join(" ");
        let p = StructuralParser::new(50, 10);
        let chunks = p.parse(&doc, "text/plain").unwrap();

        assert!(chunks.len() >= 3);
        // Overlap: the second chunk starts before the first one ended
        assert!(chunks[0].text.contains("w49"));
        assert!(chunks[1].text.contains("w40"));
    }

    #[test]
    fn test_year_hint_detected() {
        let doc = "Published 2021-03-01\n\nThe device launched with great fanfare.\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();
        assert_eq!(chunks[0].published_hint, Some(2021));
    }

    #[test]
    fn test_no_year_means_no_hint() {
        let doc = "Numbers like 123 and 99999 are not years.\n";
        let chunks = parser().parse(doc, "text/markdown").unwrap();
        assert_eq!(chunks[0].published_hint, None);
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let chunks = parser().parse("", "text/markdown").unwrap();
        assert!(chunks.is_empty());
    }
}
