use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters.
const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeChunk {
    pub file_path: String,
    pub content: String,
    pub language: Option<&'static str>,
}

/// Recursive character splitter.
///
/// Text is split on the first separator that occurs in it; pieces that are
/// still too long are split again with the next separator. Adjacent small
/// pieces are merged back up to `chunk_size` characters, and each new chunk
/// starts with up to `chunk_overlap` characters carried over from the
/// previous one. Separators stay attached to the start of the piece that
/// follows them.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if chunk_overlap > chunk_size {
            bail!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_file(&self, file_path: &str, content: &str) -> Vec<CodeChunk> {
        let language = language_for_path(Path::new(file_path));
        self.split_text(content)
            .into_iter()
            .map(|content| CodeChunk {
                file_path: file_path.to_string(),
                content,
                language,
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, DEFAULT_SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);
                // Shed pieces from the front until only the overlap remains
                // and the next piece fits.
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_trimmed(&mut chunks, &window);
        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` before every occurrence of `separator`, dropping empty pieces.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let language = match path.extension()?.to_str()? {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "md" => "markdown",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "c" => "c",
        "cpp" | "h" | "hpp" => "c++",
        _ => return None,
    };
    Some(language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(10, 20).is_err());
        assert!(Chunker::new(10, 10).is_ok());
    }

    #[test]
    fn test_short_text_is_one_trimmed_chunk() {
        let chunker = Chunker::new(1000, 100).unwrap();
        assert_eq!(chunker.split_text("  fn main() {}\n"), vec!["fn main() {}"]);
        assert!(chunker.split_text("   \n\n  ").is_empty());
    }

    #[test]
    fn test_separator_kept_at_start_of_next_piece() {
        assert_eq!(
            split_keeping_separator("a\n\nb\n\nc", "\n\n"),
            vec!["a", "\n\nb", "\n\nc"]
        );
        assert_eq!(split_keeping_separator("\n\nx", "\n\n"), vec!["\n\nx"]);
        assert_eq!(split_keeping_separator("héllo", ""), vec!["h", "é", "l", "l", "o"]);
    }

    #[test]
    fn test_words_merge_with_overlap() {
        let chunker = Chunker::new(10, 4).unwrap();
        let chunks = chunker.split_text("aaa bbb ccc ddd");
        assert_eq!(chunks, vec!["aaa bbb", "bbb ccc", "ccc ddd"]);
    }

    #[test]
    fn test_no_chunk_exceeds_size() {
        let chunker = Chunker::new(50, 10).unwrap();
        let text = (0..40)
            .map(|i| format!("fn function_number_{}() {{ return {}; }}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let chunker = Chunker::new(8, 2).unwrap();
        let chunks = chunker.split_text(&"x".repeat(20));
        assert!(chunks.iter().all(|c| c.len() <= 8));
        assert_eq!(chunks.first().map(String::as_str), Some("xxxxxxxx"));
    }

    #[test]
    fn test_paragraphs_preferred_over_lines() {
        let chunker = Chunker::new(30, 0).unwrap();
        let text = "first paragraph line\n\nsecond paragraph line";
        assert_eq!(
            chunker.split_text(text),
            vec!["first paragraph line", "second paragraph line"]
        );
    }

    #[test]
    fn test_chunk_file_tags_language() {
        let chunker = Chunker::new(1000, 100).unwrap();
        let chunks = chunker.chunk_file("/src/lib.rs", "pub fn answer() -> u32 { 42 }");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].language, Some("rust"));
        assert_eq!(chunks[0].file_path, "/src/lib.rs");
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("a/b.hpp")), Some("c++"));
        assert_eq!(language_for_path(Path::new("README.md")), Some("markdown"));
        assert_eq!(language_for_path(Path::new("Makefile")), None);
        assert_eq!(language_for_path(Path::new("x.toml")), None);
    }
}
