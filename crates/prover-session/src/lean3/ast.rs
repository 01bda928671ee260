//! `lean --ast` output and sentence discovery.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::document::Document;
use crate::types::DriverError;

const TACTIC_CONTAINERS: [(&str, &str); 2] = [("begin", "end"), ("{", "}")];
const TACTIC_NODES: [&str; 3] = ["tactic", "<|>", ";"];
const DONT_RECURSE_IN: [&str; 4] = ["by", "tactic", "<|>", ";"];

/// A 1-based line and 0-based character column.
pub type LeanPos = (usize, usize);

#[derive(Debug, Clone, Deserialize)]
pub struct AstNode {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub start: Option<LeanPos>,
    #[serde(default)]
    pub end: Option<LeanPos>,
    #[serde(default)]
    pub children: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct AstFile {
    ast: Vec<Option<AstNode>>,
}

/// A parsed AST with parent links.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Option<AstNode>>,
    parents: Vec<Option<usize>>,
}

/// A range that may hold a sentence. `depth_change` is +1 for the opening
/// delimiter of a tactic block, -1 for its closing one, and 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SentenceRange {
    pub start: LeanPos,
    pub end: LeanPos,
    pub depth_change: i32,
}

/// A sentence to cut out of the document, and where to ask for the proof
/// state shown after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSentence {
    pub beg: usize,
    pub end: usize,
    pub state_at: Option<LeanPos>,
}

impl Ast {
    pub fn from_json(bytes: &[u8]) -> Result<Self, DriverError> {
        let file: AstFile = serde_json::from_slice(bytes)?;
        Ok(Self::new(file.ast))
    }

    pub fn new(nodes: Vec<Option<AstNode>>) -> Self {
        let mut parents = vec![None; nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            for &child in &node.children {
                if !matches!(nodes.get(child), Some(Some(_))) {
                    continue;
                }
                match parents[child] {
                    None => parents[child] = Some(idx),
                    Some(p) if p != idx => {
                        tracing::warn!(child, first = p, second = idx, "AST node has two parents");
                    }
                    Some(_) => {}
                }
            }
        }
        Self { nodes, parents }
    }

    fn node(&self, idx: usize) -> Option<&AstNode> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    /// Whether `idx` or one of its ancestors is a `by` node.
    fn under_by(&self, mut idx: usize) -> bool {
        for _ in 0..self.nodes.len() {
            match self.node(idx) {
                Some(node) if node.kind == "by" => return true,
                _ => {}
            }
            match self.parents.get(idx).copied().flatten() {
                Some(parent) => idx = parent,
                None => return false,
            }
        }
        false
    }

    /// Ranges of tactics and tactic-block delimiters, sorted.
    pub fn sentence_ranges(&self) -> Vec<SentenceRange> {
        let candidates: BTreeSet<usize> = self
            .nodes
            .iter()
            .flatten()
            .filter(|node| !DONT_RECURSE_IN.contains(&node.kind.as_str()))
            .flat_map(|node| node.children.iter().copied())
            .collect();

        let mut ranges = Vec::new();
        for idx in candidates {
            let Some(node) = self.node(idx) else { continue };
            let (Some(start), Some(end)) = (node.start, node.end) else {
                continue;
            };
            if self.under_by(idx) {
                continue;
            }
            let kind = node.kind.as_str();
            if TACTIC_NODES.contains(&kind) {
                ranges.push(SentenceRange {
                    start,
                    end,
                    depth_change: 0,
                });
            } else if let Some(&(opener, closer)) =
                TACTIC_CONTAINERS.iter().find(|(opener, _)| *opener == kind)
            {
                ranges.push(SentenceRange {
                    start,
                    end: (start.0, start.1 + opener.chars().count()),
                    depth_change: 1,
                });
                ranges.push(SentenceRange {
                    start: (end.0, end.1.saturating_sub(closer.chars().count())),
                    end,
                    depth_change: -1,
                });
            }
        }
        ranges.sort();
        ranges
    }
}

/// Turn sorted ranges into document spans.
///
/// Ranges ending at or before the previous one are skipped. Each sentence
/// shows the proof state at the start of the next range, except those
/// followed by a block closer that returns to depth 0, and the closers
/// themselves.
pub fn plan_sentences(ranges: &[SentenceRange], doc: &Document) -> Vec<PlannedSentence> {
    let mut planned = Vec::new();
    let mut prev: LeanPos = (0, 0);
    let mut last: Option<(usize, usize)> = None;
    let mut last_was_closer = false;
    let mut depth: i64 = 0;
    let mut last_end = 0;

    for range in ranges {
        depth += i64::from(range.depth_change);
        if depth < 0 {
            tracing::warn!(?range, "Unbalanced tactic block in AST");
            depth = 0;
        }
        if range.end <= prev {
            continue;
        }
        prev = range.end;

        let closes_block = depth == 0 && range.depth_change == -1;
        if let Some((beg, end)) = last {
            let state_at = (!closes_block && !last_was_closer).then_some(range.start);
            planned.push(PlannedSentence { beg, end, state_at });
        }
        last_was_closer = closes_block;

        let beg = doc.pos_to_offset(range.start.0, range.start.1).max(last_end);
        let end = doc.pos_to_offset(range.end.0, range.end.1).max(beg);
        last = Some((beg, end));
        last_end = end;
    }
    if let Some((beg, end)) = last {
        planned.push(PlannedSentence {
            beg,
            end,
            state_at: None,
        });
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    // example : true := begin trivial end
    const AST_JSON: &str = r#"{"ast": [
        null,
        {"kind": "file", "children": [2]},
        {"kind": "theorem", "start": [1, 0], "end": [1, 35], "children": [3]},
        {"kind": "begin", "start": [1, 18], "end": [1, 35], "children": [4]},
        {"kind": "tactic", "start": [1, 24], "end": [1, 31], "children": [5]},
        {"kind": "ident", "start": [1, 24], "end": [1, 31]}
    ]}"#;

    #[test]
    fn parses_ast_and_finds_ranges() {
        let ast = Ast::from_json(AST_JSON.as_bytes()).unwrap();
        let ranges = ast.sentence_ranges();
        assert_eq!(
            ranges,
            vec![
                SentenceRange { start: (1, 18), end: (1, 23), depth_change: 1 },
                SentenceRange { start: (1, 24), end: (1, 31), depth_change: 0 },
                SentenceRange { start: (1, 32), end: (1, 35), depth_change: -1 },
            ]
        );
    }

    #[test]
    fn by_blocks_are_skipped() {
        let ast = Ast::new(vec![
            Some(AstNode {
                kind: "file".into(),
                start: None,
                end: None,
                children: vec![1],
            }),
            Some(AstNode {
                kind: "by".into(),
                start: Some((1, 0)),
                end: Some((1, 9)),
                children: vec![2],
            }),
            Some(AstNode {
                kind: "tactic".into(),
                start: Some((1, 3)),
                end: Some((1, 9)),
                children: vec![],
            }),
        ]);
        assert!(ast.sentence_ranges().is_empty());
    }

    #[test]
    fn plan_queries_state_between_tactics() {
        let doc = Document::new(vec!["example : true := begin trivial end".into()], "\n");
        let ast = Ast::from_json(AST_JSON.as_bytes()).unwrap();
        let planned = plan_sentences(&ast.sentence_ranges(), &doc);
        assert_eq!(
            planned,
            vec![
                PlannedSentence { beg: 18, end: 23, state_at: Some((1, 24)) },
                PlannedSentence { beg: 24, end: 31, state_at: None },
                PlannedSentence { beg: 32, end: 35, state_at: None },
            ]
        );
    }

    #[test]
    fn plan_clamps_negative_depth() {
        let doc = Document::new(vec!["end x".into()], "\n");
        let ranges = [
            SentenceRange { start: (1, 0), end: (1, 3), depth_change: -1 },
            SentenceRange { start: (1, 4), end: (1, 5), depth_change: 0 },
        ];
        let planned = plan_sentences(&ranges, &doc);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].state_at, None);
    }

    #[test]
    fn plan_skips_ranges_inside_previous() {
        let doc = Document::new(vec!["abcdefgh".into()], "\n");
        let ranges = [
            SentenceRange { start: (1, 0), end: (1, 6), depth_change: 0 },
            SentenceRange { start: (1, 2), end: (1, 4), depth_change: 0 },
            SentenceRange { start: (1, 3), end: (1, 8), depth_change: 0 },
        ];
        let planned = plan_sentences(&ranges, &doc);
        assert_eq!(planned[0], PlannedSentence { beg: 0, end: 6, state_at: Some((1, 3)) });
        // Overlapping tail is clipped to keep spans disjoint.
        assert_eq!(planned[1], PlannedSentence { beg: 6, end: 8, state_at: None });
    }
}
