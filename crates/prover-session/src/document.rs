//! Chunks joined into one document, for backends that check a whole file
//! at once.

use crate::types::Fragment;

/// A value together with the byte range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positioned<T> {
    pub beg: usize,
    pub end: usize,
    pub value: T,
}

impl<T> Positioned<T> {
    pub fn new(beg: usize, end: usize, value: T) -> Self {
        Self { beg, end, value }
    }
}

/// Chunks joined by a separator.
#[derive(Debug, Clone)]
pub struct Document {
    chunks: Vec<String>,
    separator: String,
    contents: String,
    /// Byte offset of the start of each line.
    line_starts: Vec<usize>,
}

impl Document {
    pub fn new(chunks: Vec<String>, separator: &str) -> Self {
        let contents = chunks.join(separator);
        let line_starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            chunks,
            separator: separator.to_string(),
            contents,
            line_starts,
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Byte offset of a 1-based line and 0-based character column.
    ///
    /// Lines past the end map to the end of the document; columns past the
    /// end of their line map to the line's end.
    pub fn pos_to_offset(&self, line: usize, column: usize) -> usize {
        let Some(&start) = line.checked_sub(1).and_then(|l| self.line_starts.get(l)) else {
            return if line == 0 { 0 } else { self.contents.len() };
        };
        let line_end = self.contents[start..]
            .find('\n')
            .map_or(self.contents.len(), |i| start + i);
        self.contents[start..line_end]
            .char_indices()
            .nth(column)
            .map_or(line_end, |(i, _)| start + i)
    }

    /// Byte range of each chunk within the contents.
    fn chunk_ranges(&self) -> Vec<(usize, usize)> {
        let mut begin = 0;
        self.chunks
            .iter()
            .map(|chunk| {
                let range = (begin, begin + chunk.len());
                begin = range.1 + self.separator.len();
                range
            })
            .collect()
    }

    /// Pair each fragment with the range it covers, assuming the fragments
    /// tile a text from offset 0.
    pub fn with_boundaries(fragments: Vec<Fragment>) -> Vec<Positioned<Fragment>> {
        let mut beg = 0;
        fragments
            .into_iter()
            .map(|fr| {
                let end = beg + fr.contents().len();
                let positioned = Positioned::new(beg, end, fr);
                beg = end;
                positioned
            })
            .collect()
    }

    /// Fill the gaps between positioned sentences of `text` with text
    /// fragments.
    ///
    /// Sentences must be sorted and non-overlapping.
    pub fn intersperse_text_fragments(
        text: &str,
        sentences: Vec<Positioned<Fragment>>,
    ) -> Vec<Fragment> {
        let mut fragments = Vec::with_capacity(2 * sentences.len() + 1);
        let mut last_end = 0;
        for Positioned { beg, end, value } in sentences {
            if last_end < beg {
                fragments.push(Fragment::text(&text[last_end..beg]));
            }
            fragments.push(value);
            last_end = end;
        }
        if last_end < text.len() {
            fragments.push(Fragment::text(&text[last_end..]));
        }
        fragments
    }

    /// Cut fragments covering the whole document back into one list per
    /// chunk, dropping separators.
    ///
    /// A fragment that crosses a chunk boundary is split; only its last
    /// piece keeps messages and goals, the earlier ones become text.
    pub fn recover_chunks(&self, fragments: Vec<Fragment>) -> Vec<Vec<Fragment>> {
        let ranges = self.chunk_ranges();
        let mut recovered = vec![Vec::new(); ranges.len()];
        for Positioned { beg, end, value } in Self::with_boundaries(fragments) {
            let pieces: Vec<_> = ranges
                .iter()
                .enumerate()
                .filter_map(|(i, &(chunk_beg, chunk_end))| {
                    let (b, e) = (beg.max(chunk_beg), end.min(chunk_end));
                    (b < e).then_some((i, b, e))
                })
                .collect();
            let Some((&(last_i, last_b, last_e), earlier)) = pieces.split_last() else {
                continue;
            };
            for &(i, b, e) in earlier {
                recovered[i].push(Fragment::text(&self.contents[b..e]));
            }
            let last = if (last_b, last_e) == (beg, end) {
                value
            } else {
                with_contents(value, &self.contents[last_b..last_e])
            };
            recovered[last_i].push(last);
        }
        recovered
    }
}

fn with_contents(fragment: Fragment, text: &str) -> Fragment {
    match fragment {
        Fragment::Text { .. } => Fragment::text(text),
        Fragment::Sentence {
            messages, goals, ..
        } => Fragment::Sentence {
            contents: text.to_string(),
            messages,
            goals,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fragments_text, Message};

    fn doc(chunks: &[&str]) -> Document {
        Document::new(chunks.iter().map(|c| c.to_string()).collect(), "\n")
    }

    #[test]
    fn pos_to_offset_counts_characters() {
        let d = doc(&["αβ x", "y"]);
        assert_eq!(d.contents(), "αβ x\ny");
        assert_eq!(d.pos_to_offset(1, 0), 0);
        assert_eq!(d.pos_to_offset(1, 1), 2);
        assert_eq!(d.pos_to_offset(1, 3), 5);
        assert_eq!(d.pos_to_offset(2, 0), 7);
    }

    #[test]
    fn pos_to_offset_clamps() {
        let d = doc(&["ab", "c"]);
        assert_eq!(d.pos_to_offset(1, 10), 2);
        assert_eq!(d.pos_to_offset(9, 0), 4);
        assert_eq!(d.pos_to_offset(0, 0), 0);
    }

    #[test]
    fn intersperse_fills_gaps() {
        let text = "  a. b. ";
        let sentences = vec![
            Positioned::new(2, 4, Fragment::sentence("a.")),
            Positioned::new(5, 7, Fragment::sentence("b.")),
        ];
        let fragments = Document::intersperse_text_fragments(text, sentences);
        assert_eq!(fragments.len(), 5);
        assert_eq!(fragments_text(&fragments), text);
    }

    #[test]
    fn with_boundaries_tiles() {
        let positioned =
            Document::with_boundaries(vec![Fragment::text("ab"), Fragment::sentence("cde")]);
        assert_eq!((positioned[1].beg, positioned[1].end), (2, 5));
    }

    #[test]
    fn recover_chunks_drops_separators() {
        let d = doc(&["#check nat", "", "#eval 1"]);
        let fragments = vec![
            Fragment::sentence("#check nat"),
            Fragment::text("\n\n"),
            Fragment::sentence("#eval 1"),
        ];
        let chunks = d.recover_chunks(fragments);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec![Fragment::sentence("#check nat")]);
        assert!(chunks[1].is_empty());
        assert_eq!(chunks[2], vec![Fragment::sentence("#eval 1")]);
    }

    #[test]
    fn recover_chunks_splits_crossing_sentence() {
        let d = doc(&["begin", "end"]);
        let sentence = Fragment::Sentence {
            contents: "begin\nend".into(),
            messages: vec![Message::new("m")],
            goals: vec![],
        };
        let chunks = d.recover_chunks(vec![sentence]);
        assert_eq!(chunks[0], vec![Fragment::text("begin")]);
        assert_eq!(
            chunks[1],
            vec![Fragment::Sentence {
                contents: "end".into(),
                messages: vec![Message::new("m")],
                goals: vec![],
            }]
        );
    }
}
