//! Streaming segmentation of an in-progress reply into speakable units
//!
//! The language model emits arbitrarily small text fragments. This parser
//! accumulates them and emits one [`SpeakableUnit`] per completed sentence,
//! stripping known `[tag]` expression markers out of the spoken text while
//! recording where they occurred. Unknown bracketed text is left alone and
//! spoken literally.
//!
//! Segmentation is pure, synchronous text processing: it never blocks and is
//! driven entirely by whoever delivers the model stream.

use crate::config::SegmenterConfig;

/// Longest bracket run still considered a potential expression marker.
/// Anything longer is plain text that happens to contain `[`.
const MAX_TAG_SCAN: usize = 64;

/// A timed expression marker extracted from reply text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpressionCue {
    /// Expression keyword, without brackets
    pub tag: String,

    /// Character position in the unit's spoken text where the marker stood
    pub position: usize,
}

/// One segment of reply text, the atom of synthesis and playback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeakableUnit {
    /// Monotonic position of this unit within its turn, starting at 0
    pub sequence: u64,

    /// Spoken text with expression markers removed; never empty
    pub text: String,

    /// Expression cues in text order
    pub expressions: Vec<ExpressionCue>,
}

/// Outcome of scanning a `[` run for a closing bracket
enum BracketScan {
    /// Closed bracket; byte offset of `]` relative to the `[`
    Closed(usize),

    /// No close yet, but one may still arrive in a later fragment
    Pending,

    /// Too long to be a marker; the `[` is ordinary text
    Literal,
}

fn scan_bracket(rest: &str) -> BracketScan {
    for (offset, c) in rest.char_indices().skip(1) {
        if offset > MAX_TAG_SCAN {
            return BracketScan::Literal;
        }
        if c == ']' {
            return BracketScan::Closed(offset);
        }
    }
    if rest.len() > MAX_TAG_SCAN {
        BracketScan::Literal
    } else {
        BracketScan::Pending
    }
}

/// Streaming segmenter for reply text
///
/// Feed fragments as they arrive with [`feed`](Self::feed); call
/// [`finish`](Self::finish) when the reply is complete to flush whatever
/// remains in the buffer, terminator or not.
#[derive(Clone, Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,

    /// Raw accumulated text, expression markers not yet stripped
    buffer: String,

    /// Sequence number for the next emitted unit
    next_sequence: u64,
}

impl UtteranceSegmenter {
    /// Create a new segmenter
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            next_sequence: 0,
        }
    }

    /// Reset to the initial state for a new reply
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_sequence = 0;
    }

    /// Sequence number the next emitted unit will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Feed a text fragment, returning any units completed by it
    pub fn feed(&mut self, fragment: &str) -> Vec<SpeakableUnit> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        while let Some(end) = self.find_split() {
            let rest = self.buffer.split_off(end);
            let raw = std::mem::replace(&mut self.buffer, rest);
            if let Some(unit) = self.make_unit(&raw) {
                units.push(unit);
            }
        }
        units
    }

    /// Flush any remaining buffered text as a final unit
    ///
    /// Returns `None` if the remainder is empty after stripping markers and
    /// whitespace; empty tails are discarded, not emitted.
    pub fn finish(&mut self) -> Option<SpeakableUnit> {
        let raw = std::mem::take(&mut self.buffer);
        self.make_unit(&raw)
    }

    /// Find the byte index just past the next sentence boundary, if any
    ///
    /// Terminators inside a (potential) bracket marker never split, and a
    /// terminator run touching the end of the buffer is held back: the next
    /// fragment may extend it (`"Wait.."` + `"."`), and the final flush picks
    /// it up otherwise.
    fn find_split(&self) -> Option<usize> {
        let s = self.buffer.as_str();
        let mut iter = s.char_indices().peekable();

        while let Some((i, c)) = iter.next() {
            if c == '[' {
                match scan_bracket(&s[i..]) {
                    BracketScan::Closed(close) => {
                        // skip everything up to and including the ']'
                        while let Some(&(j, _)) = iter.peek() {
                            if j <= i + close {
                                iter.next();
                            } else {
                                break;
                            }
                        }
                    }
                    BracketScan::Pending => return None,
                    BracketScan::Literal => {}
                }
            } else if self.config.terminators.contains(&c) {
                // absorb a run of consecutive terminators
                let mut end = i + c.len_utf8();
                while let Some(&(j, c2)) = iter.peek() {
                    if self.config.terminators.contains(&c2) {
                        end = j + c2.len_utf8();
                        iter.next();
                    } else {
                        break;
                    }
                }
                if end == s.len() {
                    return None;
                }
                return Some(end);
            }
        }
        None
    }

    /// Build a unit from raw text, stripping expression markers
    ///
    /// Returns `None` (consuming no sequence number) when nothing speakable
    /// remains.
    fn make_unit(&mut self, raw: &str) -> Option<SpeakableUnit> {
        let (clean, mut cues) = self.strip_expressions(raw);

        let lead_chars = clean.chars().take_while(|c| c.is_whitespace()).count();
        let text = clean.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let text_chars = text.chars().count();
        for cue in &mut cues {
            cue.position = cue.position.saturating_sub(lead_chars).min(text_chars);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some(SpeakableUnit {
            sequence,
            text,
            expressions: cues,
        })
    }

    /// Remove known `[tag]` markers, recording their positions in the
    /// cleaned text; unknown brackets pass through untouched
    fn strip_expressions(&self, raw: &str) -> (String, Vec<ExpressionCue>) {
        let mut clean = String::with_capacity(raw.len());
        let mut cues = Vec::new();
        let mut rest = raw;

        while let Some(pos) = rest.find('[') {
            clean.push_str(&rest[..pos]);
            let after = &rest[pos..];
            match scan_bracket(after) {
                BracketScan::Closed(close) => {
                    let inner = after[1..close].trim();
                    if self.config.expressions.iter().any(|t| t == inner) {
                        cues.push(ExpressionCue {
                            tag: inner.to_string(),
                            position: clean.chars().count(),
                        });
                        // collapse the whitespace that held the marker so
                        // "Well [laugh] that" reads "Well that"
                        let mut next = &after[close + 1..];
                        if clean.chars().last().map_or(true, |c| c.is_whitespace()) {
                            next = next.trim_start();
                        }
                        rest = next;
                    } else {
                        clean.push_str(&after[..close + 1]);
                        rest = &after[close + 1..];
                    }
                }
                // an unclosed marker at end of reply is just text
                BracketScan::Pending | BracketScan::Literal => {
                    clean.push('[');
                    rest = &after[1..];
                }
            }
        }
        clean.push_str(rest);

        (clean, cues)
    }
}

/// Segment a complete reply in one call (non-streaming)
pub fn segment_reply(text: &str, config: SegmenterConfig) -> Vec<SpeakableUnit> {
    let mut segmenter = UtteranceSegmenter::new(config);
    let mut units = segmenter.feed(text);
    if let Some(unit) = segmenter.finish() {
        units.push(unit);
    }
    units
}
