//! Incremental sentence segmentation for streaming TTS.
//!
//! Text fragments from the LLM are appended to a buffer; every complete
//! sentence is emitted as soon as its boundary can be decided, the
//! unterminated tail stays buffered until more text (or [`flush`]) arrives.
//!
//! A boundary is only declared once the first non-whitespace character
//! after it has been seen (the whole next word after a number or a single
//! letter), so splitting a text into fragments never changes the resulting
//! chunks.
//!
//! [`flush`]: SentenceSegmenter::flush

use crate::pipeline::messages::SentenceChunk;

/// Words that end in a period without ending the sentence (lowercase, no
/// trailing period).
const ABBREVIATIONS: &[&str] = &[
    "z.b", "bzw", "usw", "ca", "dr", "nr", "vgl", "etc", "e.g", "i.e", "mr", "mrs", "ms", "prof",
    "st", "vs", "d.h", "u.a", "evtl", "ggf", "inkl", "str",
];

/// Words after which a number with a period reads as an ordinal.
const ORDINAL_LEADS: &[&str] = &[
    "am", "im", "zum", "vom", "beim", "zur", "der", "die", "das", "dem", "den", "des",
];

/// A number with a period followed by one of these is a date.
const MONTHS: &[&str] = &[
    "januar", "februar", "märz", "april", "mai", "juni", "juli", "august", "september",
    "oktober", "november", "dezember",
];

/// Closing characters allowed between a terminator and the following space.
const CLOSERS: &[char] = &['"', '\'', '\u{201D}', '\u{2019}', '\u{00BB}', '\u{00AB}', ')', ']'];

/// Splits a growing text buffer into sentences.
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    min_flush_chars: usize,
}

impl SentenceSegmenter {
    /// Create a segmenter; [`flush`](Self::flush) only emits remainders
    /// longer than `min_flush_chars` characters.
    pub fn new(min_flush_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_flush_chars,
        }
    }

    /// Append a fragment and return every sentence it completed, in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<SentenceChunk> {
        if fragment.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(fragment);

        let boundaries = find_boundaries(&self.buffer);
        let Some(&(_, tail_start)) = boundaries.last() else {
            return Vec::new();
        };

        let mut chunks = Vec::with_capacity(boundaries.len());
        let mut start = 0;
        for (end, next) in boundaries {
            let text = self.buffer[start..end].trim();
            if !text.is_empty() {
                chunks.push(SentenceChunk {
                    text: text.to_owned(),
                    is_final: false,
                });
            }
            start = next;
        }
        self.buffer.drain(..tail_start);
        chunks
    }

    /// Emit whatever is left in the buffer, if it is long enough, and reset.
    pub fn flush(&mut self) -> Option<SentenceChunk> {
        let rest = std::mem::take(&mut self.buffer);
        let text = rest.trim();
        (text.chars().count() > self.min_flush_chars).then(|| SentenceChunk {
            text: text.to_owned(),
            is_final: true,
        })
    }

    /// The buffered, not yet emitted text.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Decided boundaries as `(sentence_end, next_sentence_start)` byte offsets.
fn find_boundaries(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |idx: usize| chars.get(idx).map_or(text.len(), |&(b, _)| b);
    let skip_whitespace = |mut idx: usize| {
        while idx < chars.len() && chars[idx].1.is_whitespace() {
            idx += 1;
        }
        idx
    };

    let mut boundaries = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i].1;

        if c == '\n' {
            let next = skip_whitespace(i);
            if next == chars.len() {
                break;
            }
            boundaries.push((byte_at(i), byte_at(next)));
            i = next;
            continue;
        }

        if !is_terminator(c) {
            i += 1;
            continue;
        }

        let mut end = i;
        while end < chars.len() && is_terminator(chars[end].1) {
            end += 1;
        }
        while end < chars.len() && CLOSERS.contains(&chars[end].1) {
            end += 1;
        }
        if end == chars.len() {
            break;
        }
        if !chars[end].1.is_whitespace() {
            i = end;
            continue;
        }
        let next = skip_whitespace(end);
        if next == chars.len() {
            break;
        }
        if chars[next].1.is_lowercase() {
            i = end;
            continue;
        }
        let single_period = c == '.' && (i + 1 == chars.len() || chars[i + 1].1 != '.');
        if single_period {
            match period_continues(&text[..byte_at(i)], &text[byte_at(next)..]) {
                Some(true) => {
                    i = end;
                    continue;
                }
                Some(false) => {}
                None => break,
            }
        }
        boundaries.push((byte_at(end), byte_at(next)));
        i = next;
    }
    boundaries
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\u{2026}')
}

/// Whether a single period after `before` belongs to the sentence, given
/// the capitalized text `after` it. `None` while the next word it depends
/// on is still incomplete.
fn period_continues(before: &str, after: &str) -> Option<bool> {
    // Only the current line counts; earlier lines may already be drained.
    let line = before.rsplit('\n').next().unwrap_or_default();
    let mut words = line.split_whitespace().rev();
    let word = trim_word(words.next().unwrap_or_default()).to_lowercase();
    if word.is_empty() {
        return Some(false);
    }
    if ABBREVIATIONS.contains(&word.as_str()) {
        return Some(true);
    }
    let previous = words.next().unwrap_or_default();

    if word.chars().all(|c| c.is_ascii_digit()) {
        let lead = trim_word(previous).to_lowercase();
        if ORDINAL_LEADS.contains(&lead.as_str()) {
            return Some(true);
        }
        return next_word(after).map(|next| MONTHS.contains(&next.to_lowercase().as_str()));
    }

    let mut letters = word.chars();
    if matches!((letters.next(), letters.next()), (Some(l), None) if l.is_alphabetic()) {
        return Some(precedes_initial(previous));
    }
    Some(false)
}

/// A single letter is an initial at the start of a sentence, after another
/// initial or after a lowercase word ("von J. Tolkien"). After a capitalized
/// word it is a label ("Plan B.").
fn precedes_initial(previous: &str) -> bool {
    if previous.is_empty() || previous.ends_with(is_terminator) {
        return true;
    }
    trim_word(previous)
        .chars()
        .next()
        .is_none_or(char::is_lowercase)
}

fn trim_word(word: &str) -> &str {
    word.trim_start_matches(|c: char| !c.is_alphanumeric())
}

/// The leading alphabetic word of `after`, or `None` if it may still grow.
fn next_word(after: &str) -> Option<&str> {
    let end = after.find(|c: char| !c.is_alphabetic())?;
    Some(&after[..end])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn segment_all(fragments: &[&str]) -> Vec<String> {
        let mut seg = SentenceSegmenter::new(2);
        let mut out: Vec<String> = fragments
            .iter()
            .flat_map(|f| seg.feed(f))
            .map(|c| c.text)
            .collect();
        out.extend(seg.flush().map(|c| c.text));
        out
    }

    #[test]
    fn splits_two_sentences() {
        assert_eq!(
            segment_all(&["Hallo. Wie geht es dir?"]),
            vec!["Hallo.", "Wie geht es dir?"]
        );
    }

    #[test]
    fn fragmentation_does_not_change_result() {
        let text = "Hallo. Wie geht es dir?";
        let whole = segment_all(&[text]);

        // Every single split point.
        for (idx, _) in text.char_indices().skip(1) {
            let (a, b) = text.split_at(idx);
            assert_eq!(segment_all(&[a, b]), whole, "split at {idx}");
        }

        // One character at a time.
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(segment_all(&refs), whole);
    }

    #[test]
    fn keeps_unterminated_tail_buffered() {
        let mut seg = SentenceSegmenter::new(2);
        assert!(seg.feed("Das ist ein").is_empty());
        assert_eq!(seg.pending(), "Das ist ein");
        let chunks = seg.feed(" Satz. Und noch");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Das ist ein Satz.");
        assert!(!chunks[0].is_final);
        assert_eq!(seg.pending(), "Und noch");
    }

    #[test]
    fn boundary_waits_for_next_character() {
        let mut seg = SentenceSegmenter::new(2);
        assert!(seg.feed("Fertig. ").is_empty());
        assert_eq!(seg.feed("Weiter").len(), 1);
    }

    #[test]
    fn abbreviations_do_not_split() {
        assert_eq!(
            segment_all(&["Wir brauchen z.B. Milch, Eier usw. Dann gehen wir."]),
            vec!["Wir brauchen z.B. Milch, Eier usw. Dann gehen wir."]
        );
        assert_eq!(
            segment_all(&["Frag Dr. Müller. Er weiß es."]),
            vec!["Frag Dr. Müller.", "Er weiß es."]
        );
    }

    #[test]
    fn initials_and_ordinals_do_not_split() {
        assert_eq!(
            segment_all(&["J. R. R. Tolkien schrieb viel."]),
            vec!["J. R. R. Tolkien schrieb viel."]
        );
        assert_eq!(
            segment_all(&["Am 3. Mai ist Feiertag."]),
            vec!["Am 3. Mai ist Feiertag."]
        );
    }

    #[test]
    fn years_and_labels_end_sentences() {
        assert_eq!(
            segment_all(&["Das war 2023. Dann kam 2024."]),
            vec!["Das war 2023.", "Dann kam 2024."]
        );
        assert_eq!(
            segment_all(&["Nimm Plan B. Das klappt."]),
            vec!["Nimm Plan B.", "Das klappt."]
        );
    }

    #[test]
    fn ordinals_before_months_and_nouns() {
        assert_eq!(
            segment_all(&["Er kommt am 3. Oktober. Sie bleibt."]),
            vec!["Er kommt am 3. Oktober.", "Sie bleibt."]
        );
        assert_eq!(
            segment_all(&["Bis 24. Dezember ist Zeit."]),
            vec!["Bis 24. Dezember ist Zeit."]
        );
        assert_eq!(
            segment_all(&["Sie wurde der 2. Platz im Finale."]),
            vec!["Sie wurde der 2. Platz im Finale."]
        );
        assert_eq!(
            segment_all(&["Ein Buch von J. R. R. Tolkien."]),
            vec!["Ein Buch von J. R. R. Tolkien."]
        );
    }

    #[test]
    fn year_boundary_is_stable_under_fragmentation() {
        let text = "Das war 2023. Dezember kam. Plan B. Ok.";
        let whole = segment_all(&[text]);
        assert_eq!(whole, vec!["Das war 2023. Dezember kam.", "Plan B.", "Ok."]);
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(segment_all(&refs), whole);
    }

    #[test]
    fn lowercase_continuation_is_not_a_boundary() {
        assert_eq!(
            segment_all(&["Das kostet ca. drei Euro."]),
            vec!["Das kostet ca. drei Euro."]
        );
        assert_eq!(segment_all(&["Na... gut."]), vec!["Na... gut."]);
    }

    #[test]
    fn terminator_runs_and_closing_quotes() {
        assert_eq!(
            segment_all(&["Wirklich?! Ja. Er sagte \"Nein.\" Dann ging er."]),
            vec!["Wirklich?!", "Ja.", "Er sagte \"Nein.\"", "Dann ging er."]
        );
    }

    #[test]
    fn newlines_are_boundaries() {
        assert_eq!(
            segment_all(&["Erstens\n\nzweitens\n", "drittens"]),
            vec!["Erstens", "zweitens", "drittens"]
        );
    }

    #[test]
    fn decimal_point_is_not_a_boundary() {
        assert_eq!(segment_all(&["Pi ist 3.14 ungefähr."]), vec!["Pi ist 3.14 ungefähr."]);
    }

    #[test]
    fn flush_respects_minimum_length() {
        let mut seg = SentenceSegmenter::new(2);
        seg.feed("ok");
        assert_eq!(seg.flush(), None);
        assert_eq!(seg.pending(), "");

        seg.feed("  Gut  ");
        let chunk = seg.flush().unwrap();
        assert_eq!(chunk.text, "Gut");
        assert!(chunk.is_final);
    }

    #[test]
    fn multibyte_text_is_sliced_safely() {
        assert_eq!(
            segment_all(&["Schön… Größer! Über"]),
            vec!["Schön…", "Größer!", "Über"]
        );
    }
}
