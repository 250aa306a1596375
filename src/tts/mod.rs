//! Text-to-speech synthesis.
//!
//! A [`TextToSpeech`] provider only renders text to audio. Queueing,
//! playback and cancellation live in the speech queue
//! ([`crate::pipeline::speech_queue`]) which owns the single worker.

mod espeak;
mod openai;

pub use espeak::EspeakTts;
pub use openai::OpenAiTts;

use crate::error::Result;
use crate::pipeline::messages::SynthesizedAudio;
use async_trait::async_trait;

/// Renders a sentence to audio.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text` (already cleaned for speech).
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpeechError::Tts`] if the backend fails.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// Prepare LLM output for speaking.
///
/// Applies, in order:
/// 1. Smart quotes and dashes to ASCII
/// 2. Code fences, inline code ticks, emphasis markers and heading `#`s removed
/// 3. Markdown links reduced to their label
/// 4. List bullets and other symbols a voice would read out removed
/// 5. Whitespace collapsed
pub fn clean_for_speech(text: &str) -> String {
    let text = normalize_quotes(text);
    let text = strip_markdown(&text);
    let text = strip_links(&text);
    collapse_whitespace(&text)
}

fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2014}', '\u{2013}'], " - ")
}

fn strip_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            continue;
        }
        let content = if trimmed.starts_with('#') {
            trimmed.trim_start_matches('#').trim_start()
        } else if let Some(rest) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("+ "))
            .or_else(|| trimmed.strip_prefix("* "))
        {
            rest
        } else {
            line
        };
        result.extend(content.chars().filter(|c| !matches!(c, '*' | '_' | '`' | '~' | '|')));
        result.push('\n');
    }
    if result.ends_with('\n') {
        result.pop();
    }
    result
}

/// `[label](url)` becomes `label`.
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find("](") else {
            break;
        };
        let after_label = &after_open[close + 2..];
        let Some(end) = after_label.find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&after_open[..close]);
        rest = &after_label[end + 1..];
    }
    out.push_str(rest);
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn strips_emphasis_and_headings() {
        assert_eq!(clean_for_speech("## Hallo **Welt**"), "Hallo Welt");
        assert_eq!(clean_for_speech("Das ist *wichtig*."), "Das ist wichtig.");
    }

    #[test]
    fn strips_bullets_and_fences() {
        let text = "Liste:\n- eins\n* zwei\n```rust\nlet x = 1;\n```";
        assert_eq!(clean_for_speech(text), "Liste: eins zwei let x = 1;");
    }

    #[test]
    fn reduces_links_to_label() {
        assert_eq!(
            clean_for_speech("Siehe [die Doku](https://example.com) hier."),
            "Siehe die Doku hier."
        );
        assert_eq!(clean_for_speech("Klammer [ohne Link"), "Klammer [ohne Link");
    }

    #[test]
    fn normalizes_quotes_and_dashes() {
        assert_eq!(
            clean_for_speech("Er sagte \u{201C}ja\u{201D}\u{2014}dann nein"),
            "Er sagte \"ja\" - dann nein"
        );
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(clean_for_speech("Wie geht es dir?"), "Wie geht es dir?");
        assert_eq!(clean_for_speech("   "), "");
    }
}
