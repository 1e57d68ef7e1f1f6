//! Local segmentation of generated text into speech-sized segments.
//!
//! Paragraphs are packed together up to `max_chars`; a paragraph that is
//! longer on its own is split on sentence boundaries. A paragraph starting
//! with `[tag]` is spoken by that speaker, and packing never mixes speakers.

use crate::defaults::WORDS_PER_MINUTE;
use crate::pipeline::types::Segment;

/// Estimated speaking time for `text` at the default rate.
pub fn estimate_secs(text: &str) -> f32 {
    let words = text.split_whitespace().count() as f32;
    words * 60.0 / WORDS_PER_MINUTE as f32
}

/// Split raw script text into segments no longer than `max_chars`.
pub fn segment(raw: &str, max_chars: usize) -> Vec<Segment> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_speaker: Option<String> = None;

    for paragraph in paragraphs(raw) {
        let (speaker, text) = split_speaker(&paragraph);

        if !current.is_empty()
            && (speaker != current_speaker || current.len() + 2 + text.len() > max_chars)
        {
            segments.push(finish(&mut current, current_speaker.clone()));
        }
        current_speaker = speaker;

        if text.len() <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(text);
            continue;
        }

        for piece in split_long(text, max_chars) {
            if !current.is_empty() {
                segments.push(finish(&mut current, current_speaker.clone()));
            }
            current.push_str(&piece);
        }
    }

    if !current.is_empty() {
        segments.push(finish(&mut current, current_speaker));
    }
    segments
}

fn finish(buffer: &mut String, speaker: Option<String>) -> Segment {
    let text = std::mem::take(buffer);
    Segment {
        estimated_secs: estimate_secs(&text),
        text,
        speaker,
    }
}

/// Non-empty paragraphs, inner line breaks folded to spaces.
fn paragraphs(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

/// Strip a leading `[tag]` and return it lowercased.
fn split_speaker(paragraph: &str) -> (Option<String>, &str) {
    if let Some(rest) = paragraph.strip_prefix('[')
        && let Some((tag, text)) = rest.split_once(']')
    {
        let tag = tag.trim();
        if !tag.is_empty() && !tag.contains(char::is_whitespace) {
            return (Some(tag.to_lowercase()), text.trim());
        }
    }
    (None, paragraph)
}

/// Split a long paragraph into pieces of at most `max_chars`, preferring
/// sentence ends and falling back to word and then character boundaries.
fn split_long(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if current.len() + 1 + sentence.len() <= max_chars || current.is_empty() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        } else {
            pieces.push(std::mem::take(&mut current));
            current.push_str(sentence);
        }

        while current.len() > max_chars {
            let cut = cut_point(&current, max_chars);
            let rest = current.split_off(cut);
            pieces.push(current.trim_end().to_string());
            current = rest.trim_start().to_string();
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Sentences including their terminator.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Byte offset at most `max_chars` to cut at: last space, else a char boundary.
fn cut_point(text: &str, max_chars: usize) -> usize {
    let mut limit = max_chars.min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    match text[..limit].rfind(' ') {
        Some(space) if space > 0 => space,
        _ if limit > 0 => limit,
        _ => text.chars().next().map_or(text.len(), char::len_utf8),
    }
}
