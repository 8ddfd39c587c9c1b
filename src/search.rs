//! Text matching and ranking over menu contents.
//!
//! Search happens on demand against the registries; nothing here keeps
//! state. Ranks are simple: a word matching the start of a text word beats
//! a substring match, and a phrase misses entirely if any of its words do.

/// Split a search phrase into lowercase words. Dashes and underscores
/// separate words the same way spaces do.
pub fn parse_search(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['-', '_'], " ")
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rank one search word against a list of text words. Greater than zero
/// means the word was found; higher is better.
pub fn text_search(search_word: &str, text_words: &[String]) -> f64 {
    if search_word.is_empty() {
        return 0.0;
    }
    for text_word in text_words {
        if text_word.starts_with(search_word) {
            return 1.0;
        }
        if text_word.contains(search_word) {
            return 0.5;
        }
    }
    0.0
}

/// Rank a whole phrase: the sum of its word ranks, or zero when any word
/// misses.
pub fn search_rank(search_words: &[String], text_words: &[String]) -> f64 {
    let mut total = 0.0;
    for word in search_words {
        let rank = text_search(word, text_words);
        if rank == 0.0 {
            return 0.0;
        }
        total += rank;
    }
    total
}

/// Case-insensitive occurrence intervals of the search words in `text`,
/// merged where they overlap. Indices are char positions; each word
/// contributes its first occurrence only.
pub fn highlight_ranges(text: &str, search_words: &[String]) -> Vec<(usize, usize)> {
    let chars: Vec<char> = text
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();

    let mut found: Vec<(usize, usize)> = Vec::new();
    for word in search_words {
        let word_chars: Vec<char> = word.chars().collect();
        if word_chars.is_empty() || word_chars.len() > chars.len() {
            continue;
        }
        let hit = (0..=chars.len() - word_chars.len())
            .find(|&start| chars[start..start + word_chars.len()] == word_chars[..]);
        if let Some(start) = hit {
            found.push((start, start + word_chars.len()));
        }
    }
    if found.is_empty() {
        return found;
    }

    found.sort_by_key(|&(start, _)| start);
    let mut merged = vec![found[0]];
    for (start, end) in found.into_iter().skip(1) {
        let last = merged.last_mut().unwrap();
        if start <= last.1 {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split(' ').map(str::to_string).collect()
    }

    #[test]
    fn parse_search_splits_on_separators() {
        assert_eq!(parse_search("Fire-Fox  web_browser"), words("fire fox web browser"));
        assert!(parse_search(" - _ ").is_empty());
    }

    #[test]
    fn prefix_beats_substring() {
        let text = words("firefox browser");
        assert_eq!(text_search("fire", &text), 1.0);
        assert_eq!(text_search("fox", &text), 0.5);
        assert_eq!(text_search("chrome", &text), 0.0);
        assert_eq!(text_search("", &text), 0.0);
    }

    #[test]
    fn phrase_rank_fails_when_any_word_misses() {
        let text = words("disposable firefox");
        assert_eq!(search_rank(&words("disp fire"), &text), 2.0);
        assert_eq!(search_rank(&words("disp chrome"), &text), 0.0);
    }

    #[test]
    fn highlight_finds_first_occurrences() {
        assert_eq!(highlight_ranges("Firefox", &words("fire")), vec![(0, 4)]);
        assert_eq!(highlight_ranges("xterm", &words("term")), vec![(1, 5)]);
        assert!(highlight_ranges("xterm", &words("zzz")).is_empty());
    }

    #[test]
    fn overlapping_ranges_merge() {
        // "firef" and "refox" overlap into one range
        assert_eq!(
            highlight_ranges("firefox", &words("firef refox")),
            vec![(0, 7)]
        );
        // disjoint words stay separate
        assert_eq!(
            highlight_ranges("disposable firefox", &words("disp fire")),
            vec![(0, 4), (11, 15)]
        );
    }

    #[test]
    fn adjacent_ranges_merge_too() {
        assert_eq!(
            highlight_ranges("firefox", &words("fire fox")),
            vec![(0, 7)]
        );
    }
}
