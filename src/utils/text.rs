/// Directory-safe slug: alphanumerics kept, everything else becomes `_`.
pub fn slug(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// File-name code for a target language ("Hindi" -> "hindi", "pt-BR" -> "pt_br").
pub fn language_code(language: &str) -> String {
    slug(language.trim(), 32).to_lowercase()
}

/// Trimmed languages in request order, dropping blanks and any language whose
/// file code was already taken ("Hindi" after "hindi").
pub fn distinct_languages(languages: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for language in languages {
        let language = language.trim();
        let code = language_code(language);
        if code.is_empty() || seen.contains(&code) {
            continue;
        }
        seen.push(code);
        out.push(language.to_string());
    }
    out
}

/// Splits text into chunks of at most `max_chars` characters, preferring
/// paragraph breaks, then sentence ends, then whitespace.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in split_long(paragraph, max_chars) {
            let joined_len = current.chars().count() + piece.chars().count() + 2;
            if !current.is_empty() && joined_len > max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest: &str = paragraph;
    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind(|c: char| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
            .map(|i| i + window[i..].chars().next().map_or(1, char::len_utf8))
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        pieces.push(rest[..cut].trim().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}
