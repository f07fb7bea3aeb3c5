//! Splits chapter text into Speech Engine sized pieces.

/// Splits `text` at sentence boundaries into chunks of at most `chunk_size`
/// characters. A sentence longer than `chunk_size` is split between words;
/// a single word longer than that becomes its own chunk.
///
/// The result depends only on the input, so a resumed job sees the same
/// chunk indices as the attempt that wrote its checkpoint.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        let len = sentence.chars().count();

        if len > chunk_size {
            flush(&mut current, &mut chunks);
            split_words(&sentence, chunk_size, &mut chunks);
            continue;
        }

        let joined_len = current.chars().count() + usize::from(!current.is_empty()) + len;
        if joined_len > chunk_size {
            flush(&mut current, &mut chunks);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }

    flush(&mut current, &mut chunks);
    chunks
}

fn flush(current: &mut String, chunks: &mut Vec<String>) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Sentences with whitespace collapsed, each keeping its terminator.
fn sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }
        current.push(c);

        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn split_words(sentence: &str, chunk_size: usize, chunks: &mut Vec<String>) {
    let mut piece = String::new();
    for word in sentence.split_whitespace() {
        let joined_len =
            piece.chars().count() + usize::from(!piece.is_empty()) + word.chars().count();
        if joined_len > chunk_size {
            flush(&mut piece, chunks);
        }
        if !piece.is_empty() {
            piece.push(' ');
        }
        piece.push_str(word);
    }
    flush(&mut piece, chunks);
}
