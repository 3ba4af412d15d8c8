const DEFAULT_TEMPLATE: &str = "Please write a detailed explanation about artificial intelligence, \
covering its history, applications, and future prospects. \
Make your response approximately {size} characters long.";

const PADDING: &str = "Please provide more detailed information. ";

/// Builds a prompt of exactly `size` characters from `template`.
///
/// `{size}` placeholders are substituted first; the result is then truncated or
/// padded with a filler sentence. An empty template selects the built-in one.
pub fn generate_prompt(template: &str, size: usize) -> String {
    let template = if template.is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };

    let mut prompt = template.replace("{size}", &size.to_string());
    let len = prompt.chars().count();
    if len >= size {
        return truncate_chars(prompt, size);
    }

    let repeats = (size - len) / PADDING.len() + 1;
    prompt.push(' ');
    prompt.push_str(&PADDING.repeat(repeats));
    truncate_chars(prompt, size)
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}
