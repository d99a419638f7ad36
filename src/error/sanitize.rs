//! Message sanitization for production builds.

/// Upper bound on the length of a sanitized message, in characters.
pub const MAX_SANITIZED_MESSAGE_LEN: usize = 200;

const GENERIC_MESSAGE: &str = "An unexpected error occurred.";

/// Strip stack traces, redact filesystem paths, and cap length.
pub fn sanitize_message(message: &str) -> String {
    let kept: Vec<String> = message
        .lines()
        .take_while(|line| !is_backtrace_marker(line))
        .filter(|line| !is_stack_frame(line))
        .map(redact_paths)
        .collect();

    let joined = kept.join(" ");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        return GENERIC_MESSAGE.to_string();
    }

    if trimmed.chars().count() > MAX_SANITIZED_MESSAGE_LEN {
        let mut capped: String = trimmed.chars().take(MAX_SANITIZED_MESSAGE_LEN - 3).collect();
        capped.push_str("...");
        capped
    } else {
        trimmed.to_string()
    }
}

fn is_backtrace_marker(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    lower.starts_with("stack backtrace") || lower.starts_with("traceback")
}

fn is_stack_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("at ")
        || trimmed
            .split_once(':')
            .map(|(frame, _)| !frame.is_empty() && frame.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}

fn redact_paths(line: &str) -> String {
    line.split(' ')
        .map(|word| if looks_like_path(word) { "[path]" } else { word })
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_path(word: &str) -> bool {
    let word = word.trim_matches(|c: char| matches!(c, '(' | ')' | '"' | '\'' | ',' | ';'));
    if word.starts_with("http://") || word.starts_with("https://") {
        return false;
    }

    let unix = word.starts_with('/') && word[1..].contains('/');
    let home = word.starts_with("~/");
    let relative = word.starts_with("./") || word.starts_with("../");
    let windows = word.len() > 2
        && word.as_bytes()[1] == b':'
        && word.as_bytes()[0].is_ascii_alphabetic()
        && (word.as_bytes()[2] == b'\\' || word.as_bytes()[2] == b'/');

    unix || home || relative || windows
}
