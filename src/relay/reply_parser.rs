//! Reply extraction: keeps the author's new text and drops quoted history.
//!
//! Removes:
//! - Lines starting with `>` (quoted reply lines)
//! - Everything from an attribution line on ("On ... wrote:", "Am ... schrieb ...:"),
//!   including attributions wrapped over two lines
//! - Everything from an original-message separator or an Outlook header
//!   block (`From:` followed by `Sent:`/`Date:`) on
//! - Everything from a signature delimiter (`-- `, `__`, "Sent from my") on
//!
//! Pure string parsing.

/// Author's text of an email reply, trimmed.
pub fn parse_reply(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let mut result: Vec<&str> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        let next = lines.get(i + 1).map(|l| l.trim()).unwrap_or("");
        if is_attribution(trimmed, next)
            || is_separator(trimmed)
            || is_outlook_header(trimmed, next)
            || is_signature(line)
        {
            break;
        }

        result.push(line);
    }

    result.join("\n").trim().to_string()
}

/// "On <date> <person> wrote:", possibly wrapped onto the next line.
fn is_attribution(line: &str, next: &str) -> bool {
    let ends = |s: &str| {
        let s = s.trim_end();
        s.ends_with("wrote:") || (s.contains("schrieb") && s.ends_with(':'))
    };

    let starts = line.starts_with("On ") || line.starts_with("Am ");
    starts && (ends(line) || (ends(next) && !next.starts_with('>')))
}

fn is_separator(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    line.starts_with("---")
        && (lower.contains("original message") || lower.contains("ursprüngliche nachricht"))
}

fn is_outlook_header(line: &str, next: &str) -> bool {
    (line.starts_with("From:") || line.starts_with("Von:"))
        && (next.starts_with("Sent:")
            || next.starts_with("Date:")
            || next.starts_with("Gesendet:"))
}

fn is_signature(line: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed == "--"
        || line.starts_with("-- ")
        || trimmed.starts_with("__")
        || trimmed.starts_with("Sent from my ")
}
