use std::borrow::Cow;

/// Content type feeds use to mark text that carries no markup.
pub const PLAIN_TEXT: &str = "text/plain";

/// HTML-escapes `&`, `<`, `>`, `"` and `'`.
///
/// Applied to feed and entry text that was declared as plain text, so that it
/// can later be embedded in HTML verbatim.
///
/// # Examples
///
/// ```
/// use feedreader::util::escape_html;
///
/// assert_eq!(escape_html("Tom & Jerry <3"), "Tom &amp; Jerry &lt;3");
/// ```
pub fn escape_html(s: &str) -> String {
    htmlescape::encode_minimal(s)
}

/// Returns `true` when a declared content type means "no markup".
///
/// Media type parameters (`text/plain; charset=utf-8`) and case are ignored.
pub fn is_plain_text(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PLAIN_TEXT))
}

fn is_stripped_control(c: char) -> bool {
    c == '\u{7f}' || (c < ' ' && c != '\t' && c != '\n' && c != '\r')
}

/// SEC-001: Strip control characters and ANSI escape sequences from text.
///
/// Removes C0 controls (except tab, newline, carriage return), DEL, CSI
/// sequences (`ESC [` ... final byte `@`..`~`), OSC sequences (`ESC ]` ...
/// terminated by BEL or `ESC \`) and bare ESC.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}
