//! Comment rendering.
//!
//! Raw comment text is scanned line by line into a small AST ([`Document`])
//! and only then rendered. Every [`Inline::Text`] leaf is HTML-escaped at
//! render time, so post references and URLs are the only pieces of user input
//! that can ever become live markup.

use std::fmt::Write as _;

use domains::PostNumber;
use once_cell::sync::Lazy;
use regex::Regex;

/// Emitted in place of a link whose host is on the blocklist.
pub const BLOCKED_URL_MARKER: &str = r#"<span class="blocked-url">[blocked URL]</span>"#;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
          >>/(?P<board>[A-Za-z0-9_-]+)/(?P<board_post>\d+)?
        | >>(?P<post>\d+)
        | (?P<url>(?i:https?://|www\.)[^\s<>"'`]+)
        "#,
    )
    .expect("token regex")
});

const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    /// `>>N`
    PostRef(PostNumber),
    /// `>>/board/` or `>>/board/N`
    BoardRef {
        board: String,
        post: Option<PostNumber>,
    },
    /// A bare URL; `href` is already normalised to `https://`.
    Link { href: String, label: String },
    BlockedLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    /// `>` greentext
    Quote,
    /// `<` pinktext
    Accent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub style: LineStyle,
    pub inlines: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub lines: Vec<Line>,
}

impl Document {
    /// Distinct `>>N` references in order of first appearance.
    pub fn post_references(&self) -> Vec<PostNumber> {
        let mut seen = Vec::new();
        for inline in self.lines.iter().flat_map(|line| line.inlines.iter()) {
            if let Inline::PostRef(number) = inline {
                if !seen.contains(number) {
                    seen.push(*number);
                }
            }
        }
        seen
    }
}

/// Turns raw comments into safe markup.
#[derive(Debug, Clone, Default)]
pub struct TextRenderer {
    blocked_hosts: Vec<String>,
}

impl TextRenderer {
    pub fn new<I, S>(blocked_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked_hosts = blocked_hosts
            .into_iter()
            .map(|host| normalize_host(host.as_ref()))
            .filter(|host| !host.is_empty())
            .collect();
        Self { blocked_hosts }
    }

    pub fn render(&self, raw: &str) -> String {
        self.render_document(&self.parse(raw))
    }

    pub fn parse(&self, raw: &str) -> Document {
        let lines = raw
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .map(|line| Line {
                style: line_style(line),
                inlines: self.scan_inlines(line),
            })
            .collect();
        Document { lines }
    }

    pub fn render_document(&self, document: &Document) -> String {
        let mut out = String::new();
        for (index, line) in document.lines.iter().enumerate() {
            if index > 0 {
                out.push_str("<br>");
            }
            match line.style {
                LineStyle::Plain => render_inlines(&mut out, &line.inlines),
                LineStyle::Quote => {
                    out.push_str(r#"<span class="greentext">"#);
                    render_inlines(&mut out, &line.inlines);
                    out.push_str("</span>");
                }
                LineStyle::Accent => {
                    out.push_str(r#"<span class="pinktext">"#);
                    render_inlines(&mut out, &line.inlines);
                    out.push_str("</span>");
                }
            }
        }
        out
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.blocked_hosts
            .iter()
            .any(|blocked| host == *blocked || host.ends_with(&format!(".{blocked}")))
    }

    fn scan_inlines(&self, line: &str) -> Vec<Inline> {
        let mut inlines = Vec::new();
        let mut cursor = 0;

        for caps in TOKEN_RE.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            let mut trailing = "";

            let token = if let Some(board) = caps.name("board") {
                let post = caps
                    .name("board_post")
                    .and_then(|m| m.as_str().parse().ok())
                    .map(PostNumber);
                Some(Inline::BoardRef {
                    board: board.as_str().to_string(),
                    post,
                })
            } else if let Some(post) = caps.name("post") {
                // Numbers too large for a post number stay plain text.
                post.as_str().parse().ok().map(|n| Inline::PostRef(PostNumber(n)))
            } else if let Some(url) = caps.name("url") {
                let text = url.as_str();
                let trimmed = text.trim_end_matches(URL_TRAILING_PUNCTUATION);
                trailing = &text[trimmed.len()..];
                self.link_for(trimmed)
            } else {
                None
            };

            let Some(token) = token else { continue };

            push_text(&mut inlines, &line[cursor..whole.start()]);
            inlines.push(token);
            push_text(&mut inlines, trailing);
            cursor = whole.end();
        }

        push_text(&mut inlines, &line[cursor..]);
        inlines
    }

    fn link_for(&self, url: &str) -> Option<Inline> {
        let rest = strip_scheme(url);
        if rest.is_empty() || rest.eq_ignore_ascii_case("www.") {
            return None;
        }

        let host = host_of(rest);
        // Anything a browser might decode into a different host stays text.
        if host.is_empty() || !is_plain_host(host) {
            return None;
        }
        if self.is_blocked(host) {
            return Some(Inline::BlockedLink);
        }

        Some(Inline::Link {
            href: format!("https://{rest}"),
            label: url.to_string(),
        })
    }
}

fn line_style(line: &str) -> LineStyle {
    let trimmed = line.trim();
    let long_enough = trimmed.chars().count() > 1;

    if trimmed.starts_with(">>") {
        LineStyle::Plain
    } else if trimmed.starts_with('>') && long_enough {
        LineStyle::Quote
    } else if trimmed.starts_with('<') && long_enough {
        LineStyle::Accent
    } else {
        LineStyle::Plain
    }
}

fn push_text(inlines: &mut Vec<Inline>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Inline::Text(previous)) = inlines.last_mut() {
        previous.push_str(text);
    } else {
        inlines.push(Inline::Text(text.to_string()));
    }
}

/// Drops `http://`, `https://` (any case); `www.` URLs are returned as-is.
fn strip_scheme(url: &str) -> &str {
    for scheme in ["https://", "http://"] {
        if url.len() >= scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme) {
            return &url[scheme.len()..];
        }
    }
    url
}

/// Host part of a scheme-less URL, without userinfo or port. A backslash
/// ends the authority, as it does in browsers.
fn host_of(rest: &str) -> &str {
    let authority = rest.split(['/', '\\', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    host.split(':').next().unwrap_or_default()
}

fn is_plain_host(host: &str) -> bool {
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    }
}

fn render_inlines(out: &mut String, inlines: &[Inline]) {
    for inline in inlines {
        match inline {
            Inline::Text(text) => out.push_str(&html_escape::encode_safe(text)),
            Inline::PostRef(number) => {
                let _ = write!(
                    out,
                    r##"<a class="quotelink" href="#p{number}" data-post="{number}">&gt;&gt;{number}</a>"##
                );
            }
            Inline::BoardRef { board, post } => {
                let board_attr = html_escape::encode_double_quoted_attribute(board);
                let board_text = html_escape::encode_safe(board);
                match post {
                    Some(number) => {
                        let _ = write!(
                            out,
                            r##"<a class="boardlink" href="/{board_attr}/#p{number}" data-board="{board_attr}" data-post="{number}">&gt;&gt;/{board_text}/{number}</a>"##
                        );
                    }
                    None => {
                        let _ = write!(
                            out,
                            r#"<a class="boardlink" href="/{board_attr}/" data-board="{board_attr}">&gt;&gt;/{board_text}/</a>"#
                        );
                    }
                }
            }
            Inline::Link { href, label } => {
                let _ = write!(
                    out,
                    r#"<a href="{}" target="_blank" rel="nofollow noopener noreferrer">{}</a>"#,
                    html_escape::encode_double_quoted_attribute(href),
                    html_escape::encode_safe(label)
                );
            }
            Inline::BlockedLink => out.push_str(BLOCKED_URL_MARKER),
        }
    }
}

/// Distinct `>>N` references in `raw`, in order of first appearance.
pub fn extract_references(raw: &str) -> Vec<PostNumber> {
    TextRenderer::default().parse(raw).post_references()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> TextRenderer {
        TextRenderer::new(["evil-blocklisted.test", "WWW.Spam.example"])
    }

    #[test]
    fn post_reference_keeps_remainder_escaped() {
        let html = renderer().render(">>5 hello <b>");
        assert_eq!(
            html,
            r##"<a class="quotelink" href="#p5" data-post="5">&gt;&gt;5</a> hello &lt;b&gt;"##
        );
    }

    #[test]
    fn script_tags_are_escaped_text_only() {
        let html = renderer().render("<script>alert(1)</script>");
        assert!(!html.contains("<script"));
        assert!(html.contains("&lt;script&gt;"));
        // A leading '<' still gets the accent style, but nothing executable.
        assert!(html.starts_with(r#"<span class="pinktext">"#));
    }

    #[test]
    fn blocklisted_host_becomes_marker() {
        let html = renderer().render("see http://evil-blocklisted.test/x now");
        assert!(html.contains(BLOCKED_URL_MARKER));
        assert!(!html.contains("<a "));
    }

    #[test]
    fn backslash_cannot_smuggle_a_blocked_host() {
        let html = renderer().render(r"http://evil-blocklisted.test\@good.example/x");
        assert!(html.contains(BLOCKED_URL_MARKER), "{html}");
        assert!(!html.contains("<a "));
    }

    #[test]
    fn encoded_or_non_ascii_hosts_are_not_linked() {
        for raw in [
            "http://evil-blocklisted%2Etest/x",
            "http://ｅvil-blocklisted.test/x",
        ] {
            let html = renderer().render(raw);
            assert!(!html.contains("<a "), "{raw} -> {html}");
        }
    }

    #[test]
    fn blocklist_matches_subdomains_and_ignores_www_and_case() {
        let r = renderer();
        assert!(r.is_blocked("www.EVIL-blocklisted.test"));
        assert!(r.is_blocked("cdn.spam.example"));
        assert!(!r.is_blocked("notspam.example"));
    }

    #[test]
    fn plain_url_is_normalised_to_https() {
        let html = renderer().render("http://example.org/a?b=1&c=2");
        assert_eq!(
            html,
            r#"<a href="https://example.org/a?b=1&amp;c=2" target="_blank" rel="nofollow noopener noreferrer">http:&#x2F;&#x2F;example.org&#x2F;a?b=1&amp;c=2</a>"#
        );
    }

    #[test]
    fn www_url_gets_scheme_and_trailing_punctuation_stays_text() {
        let doc = renderer().parse("visit www.example.org.");
        assert_eq!(
            doc.lines[0].inlines,
            vec![
                Inline::Text("visit ".into()),
                Inline::Link {
                    href: "https://www.example.org".into(),
                    label: "www.example.org".into(),
                },
                Inline::Text(".".into()),
            ]
        );
    }

    #[test]
    fn quote_line_still_resolves_references() {
        let doc = renderer().parse("> see >>12 and https://example.org");
        let line = &doc.lines[0];
        assert_eq!(line.style, LineStyle::Quote);
        assert!(line.inlines.contains(&Inline::PostRef(PostNumber(12))));
        assert!(line
            .inlines
            .iter()
            .any(|i| matches!(i, Inline::Link { href, .. } if href == "https://example.org")));
    }

    #[test]
    fn line_styles_follow_prefixes() {
        let doc = renderer().parse(">implying\n<sarcasm\n>\n>>3\nplain");
        let styles: Vec<_> = doc.lines.iter().map(|l| l.style).collect();
        assert_eq!(
            styles,
            vec![
                LineStyle::Quote,
                LineStyle::Accent,
                LineStyle::Plain,
                LineStyle::Plain,
                LineStyle::Plain
            ]
        );
    }

    #[test]
    fn cross_board_references() {
        let doc = renderer().parse(">>/tech/ and >>/random/42");
        assert_eq!(
            doc.lines[0].inlines,
            vec![
                Inline::BoardRef {
                    board: "tech".into(),
                    post: None
                },
                Inline::Text(" and ".into()),
                Inline::BoardRef {
                    board: "random".into(),
                    post: Some(PostNumber(42))
                },
            ]
        );
        let html = renderer().render(">>/random/42");
        assert!(html.contains(r#"data-board="random""#));
        assert!(html.contains(r#"data-post="42""#));
    }

    #[test]
    fn lines_are_joined_with_breaks() {
        let html = renderer().render("one\r\ntwo");
        assert_eq!(html, "one<br>two");
    }

    #[test]
    fn oversized_reference_stays_text() {
        let doc = renderer().parse(">>99999999999999999999999");
        assert_eq!(
            doc.lines[0].inlines,
            vec![Inline::Text(">>99999999999999999999999".into())]
        );
    }

    #[test]
    fn references_are_distinct_and_ordered() {
        let refs = extract_references(">>9\n>>3 >>9 >>/b/4");
        assert_eq!(refs, vec![PostNumber(9), PostNumber(3)]);
    }

    #[test]
    fn attribute_injection_through_url_is_impossible() {
        let html = renderer().render(r#"https://example.org/"onmouseover="x"#);
        assert!(!html.contains(r#""onmouseover"#));
    }
}
