//! Lossless markup tree for procedure files.
//!
//! The legacy exporter writes a small XML dialect: a declaration line,
//! processing-instruction lines, then one root element pretty-printed with
//! two-space indentation. Elements hold either text or child elements, never
//! both. Text is kept in its escaped on-disk form so that rendering an
//! unmodified tree reproduces the input byte for byte.
//!
//! [`parse_exact`] rejects any document whose layout would not survive that
//! round trip, reporting the first divergent line.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

const INDENT: &str = "  ";
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    Crlf,
    Lf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Crlf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }

    /// Line ending of the first line break; CRLF when there is none.
    pub fn detect(text: &str) -> LineEnding {
        match text.find('\n') {
            Some(i) if i > 0 && text.as_bytes()[i - 1] == b'\r' => LineEnding::Crlf,
            Some(_) => LineEnding::Lf,
            None => LineEnding::Crlf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Content {
    /// `<Name/>`
    SelfClosing,
    /// `<Name></Name>`
    Empty,
    /// Escaped text exactly as written, whitespace included.
    Text(String),
    Children(Vec<Element>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    /// Raw attribute text between the name and the closing `>`, leading
    /// whitespace included.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attributes: String,
    pub content: Content,
}

impl Element {
    pub fn children(&self) -> &[Element] {
        match &self.content {
            Content::Children(c) => c,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [Element] {
        match &mut self.content {
            Content::Children(c) => c,
            _ => &mut [],
        }
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children_mut().iter_mut().find(|c| c.name == name)
    }

    /// Decoded text content; empty for empty and self-closing elements,
    /// `None` for elements with children.
    pub fn text(&self) -> Option<String> {
        match &self.content {
            Content::SelfClosing | Content::Empty => Some(String::new()),
            Content::Text(raw) => Some(unescape(raw)),
            Content::Children(_) => None,
        }
    }

    /// Replace the content with `value`, escaping markup characters.
    pub fn set_text(&mut self, value: &str) {
        self.content = if value.is_empty() {
            match self.content {
                Content::SelfClosing => Content::SelfClosing,
                _ => Content::Empty,
            }
        } else {
            Content::Text(escape(value))
        };
    }

    /// Visit every element in document order.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        if let Content::Children(children) = &mut self.content {
            for c in children {
                c.walk_mut(f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markup {
    pub bom: bool,
    /// Declaration and processing-instruction lines, verbatim.
    pub prolog: Vec<String>,
    pub root: Element,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

impl Markup {
    pub fn render(&self) -> String {
        let eol = self.line_ending.as_str();
        let mut out = String::new();
        if self.bom {
            out.push(BOM);
        }
        for line in &self.prolog {
            out.push_str(line);
            out.push_str(eol);
        }
        render_element(&mut out, &self.root, 0, eol);
        if self.trailing_newline {
            out.push_str(eol);
        }
        out
    }
}

fn render_element(out: &mut String, e: &Element, depth: usize, eol: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push('<');
    out.push_str(&e.name);
    out.push_str(&e.attributes);
    match &e.content {
        Content::SelfClosing => out.push_str("/>"),
        Content::Empty => {
            out.push_str("></");
            out.push_str(&e.name);
            out.push('>');
        }
        Content::Text(raw) => {
            out.push('>');
            out.push_str(raw);
            out.push_str("</");
            out.push_str(&e.name);
            out.push('>');
        }
        Content::Children(children) => {
            out.push('>');
            out.push_str(eol);
            for c in children {
                render_element(out, c, depth + 1, eol);
                out.push_str(eol);
            }
            for _ in 0..depth {
                out.push_str(INDENT);
            }
            out.push_str("</");
            out.push_str(&e.name);
            out.push('>');
        }
    }
}

/// Parse `src` and verify that rendering the tree reproduces it exactly.
pub fn parse_exact(src: &str, origin: &str) -> ProtocolResult<Markup> {
    let markup = parse(src, origin)?;
    let rendered = markup.render();
    if rendered != src {
        let line = first_divergent_line(src, &rendered);
        let expected = src.split('\n').nth(line - 1).unwrap_or("");
        return Err(ProtocolError::format_at_line(
            origin,
            line as u32,
            format!(
                "layout is not in the exporter's canonical form (found {:?})",
                expected.trim_end_matches('\r')
            ),
        ));
    }
    Ok(markup)
}

fn first_divergent_line(a: &str, b: &str) -> usize {
    let mut a_lines = a.split('\n');
    let mut b_lines = b.split('\n');
    let mut n = 1;
    loop {
        match (a_lines.next(), b_lines.next()) {
            (Some(x), Some(y)) if x == y => n += 1,
            _ => return n,
        }
    }
}

/// Parse without the round-trip check.
pub fn parse(src: &str, origin: &str) -> ProtocolResult<Markup> {
    let (bom, body) = match src.strip_prefix(BOM) {
        Some(rest) => (true, rest),
        None => (false, src),
    };
    let mut r = Reader {
        src: body,
        pos: 0,
        origin,
    };

    let mut prolog = Vec::new();
    loop {
        r.skip_whitespace();
        if !r.starts_with("<?") {
            break;
        }
        let end = r
            .find("?>")
            .ok_or_else(|| r.err("unterminated processing instruction"))?;
        prolog.push(body[r.pos..end + 2].to_owned());
        r.pos = end + 2;
    }
    if r.starts_with("<!") {
        return Err(r.err("comments, doctype and CDATA sections are not supported"));
    }
    if !r.starts_with("<") {
        return Err(r.err("expected root element"));
    }
    let root = r.element()?;
    r.skip_whitespace();
    if r.pos < body.len() {
        return Err(r.err("unexpected content after the root element"));
    }

    Ok(Markup {
        bom,
        prolog,
        root,
        line_ending: LineEnding::detect(body),
        trailing_newline: body.ends_with('\n'),
    })
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    origin: &'a str,
}

impl<'a> Reader<'a> {
    fn err(&self, message: impl Into<String>) -> ProtocolError {
        ProtocolError::format_at_line(self.origin, self.line(), message)
    }

    fn line(&self) -> u32 {
        self.src[..self.pos].matches('\n').count() as u32 + 1
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn find(&self, s: &str) -> Option<usize> {
        self.rest().find(s).map(|i| self.pos + i)
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn name(&mut self) -> ProtocolResult<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.err("expected element name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Parse one element starting at `<`.
    fn element(&mut self) -> ProtocolResult<Element> {
        let open_line = self.line();
        self.pos += 1;
        let name = self.name()?;

        // Attribute text runs to the first `>` outside quotes.
        let start = self.pos;
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in self.rest().char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if c == '>' => {
                    end = Some(start + i);
                    break;
                }
                None => {}
            }
        }
        let end = end.ok_or_else(|| {
            ProtocolError::format_at_line(
                self.origin,
                open_line,
                format!("unterminated start tag <{}", name),
            )
        })?;
        let raw_attrs = &self.src[start..end];
        self.pos = end + 1;
        if let Some(attrs) = raw_attrs.strip_suffix('/') {
            return Ok(Element {
                name: name.to_owned(),
                attributes: attrs.to_owned(),
                content: Content::SelfClosing,
            });
        }
        let attributes = raw_attrs.to_owned();

        let text_end = self.find("<").ok_or_else(|| {
            ProtocolError::format_at_line(
                self.origin,
                open_line,
                format!("element <{}> is never closed", name),
            )
        })?;
        let text = &self.src[self.pos..text_end];

        if self.src[text_end..].starts_with("</") {
            self.pos = text_end;
            self.close_tag(name)?;
            let content = if text.is_empty() {
                Content::Empty
            } else {
                Content::Text(text.to_owned())
            };
            return Ok(Element {
                name: name.to_owned(),
                attributes,
                content,
            });
        }

        let mut children = Vec::new();
        loop {
            let next = self.find("<").ok_or_else(|| {
                ProtocolError::format_at_line(
                    self.origin,
                    open_line,
                    format!("element <{}> is never closed", name),
                )
            })?;
            if !self.src[self.pos..next].trim().is_empty() {
                return Err(self.err(format!(
                    "element <{}> mixes text and child elements",
                    name
                )));
            }
            self.pos = next;
            if self.starts_with("</") {
                self.close_tag(name)?;
                break;
            }
            if self.starts_with("<!") || self.starts_with("<?") {
                return Err(self.err(format!(
                    "unsupported markup inside <{}>",
                    name
                )));
            }
            children.push(self.element()?);
        }

        Ok(Element {
            name: name.to_owned(),
            attributes,
            content: Content::Children(children),
        })
    }

    fn close_tag(&mut self, expected: &str) -> ProtocolResult<()> {
        self.pos += 2;
        let found = self.name()?;
        if found != expected {
            return Err(self.err(format!(
                "mismatched closing tag: expected </{}>, found </{}>",
                expected, found
            )));
        }
        self.skip_whitespace();
        if !self.starts_with(">") {
            return Err(self.err(format!("malformed closing tag </{}", found)));
        }
        self.pos += 1;
        Ok(())
    }
}

/// Escape text for element content.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Resolve the predefined and numeric character references. Unknown
/// references are left as written.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n",
        "<?maccor-application progid=\"Maccor Procedure File\"?>\r\n",
        "<Root>\r\n",
        "  <A>text</A>\r\n",
        "  <B></B>\r\n",
        "  <C/>\r\n",
        "  <D>\r\n",
        "    <Oper>&gt;= </Oper>\r\n",
        "  </D>\r\n",
        "</Root>\r\n",
    );

    #[test]
    fn round_trip_is_exact() {
        let m = parse_exact(DOC, "doc").unwrap();
        assert_eq!(m.prolog.len(), 2);
        assert_eq!(m.line_ending, LineEnding::Crlf);
        assert!(m.trailing_newline);
        assert_eq!(m.root.child("B").unwrap().content, Content::Empty);
        assert_eq!(m.root.child("C").unwrap().content, Content::SelfClosing);
        assert_eq!(m.render(), DOC);
    }

    #[test]
    fn text_is_decoded_on_access_and_escaped_on_write() {
        let mut m = parse_exact(DOC, "doc").unwrap();
        let oper = m.root.child_mut("D").unwrap().child_mut("Oper").unwrap();
        assert_eq!(oper.text().unwrap(), ">= ");
        oper.set_text("<= ");
        assert!(m.render().contains("<Oper>&lt;= </Oper>"));
    }

    #[test]
    fn non_canonical_indentation_is_rejected_with_line() {
        let doc = DOC.replace("  <B></B>", "    <B></B>");
        let err = parse_exact(&doc, "doc").unwrap_err();
        match err {
            ProtocolError::Format { line, .. } => assert_eq!(line, Some(5)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lf_documents_without_trailing_newline_round_trip() {
        let doc = "<Root>\n  <A>1</A>\n</Root>";
        let m = parse_exact(doc, "doc").unwrap();
        assert_eq!(m.line_ending, LineEnding::Lf);
        assert!(!m.trailing_newline);
        assert_eq!(m.render(), doc);
    }

    #[test]
    fn bom_is_preserved() {
        let doc = "\u{feff}<Root>\r\n  <A>1</A>\r\n</Root>\r\n";
        let m = parse_exact(doc, "doc").unwrap();
        assert!(m.bom);
        assert_eq!(m.render(), doc);
    }

    #[test]
    fn structural_errors() {
        assert!(parse("<Root>\r\n  <A>1</B>\r\n</Root>", "doc").is_err());
        assert!(parse("<Root>\r\n  <A>1</A>\r\n", "doc").is_err());
        assert!(parse("<Root>text<A/></Root>", "doc").is_err());
        assert!(parse("<Root><!-- c --></Root>", "doc").is_err());
        assert!(parse("<Root></Root><Extra/>", "doc").is_err());
    }

    #[test]
    fn numeric_references_decode() {
        assert_eq!(unescape("a&#65;&#x42;&amp;&bogus;"), "aAB&&bogus;");
        assert_eq!(escape("a<b&c>"), "a&lt;b&amp;c&gt;");
    }
}
