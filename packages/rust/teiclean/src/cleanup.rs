//! Cleanup passes for GROBID TEI output.
//!
//! Markup passes run on the raw XML and remove whole elements (citations,
//! table of contents, tables). Paragraph extraction then turns the markup
//! into plain paragraphs, and text passes scrub what is left.

use std::sync::LazyLock;

use regex::{Captures, Regex};

// ---------------------------------------------------------------------------
// Markup passes
// ---------------------------------------------------------------------------

/// Remove `<ref .../>` and `<ref ...>...</ref>` citation elements.
pub(crate) fn remove_refs(xml: &str) -> String {
    static SELF_CLOSING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<ref\b[^>]*/>").expect("valid regex"));
    static BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<ref\b[^>]*>.*?</ref>").expect("valid regex"));

    let without_empty = SELF_CLOSING_RE.replace_all(xml, "");
    BLOCK_RE.replace_all(&without_empty, "").to_string()
}

/// Remove a "Spis treści" division up to its closing tag.
pub(crate) fn remove_table_of_contents(xml: &str) -> String {
    static TOC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<div[^>]*>\s*<head[^>]*>Spis .*?/div>").expect("valid regex")
    });

    TOC_RE.replace_all(xml, "").to_string()
}

/// Remove a paragraph starting with "Tabela" through the end of its division.
///
/// The division's closing tag is put back so the surrounding structure
/// stays balanced for paragraph extraction.
pub(crate) fn remove_tables(xml: &str) -> String {
    static TABLE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<p[^>]*>Tabela.*?/div>").expect("valid regex"));

    TABLE_RE.replace_all(xml, "</div>").to_string()
}

// ---------------------------------------------------------------------------
// Paragraph extraction
// ---------------------------------------------------------------------------

/// Collect the text of every `<p>` element, tags stripped and entities decoded.
///
/// Paragraphs that end up empty are dropped.
pub(crate) fn extract_paragraphs(xml: &str) -> Vec<String> {
    static P_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<p(?:\s[^>]*)?>(.*?)</p>").expect("valid regex"));

    P_RE.captures_iter(xml)
        .map(|caps| decode_entities(&strip_tags(&caps[1])).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Remove every remaining tag, keeping inner text.
fn strip_tags(fragment: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

    TAG_RE.replace_all(fragment, "").to_string()
}

/// Decode the predefined XML entities and numeric character references.
fn decode_entities(text: &str) -> String {
    static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"&(?:#(\d+)|#x([0-9A-Fa-f]+)|(amp|lt|gt|quot|apos));").expect("valid regex")
    });

    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                match &caps[3] {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    _ => Some('\''),
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Text passes
// ---------------------------------------------------------------------------

/// Remove the per-page repository footer GROBID picks up as body text.
pub(crate) fn remove_download_footer(text: &str) -> String {
    static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"Pobrano z .*?/ Downloaded from Repository of Polish Platform of Medical Research \S*\s?",
        )
        .expect("valid regex")
    });

    FOOTER_RE.replace_all(text, "").to_string()
}

/// Remove runs of four or more dots (table-of-contents leaders).
pub(crate) fn remove_dot_leaders(text: &str) -> String {
    static DOTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{4,}").expect("valid regex"));

    DOTS_RE.replace_all(text, "").to_string()
}

/// Remove numeric bibliography markers such as `[35]`, `[3-5]`, `[1, 2]`.
pub(crate) fn remove_citation_markers(text: &str) -> String {
    static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[\d+(?:\s*[-–,]\s*\d+)*\]").expect("valid regex")
    });

    MARKER_RE.replace_all(text, "").to_string()
}

/// Collapse whitespace runs to single spaces and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_refs_drops_both_forms() {
        let input = r##"<p>Tekst<ref type="bibr" target="#b1">[1]</ref> dalej <ref type="figure"/>koniec</p>"##;
        assert_eq!(remove_refs(input), "<p>Tekst dalej koniec</p>");
    }

    #[test]
    fn remove_refs_is_non_greedy() {
        let input = "<p>A<ref>1</ref>B<ref>2</ref>C</p>";
        assert_eq!(remove_refs(input), "<p>ABC</p>");
    }

    #[test]
    fn remove_table_of_contents_drops_division() {
        let input = r#"<div><head>Spis treści</head><p>1. Wstęp ..... 5</p></div><div><head>Wstęp</head><p>Treść.</p></div>"#;
        let result = remove_table_of_contents(input);
        assert!(!result.contains("Spis"));
        assert!(result.contains("<p>Treść.</p>"));
    }

    #[test]
    fn remove_table_of_contents_allows_head_attributes() {
        let input = "<div xmlns=\"http://www.tei-c.org/ns/1.0\">\n<head n=\"1.\">Spis treści</head><p>x</p></div><p>y</p>";
        assert_eq!(remove_table_of_contents(input), "<p>y</p>");
    }

    #[test]
    fn remove_tables_keeps_division_closed() {
        let input = "<div><p>Przed.</p><p>Tabela 1. Wyniki</p><p>12 13</p></div><div><p>Po.</p></div>";
        let result = remove_tables(input);
        assert_eq!(result, "<div><p>Przed.</p></div><div><p>Po.</p></div>");
    }

    #[test]
    fn extract_paragraphs_strips_tags_and_decodes() {
        let input = r#"<p>Zdanie <hi rend="italic">pierwsze</hi> &amp; drugie &#243;&#x142;.</p><p xml:id="_1">  </p><p n="2">Trzecie</p>"#;
        let paragraphs = extract_paragraphs(input);
        assert_eq!(paragraphs, vec!["Zdanie pierwsze & drugie ół.", "Trzecie"]);
    }

    #[test]
    fn extract_paragraphs_ignores_other_p_tags() {
        let input = "<pb n=\"3\"/><ptr target=\"x\"/><p>Jedyny</p>";
        assert_eq!(extract_paragraphs(input), vec!["Jedyny"]);
    }

    #[test]
    fn download_footer_removed() {
        let input = "Koniec zdania. Pobrano z Repozytorium PPM / Downloaded from Repository of Polish Platform of Medical Research 2024-01-01 Dalej tekst.";
        assert_eq!(
            remove_download_footer(input),
            "Koniec zdania. Dalej tekst."
        );
    }

    #[test]
    fn dot_leaders_removed() {
        assert_eq!(remove_dot_leaders("Wstęp........5"), "Wstęp5");
        assert_eq!(remove_dot_leaders("itd..."), "itd...");
    }

    #[test]
    fn citation_markers_removed() {
        assert_eq!(
            remove_citation_markers("Wykazano [35] oraz [3-5] i [1, 2]."),
            "Wykazano  oraz  i ."
        );
        assert_eq!(remove_citation_markers("[a] [ 1 ]"), "[a] [ 1 ]");
    }

    #[test]
    fn collapse_whitespace_trims() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
    }
}
