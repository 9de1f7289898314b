/// An opening/closing marker pair for balanced scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub open: &'static str,
    pub close: &'static str,
}

pub const TEMPLATE: Delimiters = Delimiters {
    open: "{{",
    close: "}}",
};

pub const LINK: Delimiters = Delimiters {
    open: "[[",
    close: "]]",
};

/// A balanced region of a document, markers included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
}

/// Given `start` pointing at an opening marker, return the region up to and
/// including its matching closer, or `None` if the text runs out first.
///
/// Depth is driven by whichever of the next opener and next closer occurs
/// first in the text.
pub fn balanced_at(text: &str, start: usize, delims: Delimiters) -> Option<Span<'_>> {
    if !text.get(start..)?.starts_with(delims.open) {
        return None;
    }

    let mut depth = 0usize;
    let mut cursor = start + delims.open.len();
    loop {
        let rest = &text[cursor..];
        let next_close = rest.find(delims.close).map(|i| cursor + i)?;
        let next_open = rest.find(delims.open).map(|i| cursor + i);

        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                cursor = open + delims.open.len();
            }
            _ => {
                let end = next_close + delims.close.len();
                if depth == 0 {
                    return Some(Span {
                        start,
                        end,
                        text: &text[start..end],
                    });
                }
                depth -= 1;
                cursor = end;
            }
        }
    }
}

/// Find the first `{{<name>` at or after `from` (ASCII case-insensitive)
/// and return the whole balanced template.
pub fn find_template<'a>(text: &'a str, name: &str, from: usize) -> Option<Span<'a>> {
    let marker = format!("{}{}", TEMPLATE.open, name);
    let start = find_ignore_ascii_case(text, &marker, from)?;
    balanced_at(text, start, TEMPLATE)
}

/// Every balanced `{{<name>…}}` in document order. Scanning resumes after
/// each match and stops at the first opener that never closes.
pub fn templates<'a>(text: &'a str, name: &'a str) -> impl Iterator<Item = Span<'a>> + 'a {
    let mut from = 0;
    std::iter::from_fn(move || {
        let span = find_template(text, name, from)?;
        from = span.end;
        Some(span)
    })
}

fn find_ignore_ascii_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes().get(from..)?;
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_template() {
        let text = "intro {{Infobox military conflict | conflict = X }} after";
        let span = find_template(text, "Infobox", 0).unwrap();
        assert_eq!(span.text, "{{Infobox military conflict | conflict = X }}");
        assert_eq!(&text[span.start..span.end], span.text);
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let text = "{{cite web|url=x}} {{infobox Military Conflict|a=1}}";
        let span = find_template(text, "Infobox military conflict", 0).unwrap();
        assert_eq!(span.text, "{{infobox Military Conflict|a=1}}");
    }

    #[test]
    fn nested_templates_are_balanced() {
        let text = "{{Infobox|date={{Start date|1815|6|18}}|place={{flag|{{x}}}}}} tail }}";
        let span = find_template(text, "Infobox", 0).unwrap();
        assert_eq!(span.text, "{{Infobox|date={{Start date|1815|6|18}}|place={{flag|{{x}}}}}}");
    }

    #[test]
    fn nesting_depth_n_returns_whole_string() {
        for depth in 1..8 {
            let text = format!("{}payload{}", "{{".repeat(depth), "}}".repeat(depth));
            let span = balanced_at(&text, 0, TEMPLATE).unwrap();
            assert_eq!(span.text, text);
            assert_eq!(span.text.matches("{{").count(), depth);
            assert_eq!(span.text.matches("}}").count(), depth);
        }
    }

    #[test]
    fn minimal_superstring_ignores_trailing_text() {
        let text = "[[a [[b]] c]] [[d]]";
        let span = balanced_at(text, 0, LINK).unwrap();
        assert_eq!(span.text, "[[a [[b]] c]]");
        let second = balanced_at(text, span.end + 1, LINK).unwrap();
        assert_eq!(second.text, "[[d]]");
    }

    #[test]
    fn start_must_point_at_an_opener() {
        assert!(balanced_at("x{{a}}", 0, TEMPLATE).is_none());
        assert!(balanced_at("x{{a}}", 99, TEMPLATE).is_none());
    }

    #[test]
    fn truncated_template_is_not_found() {
        assert!(find_template("{{Infobox|a={{b}}", "Infobox", 0).is_none());
        assert!(find_template("no templates here", "Infobox", 0).is_none());
    }

    #[test]
    fn from_offset_skips_earlier_matches() {
        let text = "{{Infobox|a=1}}{{Infobox|a=2}}";
        let span = find_template(text, "Infobox", 1).unwrap();
        assert_eq!(span.text, "{{Infobox|a=2}}");
    }

    #[test]
    fn iterates_all_templates() {
        let text = "{{Infobox|a=1}} text {{Other}} {{Infobox|b={{x}}}}";
        let found: Vec<_> = templates(text, "Infobox").map(|s| s.text).collect();
        assert_eq!(found, vec!["{{Infobox|a=1}}", "{{Infobox|b={{x}}}}"]);
    }

    #[test]
    fn multibyte_text_around_markers() {
        let text = "– {{Infobox|lieu=Mont-Saint-Jean, Belgique – 🇧🇪}} –";
        let span = find_template(text, "infobox", 0).unwrap();
        assert!(span.text.ends_with("🇧🇪}}"));
    }

    // Deterministic generator in place of a fuzzer: strings with openers and
    // no closers must come back empty without hanging.
    #[test]
    fn unmatched_openers_never_match() {
        let alphabet = ['{', '{', 'a', '|', '[', ']', ' ', 'é'];
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let len = (seed >> 58) as usize + 2;
            let mut s = String::from("{{");
            for i in 0..len {
                let pick = ((seed >> (i % 56)) & 7) as usize;
                s.push(alphabet[pick]);
            }
            assert!(balanced_at(&s, 0, TEMPLATE).is_none(), "{s:?}");
            assert!(find_template(&s, "", 0).is_none());
            assert_eq!(templates(&s, "").count(), 0);
        }
    }
}
