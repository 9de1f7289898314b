use tracing::debug;

use super::template::LINK;

/// A `[[target|alias]]` link. Resolution always goes through `target`; the
/// alias is only what the article displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<'a> {
    pub target: &'a str,
    pub alias: Option<&'a str>,
}

impl<'a> Link<'a> {
    fn parse(inner: &'a str) -> Self {
        match inner.split_once('|') {
            Some((target, alias)) => Link {
                target,
                alias: Some(alias),
            },
            None => Link {
                target: inner,
                alias: None,
            },
        }
    }
}

/// All links in `text`, left to right. Links do not nest: each `[[` pairs
/// with the next `]]`.
pub fn find_links(text: &str) -> Vec<Link<'_>> {
    let mut links = Vec::new();
    let mut from = 0;

    while let Some(i) = text[from..].find(LINK.open) {
        let start = from + i + LINK.open.len();
        let Some(j) = text[start..].find(LINK.close) else {
            debug!("No end for link");
            break;
        };
        let end = start + j;
        links.push(Link::parse(&text[start..end]));
        from = end + LINK.close.len();
    }

    links
}

/// Trimmed link targets, the form used to look pages up by title.
pub fn link_targets(text: &str) -> Vec<String> {
    find_links(text)
        .into_iter()
        .map(|l| l.target.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
