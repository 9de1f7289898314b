pub mod fields;
pub mod links;
pub mod template;

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::StoredPage;
pub use fields::{extract_fields, InfoboxFields};
pub use links::link_targets;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

pub fn remove_comments(wikitext: &str) -> Cow<'_, str> {
    COMMENT_RE.replace_all(wikitext, "")
}

/// Which infoboxes count: the template name prefix and the combatants that
/// make a conflict interesting. No participants means every infobox counts.
#[derive(Debug, Clone)]
pub struct InfoboxFilter {
    pub name: String,
    pub participants: Vec<String>,
}

impl InfoboxFilter {
    pub fn matches(&self, fields: &InfoboxFields) -> bool {
        if self.participants.is_empty() {
            return true;
        }
        fields
            .iter()
            .filter(|(k, _)| k.starts_with("combatant") && !k.contains("combatants_header"))
            .any(|(_, v)| self.participants.iter().any(|p| v.contains(p.as_str())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleInfobox {
    pub id: String,
    pub title: String,
    pub fields: InfoboxFields,
}

/// Every infobox of a page, comments removed first.
pub fn infoboxes(wikitext: &str, name: &str) -> Vec<InfoboxFields> {
    let text = remove_comments(wikitext);
    template::templates(&text, name)
        .map(|span| extract_fields(span.text))
        .collect()
}

/// Comments → infobox templates → key/value fields → participant filter.
/// When several infoboxes match, the last one is kept.
pub fn process_page(page: &StoredPage, filter: &InfoboxFilter) -> Option<ArticleInfobox> {
    let fields = infoboxes(&page.wikitext, &filter.name)
        .into_iter()
        .filter(|f| filter.matches(f))
        .last()?;
    debug!("Found combatant in {}, {}", page.id, page.title);
    Some(ArticleInfobox {
        id: page.id.clone(),
        title: page.title.clone(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uk_filter() -> InfoboxFilter {
        InfoboxFilter {
            name: "Infobox".into(),
            participants: vec!["United Kingdom".into(), "British Army".into()],
        }
    }

    fn page(wikitext: &str) -> StoredPage {
        StoredPage {
            id: "Q48314".into(),
            title: "Battle of Waterloo".into(),
            wikitext: wikitext.into(),
        }
    }

    #[test]
    fn comments_are_removed_across_lines() {
        assert_eq!(remove_comments("a<!-- x\ny -->b<!--z-->c"), "abc");
        assert!(matches!(remove_comments("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn fixture_page_is_interesting() {
        let wikitext = std::fs::read_to_string("tests/fixtures/waterloo.wiki").unwrap();
        let found = process_page(&page(&wikitext), &uk_filter()).unwrap();
        assert_eq!(found.id, "Q48314");
        assert_eq!(found.fields["conflict"], "Battle of Waterloo");
        assert_eq!(found.fields["place"], "[[Waterloo, Belgium|Waterloo]], [[United Kingdom of the Netherlands]]");
        assert_eq!(
            link_targets(&found.fields["partof"]),
            vec!["War of the Seventh Coalition", "Napoleonic Wars"]
        );
    }

    #[test]
    fn commented_infobox_is_ignored() {
        let wikitext = std::fs::read_to_string("tests/fixtures/waterloo.wiki").unwrap();
        let boxes = infoboxes(&wikitext, "Infobox");
        assert_eq!(boxes.len(), 1);
        assert_ne!(boxes[0]["conflict"], "Commented out");
    }

    #[test]
    fn combatants_header_does_not_count() {
        let text = "{{Infobox military conflict|combatants_header=British Army|combatant1=France}}";
        assert!(process_page(&page(text), &uk_filter()).is_none());
    }

    #[test]
    fn any_combatant_key_counts() {
        let text = "{{Infobox military conflict|combatant2={{flag|Kingdom of Great Britain}}}}";
        let filter = InfoboxFilter {
            name: "Infobox".into(),
            participants: vec!["Kingdom of Great Britain".into()],
        };
        assert!(process_page(&page(text), &filter).is_some());
    }

    #[test]
    fn empty_participants_keep_any_infobox() {
        let filter = InfoboxFilter {
            name: "Infobox".into(),
            participants: vec![],
        };
        assert!(process_page(&page("{{Infobox war|conflict=X}}"), &filter).is_some());
        assert!(process_page(&page("no infobox"), &filter).is_none());
    }

    #[test]
    fn last_matching_infobox_wins() {
        let text = "{{Infobox a|conflict=First|combatant1=United Kingdom}}\n{{Infobox b|conflict=Second|combatant1=British Army}}";
        let found = process_page(&page(text), &uk_filter()).unwrap();
        assert_eq!(found.fields["conflict"], "Second");
    }
}
