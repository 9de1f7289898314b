use indexmap::IndexMap;

use super::template::TEMPLATE;

/// Field name to raw field text for one template, in the order the fields
/// first appear. A repeated key overwrites the earlier value in place.
pub type InfoboxFields = IndexMap<String, String>;

/// Split a matched template into its `| key = value` fields.
///
/// A key runs from a `|` to the next `=`. Its value runs to the next `|`
/// that sits outside any nested `{{…}}` or `[[…]]`, or to the end of the
/// template.
pub fn extract_fields(template: &str) -> InfoboxFields {
    let body = template
        .strip_prefix(TEMPLATE.open)
        .and_then(|t| t.strip_suffix(TEMPLATE.close))
        .unwrap_or(template);
    let bytes = body.as_bytes();
    let mut fields = InfoboxFields::default();
    let mut start = 0;

    loop {
        let Some(pipe) = body[start..].find('|').map(|i| start + i) else {
            break;
        };
        let Some(equals) = body[pipe..].find('=').map(|i| pipe + i) else {
            break;
        };
        let key = body[pipe + 1..equals].trim().to_string();

        let mut end = equals + 1;
        let mut template_depth = 0i32;
        let mut link_depth = 0i32;
        while end < bytes.len() {
            let c = bytes[end];
            if c == b'|' && template_depth == 0 && link_depth == 0 {
                break;
            }
            if end + 1 < bytes.len() {
                match (c, bytes[end + 1]) {
                    (b'{', b'{') => {
                        template_depth += 1;
                        end += 1;
                    }
                    (b'}', b'}') => {
                        template_depth -= 1;
                        end += 1;
                    }
                    (b'[', b'[') => {
                        link_depth += 1;
                        end += 1;
                    }
                    (b']', b']') => {
                        link_depth -= 1;
                        end += 1;
                    }
                    _ => {}
                }
            }
            end += 1;
        }

        fields.insert(key, body[equals + 1..end].trim().to_string());
        start = end;
    }

    fields
}
