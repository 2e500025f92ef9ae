//! Message template rendering.
//!
//! Templates are rendered when a job is claimed, not when the campaign is
//! built, so edits to a lead's handle or name show up in messages that have
//! not gone out yet.
//!
//! Supported placeholders: `{{username}}`, `{{handle}}`, `{{name}}`,
//! `{{first_name}}`. Whitespace inside the braces is ignored. Unknown
//! placeholders are left untouched.

use outreach_core::types::Lead;

/// Render `template` for `lead`.
pub fn render(template: &str, lead: &Lead) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match resolve(key, lead) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, lead: &Lead) -> Option<String> {
    let handle = lead.handle.trim_start_matches('@');
    match key {
        "username" | "handle" => Some(handle.to_string()),
        "name" => Some(
            lead.display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| handle.to_string()),
        ),
        "first_name" => Some(
            lead.display_name
                .as_deref()
                .and_then(|n| n.split_whitespace().next())
                .unwrap_or(handle)
                .to_string(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Lead {
        Lead::new("l1", "w1", "@jane.doe").with_display_name("Jane Doe")
    }

    #[test]
    fn test_username() {
        assert_eq!(render("Hey {{username}}!", &lead()), "Hey jane.doe!");
    }

    #[test]
    fn test_names_and_spacing() {
        assert_eq!(
            render("Hi {{ first_name }}, aka {{name}}", &lead()),
            "Hi Jane, aka Jane Doe"
        );
    }

    #[test]
    fn test_name_falls_back_to_handle() {
        let lead = Lead::new("l2", "w1", "bob");
        assert_eq!(render("{{name}}/{{first_name}}", &lead), "bob/bob");
    }

    #[test]
    fn test_unknown_and_unterminated_left_alone() {
        assert_eq!(render("{{company}} {{username}}", &lead()), "{{company}} jane.doe");
        assert_eq!(render("oops {{username", &lead()), "oops {{username");
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(render("no placeholders", &lead()), "no placeholders");
    }
}
