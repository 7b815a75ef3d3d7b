//! `{key}` placeholder substitution over TOML values and final
//! serialization. `{{` and `}}` produce literal braces.

use std::collections::BTreeMap;

use crate::error::RenderError;

pub type Substitutions = BTreeMap<String, String>;

pub fn substitute(text: &str, context: &Substitutions) -> Result<String, RenderError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body
                .find('}')
                .ok_or_else(|| RenderError::Unterminated(text.to_string()))?;
            let key = body[..end].trim();
            let value = context
                .get(key)
                .ok_or_else(|| RenderError::MissingKey(key.to_string()))?;
            out.push_str(value);
            rest = &body[end + 1..];
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Substitute inside every string of `value`, recursively.
pub fn render_value(value: &toml::Value, context: &Substitutions) -> Result<toml::Value, RenderError> {
    Ok(match value {
        toml::Value::String(s) => toml::Value::String(substitute(s, context)?),
        toml::Value::Array(items) => toml::Value::Array(
            items
                .iter()
                .map(|v| render_value(v, context))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        toml::Value::Table(table) => toml::Value::Table(render_table(table, context)?),
        other => other.clone(),
    })
}

pub fn render_table(table: &toml::Table, context: &Substitutions) -> Result<toml::Table, RenderError> {
    table
        .iter()
        .map(|(k, v)| Ok((k.clone(), render_value(v, context)?)))
        .collect()
}

pub fn to_toml(table: &toml::Table) -> Result<String, RenderError> {
    toml::to_string(table).map_err(|e| RenderError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Substitutions {
        Substitutions::from([
            ("hostname".to_string(), "host1".to_string()),
            ("shell".to_string(), "tok".to_string()),
        ])
    }

    #[test]
    fn replaces_known_keys() {
        assert_eq!(
            substitute("/tmp/{hostname}/{ shell }", &context()).unwrap(),
            "/tmp/host1/tok"
        );
    }

    #[test]
    fn doubled_braces_are_literal() {
        assert_eq!(substitute("{{x}} }}", &context()).unwrap(), "{x} }");
    }

    #[test]
    fn unknown_key_is_an_error() {
        assert!(matches!(
            substitute("{batch}", &context()),
            Err(RenderError::MissingKey(k)) if k == "batch"
        ));
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        assert!(matches!(
            substitute("abc {hostname", &context()),
            Err(RenderError::Unterminated(_))
        ));
    }

    #[test]
    fn renders_nested_values() {
        let table: toml::Table = toml::from_str(
            r#"
            dirs = ["/a/{hostname}", "/b"]
            [cache]
            path = "{hostname}-cache"
            size = 3
            "#,
        )
        .unwrap();
        let rendered = render_table(&table, &context()).unwrap();
        assert_eq!(rendered["dirs"][0].as_str(), Some("/a/host1"));
        assert_eq!(rendered["cache"]["path"].as_str(), Some("host1-cache"));
        assert_eq!(rendered["cache"]["size"].as_integer(), Some(3));
    }
}
