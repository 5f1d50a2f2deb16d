use regex::Regex;

/// Compiled matcher for one prepared-statement template.
///
/// The template is cut at its placeholders, each literal piece has its
/// whitespace runs relaxed to `\s+` and its text escaped, and the pieces are
/// joined with greedy captures. The pattern is anchored, so it only matches
/// whole statements.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    regex: Regex,
    placeholders: usize,
}

impl TemplateMatcher {
    pub fn compile(template: &str) -> Result<Self, regex::Error> {
        let pieces = split_placeholders(template.trim());
        let pattern = pieces
            .iter()
            .map(|piece| literal_pattern(piece))
            .collect::<Vec<_>>()
            .join("(.+)");
        let regex = Regex::new(&format!(r"(?s)^{}$", pattern))?;

        Ok(Self {
            regex,
            placeholders: pieces.len() - 1,
        })
    }

    /// Number of placeholders outside quoted literals.
    pub fn placeholders(&self) -> usize {
        self.placeholders
    }

    /// Raw captured text for each placeholder, if `sql` is an instance of
    /// this template.
    pub fn captures<'s>(&self, sql: &'s str) -> Option<Vec<&'s str>> {
        let caps = self.regex.captures(sql.trim())?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map_or("", |m| m.as_str()))
                .collect(),
        )
    }
}

/// Splits `sql` at every `?` that is not inside a quoted literal.
///
/// Single quotes, double quotes and backticks delimit literals; a backslash
/// inside a literal escapes the next character. The result always has one
/// more piece than there are placeholders.
pub fn split_placeholders(sql: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => {
                    pieces.push(&sql[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }

    pieces.push(&sql[start..]);
    pieces
}

/// Escaped pattern for the text between two placeholders.
fn literal_pattern(piece: &str) -> String {
    let words: Vec<String> = piece.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return if piece.is_empty() {
            String::new()
        } else {
            r"\s+".to_string()
        };
    }

    let mut pattern = String::new();
    if piece.starts_with(char::is_whitespace) {
        pattern.push_str(r"\s+");
    }
    pattern.push_str(&words.join(r"\s+"));
    if piece.ends_with(char::is_whitespace) {
        pattern.push_str(r"\s+");
    }
    pattern
}

/// Converts raw captures into bound values.
///
/// Surrounding whitespace is trimmed (greedy captures can swallow the
/// separator before the next literal), then one leading and one trailing
/// quote (`'` or `"`) are stripped. An unquoted `NULL` binds SQL NULL.
pub fn extract_arguments(captures: &[&str]) -> Vec<Option<String>> {
    captures
        .iter()
        .map(|raw| {
            let raw = raw.trim();
            if raw.eq_ignore_ascii_case("null") {
                return None;
            }
            let value = raw.strip_prefix(['\'', '"']).unwrap_or(raw);
            let value = value.strip_suffix(['\'', '"']).unwrap_or(value);
            Some(value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(template: &str, sql: &str) -> Option<Vec<Option<String>>> {
        let matcher = TemplateMatcher::compile(template).unwrap();
        matcher.captures(sql).map(|caps| extract_arguments(&caps))
    }

    #[test]
    fn test_update_template_recovers_arguments() {
        assert_eq!(
            args(
                "UPDATE t SET x = ? WHERE id = ?",
                "UPDATE t SET x = 'foo' WHERE id = 42"
            ),
            Some(vec![Some("foo".into()), Some("42".into())])
        );
    }

    #[test]
    fn test_whitespace_is_relaxed() {
        assert_eq!(
            args(
                "UPDATE  t\n  SET x = ?\tWHERE id = ?",
                "UPDATE t SET   x =\n'foo'  WHERE id =   42  "
            ),
            Some(vec![Some("foo".into()), Some("42".into())])
        );
    }

    #[test]
    fn test_placeholders_without_surrounding_spaces() {
        assert_eq!(
            args(
                "INSERT INTO t (a, b) VALUES (?, ?)",
                "INSERT INTO t (a, b) VALUES (7, \"bar\")"
            ),
            Some(vec![Some("7".into()), Some("bar".into())])
        );
        assert_eq!(
            args("SELECT * FROM t WHERE id=?", "SELECT * FROM t WHERE id=9"),
            Some(vec![Some("9".into())])
        );
    }

    #[test]
    fn test_quoted_value_with_spaces() {
        assert_eq!(
            args(
                "UPDATE t SET note = ? WHERE id = ?",
                "UPDATE t SET note = 'hello big world' WHERE id = 1"
            ),
            Some(vec![Some("hello big world".into()), Some("1".into())])
        );
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert_eq!(
            args(
                "SELECT a.b + 1 FROM t WHERE (x) = ? AND y LIKE '%[z]*'",
                "SELECT a.b + 1 FROM t WHERE (x) = 5 AND y LIKE '%[z]*'"
            ),
            Some(vec![Some("5".into())])
        );
        assert_eq!(
            args("SELECT a.b FROM t WHERE x = ?", "SELECT aXb FROM t WHERE x = 5"),
            None
        );
    }

    #[test]
    fn test_different_statement_does_not_match() {
        assert_eq!(
            args("DELETE FROM t WHERE id = ?", "UPDATE t SET x = 1 WHERE id = 2"),
            None
        );
        // anchored: a template cannot match part of a longer statement
        assert_eq!(
            args(
                "SELECT id FROM t WHERE id = ?",
                "INSERT INTO u SELECT id FROM t WHERE id = 3"
            ),
            None
        );
    }

    #[test]
    fn test_null_binds_sql_null() {
        assert_eq!(
            args("UPDATE t SET x = ? WHERE id = ?", "UPDATE t SET x = NULL WHERE id = 1"),
            Some(vec![None, Some("1".into())])
        );
        // quoted 'NULL' is a string
        assert_eq!(
            args("UPDATE t SET x = ? WHERE id = ?", "UPDATE t SET x = 'NULL' WHERE id = 1"),
            Some(vec![Some("NULL".into()), Some("1".into())])
        );
    }

    #[test]
    fn test_extract_strips_one_quote_each_side() {
        assert_eq!(
            extract_arguments(&["''quoted''", "\"x'", "plain", "'"]),
            vec![
                Some("'quoted'".into()),
                Some("x".into()),
                Some("plain".into()),
                Some(String::new()),
            ]
        );
    }

    #[test]
    fn test_placeholder_count() {
        let matcher = TemplateMatcher::compile("INSERT INTO t VALUES (?,?,?)").unwrap();
        assert_eq!(matcher.placeholders(), 3);
        let matcher = TemplateMatcher::compile("UPDATE t SET note = 'why?' WHERE id = ?").unwrap();
        assert_eq!(matcher.placeholders(), 1);
    }

    #[test]
    fn test_quoted_question_mark_is_literal() {
        assert_eq!(
            args(
                "UPDATE t SET note = 'why?', tag = \"a?b\" WHERE id = ?",
                "UPDATE t SET note = 'why?', tag = \"a?b\" WHERE id = 5"
            ),
            Some(vec![Some("5".into())])
        );
        // the quoted text must match literally
        assert_eq!(
            args(
                "UPDATE t SET note = 'why?' WHERE id = ?",
                "UPDATE t SET note = 'whyX' WHERE id = 5"
            ),
            None
        );
    }

    #[test]
    fn test_split_placeholders() {
        assert_eq!(split_placeholders("a = ? AND b = ?"), vec!["a = ", " AND b = ", ""]);
        assert_eq!(split_placeholders("x = '?' AND y = ?"), vec!["x = '?' AND y = ", ""]);
        assert_eq!(split_placeholders(r"x = 'it\'s?' AND y = ?"), vec![r"x = 'it\'s?' AND y = ", ""]);
        assert_eq!(split_placeholders("SELECT 1"), vec!["SELECT 1"]);
    }
}
