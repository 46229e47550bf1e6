//! Reader for the textual list literals the scraper writes into CSV cells,
//! e.g. `['B.Tech Computer Science', '2010 - 2014']`.

/// Decode the `digits` hex digits of a `\xNN`, `\uNNNN` or `\UNNNNNNNN` escape.
fn hex_escape(chars: &mut impl Iterator<Item = char>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}

/// Parse a bracketed list of quoted strings. Returns `None` for anything that
/// is not a well-formed list of string literals.
pub fn parse_list_literal(text: &str) -> Option<Vec<String>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut chars = inner.chars().peekable();
    let mut items = Vec::new();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(quote) = chars.next() else {
            return Some(items);
        };
        if quote != '\'' && quote != '"' {
            return None;
        }

        let mut item = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => item.push('\n'),
                    't' => item.push('\t'),
                    'r' => item.push('\r'),
                    'x' => item.push(hex_escape(&mut chars, 2)?),
                    'u' => item.push(hex_escape(&mut chars, 4)?),
                    'U' => item.push(hex_escape(&mut chars, 8)?),
                    c @ ('\\' | '\'' | '"') => item.push(c),
                    other => {
                        item.push('\\');
                        item.push(other);
                    }
                },
                c if c == quote => break,
                c => item.push(c),
            }
        }
        items.push(item);

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => return Some(items),
            Some(',') => continue,
            Some(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_quotes_and_escapes() {
        assert_eq!(
            parse_list_literal(r#"['B.Tech', "Master's", 'it\'s', 'c\\c++']"#),
            Some(vec![
                "B.Tech".to_string(),
                "Master's".to_string(),
                "it's".to_string(),
                "c\\c++".to_string(),
            ])
        );
    }

    #[test]
    fn decodes_hex_and_unicode_escapes() {
        assert_eq!(
            parse_list_literal(r"['Jan 2020 - Present\xa0· 2 yrs', 'caf\u00e9', '\U0001F600', 'a\rb']"),
            Some(vec![
                "Jan 2020 - Present\u{a0}· 2 yrs".to_string(),
                "café".to_string(),
                "\u{1F600}".to_string(),
                "a\rb".to_string(),
            ])
        );
        assert_eq!(parse_list_literal(r"['\xZZ']"), None);
        assert_eq!(parse_list_literal(r"['\u12']"), None);
        assert_eq!(parse_list_literal(r"['\ud800']"), None);
        assert_eq!(parse_list_literal(r"['\U00110000']"), None);
    }

    #[test]
    fn empty_and_trailing_comma_lists() {
        assert_eq!(parse_list_literal("[]"), Some(vec![]));
        assert_eq!(parse_list_literal("  [ ] "), Some(vec![]));
        assert_eq!(parse_list_literal("['a',]"), Some(vec!["a".to_string()]));
    }

    #[test]
    fn rejects_malformed_text() {
        assert_eq!(parse_list_literal(""), None);
        assert_eq!(parse_list_literal("B.Tech"), None);
        assert_eq!(parse_list_literal("['unterminated]"), None);
        assert_eq!(parse_list_literal("[1, 2]"), None);
        assert_eq!(parse_list_literal("['a' 'b']"), None);
    }
}
