use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::{SiltError, SiltResult};

/// The fixed keyword vocabulary, matched case-insensitively.
static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "SELECT", "FROM", "WHERE", "INSERT", "INTO", "VALUES", "CREATE", "TABLE", "DROP",
        "ALTER", "ADD", "COLUMN", "INDEX", "ON", "UPDATE", "SET", "DELETE", "ORDER", "BY",
        "LIMIT", "GROUP", "INNER", "JOIN", "AS", "AND", "OR", "EXPLAIN", "INT", "TEXT",
        "FLOAT", "COUNT", "SUM", "AVG", "MIN", "MAX",
    ])
});

static STRING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^'[^']*'").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.\d+").unwrap());
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+").unwrap());
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?").unwrap());
static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(>=|<=|!=|[=><(),;*])").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    Symbol,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }
}

/// Regex-driven tokenizer. Each token remembers its byte offset so parse
/// errors can point at the offending position.
pub fn tokenize(sql: &str) -> SiltResult<Vec<Token>> {
    let mut tokens = vec![];
    let mut pos = 0;

    while pos < sql.len() {
        let rest = &sql[pos..];
        let skipped = rest.len() - rest.trim_start().len();
        if skipped > 0 {
            pos += skipped;
            continue;
        }

        let (kind, len) = if let Some(m) = STRING_RE.find(rest) {
            (TokenKind::StringLiteral, m.end())
        } else if let Some(m) = FLOAT_RE.find(rest) {
            (TokenKind::FloatLiteral, m.end())
        } else if let Some(m) = INT_RE.find(rest) {
            (TokenKind::IntLiteral, m.end())
        } else if let Some(m) = IDENT_RE.find(rest) {
            let text = &rest[..m.end()];
            if KEYWORDS.contains(text.to_ascii_uppercase().as_str()) {
                (TokenKind::Keyword, m.end())
            } else {
                (TokenKind::Ident, m.end())
            }
        } else if let Some(m) = OPERATOR_RE.find(rest) {
            (TokenKind::Symbol, m.end())
        } else {
            let ch = rest.chars().next().unwrap_or('?');
            return Err(SiltError::Parse(format!(
                "unexpected character '{ch}' at offset {pos}"
            )));
        };

        tokens.push(Token {
            kind,
            text: rest[..len].to_string(),
            offset: pos,
        });
        pos += len;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn classifies_token_kinds() {
        let tokens = tokenize("SELECT name FROM users WHERE age >= 2.5").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["SELECT", "name", "FROM", "users", "WHERE", "age", ">=", "2.5"]
        );
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[6].kind, TokenKind::Symbol);
        assert_eq!(tokens[7].kind, TokenKind::FloatLiteral);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = tokenize("select From wHeRe").unwrap();
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Keyword));
    }

    #[test]
    fn qualified_identifier_is_one_token() {
        let tokens = tokenize("u.id = o.user_id").unwrap();
        assert_eq!(tokens[0].text, "u.id");
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[2].text, "o.user_id");
    }

    #[test]
    fn string_literal_keeps_quotes() {
        let tokens = tokenize("'Alice Smith'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "'Alice Smith'");
    }

    #[test]
    fn negative_numbers_are_literals() {
        assert_eq!(
            kinds("-5 -2.5"),
            vec![TokenKind::IntLiteral, TokenKind::FloatLiteral]
        );
    }

    #[test]
    fn offsets_point_into_input() {
        let sql = "SELECT  *";
        let tokens = tokenize(sql).unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 8);
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("SELECT @ FROM t").is_err());
    }
}
