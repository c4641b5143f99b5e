//! Source normalization ahead of fingerprinting.
//!
//! The structural pass scans the source into a canonical token stream that is
//! stable under identifier renames, literal changes, whitespace reshuffles,
//! and comment edits. When the scan fails (unterminated literal or comment),
//! a tolerant textual pass takes over so every input still normalizes.

use once_cell::sync::Lazy;
use std::collections::HashSet;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
        "case", "catch", "char", "char8_t", "char16_t", "char32_t", "class", "compl", "concept",
        "const", "const_cast", "consteval", "constexpr", "constinit", "continue", "co_await",
        "co_return", "co_yield", "decltype", "default", "delete", "do", "double", "dynamic_cast",
        "else", "enum", "explicit", "export", "extern", "false", "float", "for", "friend", "goto",
        "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not", "not_eq",
        "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
        "reinterpret_cast", "requires", "return", "short", "signed", "sizeof", "static",
        "static_assert", "static_cast", "struct", "switch", "template", "this", "thread_local",
        "throw", "true", "try", "typedef", "typeid", "typename", "union", "unsigned", "using",
        "virtual", "void", "volatile", "wchar_t", "while", "xor", "xor_eq",
    ]
    .into_iter()
    .collect()
});

// Longest first so the scan never splits a three-char operator.
const MULTI_CHAR_OPERATORS: [&str; 26] = [
    "<=>", "<<=", ">>=", "->*", "...", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=",
    "*=", "/=", "%=", "&=", "|=", "^=", "->", "++", "--", "::", ".*",
];

const SINGLE_CHAR_OPERATORS: &str = "+-*/%<>=&|^!~?:.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    UnterminatedString,
    UnterminatedChar,
    UnterminatedComment,
}

/// Canonical text used for k-gram hashing. Structural when the source scans
/// cleanly, textual otherwise.
pub fn normalize(source: &str) -> String {
    match structural_normalize(source) {
        Ok(normalized) => normalized,
        Err(_) => textual_normalize(source),
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Keywords survive, other identifiers become `ID`, string and character
/// literals become `STR`, numeric literals become `NUM`, operators collapse
/// to their class `OP`, punctuation stays itself.
pub fn structural_normalize(source: &str) -> Result<String, ScanError> {
    let tokens = scan(source)?;
    Ok(tokens.join(" "))
}

fn scan(source: &str) -> Result<Vec<String>, ScanError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i = skip_block_comment(&chars, i + 2)?;
            continue;
        }
        if c == '"' {
            i = skip_quoted(&chars, i + 1, '"').ok_or(ScanError::UnterminatedString)?;
            tokens.push("STR".to_string());
            continue;
        }
        if c == '\'' {
            i = skip_quoted(&chars, i + 1, '\'').ok_or(ScanError::UnterminatedChar)?;
            tokens.push("STR".to_string());
            continue;
        }
        if c.is_ascii_digit() {
            i = skip_number(&chars, i);
            tokens.push("NUM".to_string());
            continue;
        }
        if is_identifier_start(c) {
            let start = i;
            while i < chars.len() && is_identifier_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if KEYWORDS.contains(word.as_str()) {
                tokens.push(word);
            } else {
                tokens.push("ID".to_string());
            }
            continue;
        }
        if let Some(len) = match_operator(&chars, i) {
            tokens.push("OP".to_string());
            i += len;
            continue;
        }

        // Braces, brackets, separators, preprocessor hash: keep verbatim.
        tokens.push(c.to_string());
        i += 1;
    }

    Ok(tokens)
}

fn skip_block_comment(chars: &[char], mut i: usize) -> Result<usize, ScanError> {
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return Ok(i + 2);
        }
        i += 1;
    }
    Err(ScanError::UnterminatedComment)
}

/// Returns the index just past the closing quote, honoring backslash escapes.
fn skip_quoted(chars: &[char], mut i: usize, quote: char) -> Option<usize> {
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return Some(i + 1),
            '\n' => return None,
            _ => i += 1,
        }
    }
    None
}

fn skip_number(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        let c = chars[i];
        if c.is_alphanumeric() || c == '.' || c == '\'' {
            i += 1;
        } else if (c == '+' || c == '-')
            && matches!(chars.get(i.wrapping_sub(1)), Some(&('e' | 'E' | 'p' | 'P')))
        {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn match_operator(chars: &[char], i: usize) -> Option<usize> {
    for op in MULTI_CHAR_OPERATORS {
        let len = op.chars().count();
        if chars.len() - i >= len && chars[i..i + len].iter().collect::<String>() == op {
            return Some(len);
        }
    }
    if SINGLE_CHAR_OPERATORS.contains(chars[i]) {
        return Some(1);
    }
    None
}

/// Tolerant fallback: strips comments, collapses whitespace, substitutes
/// `"STR"` / `NUM` / `VAR`, lowercases.
pub fn textual_normalize(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i = skip_block_comment(&chars, i + 2).unwrap_or(chars.len());
            continue;
        }
        if c == '"' || c == '\'' {
            i = skip_quoted(&chars, i + 1, c).unwrap_or(chars.len());
            tokens.push("\"STR\"".to_string());
            continue;
        }
        if c.is_ascii_digit() {
            i = skip_number(&chars, i);
            tokens.push("NUM".to_string());
            continue;
        }
        if is_identifier_start(c) {
            let start = i;
            while i < chars.len() && is_identifier_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if KEYWORDS.contains(word.as_str()) {
                tokens.push(word);
            } else {
                tokens.push("VAR".to_string());
            }
            continue;
        }

        tokens.push(c.to_string());
        i += 1;
    }

    tokens.join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renamed_identifiers_normalize_identically() {
        let a = "int sum = first + second;";
        let b = "int total=alpha+beta;";
        assert_eq!(normalize(a), normalize(b));
    }

    #[test]
    fn comments_and_whitespace_are_invisible() {
        let a = "for (int i = 0; i < n; i++) { /* accumulate */ s += v[i]; }";
        let b = "for(int j=0;j<m;j++){\n    // add it up\n    t+=w[j];\n}";
        assert_eq!(normalize(a), normalize(b));
    }

    #[test]
    fn literals_collapse_to_placeholders() {
        let normalized = structural_normalize(r#"printf("%d\n", 42);"#).unwrap();
        assert_eq!(normalized, "ID ( STR , NUM ) ;");
    }

    #[test]
    fn keywords_survive_normalization() {
        let normalized = structural_normalize("while (true) return 0;").unwrap();
        assert!(normalized.contains("while"));
        assert!(normalized.contains("true"));
        assert!(normalized.contains("return"));
        assert!(!normalized.contains("ID ID"));
    }

    #[test]
    fn operators_collapse_to_a_class() {
        let plus = structural_normalize("a + b").unwrap();
        let shift = structural_normalize("a << b").unwrap();
        assert_eq!(plus, shift);
    }

    #[test]
    fn unterminated_string_falls_back_to_textual() {
        let source = "int x = 1; \"broken";
        assert_eq!(
            structural_normalize(source),
            Err(ScanError::UnterminatedString)
        );
        let fallback = normalize(source);
        assert!(fallback.contains("int"));
        assert!(fallback.contains("var"));
    }

    #[test]
    fn textual_fallback_lowercases_and_substitutes() {
        let out = textual_normalize("int Foo = 12; // trailing");
        assert_eq!(out, "int var = num ;");
    }

    #[test]
    fn empty_source_normalizes_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t"), "");
    }
}
