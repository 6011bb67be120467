// q_shared.rs -- definitions shared by the server and the progs bridge
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

use bitflags::bitflags;

// ============================================================
// Limits
// ============================================================

/// Maximum number of edict slots, world and clients included.
pub const MAX_EDICTS: usize = 768;

/// Player slots; edicts 1..=MAX_CLIENTS belong to them.
pub const MAX_CLIENTS: usize = 32;

pub const MAX_TOKEN_CHARS: usize = 1024;

// ============================================================
// Vectors
// ============================================================

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

#[inline]
pub fn vector_compare(a: &Vec3, b: &Vec3) -> bool {
    a[0] == b[0] && a[1] == b[1] && a[2] == b[2]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, scale: f32) -> Vec3 {
    [v[0] * scale, v[1] * scale, v[2] * scale]
}

// ============================================================
// Spawnflags shared by every map entity
// ============================================================

bitflags! {
    /// Level-editor spawnflags that keep an entity out of a skill tier or out of deathmatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpawnFlags: i32 {
        const NOT_EASY       = 256;
        const NOT_MEDIUM     = 512;
        const NOT_HARD       = 1024;
        const NOT_DEATHMATCH = 2048;
    }
}

impl SpawnFlags {
    /// Spawnflags are stored as a float in the entity vars.
    pub fn from_float(value: f32) -> Self {
        Self::from_bits_truncate(value as i32)
    }
}

// ============================================================
// Token parser (COM_Parse)
// ============================================================

/// Parse one token out of `data`, skipping whitespace and `//` comments.
/// Quoted strings are returned without their quotes, and `{` and `}` are
/// always tokens of their own, even when glued to a word.
///
/// Returns the token and the unparsed remainder, or `None` once the input
/// holds nothing but whitespace and comments.
pub fn com_parse(data: &str) -> Option<(String, &str)> {
    let mut rest = data;

    // skip whitespace and comments
    loop {
        rest = rest.trim_start_matches(|c: char| c <= ' ');
        if rest.is_empty() {
            return None;
        }
        if let Some(comment) = rest.strip_prefix("//") {
            rest = match comment.find('\n') {
                Some(pos) => &comment[pos..],
                None => "",
            };
            continue;
        }
        break;
    }

    let mut token = String::new();

    // handle quoted strings
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"').unwrap_or(quoted.len());
        push_clamped(&mut token, &quoted[..end]);
        let after = if end < quoted.len() { end + 1 } else { end };
        return Some((token, &quoted[after..]));
    }

    // braces stand alone
    if rest.starts_with('{') || rest.starts_with('}') {
        let (brace, after) = rest.split_at(1);
        return Some((brace.to_string(), after));
    }

    // parse a regular word
    let end = rest.find(is_word_break).unwrap_or(rest.len());
    push_clamped(&mut token, &rest[..end]);
    Some((token, &rest[end..]))
}

fn is_word_break(c: char) -> bool {
    c <= ' ' || c == '{' || c == '}' || c == '"'
}

fn push_clamped(token: &mut String, s: &str) {
    for c in s.chars() {
        if token.len() + c.len_utf8() > MAX_TOKEN_CHARS {
            break;
        }
        token.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_parse_words() {
        let (tok, rest) = com_parse("  hello world").unwrap();
        assert_eq!(tok, "hello");
        let (tok, rest) = com_parse(rest).unwrap();
        assert_eq!(tok, "world");
        assert!(com_parse(rest).is_none());
    }

    #[test]
    fn test_com_parse_quoted() {
        let (tok, rest) = com_parse("\"origin\" \"1 2 3\"").unwrap();
        assert_eq!(tok, "origin");
        let (tok, _) = com_parse(rest).unwrap();
        assert_eq!(tok, "1 2 3");
    }

    #[test]
    fn test_com_parse_empty_quoted() {
        let (tok, rest) = com_parse("\"\" }").unwrap();
        assert_eq!(tok, "");
        let (tok, _) = com_parse(rest).unwrap();
        assert_eq!(tok, "}");
    }

    #[test]
    fn test_com_parse_skips_comments() {
        let (tok, _) = com_parse("// a comment\n  {").unwrap();
        assert_eq!(tok, "{");
        assert!(com_parse("// only a comment").is_none());
    }

    #[test]
    fn test_com_parse_unterminated_quote() {
        let (tok, rest) = com_parse("\"abc").unwrap();
        assert_eq!(tok, "abc");
        assert_eq!(rest, "");
    }

    #[test]
    fn test_com_parse_token_at_end() {
        let (tok, rest) = com_parse("}").unwrap();
        assert_eq!(tok, "}");
        assert!(com_parse(rest).is_none());
    }

    #[test]
    fn test_com_parse_unspaced_braces() {
        let mut data = r#"{classname "foo"}{origin"1 2 3"}"#;
        let mut tokens = Vec::new();
        while let Some((tok, rest)) = com_parse(data) {
            tokens.push(tok);
            data = rest;
        }
        assert_eq!(
            tokens,
            ["{", "classname", "foo", "}", "{", "origin", "1 2 3", "}"]
        );
    }

    #[test]
    fn test_com_parse_clamps_long_tokens() {
        let long = "x".repeat(MAX_TOKEN_CHARS + 10);
        let (tok, _) = com_parse(&long).unwrap();
        assert_eq!(tok.len(), MAX_TOKEN_CHARS);
    }

    #[test]
    fn test_spawnflags_from_float() {
        let flags = SpawnFlags::from_float(2048.0 + 256.0 + 1.0);
        assert!(flags.contains(SpawnFlags::NOT_DEATHMATCH));
        assert!(flags.contains(SpawnFlags::NOT_EASY));
        assert!(!flags.contains(SpawnFlags::NOT_HARD));
    }

    #[test]
    fn test_vector_helpers() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, 0.5, 0.5];
        assert_eq!(vector_add(&a, &b), [1.5, 2.5, 3.5]);
        assert_eq!(vector_subtract(&a, &b), [0.5, 1.5, 2.5]);
        assert_eq!(vector_scale(&a, 2.0), [2.0, 4.0, 6.0]);
        assert!(vector_compare(&VEC3_ORIGIN, &[0.0; 3]));
    }
}
