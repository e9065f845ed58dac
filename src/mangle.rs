//! Name mangling: BASIC identifiers to IR symbol names
//!
//! Identifiers are case-insensitive and may carry a type-suffix sigil
//! (`$ % & ! #`). Mangled names fold case, replace the sigil with a stable
//! tag, and prefix by role so user names can never collide with runtime
//! symbols or with each other across roles.

/// Fold case and replace a trailing sigil with its tag.
fn fold(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        let is_last = chars.peek().is_none();
        match c {
            '$' if is_last => out.push_str("_s"),
            '%' if is_last => out.push_str("_i"),
            '&' if is_last => out.push_str("_l"),
            '!' if is_last => out.push_str("_f"),
            '#' if is_last => out.push_str("_d"),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c.to_ascii_lowercase()),
            _ => out.push('_'),
        }
    }
    out
}

/// Local variable slot name (no IR sigil; the emitter prepends `%`).
pub fn local(name: &str) -> String {
    format!("v_{}", fold(name))
}

/// Global variable symbol (the emitter prepends `$`).
pub fn global(name: &str) -> String {
    format!("g_{}", fold(name))
}

/// User FUNCTION/SUB symbol (the emitter prepends `$`).
pub fn function(name: &str) -> String {
    format!("f_{}", fold(name))
}

/// Symbolic source label, as used in block label suffixes.
pub fn label(name: &str) -> String {
    fold(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigil_tags() {
        assert_eq!(local("Name$"), "v_name_s");
        assert_eq!(local("Count%"), "v_count_i");
        assert_eq!(local("Total#"), "v_total_d");
        assert_eq!(local("K"), "v_k");
    }

    #[test]
    fn test_case_folding_collides_identically() {
        assert_eq!(global("Speed"), global("SPEED"));
    }

    #[test]
    fn test_roles_do_not_collide() {
        assert_ne!(local("x"), global("x"));
        assert_ne!(global("x"), function("x"));
    }

    #[test]
    fn test_non_ascii_sanitized() {
        assert_eq!(function("do-it"), "f_do_it");
    }
}
