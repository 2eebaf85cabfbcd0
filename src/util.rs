use regex::Regex;

lazy_static::lazy_static! {
    pub static ref DIALPLAN_IDENT_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap();
}

/// True when `value` can be embedded in a dialplan context or extension name
/// without escaping.
pub fn is_dialplan_ident(value: &str) -> bool {
    DIALPLAN_IDENT_RE.is_match(value)
}
