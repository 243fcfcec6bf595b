//! Parsing of human-formatted amounts such as `1.5B`, `$1,200`, `(42)` or `2.5%`.

/// Parse an amount. Returns `None` for placeholders (`-`, `N/A`, empty) and
/// anything that is not a finite number.
///
/// Suffixes `K`, `M`, `B`, `T` scale by 10^3..10^12. A trailing `%` is
/// stripped without scaling. Parentheses denote a negative value.
pub fn parse_amount(text: &str) -> Option<f64> {
    let mut s = text.trim().trim_end_matches([',', ';', '.']).trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("n/a") || s.eq_ignore_ascii_case("null") {
        return None;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
        negative = true;
        s = &s[1..s.len() - 1];
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest;
    }
    s = s.trim_start_matches('$').trim();

    let mut multiplier = 1.0;
    if let Some(rest) = s.strip_suffix('%') {
        s = rest;
    } else if let Some(last) = s.chars().last() {
        let scale = match last.to_ascii_uppercase() {
            'K' => Some(1e3),
            'M' => Some(1e6),
            'B' => Some(1e9),
            'T' => Some(1e12),
            _ => None,
        };
        if let Some(scale) = scale {
            multiplier = scale;
            s = &s[..s.len() - last.len_utf8()];
        }
    }

    let digits: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let value: f64 = digits.parse().ok()?;
    let signed = if negative { -value } else { value };
    let scaled = signed * multiplier;
    scaled.is_finite().then_some(scaled)
}
