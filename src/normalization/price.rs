use std::sync::OnceLock;

use regex::Regex;

fn first_digit_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static price pattern"))
}

/// Parse a catalog currency string ("4,200", "1,100~", "300円") into an integer.
///
/// Thousands separators are stripped and the first run of digits wins. A
/// missing, blank or digit-free value is `None`, never `0`: zero is a real
/// price (free items) and must stay distinguishable from "unknown".
pub fn parse_price(raw: Option<&str>) -> Option<i64> {
    let cleaned = raw?.replace(',', "");
    let digits = first_digit_run().find(&cleaned)?;
    digits.as_str().parse::<i64>().ok()
}
