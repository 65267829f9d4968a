use serde_json::Value;

/// Review averages arrive either as JSON numbers or as strings like "4.50".
/// Returns `None` for anything that is not a 0-5 score.
pub fn parse_review_average(value: &Value) -> Option<f64> {
    let rating = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_score_string(s)?,
        _ => return None,
    };
    if (0.0..=5.0).contains(&rating) {
        Some(rating)
    } else {
        None
    }
}

/// Review counts are integers but occasionally come back quoted.
pub fn parse_review_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().replace(',', "").parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_score_string(input: &str) -> Option<f64> {
    let digits: String = input
        .trim()
        .chars()
        .take_while(|c| *c != ' ')
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok()
}
