//! Comparators and number formatting.

use std::cmp::Ordering;

use serde_json::Value;

/// Compare strings as sequences of integers separated by non-digits, so that
/// `10.0.0.9 < 10.0.0.10` and `Gi0/2 < Gi0/10`. A missing piece sorts first.
pub fn cmp_int_split(a: &str, b: &str) -> Ordering {
    let pa: Vec<&str> = a.split(|c: char| !c.is_ascii_digit()).collect();
    let pb: Vec<&str> = b.split(|c: char| !c.is_ascii_digit()).collect();
    for i in 0..pa.len().max(pb.len()) {
        match (pa.get(i), pb.get(i)) {
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = piece_value(x)
                    .partial_cmp(&piece_value(y))
                    .unwrap_or(Ordering::Equal);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, None) => break,
        }
    }
    Ordering::Equal
}

fn piece_value(piece: &str) -> f64 {
    if piece.is_empty() {
        0.0
    } else {
        piece.parse().unwrap_or(0.0)
    }
}

/// Natural ordering of scalar values: numbers numerically, strings
/// lexicographically, booleans false first. Mixed or composite values are equal.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

const SI_PREFIXES: [&str; 9] = ["n", "µ", "m", "", "k", "M", "G", "T", "P"];
const SI_NEUTRAL: usize = 3;

/// Format with an SI prefix (multiple 1000) and fixed precision,
/// e.g. `human_number(1e9, 0) == "1G"`.
pub fn human_number(number: f64, precision: usize) -> String {
    if number.is_nan() {
        return String::new();
    }
    let minus = if number < 0.0 { "-" } else { "" };
    let mut n = number.abs();
    let mut i = SI_NEUTRAL;
    while n >= 1000.0 && i < SI_PREFIXES.len() - 1 {
        n /= 1000.0;
        i += 1;
    }
    if i == SI_NEUTRAL {
        while n != 0.0 && n < 1.0 && i > 0 {
            n *= 1000.0;
            i -= 1;
        }
    }
    format!("{minus}{n:.precision$}{}", SI_PREFIXES[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_split_orders_addresses_numerically() {
        assert_eq!(cmp_int_split("10.0.0.9", "10.0.0.10"), Ordering::Less);
        assert_eq!(cmp_int_split("Gi0/10", "Gi0/2"), Ordering::Greater);
        assert_eq!(cmp_int_split("10.0.0", "10.0.0.1"), Ordering::Less);
        assert_eq!(cmp_int_split("a1", "b1"), Ordering::Equal);
    }

    #[test]
    fn value_ordering() {
        assert_eq!(cmp_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(cmp_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(cmp_values(&json!({"a": 1}), &json!(1)), Ordering::Equal);
    }

    #[test]
    fn human_numbers() {
        assert_eq!(human_number(1_000_000_000.0, 0), "1G");
        assert_eq!(human_number(100_000_000.0, 0), "100M");
        assert_eq!(human_number(10_000.0, 2), "10.00k");
        assert_eq!(human_number(0.005, 0), "5m");
        assert_eq!(human_number(-1500.0, 1), "-1.5k");
        assert_eq!(human_number(0.0, 0), "0");
    }
}
