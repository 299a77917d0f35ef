use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Group the integer digits of a plain number string with commas.
fn group_thousands(digits: &str) -> String {
    let mut result = String::new();
    let chars: Vec<char> = digits.chars().collect();

    for (i, ch) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*ch);
    }

    result
}

/// Format a USD amount with thousands separators and two decimals
pub fn format_usd(amount: Decimal) -> String {
    let rounded = format!("{:.2}", amount.abs().round_dp(2));
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let sign = if amount.is_sign_negative() && !amount.is_zero() { "-" } else { "" };

    format!("{}${}.{}", sign, group_thousands(int_part), frac_part)
}

/// Format a fraction as a percentage with two decimals (0.015 -> "1.50%").
/// Values too large to scale are printed as the raw fraction.
pub fn format_pct(fraction: Decimal) -> String {
    match fraction.checked_mul(Decimal::ONE_HUNDRED) {
        Some(pct) => format!("{:.2}%", pct.round_dp(2)),
        None => format!("{fraction} (fraction)"),
    }
}

pub fn format_optional_usd(amount: Option<Decimal>) -> String {
    amount.map(format_usd).unwrap_or_else(|| "-".to_string())
}

pub fn format_optional_pct(fraction: Option<Decimal>) -> String {
    fraction.map(format_pct).unwrap_or_else(|| "-".to_string())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
