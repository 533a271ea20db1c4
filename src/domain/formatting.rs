/// Formats `value` with two decimals in the convention of `currency`.
///
/// `BRL` uses `.` for thousands and `,` for decimals, `USD` the reverse;
/// any other code is rendered in US style followed by the code.
pub fn format_currency(value: f64, currency: &str) -> String {
    let (sign, int_part, frac) = split_amount(value);

    match currency {
        "BRL" => format!("R$ {sign}{},{frac}", int_part.replace(',', ".")),
        "USD" => format!("${sign}{int_part}.{frac}"),
        other => format!("{sign}{int_part}.{frac} {other}"),
    }
}

fn split_amount(value: f64) -> (&'static str, String, String) {
    let fixed = format!("{:.2}", value.abs());
    let (int_digits, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_digits.len() + int_digits.len() / 3);
    for (i, ch) in int_digits.chars().enumerate() {
        if i > 0 && (int_digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    (sign, grouped, frac.to_string())
}

/// Brazilian layout: `(DD) 9XXXX-XXXX` for mobiles, `(DD) XXXX-XXXX` for
/// landlines. Anything else is returned unchanged.
pub fn format_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();

    match digits.len() {
        11 => format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..]),
        10 => format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..]),
        _ => phone.to_string(),
    }
}

/// Shortens `text` to at most `max_length` characters, cutting at a word
/// boundary and appending `suffix`.
pub fn truncate_text(text: &str, max_length: usize, suffix: &str) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }

    let budget = max_length.saturating_sub(suffix.chars().count());
    let head: String = text.chars().take(budget).collect();
    let head = match head.rsplit_once(' ') {
        Some((before, _)) => before.to_string(),
        None => head,
    };

    format!("{head}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(1234.5, "BRL"), "R$ 1.234,50");
        assert_eq!(format_currency(1234567.891, "USD"), "$1,234,567.89");
        assert_eq!(format_currency(199.0, "EUR"), "199.00 EUR");
        assert_eq!(format_currency(0.0, "USD"), "$0.00");
        assert_eq!(format_currency(-42.0, "USD"), "$-42.00");
        assert_eq!(format_currency(-1500.0, "BRL"), "R$ -1.500,00");
    }

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone("11999998888"), "(11) 99999-8888");
        assert_eq!(format_phone("1133334444"), "(11) 3333-4444");
        assert_eq!(format_phone("12345"), "12345");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 100, "..."), "short");
        assert_eq!(
            truncate_text("the quick brown fox jumps", 15, "..."),
            "the quick..."
        );
        assert_eq!(truncate_text("abcdefghij", 6, "..."), "abc...");
    }
}
