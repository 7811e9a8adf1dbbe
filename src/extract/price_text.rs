//! Currency-marked price parsing for free text.

use std::sync::LazyLock;

use regex::Regex;

/// Yen (half- and full-width) or dollar marker followed by a digit group.
/// Commas are thousands separators; dollars may carry cents.
static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[¥￥]\s*(?P<jpy>[0-9][0-9,]*)|(?:US)?\$\s*(?P<usd>[0-9][0-9,]*(?:\.[0-9]+)?)",
    )
    .unwrap()
});

/// How strictly text must be marked to count as a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerMode {
    /// Only currency-marked digit groups count. Used on whole-page text,
    /// where bare numbers are item counts, dates and ids.
    MarkedOnly,
    /// Element text already known to be a price: if no marker is present, all
    /// digits in the text are read as one number.
    AllowBare,
}

/// Parses yen amounts, and dollar amounts when an exchange rate is known.
#[derive(Debug, Clone, Default)]
pub struct PriceTextParser {
    usd_to_jpy: Option<f64>,
}

impl PriceTextParser {
    pub fn new(usd_to_jpy: Option<f64>) -> Self {
        Self {
            usd_to_jpy: usd_to_jpy.filter(|r| r.is_finite() && *r > 0.0),
        }
    }

    /// Extract every price in `text`, in order of appearance, as whole yen.
    pub fn parse(&self, text: &str, mode: MarkerMode) -> Vec<i64> {
        let mut amounts = Vec::new();
        let mut marked = false;

        for caps in PRICE_PATTERN.captures_iter(text) {
            marked = true;
            if let Some(jpy) = caps.name("jpy") {
                if let Some(amount) = parse_digit_group(jpy.as_str()) {
                    amounts.push(amount);
                }
            } else if let (Some(usd), Some(rate)) = (caps.name("usd"), self.usd_to_jpy) {
                if let Some(amount) = convert_foreign(usd.as_str(), rate) {
                    amounts.push(amount);
                }
            }
        }

        if !marked && mode == MarkerMode::AllowBare {
            let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
            if let Ok(amount) = digits.parse::<i64>() {
                amounts.push(amount);
            }
        }

        amounts
    }
}

/// Parse a comma-grouped integer. `None` on overflow or no digits.
fn parse_digit_group(group: &str) -> Option<i64> {
    let digits: String = group.chars().filter(|c| *c != ',').collect();
    digits.parse::<i64>().ok()
}

fn convert_foreign(group: &str, rate: f64) -> Option<i64> {
    let value: f64 = group.replace(',', "").parse().ok()?;
    let converted = (value * rate).round();
    if converted.is_finite() && converted.abs() < i64::MAX as f64 {
        Some(converted as i64)
    } else {
        None
    }
}
