use std::fmt;

/// Amounts are stored as integer cents so balances never accumulate
/// floating-point error. 1 currency unit = 100 cents, so 250.00 = 25000.
pub type Cents = i64;

/// Format cents for display.
/// Example: 25000 -> "250.00", -90 -> "-0.90"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a decimal amount string into cents.
/// Accepts "250", "250.5" and "250.50"; extra decimal digits are truncated.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (units_str, decimal_str) = match digits.split_once('.') {
        None => (digits, ""),
        Some((units, decimal)) if !decimal.contains('.') => (units, decimal),
        Some(_) => return Err(ParseCentsError::InvalidFormat),
    };

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?
    };

    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => {
            decimal_str
                .parse::<i64>()
                .map_err(|_| ParseCentsError::InvalidFormat)?
                * 10
        }
        _ => decimal_str[..2]
            .parse()
            .map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units * 100 + decimal_cents;
    Ok(if negative { -cents } else { cents })
}

/// Net profit as a percentage of revenue. Zero revenue yields 0.0 rather
/// than a division error, so empty months report a flat margin.
pub fn profit_margin_percent(net_profit: Cents, revenue: Cents) -> f64 {
    if revenue == 0 {
        0.0
    } else {
        net_profit as f64 / revenue as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
        }
    }
}

impl std::error::Error for ParseCentsError {}
