//! `format-number()` and the `xsl:decimal-format` symbols it uses.

use serde::{Deserialize, Serialize};

/// The symbols of one `xsl:decimal-format`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
        }
    }
}

#[derive(Debug, Default)]
struct SubPattern {
    prefix: String,
    suffix: String,
    min_integer: usize,
    min_fraction: usize,
    max_fraction: usize,
    grouping: Option<usize>,
    multiplier: f64,
}

impl DecimalFormat {
    fn is_active(&self, c: char) -> bool {
        c == self.digit
            || c == self.zero_digit
            || c == self.grouping_separator
            || c == self.decimal_separator
    }

    fn parse_sub_pattern(&self, pattern: &str) -> Result<SubPattern, String> {
        let chars: Vec<char> = pattern.chars().collect();
        let start = chars
            .iter()
            .position(|&c| self.is_active(c))
            .ok_or_else(|| format!("pattern '{}' has no digits", pattern))?;
        let end = chars
            .iter()
            .rposition(|&c| self.is_active(c))
            .map_or(start, |i| i + 1);

        let mut sub = SubPattern {
            prefix: chars[..start].iter().collect(),
            suffix: chars[end..].iter().collect(),
            multiplier: 1.0,
            ..SubPattern::default()
        };
        for c in sub.prefix.chars().chain(sub.suffix.chars()) {
            if c == self.percent {
                sub.multiplier = 100.0;
            } else if c == self.per_mille {
                sub.multiplier = 1000.0;
            }
        }

        let mut in_fraction = false;
        let mut since_grouping: Option<usize> = None;
        for &c in &chars[start..end] {
            if c == self.decimal_separator {
                if in_fraction {
                    return Err(format!("pattern '{}' has two decimal separators", pattern));
                }
                in_fraction = true;
            } else if c == self.grouping_separator {
                if in_fraction {
                    return Err(format!(
                        "pattern '{}' has a grouping separator in the fraction",
                        pattern
                    ));
                }
                since_grouping = Some(0);
            } else if in_fraction {
                sub.max_fraction += 1;
                if c == self.zero_digit {
                    sub.min_fraction = sub.max_fraction;
                }
            } else {
                if c == self.zero_digit {
                    sub.min_integer += 1;
                }
                if let Some(count) = since_grouping.as_mut() {
                    *count += 1;
                }
            }
        }
        sub.grouping = since_grouping.filter(|&size| size > 0);
        Ok(sub)
    }

    fn localize_digits(&self, digits: &str) -> String {
        let zero = self.zero_digit as u32;
        digits
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => char::from_u32(zero + d).unwrap_or(c),
                None => c,
            })
            .collect()
    }

    /// Formats `value` with a JDK `DecimalFormat` style picture.
    pub fn format(&self, value: f64, pattern: &str) -> Result<String, String> {
        let (positive, negative) = match pattern.split_once(self.pattern_separator) {
            Some((positive, negative)) => (positive, Some(negative)),
            None => (pattern, None),
        };
        let positive = self.parse_sub_pattern(positive)?;
        let negative = negative.map(|p| self.parse_sub_pattern(p)).transpose()?;

        if value.is_nan() {
            return Ok(self.nan.clone());
        }
        let is_negative = value < 0.0;
        let (prefix, suffix) = match (&negative, is_negative) {
            (Some(negative), true) => (negative.prefix.clone(), negative.suffix.clone()),
            (None, true) => (
                format!("{}{}", self.minus_sign, positive.prefix),
                positive.suffix.clone(),
            ),
            (_, false) => (positive.prefix.clone(), positive.suffix.clone()),
        };

        let magnitude = value.abs() * positive.multiplier;
        if magnitude.is_infinite() {
            return Ok(format!("{}{}{}", prefix, self.infinity, suffix));
        }

        let fixed = format!("{:.*}", positive.max_fraction, magnitude);
        let (integer, fraction) = match fixed.split_once('.') {
            Some((integer, fraction)) => (integer.to_string(), fraction.to_string()),
            None => (fixed, String::new()),
        };

        let mut fraction = fraction;
        while fraction.len() > positive.min_fraction && fraction.ends_with('0') {
            fraction.pop();
        }

        let mut integer = integer.trim_start_matches('0').to_string();
        while integer.len() < positive.min_integer {
            integer.insert(0, '0');
        }
        if integer.is_empty() && fraction.is_empty() {
            integer.push('0');
        }

        let mut grouped = String::new();
        let digits: Vec<char> = integer.chars().collect();
        for (index, c) in digits.iter().enumerate() {
            let remaining = digits.len() - index;
            if let Some(size) = positive.grouping {
                if index > 0 && remaining % size == 0 {
                    grouped.push(self.grouping_separator);
                }
            }
            grouped.push(*c);
        }

        let mut out = prefix;
        out.push_str(&self.localize_digits(&grouped));
        if !fraction.is_empty() {
            out.push(self.decimal_separator);
            out.push_str(&self.localize_digits(&fraction));
        }
        out.push_str(&suffix);
        Ok(out)
    }
}
