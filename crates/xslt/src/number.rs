//! Formatting of `xsl:number` output: format tokens, separators and grouping.

/// Digit grouping for decimal tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grouping {
    pub separator: char,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct FormatToken {
    /// Separator written before this token's number (ignored for the first token).
    separator: String,
    token: String,
}

#[derive(Debug, Clone, PartialEq)]
struct NumberFormat {
    prefix: String,
    tokens: Vec<FormatToken>,
    suffix: String,
}

fn parse_format(format: &str) -> NumberFormat {
    let mut prefix = String::new();
    let mut tokens: Vec<FormatToken> = Vec::new();
    let mut pending = String::new();
    let mut chars = format.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_alphanumeric() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            if tokens.is_empty() {
                prefix = std::mem::take(&mut pending);
            }
            tokens.push(FormatToken {
                separator: std::mem::take(&mut pending),
                token,
            });
        } else {
            pending.push(c);
            chars.next();
        }
    }
    if tokens.is_empty() {
        // A format with no alphanumerics behaves like "1" wrapped in it.
        return NumberFormat {
            prefix: pending,
            tokens: vec![FormatToken {
                separator: String::new(),
                token: "1".to_string(),
            }],
            suffix: String::new(),
        };
    }
    NumberFormat {
        prefix,
        tokens,
        suffix: pending,
    }
}

fn alphabetic(mut n: u64, base: char) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((base as u8 + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(mut n: u64) -> String {
    const NUMERALS: &[(u64, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for &(value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

fn decimal(n: u64, width: usize, grouping: Option<Grouping>) -> String {
    let digits = format!("{:0width$}", n, width = width);
    let Some(grouping) = grouping.filter(|g| g.size > 0) else {
        return digits;
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (index, c) in chars.iter().enumerate() {
        if index > 0 && (chars.len() - index) % grouping.size == 0 {
            out.push(grouping.separator);
        }
        out.push(*c);
    }
    out
}

fn format_one(n: u64, token: &str, grouping: Option<Grouping>) -> String {
    match token {
        "a" if n > 0 => alphabetic(n, 'a'),
        "A" if n > 0 => alphabetic(n, 'A'),
        "i" if n > 0 && n < 4000 => roman(n),
        "I" if n > 0 && n < 4000 => roman(n).to_uppercase(),
        _ if token.ends_with('1') && token[..token.len() - 1].chars().all(|c| c == '0') => {
            decimal(n, token.len(), grouping)
        }
        _ => decimal(n, 1, grouping),
    }
}

/// Formats a list of numbers (one for `single`/`any`, one per level for `multiple`)
/// with an `xsl:number` format string such as `"1."`, `"A"` or `"1.a.i"`.
pub fn format_numbers(numbers: &[u64], format: &str, grouping: Option<Grouping>) -> String {
    let parsed = parse_format(format);
    let mut out = parsed.prefix.clone();
    let last_separator = parsed
        .tokens
        .iter()
        .skip(1)
        .last()
        .map_or(".", |t| t.separator.as_str());
    for (index, &n) in numbers.iter().enumerate() {
        let token = parsed
            .tokens
            .get(index)
            .or_else(|| parsed.tokens.last());
        let Some(token) = token else {
            continue;
        };
        if index > 0 {
            if index < parsed.tokens.len() {
                out.push_str(&token.separator);
            } else {
                out.push_str(last_separator);
            }
        }
        out.push_str(&format_one(n, &token.token, grouping));
    }
    out.push_str(&parsed.suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_tokens() {
        assert_eq!(format_numbers(&[3], "1", None), "3");
        assert_eq!(format_numbers(&[3], "001", None), "003");
        assert_eq!(format_numbers(&[3], "(1)", None), "(3)");
        assert_eq!(format_numbers(&[3], "", None), "3");
    }

    #[test]
    fn test_alphabetic_and_roman_tokens() {
        assert_eq!(format_numbers(&[1], "a", None), "a");
        assert_eq!(format_numbers(&[28], "A", None), "AB");
        assert_eq!(format_numbers(&[1999], "I", None), "MCMXCIX");
        assert_eq!(format_numbers(&[14], "i", None), "xiv");
    }

    #[test]
    fn test_multiple_levels_reuse_last_token() {
        assert_eq!(format_numbers(&[1, 2, 3], "1.a", None), "1.b.c");
        assert_eq!(format_numbers(&[2, 1], "1.1.", None), "2.1.");
        assert_eq!(format_numbers(&[4, 5, 6], "1", None), "4.5.6");
    }

    #[test]
    fn test_grouping() {
        let grouping = Some(Grouping {
            separator: ',',
            size: 3,
        });
        assert_eq!(format_numbers(&[1234567], "1", grouping), "1,234,567");
    }
}
