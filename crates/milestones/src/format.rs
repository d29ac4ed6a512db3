/// Render an integer with comma thousands separators: `1000000` → `"1,000,000"`.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `"1 year"` / `"3 years"`.
pub fn plural(n: u64, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("{} {}", thousands(n), singular)
    } else {
        format!("{} {}", thousands(n), plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1_000_000_000), "1,000,000,000");
        assert_eq!(thousands(11_111), "11,111");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "year", "years"), "1 year");
        assert_eq!(plural(2, "year", "years"), "2 years");
    }
}
