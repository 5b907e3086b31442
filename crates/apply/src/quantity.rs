//! Resource quantities compared by value.
//!
//! The API server rewrites quantities into canonical form (`0.5` is stored as `500m`,
//! `1024Mi` as `1Gi`), so `resources.limits` and `resources.requests` are rewritten to an
//! exact decimal in base units on both sides before comparison.

use serde_json::Value as Json;

const NANO: i128 = 1_000_000_000;

/// Value of a quantity in nano-units, rounded up at nano precision like the server does.
/// `None` for anything that is not a quantity or does not fit.
pub fn parse_nanos(raw: &str) -> Option<i128> {
    let s = raw.trim();
    let (negative, s) = match s.as_bytes().first().copied()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.contains('.') {
        return None;
    }

    let mut mantissa: i128 = 0;
    for d in whole.bytes().chain(frac.bytes()) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(d - b'0'))?;
    }
    let (binary, decimal) = multiplier(suffix)?;
    let numerator = mantissa.checked_mul(2i128.checked_pow(binary)?)?;
    let scale = decimal + 9 - i32::try_from(frac.len()).ok()?;
    let nanos = if scale >= 0 {
        numerator.checked_mul(10i128.checked_pow(u32::try_from(scale).ok()?)?)?
    } else {
        let div = 10i128.checked_pow(u32::try_from(-scale).ok()?)?;
        numerator.checked_add(div - 1)? / div
    };
    Some(if negative { -nanos } else { nanos })
}

/// `(power of two, power of ten)` for a suffix.
fn multiplier(suffix: &str) -> Option<(u32, i32)> {
    let m = match suffix {
        "" => (0, 0),
        "Ki" => (10, 0),
        "Mi" => (20, 0),
        "Gi" => (30, 0),
        "Ti" => (40, 0),
        "Pi" => (50, 0),
        "Ei" => (60, 0),
        "n" => (0, -9),
        "u" => (0, -6),
        "m" => (0, -3),
        "k" => (0, 3),
        "M" => (0, 6),
        "G" => (0, 9),
        "T" => (0, 12),
        "P" => (0, 15),
        "E" => (0, 18),
        exp => {
            let digits = exp.strip_prefix('e').or_else(|| exp.strip_prefix('E'))?;
            let n: i32 = digits.parse().ok()?;
            if !(-30..=30).contains(&n) {
                return None;
            }
            (0, n)
        }
    };
    Some(m)
}

fn format_nanos(nanos: i128) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let abs = nanos.unsigned_abs();
    let (whole, frac) = (abs / NANO as u128, abs % NANO as u128);
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        let digits = format!("{frac:09}");
        format!("{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Rewrite every `resources.{limits,requests}` entry under `v` to its exact value.
/// Entries that do not parse are left as written.
pub fn canonicalize_resources(v: &mut Json) {
    match v {
        Json::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "resources" {
                    for bucket in ["limits", "requests"] {
                        if let Some(entries) = child.get_mut(bucket).and_then(|b| b.as_object_mut()) {
                            for q in entries.values_mut() {
                                if let Some(n) = q.as_str().and_then(parse_nanos) {
                                    *q = Json::String(format_nanos(n));
                                }
                            }
                        }
                    }
                }
                canonicalize_resources(child);
            }
        }
        Json::Array(items) => items.iter_mut().for_each(canonicalize_resources),
        _ => {}
    }
}
