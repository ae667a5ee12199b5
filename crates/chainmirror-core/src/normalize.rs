//! Event normalizer: turns decoded event arguments into storable strings.
//!
//! Pure transform, no I/O. The numeric kind of each argument was fixed when
//! the log was decoded (see [`RawArgValue`]); here it is resolved against the
//! service's decimal-formatted argument set:
//!
//! | decoded kind     | in decimal set | stored as                               |
//! |------------------|----------------|-----------------------------------------|
//! | `Uint` / `Int`   | yes            | value / 10^scale, truncated to N places |
//! | `Uint` / `Int`   | no             | exact base-10 integer                   |
//! | `Text`           | -              | raw text                                |

use std::collections::HashSet;

use alloy_primitives::{I256, U256};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::types::{RawArgValue, RawEvent};

/// Default ledger decimal scale (wei → ether).
pub const DEFAULT_SCALE_DECIMALS: u8 = 18;
/// Default number of decimal places kept for display.
pub const DEFAULT_DISPLAY_DECIMALS: usize = 2;

/// A normalized argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    /// Exact base-10 integer string.
    Integer(String),
    /// Scaled, truncated fixed-decimal string.
    Decimal(String),
    /// Raw text form.
    Raw(String),
}

impl NormalizedValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Integer(s) | Self::Decimal(s) | Self::Raw(s) => s,
        }
    }
}

/// One normalized event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedArgument {
    pub name: String,
    pub value: NormalizedValue,
}

/// Resolves argument kinds and formats values.
#[derive(Debug, Clone)]
pub struct Normalizer {
    decimal_args: HashSet<String>,
    scale_decimals: u8,
    display_decimals: usize,
}

impl Normalizer {
    pub fn new<I, S>(decimal_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            decimal_args: decimal_args.into_iter().map(Into::into).collect(),
            scale_decimals: DEFAULT_SCALE_DECIMALS,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
        }
    }

    /// Set the ledger's fixed decimal scale (18 for wei-denominated values).
    pub fn with_scale_decimals(mut self, scale: u8) -> Self {
        self.scale_decimals = scale;
        self
    }

    /// Set how many decimal places to keep after scaling.
    pub fn with_display_decimals(mut self, places: usize) -> Self {
        self.display_decimals = places;
        self
    }

    /// Normalize every named argument of `event`, in ABI order.
    ///
    /// Positional duplicates (names that are plain indices) are skipped.
    pub fn normalize(&self, event: &RawEvent) -> Vec<NormalizedArgument> {
        event
            .args
            .iter()
            .filter(|arg| !arg.is_positional())
            .map(|arg| NormalizedArgument {
                name: arg.name.clone(),
                value: self.normalize_value(&arg.name, &arg.value),
            })
            .collect()
    }

    fn normalize_value(&self, name: &str, value: &RawArgValue) -> NormalizedValue {
        let scaled = self.decimal_args.contains(name);
        match value {
            RawArgValue::Uint(v) if scaled => NormalizedValue::Decimal(format_x_decimals(
                &format_units(*v, self.scale_decimals),
                self.display_decimals,
            )),
            RawArgValue::Int(v) if scaled => NormalizedValue::Decimal(format_x_decimals(
                &format_signed_units(*v, self.scale_decimals),
                self.display_decimals,
            )),
            RawArgValue::Uint(v) => NormalizedValue::Integer(v.to_string()),
            RawArgValue::Int(v) => NormalizedValue::Integer(v.to_string()),
            RawArgValue::Text(s) => NormalizedValue::Raw(s.clone()),
        }
    }
}

/// Serialize normalized arguments as a JSON object, preserving argument order.
pub fn to_payload(args: &[NormalizedArgument]) -> Result<String, MirrorError> {
    let map: IndexMap<&str, &str> = args
        .iter()
        .map(|a| (a.name.as_str(), a.value.as_str()))
        .collect();
    serde_json::to_string(&map).map_err(|e| MirrorError::Decode(e.to_string()))
}

/// Divide `value` by `10^decimals` exactly and render it as a decimal string.
///
/// Always has at least one fractional digit (`1000000000000000000` → `"1.0"`),
/// trailing zeros are dropped.
pub fn format_units(value: U256, decimals: u8) -> String {
    if decimals == 0 {
        return format!("{value}.0");
    }
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / divisor;
    let frac = value % divisor;
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{frac}")
    }
}

fn format_signed_units(value: I256, decimals: u8) -> String {
    let abs = format_units(value.unsigned_abs(), decimals);
    if value.is_negative() {
        format!("-{abs}")
    } else {
        abs
    }
}

/// Truncate (never round) a decimal string to exactly `places` fractional
/// digits, right-padding with zeros.
///
/// Non-numeric input yields `"0."` followed by `places` zeros. A leading `.`
/// gets a `0` prepended.
///
/// ```
/// use chainmirror_core::normalize::format_x_decimals;
/// assert_eq!(format_x_decimals("5", 2), "5.00");
/// assert_eq!(format_x_decimals("5.123", 2), "5.12");
/// assert_eq!(format_x_decimals(".5", 2), "0.50");
/// ```
pub fn format_x_decimals(input: &str, places: usize) -> String {
    let Some((negative, int_part, frac_part)) = split_decimal(input.trim()) else {
        return format!("0.{}", "0".repeat(places));
    };

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let sign = if negative { "-" } else { "" };
    if places == 0 {
        return format!("{sign}{int_part}");
    }

    // ASCII digits only, so byte slicing is safe.
    let kept = &frac_part[..frac_part.len().min(places)];
    format!(
        "{sign}{int_part}.{kept}{pad}",
        pad = "0".repeat(places - kept.len())
    )
}

/// Split `-?digits(.digits)?` / `-?.digits` into (negative, int, frac).
fn split_decimal(s: &str) -> Option<(bool, &str, &str)> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    Some((negative, int_part, frac_part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawArg;

    fn wei(ether: u64) -> U256 {
        U256::from(ether) * U256::from(10u64).pow(U256::from(18u8))
    }

    #[test]
    fn fixed_decimal_vectors() {
        assert_eq!(format_x_decimals("5", 2), "5.00");
        assert_eq!(format_x_decimals("5.1", 2), "5.10");
        assert_eq!(format_x_decimals(".5", 2), "0.50");
        assert_eq!(format_x_decimals("5.123", 2), "5.12");
        assert_eq!(format_x_decimals("abc", 2), "0.00");
    }

    #[test]
    fn fixed_decimal_edges() {
        assert_eq!(format_x_decimals("5.", 2), "5.00");
        assert_eq!(format_x_decimals("5.99999", 2), "5.99");
        assert_eq!(format_x_decimals("-1.5", 3), "-1.500");
        assert_eq!(format_x_decimals("7.89", 0), "7");
        assert_eq!(format_x_decimals("", 2), "0.00");
        assert_eq!(format_x_decimals(".", 2), "0.00");
        assert_eq!(format_x_decimals("1.2.3", 2), "0.00");
        assert_eq!(format_x_decimals("0.0", 4), "0.0000");
    }

    #[test]
    fn format_units_exact() {
        assert_eq!(format_units(wei(5), 18), "5.0");
        assert_eq!(format_units(U256::from(1_500_000_000_000_000_000u128), 18), "1.5");
        assert_eq!(format_units(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::ZERO, 18), "0.0");
        assert_eq!(format_units(U256::from(12345u64), 2), "123.45");
    }

    #[test]
    fn format_units_beyond_u128() {
        let huge = U256::MAX;
        let s = format_units(huge, 18);
        assert!(s.starts_with("115792089237316195423570985008687907853269984665640564039457"));
        assert!(s.contains('.'));
    }

    fn event(args: Vec<RawArg>) -> RawEvent {
        RawEvent {
            kind: "BuyEggs".into(),
            tx_hash: "0x01".into(),
            block_number: 10,
            log_index: 0,
            args,
        }
    }

    #[test]
    fn normalize_resolves_kinds() {
        let normalizer = Normalizer::new(["_amount"]);
        let ev = event(vec![
            RawArg::new("0", RawArgValue::Uint(wei(3))),
            RawArg::new("_timestamp", 1_700_000_000u64),
            RawArg::new("_from", "0xabc"),
            RawArg::new("_amount", RawArgValue::Uint(U256::from(1_239_000_000_000_000_000u128))),
        ]);

        let out = normalizer.normalize(&ev);
        assert_eq!(out.len(), 3, "positional duplicate skipped");
        assert_eq!(out[0].value, NormalizedValue::Integer("1700000000".into()));
        assert_eq!(out[1].value, NormalizedValue::Raw("0xabc".into()));
        assert_eq!(out[2].value, NormalizedValue::Decimal("1.23".into()));
    }

    #[test]
    fn normalize_signed_decimal() {
        let normalizer = Normalizer::new(["delta"]).with_display_decimals(1);
        let neg = I256::try_from(-2_550_000_000_000_000_000i128).unwrap();
        let out = normalizer.normalize(&event(vec![RawArg::new("delta", RawArgValue::Int(neg))]));
        assert_eq!(out[0].value.as_str(), "-2.5");
    }

    #[test]
    fn normalize_large_integer_is_exact() {
        let normalizer = Normalizer::new(Vec::<String>::new());
        let big = U256::from(u128::MAX) * U256::from(1000u64);
        let out = normalizer.normalize(&event(vec![RawArg::new("_newMiners", RawArgValue::Uint(big))]));
        assert_eq!(out[0].value.as_str(), big.to_string());
    }

    #[test]
    fn text_in_decimal_set_passes_through() {
        let normalizer = Normalizer::new(["_amount"]);
        let out = normalizer.normalize(&event(vec![RawArg::new("_amount", "n/a")]));
        assert_eq!(out[0].value, NormalizedValue::Raw("n/a".into()));
    }

    #[test]
    fn payload_preserves_order() {
        let args = vec![
            NormalizedArgument { name: "_z".into(), value: NormalizedValue::Raw("1".into()) },
            NormalizedArgument { name: "_a".into(), value: NormalizedValue::Decimal("2.00".into()) },
        ];
        assert_eq!(to_payload(&args).unwrap(), r#"{"_z":"1","_a":"2.00"}"#);
    }
}
