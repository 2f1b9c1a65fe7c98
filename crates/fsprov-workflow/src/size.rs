//! Byte sizes as written for storage tools.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const BINARY_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Size(u64);

/// The renderings of one size that the storage tools consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub size: String,
    pub bytes: u64,
    pub lvm: String,
    pub parted: String,
}

fn unit_multiplier(unit: &str) -> Option<u128> {
    let unit = unit.to_ascii_lowercase();
    let (exp, base) = match unit.as_str() {
        "" | "b" => (0, 1000),
        "kb" => (1, 1000),
        "mb" => (2, 1000),
        "gb" => (3, 1000),
        "tb" => (4, 1000),
        "pb" => (5, 1000),
        "eb" => (6, 1000),
        "k" | "kib" => (1, 1024),
        "m" | "mib" => (2, 1024),
        "g" | "gib" => (3, 1024),
        "t" | "tib" => (4, 1024),
        "p" | "pib" => (5, 1024),
        "e" | "eib" => (6, 1024),
        _ => return None,
    };
    Some(u128::pow(base, exp))
}

impl Size {
    pub fn from_bytes(bytes: u64) -> Self {
        Size(bytes)
    }

    /// Parse `"<number> [unit]"`. Fractions are truncated to whole bytes.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            bail!("empty size");
        }
        if trimmed.starts_with('-') {
            bail!("negative size '{input}'");
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let unit = unit.trim();

        let multiplier =
            unit_multiplier(unit).with_context(|| format!("unknown unit '{unit}' in '{input}'"))?;

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            bail!("missing number in '{input}'");
        }
        if fraction.contains('.') {
            bail!("malformed number in '{input}'");
        }

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .with_context(|| format!("malformed number in '{input}'"))?
        };
        let mut bytes = whole_value
            .checked_mul(multiplier)
            .with_context(|| format!("size '{input}' is too large"))?;

        if !fraction.is_empty() {
            // floor(0.d1d2..dn * multiplier), folded from the last digit so every
            // intermediate stays below 10 * multiplier.
            let part = fraction.bytes().rev().fold(0u128, |acc, digit| {
                (u128::from(digit - b'0') * multiplier + acc) / 10
            });
            bytes = bytes
                .checked_add(part)
                .with_context(|| format!("size '{input}' is too large"))?;
        }

        let bytes = u64::try_from(bytes).with_context(|| format!("size '{input}' is too large"))?;
        Ok(Size(bytes))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    // Largest binary unit not exceeding the value, with the truncated count.
    fn scaled(&self) -> (u64, &'static str) {
        let mut idx = 0;
        while idx + 1 < BINARY_UNITS.len() && self.0 >= 1u64 << (10 * (idx + 1)) {
            idx += 1;
        }
        (self.0 >> (10 * idx), BINARY_UNITS[idx])
    }

    /// `"10 KiB"`
    pub fn human(&self) -> String {
        let (value, unit) = self.scaled();
        format!("{value} {unit}")
    }

    /// `"10k"`, or `"512b"` below one KiB.
    pub fn lvm(&self) -> String {
        let (value, unit) = self.scaled();
        let letter = unit[..1].to_ascii_lowercase();
        format!("{value}{letter}")
    }

    /// `"10KiB"`
    pub fn parted(&self) -> String {
        let (value, unit) = self.scaled();
        format!("{value}{unit}")
    }

    pub fn report(&self) -> SizeReport {
        SizeReport {
            size: self.human(),
            bytes: self.0,
            lvm: self.lvm(),
            parted: self.parted(),
        }
    }
}

impl FromStr for Size {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Size::parse(s)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human())
    }
}
