use anyhow::{Result, bail};
use pkg_constants::quota::{MAX_QUOTA, UNBOUNDED_MARKER};
use std::fmt;
use std::str::FromStr;

/// A Kubernetes-style resource quantity (`"500m"`, `"4"`, `"10Gi"`).
///
/// Amounts at or above [`MAX_QUOTA`] collapse into [`Quantity::Unbounded`],
/// written as `N/A` on the wire and as the numeric ceiling in storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Quantity {
    Unbounded,
    Finite { raw: String, value: f64 },
}

/// Which textual form a quantity is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityForm {
    /// Client-facing form: unbounded is `N/A`.
    Wire,
    /// Persisted form: unbounded is the numeric ceiling.
    Stored,
}

impl Quantity {
    pub fn zero() -> Self {
        Quantity::Finite {
            raw: "0".to_string(),
            value: 0.0,
        }
    }

    /// Parse a quantity; a missing or blank value counts as zero.
    pub fn parse_or_zero(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::zero()),
            Some(v) => v.parse(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Quantity::Unbounded)
    }

    /// Comparable magnitude in base units. Unbounded is infinite.
    pub fn value(&self) -> f64 {
        match self {
            Quantity::Unbounded => f64::INFINITY,
            Quantity::Finite { value, .. } => *value,
        }
    }

    pub fn render(&self, form: QuantityForm) -> String {
        match (self, form) {
            (Quantity::Unbounded, QuantityForm::Wire) => UNBOUNDED_MARKER.to_string(),
            (Quantity::Unbounded, QuantityForm::Stored) => MAX_QUOTA.to_string(),
            (Quantity::Finite { raw, .. }, _) => raw.clone(),
        }
    }

    /// Human-readable magnitude, used in validation messages.
    pub fn describe(value: f64) -> String {
        if value.is_infinite() || value >= MAX_QUOTA as f64 {
            UNBOUNDED_MARKER.to_string()
        } else {
            format!("{:.1}", value)
        }
    }
}

/// Rewrite a quantity string into `form`. Unparseable values are returned
/// unchanged so the validator can report them.
pub fn normalize(value: &str, form: QuantityForm) -> String {
    match value.parse::<Quantity>() {
        Ok(q) => q.render(form),
        Err(_) => value.to_string(),
    }
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let m = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0f64.powi(4),
        "Pi" => 1024.0f64.powi(5),
        "Ei" => 1024.0f64.powi(6),
        _ => return None,
    };
    Some(m)
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(UNBOUNDED_MARKER) {
            return Ok(Quantity::Unbounded);
        }
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+'))
            .unwrap_or(s.len());
        let (amount_str, suffix) = s.split_at(split);
        if amount_str.is_empty() {
            bail!("quantity '{}' has no numeric amount", s);
        }
        let amount: f64 = amount_str
            .parse()
            .map_err(|_| anyhow::anyhow!("quantity '{}' has an invalid amount", s))?;
        let Some(multiplier) = suffix_multiplier(suffix) else {
            bail!("quantity '{}' has an unknown suffix '{}'", s, suffix);
        };
        if amount >= MAX_QUOTA as f64 {
            return Ok(Quantity::Unbounded);
        }
        Ok(Quantity::Finite {
            raw: s.to_string(),
            value: amount * multiplier,
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(QuantityForm::Wire))
    }
}
