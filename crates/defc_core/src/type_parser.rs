//! Compact field type notation.
//!
//! `an50` fixed alphanumeric, `an..50` alphanumeric up to 50, `a..20`
//! alphabetic, `n10` / `n..10` integer digits, `n..10,2` decimal with two
//! fraction digits, plus the named types `date`, `datetime`, `time`,
//! `boolean`, `uri`, `instance` and `any`.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static COMPACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(an|a|n)(\.\.)?(\d+)(?:,(\d+))?$").expect("static regex is valid")
});

/// Largest digit count that still fits the `int` data type.
const INT_MAX_DIGITS: u32 = 9;
/// Largest total digit count mapped to `float` rather than `double`.
const FLOAT_MAX_DIGITS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Alpha,
    AlphaNumeric,
    Numeric,
    Date,
    DateTime,
    Time,
    Boolean,
    Uri,
    Instance,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    /// Maximum length (alpha) or total digit count (numeric).
    pub max_length: Option<u32>,
    /// Fraction digits for decimals.
    pub precision: Option<u32>,
    /// `true` for the `..N` form, `false` for a fixed length.
    pub variable_length: bool,
}

impl TypeDescriptor {
    fn named(kind: TypeKind) -> Self {
        Self {
            kind,
            max_length: None,
            precision: None,
            variable_length: false,
        }
    }

    pub fn is_alpha(&self) -> bool {
        matches!(self.kind, TypeKind::Alpha | TypeKind::AlphaNumeric)
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == TypeKind::Numeric
    }

    pub fn is_floating_point(&self) -> bool {
        self.is_numeric() && self.precision.is_some_and(|p| p > 0)
    }

    /// Name of the dictionary data type this descriptor resolves to.
    pub fn data_type_name(&self) -> &'static str {
        match self.kind {
            TypeKind::Alpha | TypeKind::AlphaNumeric => "text",
            TypeKind::Numeric => {
                let digits = self.max_length.unwrap_or(INT_MAX_DIGITS);
                if self.is_floating_point() {
                    if digits <= FLOAT_MAX_DIGITS {
                        "float"
                    } else {
                        "double"
                    }
                } else if digits <= INT_MAX_DIGITS {
                    "int"
                } else {
                    "long"
                }
            }
            TypeKind::Date => "date",
            TypeKind::DateTime => "datetime",
            TypeKind::Time => "time",
            TypeKind::Boolean => "boolean",
            TypeKind::Uri => "uri",
            TypeKind::Instance => "instance",
            TypeKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeParseError {
    #[error("empty type declaration")]
    Empty,

    #[error("unknown type '{0}'")]
    Unknown(String),

    #[error("invalid length in type '{0}'")]
    InvalidLength(String),

    #[error("fraction digits are only allowed on numeric types: '{0}'")]
    PrecisionNotAllowed(String),

    #[error("fraction digits exceed total digits in '{0}'")]
    PrecisionTooLarge(String),
}

/// Parse a compact type declaration. Case-insensitive, surrounding
/// whitespace ignored.
pub fn parse(raw: &str) -> Result<TypeDescriptor, TypeParseError> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(TypeParseError::Empty);
    }

    let named = match normalized.as_str() {
        "date" => Some(TypeKind::Date),
        "datetime" | "date_time" => Some(TypeKind::DateTime),
        "time" => Some(TypeKind::Time),
        "boolean" | "bool" => Some(TypeKind::Boolean),
        "uri" => Some(TypeKind::Uri),
        "instance" | "object" => Some(TypeKind::Instance),
        "any" => Some(TypeKind::Any),
        _ => None,
    };
    if let Some(kind) = named {
        return Ok(TypeDescriptor::named(kind));
    }

    let caps = COMPACT
        .captures(&normalized)
        .ok_or_else(|| TypeParseError::Unknown(raw.trim().to_string()))?;

    let kind = match &caps[1] {
        "an" => TypeKind::AlphaNumeric,
        "a" => TypeKind::Alpha,
        _ => TypeKind::Numeric,
    };
    let length: u32 = caps[3]
        .parse()
        .map_err(|_| TypeParseError::InvalidLength(raw.trim().to_string()))?;
    if length == 0 {
        return Err(TypeParseError::InvalidLength(raw.trim().to_string()));
    }
    let precision = match caps.get(4) {
        None => None,
        Some(_) if kind != TypeKind::Numeric => {
            return Err(TypeParseError::PrecisionNotAllowed(raw.trim().to_string()))
        }
        Some(p) => {
            let p: u32 = p
                .as_str()
                .parse()
                .map_err(|_| TypeParseError::InvalidLength(raw.trim().to_string()))?;
            if p >= length {
                return Err(TypeParseError::PrecisionTooLarge(raw.trim().to_string()));
            }
            Some(p)
        }
    };

    Ok(TypeDescriptor {
        kind,
        max_length: Some(length),
        precision,
        variable_length: caps.get(2).is_some(),
    })
}
