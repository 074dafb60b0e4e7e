//! Value validation.
//!
//! # Responsibilities
//! - Syntactic checks per value type (tokens, digits, units, ranges)
//! - Host-dependent checks (GPU indices, bound ports)
//! - Cross-field checks against the current snapshot (memory budget)
//!
//! # Design Decisions
//! - Pure functions: nothing here mutates the snapshot or caches host facts
//! - Syntax is split from host checks so defaults can be verified without a host
//! - Canonical form preserves the caller's literal except where the value is
//!   plainly numeric (integers, ports)

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::host::{HostError, HostIntrospector};
use crate::config::schema::{Constraint, CrossField, SchemaEntry, SizeUnit, ValueType};
use crate::config::value::{ConfigSnapshot, RawValue, StoredValue, TypedValue};

/// Why a candidate value was rejected. Informational only: callers see a
/// single "invalid value" outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: ValueType, got: &'static str },

    #[error("malformed {expected} `{got}`: {reason}")]
    Malformed {
        expected: ValueType,
        got: String,
        reason: &'static str,
    },

    #[error("`{got}` is outside {range}")]
    OutOfRange { got: String, range: String },

    #[error("reservations total {requested} bytes, host has {total} bytes of memory")]
    MemoryOversubscribed { requested: u64, total: u64 },

    #[error("device gpu{index} does not exist, host has {available} GPU(s)")]
    DeviceOutOfRange { index: u32, available: u32 },

    #[error("{got} devices given, at most {max} allowed")]
    TooManyDevices { got: usize, max: usize },

    #[error("port {port} is already bound on this host")]
    PortInUse { port: u16 },

    #[error("host fact unavailable: {0}")]
    HostUnavailable(#[from] HostError),
}

/// Token set accepted for booleans, matched case-insensitively.
const BOOLEAN_TOKENS: [(&str, bool); 8] = [
    ("true", true),
    ("false", false),
    ("on", true),
    ("off", false),
    ("yes", true),
    ("no", false),
    ("1", true),
    ("0", false),
];

const PORT_MIN_EXCLUSIVE: i64 = 1024;
const PORT_MAX_EXCLUSIVE: i64 = 65535;
const UTC_MAX_EAST: i8 = 14;
const UTC_MAX_WEST: i8 = 12;

/// Full validation of a candidate for `entry`: syntax, host facts and
/// cross-field invariants against `snapshot`.
pub fn validate(
    entry: &SchemaEntry,
    raw: &RawValue,
    snapshot: &ConfigSnapshot,
    host: &dyn HostIntrospector,
) -> Result<StoredValue, ValidationError> {
    let stored = parse_syntax(entry, raw)?;
    check_host_facts(entry, &stored, snapshot, host)?;
    if let CrossField::MemoryBudget { partner } = &entry.cross_field {
        check_memory_budget(entry, partner, &stored, snapshot, host)?;
    }
    Ok(stored)
}

/// Host-independent checks. Defaults are verified with this alone.
pub fn parse_syntax(entry: &SchemaEntry, raw: &RawValue) -> Result<StoredValue, ValidationError> {
    match (entry.value_type, entry.constraint) {
        (ValueType::Boolean, _) => parse_boolean(raw),
        (ValueType::Integer, Constraint::Integer { min, max }) => parse_integer(raw, min, max),
        (ValueType::SizeBytes, Constraint::SizeBytes { bare_unit, min, max }) => {
            parse_size(raw, bare_unit, min, max)
        }
        (ValueType::Port, _) => parse_port(raw),
        (ValueType::DeviceList, Constraint::DeviceList { max_devices }) => parse_devices(raw, max_devices),
        (ValueType::Duration, Constraint::Duration { min_ms, max_ms }) => parse_duration(raw, min_ms, max_ms),
        (ValueType::Path, _) => parse_path(raw),
        (ValueType::FreeString, _) => {
            let text = raw.render();
            Ok(StoredValue::new(text.clone(), TypedValue::Text(text)))
        }
        (ValueType::Timezone, _) => parse_timezone(raw),
        (ValueType::IpAddress, _) => parse_ip(raw),
        // A registry never pairs a type with a foreign constraint; fall back
        // to the type's own default constraint.
        (value_type, _) => {
            let fallback = SchemaEntry {
                constraint: Constraint::default_for(value_type),
                ..entry.clone()
            };
            parse_syntax(&fallback, raw)
        }
    }
}

fn check_host_facts(
    entry: &SchemaEntry,
    stored: &StoredValue,
    snapshot: &ConfigSnapshot,
    host: &dyn HostIntrospector,
) -> Result<(), ValidationError> {
    match (&stored.typed, entry.constraint) {
        (TypedValue::Devices(indices), _) => {
            let available = host.gpu_device_count()?;
            if let Some(&index) = indices.iter().find(|&&i| i >= available) {
                return Err(ValidationError::DeviceOutOfRange { index, available });
            }
        }
        (TypedValue::Port(port), Constraint::Port { exclusive }) => {
            let current = snapshot.typed(entry.category, &entry.key).and_then(TypedValue::as_port);
            if current == Some(*port) {
                return Ok(());
            }
            if exclusive {
                if host.bound_ports()?.contains(port) {
                    return Err(ValidationError::PortInUse { port: *port });
                }
            } else if host.bound_ports().is_ok_and(|bound| bound.contains(port)) {
                tracing::warn!(
                    field = %entry.path(),
                    port,
                    "Port is already bound on this host; the consumer may fail to listen"
                );
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_memory_budget(
    entry: &SchemaEntry,
    partner: &str,
    stored: &StoredValue,
    snapshot: &ConfigSnapshot,
    host: &dyn HostIntrospector,
) -> Result<(), ValidationError> {
    let candidate = stored.typed.as_bytes().unwrap_or(0);
    let partner_bytes = snapshot
        .typed(entry.category, partner)
        .and_then(TypedValue::as_bytes)
        .unwrap_or(0);
    let requested = candidate.saturating_add(partner_bytes);

    let total = host.total_memory_bytes()?;
    if requested > total {
        return Err(ValidationError::MemoryOversubscribed { requested, total });
    }

    if let Ok(available) = host.available_memory_bytes() {
        if requested > available {
            tracing::warn!(
                field = %entry.path(),
                requested,
                available,
                "Reservations exceed currently available memory"
            );
        }
    }
    Ok(())
}

fn type_mismatch(expected: ValueType, raw: &RawValue) -> ValidationError {
    ValidationError::TypeMismatch {
        expected,
        got: raw.kind(),
    }
}

fn malformed(expected: ValueType, got: &str, reason: &'static str) -> ValidationError {
    ValidationError::Malformed {
        expected,
        got: got.to_string(),
        reason,
    }
}

/// Non-empty run of ASCII digits. Signs, whitespace and decimal points are
/// all rejected.
fn parse_digits(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Split `"256MB"` into `("256", "MB")`.
fn split_magnitude(literal: &str) -> (&str, &str) {
    let end = literal
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(literal.len());
    literal.split_at(end)
}

/// Literal for types that accept either a non-negative integer or a string.
fn numeric_literal(expected: ValueType, raw: &RawValue) -> Result<String, ValidationError> {
    match raw {
        RawValue::Str(s) => Ok(s.clone()),
        RawValue::Int(n) if *n >= 0 => Ok(n.to_string()),
        RawValue::Int(n) => Err(ValidationError::OutOfRange {
            got: n.to_string(),
            range: "non-negative values".into(),
        }),
        other => Err(type_mismatch(expected, other)),
    }
}

fn parse_boolean(raw: &RawValue) -> Result<StoredValue, ValidationError> {
    match raw {
        RawValue::Bool(b) => Ok(StoredValue::new(b.to_string(), TypedValue::Bool(*b))),
        RawValue::Int(n @ (0 | 1)) => Ok(StoredValue::new(n.to_string(), TypedValue::Bool(*n == 1))),
        RawValue::Int(n) => Err(ValidationError::OutOfRange {
            got: n.to_string(),
            range: "{0, 1}".into(),
        }),
        RawValue::Str(s) => BOOLEAN_TOKENS
            .iter()
            .find(|(token, _)| token.eq_ignore_ascii_case(s))
            .map(|&(_, value)| StoredValue::new(s.clone(), TypedValue::Bool(value)))
            .ok_or_else(|| malformed(ValueType::Boolean, s, "expected true/false, on/off, yes/no or 0/1")),
        other => Err(type_mismatch(ValueType::Boolean, other)),
    }
}

fn parse_integer(raw: &RawValue, min: i64, max: i64) -> Result<StoredValue, ValidationError> {
    let n = match raw {
        RawValue::Int(n) => *n,
        RawValue::Str(s) => parse_digits(s).ok_or_else(|| malformed(ValueType::Integer, s, "expected decimal digits"))?,
        other => return Err(type_mismatch(ValueType::Integer, other)),
    };
    if n < min || n > max {
        return Err(ValidationError::OutOfRange {
            got: n.to_string(),
            range: format!("[{min}, {max}]"),
        });
    }
    Ok(StoredValue::new(n.to_string(), TypedValue::Integer(n)))
}

fn parse_size(
    raw: &RawValue,
    bare_unit: SizeUnit,
    min: Option<u64>,
    max: Option<u64>,
) -> Result<StoredValue, ValidationError> {
    let literal = numeric_literal(ValueType::SizeBytes, raw)?;
    let (magnitude, suffix) = split_magnitude(&literal);
    if magnitude.is_empty() {
        return Err(malformed(ValueType::SizeBytes, &literal, "expected a non-negative magnitude"));
    }
    let unit = if suffix.is_empty() {
        bare_unit
    } else {
        SizeUnit::parse(suffix).ok_or_else(|| malformed(ValueType::SizeBytes, &literal, "unknown unit"))?
    };

    let out_of_range = || ValidationError::OutOfRange {
        got: literal.clone(),
        range: format!("[{}, {}] bytes", min.unwrap_or(0), max.unwrap_or(u64::MAX)),
    };
    let bytes = magnitude
        .parse::<u64>()
        .ok()
        .and_then(|m| m.checked_mul(unit.multiplier()))
        .ok_or_else(out_of_range)?;
    if min.is_some_and(|min| bytes < min) || max.is_some_and(|max| bytes > max) {
        return Err(out_of_range());
    }

    Ok(StoredValue::new(literal.clone(), TypedValue::Bytes(bytes)))
}

fn parse_port(raw: &RawValue) -> Result<StoredValue, ValidationError> {
    let n = match raw {
        RawValue::Int(n) => *n,
        RawValue::Str(s) => parse_digits(s).ok_or_else(|| malformed(ValueType::Port, s, "expected decimal digits"))?,
        other => return Err(type_mismatch(ValueType::Port, other)),
    };
    if n <= PORT_MIN_EXCLUSIVE || n >= PORT_MAX_EXCLUSIVE {
        return Err(ValidationError::OutOfRange {
            got: n.to_string(),
            range: format!("({PORT_MIN_EXCLUSIVE}, {PORT_MAX_EXCLUSIVE})"),
        });
    }
    let port = u16::try_from(n).map_err(|_| ValidationError::OutOfRange {
        got: n.to_string(),
        range: "u16".into(),
    })?;
    Ok(StoredValue::new(port.to_string(), TypedValue::Port(port)))
}

fn parse_devices(raw: &RawValue, max_devices: usize) -> Result<StoredValue, ValidationError> {
    let literal = match raw {
        RawValue::Str(s) => s,
        other => return Err(type_mismatch(ValueType::DeviceList, other)),
    };
    if literal.is_empty() {
        return Err(malformed(ValueType::DeviceList, literal, "no device given"));
    }

    let mut indices = Vec::new();
    for token in literal.split(',') {
        let index = token
            .strip_prefix("gpu")
            .and_then(parse_digits)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(ValueType::DeviceList, literal, "expected gpu<N>"))?;
        if indices.contains(&index) {
            return Err(malformed(ValueType::DeviceList, literal, "duplicate device"));
        }
        indices.push(index);
    }

    if indices.len() > max_devices {
        return Err(ValidationError::TooManyDevices {
            got: indices.len(),
            max: max_devices,
        });
    }
    Ok(StoredValue::new(literal.clone(), TypedValue::Devices(indices)))
}

/// Bare digits are seconds; anything else goes through `humantime`
/// (`500ms`, `90s`, `1h30m`). Signs and whitespace are rejected up front.
fn parse_duration(raw: &RawValue, min_ms: u64, max_ms: u64) -> Result<StoredValue, ValidationError> {
    let literal = numeric_literal(ValueType::Duration, raw)?;
    if !literal.bytes().next().is_some_and(|b| b.is_ascii_digit())
        || !literal.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(malformed(ValueType::Duration, &literal, "expected digits followed by a unit"));
    }

    let out_of_range = || ValidationError::OutOfRange {
        got: literal.clone(),
        range: format!("[{min_ms}, {max_ms}] ms"),
    };
    let duration = match parse_digits(&literal) {
        Some(secs) => Duration::from_secs(u64::try_from(secs).map_err(|_| out_of_range())?),
        None => humantime::parse_duration(&literal)
            .map_err(|_| malformed(ValueType::Duration, &literal, "expected units such as ms, s, m or h"))?,
    };

    let millis = u64::try_from(duration.as_millis()).map_err(|_| out_of_range())?;
    if millis < min_ms || millis > max_ms {
        return Err(out_of_range());
    }
    Ok(StoredValue::new(literal.clone(), TypedValue::Duration(duration)))
}

fn parse_path(raw: &RawValue) -> Result<StoredValue, ValidationError> {
    let path = match raw {
        RawValue::Str(s) => s,
        other => return Err(type_mismatch(ValueType::Path, other)),
    };
    if path.is_empty() {
        return Err(malformed(ValueType::Path, path, "empty path"));
    }
    if path.contains('\0') {
        return Err(malformed(ValueType::Path, path, "contains NUL"));
    }
    Ok(StoredValue::new(path.clone(), TypedValue::Path(PathBuf::from(path))))
}

fn parse_timezone(raw: &RawValue) -> Result<StoredValue, ValidationError> {
    let zone = match raw {
        RawValue::Str(s) => s,
        other => return Err(type_mismatch(ValueType::Timezone, other)),
    };
    if zone == "UTC" {
        return Ok(StoredValue::new(zone.clone(), TypedValue::Timezone(0)));
    }

    let invalid = || malformed(ValueType::Timezone, zone, "expected UTC, UTC+N or UTC-N");
    let offset = zone.strip_prefix("UTC").ok_or_else(invalid)?;
    let (east, digits) = if let Some(digits) = offset.strip_prefix('+') {
        (true, digits)
    } else if let Some(digits) = offset.strip_prefix('-') {
        (false, digits)
    } else {
        return Err(invalid());
    };
    if parse_digits(digits).is_none() || (digits.len() > 1 && digits.starts_with('0')) {
        return Err(invalid());
    }

    let limit = if east { UTC_MAX_EAST } else { UTC_MAX_WEST };
    let hours = digits
        .parse::<i8>()
        .ok()
        .filter(|h| *h <= limit)
        .ok_or_else(|| ValidationError::OutOfRange {
            got: zone.clone(),
            range: "UTC-12..UTC+14".into(),
        })?;
    let offset = if east { hours } else { -hours };
    Ok(StoredValue::new(zone.clone(), TypedValue::Timezone(offset)))
}

fn parse_ip(raw: &RawValue) -> Result<StoredValue, ValidationError> {
    let literal = match raw {
        RawValue::Str(s) => s,
        other => return Err(type_mismatch(ValueType::IpAddress, other)),
    };
    let ip: IpAddr = literal
        .parse()
        .map_err(|_| malformed(ValueType::IpAddress, literal, "expected an IPv4 or IPv6 address"))?;
    Ok(StoredValue::new(literal.clone(), TypedValue::Ip(ip)))
}
