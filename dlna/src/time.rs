//! Conversion between seconds and the `H+:MM:SS[.F+]` strings UPnP AV uses.

/// Value devices report when they cannot provide a time
pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

/// Formats whole seconds as zero-padded `HH:MM:SS`
pub fn format_seconds(seconds: u64) -> String {
  let hours = seconds / 3600;
  let minutes = (seconds % 3600) / 60;
  let secs = seconds % 60;
  format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Parses a time string into whole seconds, `None` when it carries no time.
///
/// Accepts `H:MM:SS`, `HH:MM:SS` and fractional seconds (`.mmm` or `.F0/F1`),
/// which are truncated.
pub fn try_parse_time_string(value: &str) -> Option<u64> {
  let value = value.trim();
  if value.is_empty() || value.eq_ignore_ascii_case(NOT_IMPLEMENTED) {
    return None;
  }

  let value = value.strip_prefix('+').unwrap_or(value);
  let parts: Vec<&str> = value.split(':').collect();
  if parts.len() < 3 {
    return None;
  }

  let hours: u64 = parts[0].trim().parse().ok()?;
  let minutes: u64 = parts[1].trim().parse().ok()?;
  let seconds: u64 = parts[2].split('.').next()?.trim().parse().ok()?;

  if minutes >= 60 || seconds >= 60 {
    return None;
  }

  hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

/// Lenient variant: anything unparseable (including `NOT_IMPLEMENTED`) is 0
pub fn parse_time_string(value: &str) -> u64 {
  try_parse_time_string(value).unwrap_or(0)
}
