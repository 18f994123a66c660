//! Formatting helpers for rationale strings and renderers.

/// Format a byte count with a binary unit suffix (e.g., "1.5G").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if value >= 10.0 || value.fract() == 0.0 {
        format!("{:.0}{}", value, UNITS[unit])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Format an age in seconds as whole days, hours or minutes (e.g., "412d").
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Format an optional age, or an em dash if missing.
pub fn format_age_opt(secs: Option<i64>) -> String {
    match secs {
        Some(secs) => format_age(secs),
        None => "\u{2014}".to_string(),
    }
}
