use crate::error::ReportError;

/// Five years of calendar days.
pub const MAX_HORIZON_DAYS: usize = 1825;

/// Parse a horizon into calendar days.
/// "15d" → 15 | "2w" → 14 | "1m" → 30 | "1y" → 365 | "45" → 45
pub fn parse_horizon(input: &str) -> Result<usize, ReportError> {
    let s = input.trim().to_lowercase();
    let invalid = |why: &str| ReportError::InvalidHorizon(format!("{:?} {}", input.trim(), why));

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        return Err(invalid("must start with a number (e.g. 15d, 1m, 1y)"));
    }

    let value: usize = num.parse().map_err(|_| invalid("is too large"))?;
    let per_unit = match unit.trim() {
        "" | "d" => 1,
        "w" => 7,
        "m" => 30,
        "y" => 365,
        _ => return Err(invalid("has an unsupported unit (use d, w, m or y)")),
    };

    let days = value
        .checked_mul(per_unit)
        .ok_or_else(|| invalid("is too large"))?;
    if days == 0 || days > MAX_HORIZON_DAYS {
        return Err(invalid(&format!("must be between 1 and {} days", MAX_HORIZON_DAYS)));
    }
    Ok(days)
}
