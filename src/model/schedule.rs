//! Friendly schedule expressions
//!
//! `daily`, `weekly on monday at 09:30`, `every 15 minutes` and friends are
//! turned into five-field cron expressions. Plain cron passes through after
//! a shape check.

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// Convert a schedule expression to cron
pub fn to_cron(expression: &str) -> Result<String, String> {
    let normalized = expression.trim().to_ascii_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    match words.as_slice() {
        ["hourly"] => Ok("0 * * * *".to_string()),
        ["daily"] => Ok("0 0 * * *".to_string()),
        ["weekly"] => Ok("0 0 * * 0".to_string()),
        ["daily", "at", time] => {
            let (hour, minute) = parse_time(time)?;
            Ok(format!("{minute} {hour} * * *"))
        }
        ["weekly", "on", day] => Ok(format!("0 0 * * {}", weekday(day)?)),
        ["weekly", "on", day, "at", time] => {
            let (hour, minute) = parse_time(time)?;
            Ok(format!("{minute} {hour} * * {}", weekday(day)?))
        }
        ["every", amount, unit] => interval(amount, unit),
        ["every", compact] => {
            let split = compact
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| format!("missing unit in `{expression}`"))?;
            let (amount, unit) = compact.split_at(split);
            interval(amount, unit)
        }
        _ if words.len() == 5 => {
            validate_cron(&words)?;
            Ok(words.join(" "))
        }
        _ => Err(format!("unrecognized schedule `{expression}`")),
    }
}

/// Whether `expression` uses the friendly syntax rather than raw cron
pub fn is_friendly(expression: &str) -> bool {
    let first = expression.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
    matches!(first.as_str(), "hourly" | "daily" | "weekly" | "every")
}

fn interval(amount: &str, unit: &str) -> Result<String, String> {
    let amount: u32 = amount
        .parse()
        .map_err(|_| format!("invalid interval `{amount}`"))?;
    match unit {
        "m" | "min" | "mins" | "minute" | "minutes" => {
            if !(5..60).contains(&amount) {
                return Err("minute intervals must be between 5 and 59".to_string());
            }
            Ok(format!("*/{amount} * * * *"))
        }
        "h" | "hour" | "hours" => {
            if !(1..24).contains(&amount) {
                return Err("hour intervals must be between 1 and 23".to_string());
            }
            Ok(format!("0 */{amount} * * *"))
        }
        "d" | "day" | "days" if amount == 1 => Ok("0 0 * * *".to_string()),
        other => Err(format!("unsupported interval unit `{other}`")),
    }
}

fn parse_time(time: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = time
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got `{time}`"))?;
    let hour: u32 = hour.parse().map_err(|_| format!("invalid hour in `{time}`"))?;
    let minute: u32 = minute.parse().map_err(|_| format!("invalid minute in `{time}`"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("time `{time}` is out of range"));
    }
    Ok((hour, minute))
}

fn weekday(day: &str) -> Result<usize, String> {
    WEEKDAYS
        .iter()
        .position(|name| *name == day || name[..3] == *day)
        .ok_or_else(|| format!("unknown weekday `{day}`"))
}

fn validate_cron(fields: &[&str]) -> Result<(), String> {
    let valid = fields.iter().all(|field| {
        field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-' | '?'))
    });
    if valid {
        Ok(())
    } else {
        Err(format!("invalid cron expression `{}`", fields.join(" ")))
    }
}
