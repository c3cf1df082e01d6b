//! Shared utility functions for the warden-core daemon.

use tokio::process::Command;

/// Render a millisecond duration with the largest applicable unit first.
///
/// Unit suffixes match the Russian report strings sent to Telegram:
/// `1д 1ч 1м 1с` for a day, hours/minutes/seconds dropping leading units
/// that are not applicable.
pub fn format_duration(millis: u64) -> String {
    let mut seconds = millis / 1000;
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    if days > 0 {
        format!("{}д {}ч {}м {}с", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}ч {}м {}с", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}м {}с", minutes, seconds)
    } else {
        format!("{}с", seconds)
    }
}

/// Apply platform-specific flags to hide the console window on Windows.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_only() {
        assert_eq!(format_duration(0), "0с");
        assert_eq!(format_duration(999), "0с");
        assert_eq!(format_duration(59_999), "59с");
    }

    #[test]
    fn minutes_and_seconds() {
        assert_eq!(format_duration(60_000), "1м 0с");
        assert_eq!(format_duration(65_000), "1м 5с");
    }

    #[test]
    fn hours_minutes_seconds() {
        assert_eq!(format_duration(3_600_000), "1ч 0м 0с");
        assert_eq!(format_duration(3_661_000), "1ч 1м 1с");
    }

    #[test]
    fn days_take_over_past_24_hours() {
        assert_eq!(format_duration(86_400_000), "1д 0ч 0м 0с");
        assert_eq!(format_duration(90_061_000), "1д 1ч 1м 1с");
    }
}
