//! Best-effort extraction of server metrics from raw console text.
//!
//! The supervised server is an opaque log stream; these scanners look for
//! known marker substrings, walking lines from most recent to oldest so the
//! latest value wins. Each returns [`UNKNOWN`] when nothing matches, so
//! reports stay well-formed even if the server never printed the requested
//! data. Malformed candidate lines are skipped, never a panic.

/// Sentinel returned when a metric cannot be found in the console text.
pub const UNKNOWN: &str = "неизвестно";

/// Extract the `<online>/<max>` player count from the most recent `list`
/// response, e.g. `[Server thread/INFO]: There are 3/20 players online:`.
pub fn parse_online_players(console_text: &str) -> String {
    const MARKER: &str = "There are ";
    for line in console_text.lines().rev() {
        if let Some(pos) = line.find(MARKER) {
            let rest = &line[pos + MARKER.len()..];
            // The count token ends at the next space ("3/20 players online:").
            if let Some(end) = rest.find(' ') {
                return rest[..end].to_string();
            }
        }
    }
    UNKNOWN.to_string()
}

/// Extract the most recent `Current Memory Usage: ...` value (rest of line).
pub fn parse_memory(console_text: &str) -> String {
    const MARKER: &str = "Current Memory Usage: ";
    for line in console_text.lines().rev() {
        if let Some(pos) = line.find(MARKER) {
            return line[pos + MARKER.len()..].to_string();
        }
    }
    UNKNOWN.to_string()
}

/// Extract the 1-minute TPS average from a line like
/// `TPS from last 1m, 5m, 15m: 19.99, 20.00, 20.00`.
///
/// The values live in the last colon-delimited segment and must come as at
/// least three comma-separated numbers; lines mentioning TPS without that
/// shape (e.g. a player running `/tps` being echoed) are skipped.
pub fn parse_tps(console_text: &str) -> String {
    for line in console_text.lines().rev() {
        if !line.contains("TPS") {
            continue;
        }
        let Some((_, values)) = line.rsplit_once(':') else {
            continue;
        };
        let values: Vec<&str> = values.trim().split(',').collect();
        if values.len() >= 3 {
            if let Some(first) = values.first() {
                return first.trim().to_string();
            }
        }
    }
    UNKNOWN.to_string()
}
