use crate::report::MemberStat;

/// Compact human duration: `1d 2h 5m`. Seconds are dropped; anything under a
/// minute renders as `0m`.
pub fn format_duration(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.join(" ")
}

/// Render stats as CSV with a header row.
pub fn stats_csv(stats: &[MemberStat]) -> String {
    let mut out = String::from("member_id,total_seconds,total_human,holding\n");
    for s in stats {
        out.push_str(&format!(
            "{},{},{},{}\n",
            s.member,
            s.total_seconds,
            format_duration(s.total_seconds),
            s.holding
        ));
    }
    out
}
