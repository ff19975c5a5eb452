//! Command-safety validator (C5).
//!
//! Blacklist-only: every command is permitted unless it matches one of the
//! patterns below. Self-protection patterns are checked first and are not
//! configurable — no environment variable or pattern list can disable them
//! (I3). Risk level is informational only; it never changes the accept/
//! reject outcome.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub ok: bool,
    pub reason: Option<String>,
    pub risk: Risk,
}

impl Verdict {
    fn allow(risk: Risk) -> Self {
        Self { ok: true, reason: None, risk }
    }

    fn reject(reason: &str, risk: Risk) -> Self {
        Self { ok: false, reason: Some(reason.to_string()), risk }
    }
}

struct Rule {
    pattern: Regex,
    reason: &'static str,
    risk: Risk,
}

fn rule(pattern: &str, reason: &'static str, risk: Risk) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("blacklist pattern must compile"),
        reason,
        risk,
    }
}

/// Self-protection: rejected unconditionally, checked ahead of every other
/// rule, and never made configurable. Matches any surface form of stopping,
/// restarting, or removing Jarvis itself, its database, the container
/// runtime on its own host, or the host OS — "docker stop jarvis",
/// "systemctl restart jarvis-db", "docker rm -f jarvis" all hit here.
static SELF_PROTECTION: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"(?i)\b(docker|podman|systemctl|service)\b.*\b(stop|restart|kill|rm|remove)\b.*\bjarvis\b",
            "self_protection_service",
            Risk::High,
        ),
        rule(
            r"(?i)\bjarvis\b.*\b(stop|restart|kill|rm|remove)\b",
            "self_protection_service",
            Risk::High,
        ),
        rule(
            r"(?i)\b(docker|podman|systemctl|service)\b.*\b(stop|restart|kill|rm|remove)\b.*\b(jarvis[_-]?db|jarvis[_-]?database)\b",
            "self_protection_database",
            Risk::High,
        ),
        rule(
            r"(?i)\b(docker|podman|containerd|crictl)\b.*\b(stop|kill|restart)\b\s*(daemon|service)?\s*$",
            "self_protection_runtime",
            Risk::High,
        ),
        rule(
            r"(?i)systemctl\s+(stop|restart)\s+(docker|podman|containerd)\b",
            "self_protection_runtime",
            Risk::High,
        ),
        rule(
            r"(?i)\b(reboot|poweroff|halt|shutdown)\b.*\bself\b|^\s*(reboot|poweroff|halt)\s*$",
            "self_protection_host",
            Risk::High,
        ),
    ]
});

/// General blacklist, checked after self-protection.
static BLACKLIST: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(?i)\brm\s+-[a-z]*r[a-z]*f\b|\brm\s+-[a-z]*f[a-z]*r\b", "destructive_rm", Risk::High),
        rule(r"(?i)\bmkfs(\.\w+)?\b", "destructive_mkfs", Risk::High),
        rule(r"(?i)\bdd\s+.*\bof=/dev/", "destructive_dd", Risk::High),
        rule(r"(?i)\bshred\b", "destructive_shred", Risk::High),
        rule(r"(?i)^\s*(reboot|poweroff|halt|shutdown)\b", "power_control", Risk::High),
        rule(r"(?i)\b(iptables|ip6tables|nft|ufw|firewall-cmd)\b", "firewall_rewrite", Risk::Medium),
        rule(
            r"(?i)\b(apt|apt-get|yum|dnf|apk|pacman)\b\s+(install|remove|purge|upgrade|update)",
            "package_management",
            Risk::Medium,
        ),
        rule(r"(?i)\bsed\s+-i\b", "in_place_rewrite", Risk::Medium),
        rule(r"(?i)\bawk\b.*-i\s*inplace", "in_place_rewrite", Risk::Medium),
        rule(
            r">>?\s*/etc/[\w./-]+",
            "in_place_rewrite",
            Risk::Medium,
        ),
    ]
});

/// Read-only sub-policy used for `run_diagnostic_command` tool calls — only
/// commands matching one of these are accepted, regardless of blacklist
/// status. Diagnostic execution never counts as a remediation attempt.
static DIAGNOSTIC_ALLOWLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^\s*docker\s+(ps|logs|inspect)\b").unwrap(),
        Regex::new(r"(?i)^\s*podman\s+(ps|logs|inspect)\b").unwrap(),
        Regex::new(r"(?i)^\s*systemctl\s+status\b").unwrap(),
        Regex::new(r"(?i)^\s*journalctl\b").unwrap(),
        Regex::new(r"(?i)^\s*curl\s+-I\b").unwrap(),
        Regex::new(r"(?i)^\s*ps\b").unwrap(),
        Regex::new(r"(?i)^\s*df\b").unwrap(),
        Regex::new(r"(?i)^\s*free\b").unwrap(),
        Regex::new(r"(?i)^\s*ls\b").unwrap(),
        Regex::new(r"(?i)^\s*cat\b").unwrap(),
    ]
});

/// Validates a command proposed for actionable execution.
pub fn validate(command: &str) -> Verdict {
    for r in SELF_PROTECTION.iter() {
        if r.pattern.is_match(command) {
            return Verdict::reject(r.reason, r.risk);
        }
    }
    for r in BLACKLIST.iter() {
        if r.pattern.is_match(command) {
            return Verdict::reject(r.reason, r.risk);
        }
    }
    Verdict::allow(classify_risk(command))
}

/// Validates a command proposed for the `run_diagnostic_command` tool —
/// the stricter allowlist, plus the self-protection checks stay active.
pub fn validate_diagnostic(command: &str) -> Verdict {
    for r in SELF_PROTECTION.iter() {
        if r.pattern.is_match(command) {
            return Verdict::reject(r.reason, r.risk);
        }
    }
    if DIAGNOSTIC_ALLOWLIST.iter().any(|p| p.is_match(command)) {
        return Verdict::allow(Risk::Low);
    }
    Verdict::reject("not_a_recognized_diagnostic", Risk::Medium)
}

/// Whether `command` changes system state (restart, start, move, write) as
/// opposed to being read-only. Used by the pipeline to partition a plan's
/// commands into diagnostic vs. actionable before execution — a command can
/// pass `validate` (not blacklisted) yet still be diagnostic.
pub fn is_actionable(command: &str) -> bool {
    !DIAGNOSTIC_ALLOWLIST.iter().any(|p| p.is_match(command))
}

/// Informational risk classification for a command that already passed the
/// blacklist — never changes the accept/reject outcome.
fn classify_risk(command: &str) -> Risk {
    static HIGH: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b(restart|kill|rm|remove|stop)\b").unwrap());
    static MEDIUM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b(start|move|write|truncate|prune)\b").unwrap());

    if HIGH.is_match(command) {
        Risk::High
    } else if MEDIUM.is_match(command) {
        Risk::Medium
    } else {
        Risk::Low
    }
}
