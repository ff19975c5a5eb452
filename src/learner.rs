//! Pattern learning (C7): fingerprinting, similarity, and the bypass
//! decision. Deterministic, I/O-free functions — the pipeline is
//! responsible for fetching patterns from the `Store` and persisting
//! outcomes back through it.

use std::collections::HashSet;

use crate::database::RemediationPattern;

/// Labels dropped from the fingerprint once a richer structural label is
/// present — they identify *which* instance, not *what kind* of symptom.
const INSTANCE_SCOPED_LABELS: &[&str] = &["instance", "pod", "ip"];

/// Labels that identify the structure of the alert's target rather than a
/// specific instance of it; their presence means `INSTANCE_SCOPED_LABELS`
/// can be dropped without losing the ability to match future occurrences.
const STRUCTURAL_LABELS: &[&str] = &["host", "container", "service"];

/// Labels never included in the fingerprint: `alertname` is already the
/// fingerprint's prefix, and `severity` is excluded deliberately — the same
/// symptom can fire at escalating severities across occurrences, and a
/// severity-sensitive fingerprint would needlessly fragment the pattern
/// table instead of matching them together.
const ALWAYS_EXCLUDED: &[&str] = &["alertname", "severity"];

/// Builds the normalized, instance-agnostic symptom fingerprint for an
/// alert: sort its labels, drop instance-scoped ones when a structural
/// label is present, and join as `alert_name|key:value|...`.
pub fn symptom_fingerprint(alert_name: &str, labels: &serde_json::Value) -> String {
    let object = match labels.as_object() {
        Some(o) => o,
        None => return alert_name.to_string(),
    };

    let has_structural = object.keys().any(|k| STRUCTURAL_LABELS.contains(&k.as_str()));

    let mut tokens: Vec<String> = object
        .iter()
        .filter(|(k, _)| !ALWAYS_EXCLUDED.contains(&k.as_str()))
        .filter(|(k, _)| !(has_structural && INSTANCE_SCOPED_LABELS.contains(&k.as_str())))
        .map(|(k, v)| {
            let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            format!("{k}:{value}")
        })
        .collect();
    tokens.sort();

    if tokens.is_empty() {
        alert_name.to_string()
    } else {
        format!("{alert_name}|{}", tokens.join("|"))
    }
}

fn tokens(fingerprint: &str) -> HashSet<&str> {
    fingerprint.split('|').skip(1).collect()
}

/// Jaccard index of two fingerprints' `key:value` token sets. Two
/// fingerprints with no tokens at all (degenerate alerts with no labels
/// beyond `alertname`) are considered identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// `pattern.confidence` scaled by how closely the pattern's fingerprint
/// matches the incoming alert's fingerprint.
pub fn effective_confidence(pattern: &RemediationPattern, fingerprint: &str) -> f64 {
    pattern.confidence * similarity(&pattern.symptom_fingerprint, fingerprint)
}

#[derive(Debug, Clone)]
pub enum Decision {
    /// `effective_confidence >= high` — skip the LLM, build the plan
    /// straight from the pattern.
    Bypass(RemediationPattern),
    /// `medium <= effective_confidence < high` — still call the LLM, but
    /// pass the pattern along as context.
    Hint(RemediationPattern),
    /// No pattern cleared the medium threshold.
    Miss,
}

/// Picks the best-matching enabled pattern for `fingerprint` among
/// `candidates` (already filtered to the alert's `alert_name` and
/// `enabled = true` by the caller) and classifies it into bypass/hint/miss.
/// Ties on effective confidence favor the pattern with more prior usage,
/// then the more recently used one.
pub fn decide(
    candidates: &[RemediationPattern],
    fingerprint: &str,
    high_confidence: f64,
    medium_confidence: f64,
) -> Decision {
    let best = candidates
        .iter()
        .map(|p| (p, effective_confidence(p, fingerprint)))
        .max_by(|(a_pattern, a_eff), (b_pattern, b_eff)| {
            a_eff
                .partial_cmp(b_eff)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_pattern.usage_count.cmp(&b_pattern.usage_count))
                .then_with(|| a_pattern.last_used_at.cmp(&b_pattern.last_used_at))
        });

    match best {
        Some((pattern, eff)) if eff >= high_confidence => Decision::Bypass(pattern.clone()),
        Some((pattern, eff)) if eff >= medium_confidence => Decision::Hint(pattern.clone()),
        _ => Decision::Miss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn pattern(confidence: f64, fingerprint: &str, usage_count: i64) -> RemediationPattern {
        RemediationPattern {
            id: 1,
            alert_name: "ContainerUnhealthy".to_string(),
            category: "container".to_string(),
            symptom_fingerprint: fingerprint.to_string(),
            root_cause: "unhealthy container".to_string(),
            solution_commands: vec!["docker restart frigate".to_string()],
            target_host: Some("nexus".to_string()),
            risk_level: "low".to_string(),
            confidence,
            success_count: 4,
            failure_count: 0,
            usage_count,
            avg_execution_time_s: 1.2,
            enabled: true,
            created_by: "learner".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used_at: Some(Utc::now()),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn fingerprint_matches_spec_example_shape() {
        let labels = json!({
            "alertname": "ContainerUnhealthy",
            "container": "frigate",
            "host": "nexus",
            "job": "docker",
            "instance": "nexus:frigate",
        });
        let fp = symptom_fingerprint("ContainerUnhealthy", &labels);
        assert_eq!(fp, "ContainerUnhealthy|container:frigate|host:nexus|job:docker");
    }

    #[test]
    fn fingerprint_keeps_instance_scoped_labels_without_structural_label() {
        let labels = json!({"alertname": "HostDown", "instance": "ha.local"});
        let fp = symptom_fingerprint("HostDown", &labels);
        assert_eq!(fp, "HostDown|instance:ha.local");
    }

    #[test]
    fn identical_fingerprints_have_similarity_one() {
        let fp = "ContainerUnhealthy|container:frigate|host:nexus";
        assert_eq!(similarity(fp, fp), 1.0);
    }

    #[test]
    fn disjoint_fingerprints_have_similarity_zero() {
        let a = "ContainerUnhealthy|container:frigate|host:nexus";
        let b = "ContainerUnhealthy|container:omada|host:router";
        assert_eq!(similarity(a, b), 0.0);
    }

    #[test]
    fn partial_overlap_is_jaccard_index() {
        let a = "ContainerUnhealthy|container:frigate|host:nexus";
        let b = "ContainerUnhealthy|container:frigate|host:other";
        // shared: container:frigate. union: container:frigate, host:nexus, host:other (3)
        assert!((similarity(a, b) - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn high_effective_confidence_bypasses() {
        let fp = "ContainerUnhealthy|container:frigate|host:nexus";
        let patterns = vec![pattern(0.9, fp, 5)];
        assert!(matches!(decide(&patterns, fp, 0.75, 0.5), Decision::Bypass(_)));
    }

    #[test]
    fn medium_effective_confidence_hints() {
        let fp = "ContainerUnhealthy|container:frigate|host:nexus";
        // confidence 0.9 * similarity 0.6 = 0.54, between 0.5 and 0.75
        let other_fp = "ContainerUnhealthy|container:frigate|host:nexus|job:extra";
        let patterns = vec![pattern(0.9, other_fp, 5)];
        let decision = decide(&patterns, fp, 0.75, 0.5);
        assert!(matches!(decision, Decision::Hint(_)), "{decision:?}");
    }

    #[test]
    fn no_match_misses() {
        let fp = "ContainerUnhealthy|container:frigate|host:nexus";
        let other_fp = "ContainerUnhealthy|container:totally-different|host:elsewhere";
        let patterns = vec![pattern(0.9, other_fp, 5)];
        assert!(matches!(decide(&patterns, fp, 0.75, 0.5), Decision::Miss));
    }

    #[test]
    fn ties_prefer_higher_usage_count() {
        let fp = "ContainerUnhealthy|container:frigate|host:nexus";
        let low_usage = pattern(0.9, fp, 1);
        let high_usage = pattern(0.9, fp, 10);
        let decision = decide(&[low_usage, high_usage.clone()], fp, 0.75, 0.5);
        match decision {
            Decision::Bypass(p) => assert_eq!(p.usage_count, 10),
            other => panic!("expected bypass, got {other:?}"),
        }
    }
}
