use crate::models::{DriftReport, DriftThresholds, EndpointSnapshot, SnapshotState};

/// `secondary - primary`, saturated into `i64`.
fn signed_diff(secondary: u64, primary: u64) -> i64 {
    let diff = i128::from(secondary) - i128::from(primary);
    diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

fn offline_warning(role: &str, snapshot: &EndpointSnapshot) -> Option<String> {
    match &snapshot.state {
        SnapshotState::Connected(_) => None,
        SnapshotState::Disconnected(err) => Some(format!(
            "{} endpoint '{}' ({}) is offline: {} [{}]",
            role,
            snapshot.nickname,
            snapshot.url,
            err,
            err.kind()
        )),
    }
}

/// Compares one secondary against the primary.
///
/// `consistent_chain` speaks only to chain identity and reachability; drift
/// beyond a threshold adds a warning but never flips it.
pub fn analyze(
    primary: &EndpointSnapshot,
    secondary: &EndpointSnapshot,
    thresholds: &DriftThresholds,
) -> DriftReport {
    let mut report = DriftReport {
        primary_label: primary.nickname.clone(),
        primary_url: primary.url.clone(),
        secondary_label: secondary.nickname.clone(),
        secondary_url: secondary.url.clone(),
        block_diff: None,
        time_diff_sec: None,
        consistent_chain: false,
        warnings: Vec::new(),
    };

    let (p, s) = match (primary.head(), secondary.head()) {
        (Some(p), Some(s)) => (p, s),
        _ => {
            report.warnings.extend(offline_warning("primary", primary));
            report.warnings.extend(offline_warning("secondary", secondary));
            return report;
        }
    };

    let block_diff = signed_diff(s.block_number, p.block_number);
    let time_diff = signed_diff(s.block_timestamp, p.block_timestamp);
    report.block_diff = Some(block_diff);
    report.time_diff_sec = Some(time_diff);

    if p.chain_id != s.chain_id {
        report.warnings.push(format!(
            "chain id mismatch: primary '{}' reports {}, secondary '{}' reports {}",
            primary.nickname, p.chain_id, secondary.nickname, s.chain_id
        ));
        return report;
    }

    report.consistent_chain = true;

    if let Some(max) = thresholds.max_block_drift {
        if block_diff.unsigned_abs() > max {
            report.warnings.push(format!(
                "block drift of {} blocks exceeds threshold of {}",
                block_diff, max
            ));
        }
    }
    if let Some(max) = thresholds.max_time_drift_sec {
        if time_diff.unsigned_abs() > max {
            report.warnings.push(format!(
                "time drift of {}s exceeds threshold of {}s",
                time_diff, max
            ));
        }
    }

    report
}

/// Star topology: the first snapshot is the primary and every other
/// snapshot is compared against it, never against each other.
pub fn analyze_star(snapshots: &[EndpointSnapshot], thresholds: &DriftThresholds) -> Vec<DriftReport> {
    match snapshots.split_first() {
        Some((primary, secondaries)) => secondaries
            .iter()
            .map(|secondary| analyze(primary, secondary, thresholds))
            .collect(),
        None => Vec::new(),
    }
}
