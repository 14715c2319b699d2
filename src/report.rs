use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::model::QueryResult;

/// 每类 IP 统计保留的条目数。
const TOP_N: usize = 5;

/// Post-hoc metadata computed over an aggregated result: tallies, chart
/// suggestions, and a coarse compliance score. Pure and deterministic; report
/// prose is left to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub severity_tally: BTreeMap<String, u64>,
    pub top_sources: Vec<IpCount>,
    pub top_destinations: Vec<IpCount>,
    pub suggested_charts: Vec<String>,
    pub compliance_score: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: u64,
}

impl ReportMeta {
    pub fn from_result(result: &QueryResult) -> Self {
        Self::from_records(&result.records)
    }

    pub fn from_records(records: &[Value]) -> Self {
        let severity_tally = tally_field(records, "severity");
        let top_sources = top_counts(tally_field(records, "src"));
        let top_destinations = top_counts(tally_field(records, "dst"));

        let mut suggested_charts = Vec::new();
        if !severity_tally.is_empty() {
            suggested_charts.push("severity_breakdown_pie".to_string());
        }
        if !top_sources.is_empty() {
            suggested_charts.push("top_sources_bar".to_string());
        }
        if !top_destinations.is_empty() {
            suggested_charts.push("top_destinations_bar".to_string());
        }
        if records.iter().any(|r| r.get("time").is_some()) {
            suggested_charts.push("events_over_time_line".to_string());
        }
        if suggested_charts.is_empty() {
            suggested_charts.push("records_table".to_string());
        }

        let compliance_score = compliance_score(records.len() as u64, &severity_tally);

        Self {
            severity_tally,
            top_sources,
            top_destinations,
            suggested_charts,
            compliance_score,
        }
    }
}

fn tally_field(records: &[Value], field: &str) -> BTreeMap<String, u64> {
    let mut tally = BTreeMap::new();
    for record in records {
        if let Some(value) = record.get(field).and_then(Value::as_str) {
            *tally.entry(value.to_string()).or_insert(0) += 1;
        }
    }
    tally
}

fn top_counts(tally: BTreeMap<String, u64>) -> Vec<IpCount> {
    let mut counts: Vec<IpCount> = tally
        .into_iter()
        .map(|(ip, count)| IpCount { ip, count })
        .collect();
    // 计数降序，计数相同按 IP 字典序，保证输出稳定。
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
    counts.truncate(TOP_N);
    counts
}

/// 0–100 分：critical 与 high 占比越高扣分越多。空结果视为满分。
fn compliance_score(total: u64, severity_tally: &BTreeMap<String, u64>) -> u8 {
    if total == 0 {
        return 100;
    }
    let critical = *severity_tally.get("Critical").unwrap_or(&0) as f64;
    let high = *severity_tally.get("High").unwrap_or(&0) as f64;
    let total = total as f64;
    let penalty = 40.0 * (critical / total) + 20.0 * (high / total);
    (100.0 - penalty).round().clamp(0.0, 100.0) as u8
}
