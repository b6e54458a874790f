//! Prometheus text exposition of provider call metrics.

use crate::collector::CallSnapshot;

/// Render call snapshots as Prometheus text, labelled by `operation` and
/// `zone`.
pub fn render_prometheus(snapshots: &[CallSnapshot]) -> String {
    let mut out = String::new();

    out.push_str("# HELP carbon_provider_calls_total Provider calls observed.\n");
    out.push_str("# TYPE carbon_provider_calls_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "carbon_provider_calls_total{{{}}} {}\n",
            labels(s),
            s.calls
        ));
    }

    out.push_str("# HELP carbon_provider_errors_total Provider calls that returned an error.\n");
    out.push_str("# TYPE carbon_provider_errors_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "carbon_provider_errors_total{{{}}} {}\n",
            labels(s),
            s.errors
        ));
    }

    out.push_str("# HELP carbon_provider_latency_p50_ms P50 call latency in milliseconds.\n");
    out.push_str("# TYPE carbon_provider_latency_p50_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "carbon_provider_latency_p50_ms{{{}}} {:.2}\n",
            labels(s),
            s.latency_p50_ms
        ));
    }

    out.push_str("# HELP carbon_provider_latency_p99_ms P99 call latency in milliseconds.\n");
    out.push_str("# TYPE carbon_provider_latency_p99_ms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "carbon_provider_latency_p99_ms{{{}}} {:.2}\n",
            labels(s),
            s.latency_p99_ms
        ));
    }

    out
}

fn labels(s: &CallSnapshot) -> String {
    format!(
        "operation=\"{}\",zone=\"{}\"",
        escape(&s.operation),
        escape(&s.zone)
    )
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
