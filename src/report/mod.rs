use crate::config::{RoundLimit, Settings};
use crate::runner::{RoundObserver, RoundResult};

pub fn banner(settings: &Settings) -> String {
    let rounds = match settings.rounds {
        RoundLimit::Fixed(n) => n.to_string(),
        RoundLimit::Unbounded => "unbounded".to_string(),
    };
    format!(
        "Starting load: concurrency={}, operation={}, total={}, wait={}ms, rounds={}, pool={}",
        settings.concurrency,
        settings.operation,
        settings.total,
        settings.exec.wait.as_millis(),
        rounds,
        if settings.use_pool { "on" } else { "off" }
    )
}

pub fn round_summary(result: &RoundResult) -> Vec<String> {
    let mut lines = vec![format!(
        "Round {} finished: elapsed={:.2}s, ok={}, failed={}, affected rows={}",
        result.round,
        result.elapsed.as_secs_f64(),
        result.succeeded,
        result.failed,
        result.affected_rows
    )];

    if !result.failures_by_kind.is_empty() {
        let breakdown: Vec<String> = result
            .failures_by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect();
        lines.push(format!("Failures by cause: {}", breakdown.join(", ")));
    }

    if !result.failure_sample.is_empty() {
        lines.push(format!(
            "First {} failures:",
            result.failure_sample.len()
        ));
        for message in &result.failure_sample {
            lines.push(format!("- {}", message));
        }
    }
    lines
}

pub fn print_banner(settings: &Settings) {
    println!("{}", banner(settings));
}

/// Prints round progress to stdout.
pub struct ConsoleReporter;

impl RoundObserver for ConsoleReporter {
    fn round_started(&mut self, round: u64) {
        println!("\n---- Round {} ----", round);
    }

    fn round_finished(&mut self, result: &RoundResult) {
        for line in round_summary(result) {
            println!("{}", line);
        }
    }
}

pub fn print_interrupted() {
    println!("\nInterrupted, no further rounds will start.");
}
