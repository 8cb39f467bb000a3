//! Execution Trace
//!
//! Records when each step starts, completes, or fails during one
//! invocation, for timing reports and post-mortem diagnostics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step completed successfully
    Completed,
    /// Step failed (best-effort failures included)
    Failed,
}

/// A single event in the execution trace.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Label of the step
    pub step: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Ordered record of step events for one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    events: Vec<TraceEvent>,
    start_time: Instant,
}

impl ExecutionTrace {
    /// Creates a new trace starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, step: impl Into<String>, event_type: EventType) {
        self.events.push(TraceEvent {
            step: step.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Time since the trace was created.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Labels of failed steps, in the order they failed.
    pub fn failures(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.event_type == EventType::Failed)
            .map(|e| e.step.as_str())
            .collect()
    }

    /// Per-step durations, in start order.
    ///
    /// Labels are not unique (two steps may both be `echo hi`), so starts
    /// are paired with the most recent unfinished start of the same label.
    pub fn durations(&self) -> Vec<(String, Duration, EventType)> {
        let mut open: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut rows: Vec<(String, Instant, Option<(Instant, EventType)>)> = Vec::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => {
                    open.entry(event.step.as_str()).or_default().push(rows.len());
                    rows.push((event.step.clone(), event.timestamp, None));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(index) = open.get_mut(event.step.as_str()).and_then(Vec::pop) {
                        rows[index].2 = Some((event.timestamp, event.event_type));
                    }
                }
            }
        }

        rows.into_iter()
            .filter_map(|(step, start, end)| {
                end.map(|(end, kind)| (step, end.duration_since(start), kind))
            })
            .collect()
    }

    /// Human-readable timing table.
    pub fn summary(&self) -> String {
        let mut output = String::from("Execution trace:\n");

        for (step, duration, kind) in self.durations() {
            let marker = match kind {
                EventType::Failed => "FAIL",
                _ => " ok ",
            };
            output.push_str(&format!(
                "  [{}] {:40} {:>8} ms\n",
                marker,
                step,
                duration.as_millis()
            ));
        }

        output.push_str(&format!("Total: {} ms\n", self.elapsed().as_millis()));
        output
    }
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_trace_creation() {
        let trace = ExecutionTrace::new();
        assert!(trace.events().is_empty());
        assert!(trace.durations().is_empty());
    }

    #[test]
    fn test_durations() {
        let mut trace = ExecutionTrace::new();
        trace.add_event("build", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        trace.add_event("build", EventType::Completed);

        let durations = trace.durations();
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, "build");
        assert!(durations[0].1 >= Duration::from_millis(30));
    }

    #[test]
    fn test_nested_steps_with_same_label() {
        let mut trace = ExecutionTrace::new();
        trace.add_event("echo hi", EventType::Started);
        trace.add_event("echo hi", EventType::Started);
        trace.add_event("echo hi", EventType::Failed);
        trace.add_event("echo hi", EventType::Completed);

        let durations = trace.durations();
        assert_eq!(durations.len(), 2);
        assert_eq!(durations[0].2, EventType::Completed);
        assert_eq!(durations[1].2, EventType::Failed);
    }

    #[test]
    fn test_unfinished_step_has_no_duration() {
        let mut trace = ExecutionTrace::new();
        trace.add_event("hang", EventType::Started);
        assert!(trace.durations().is_empty());
    }

    #[test]
    fn test_failures_and_summary() {
        let mut trace = ExecutionTrace::new();
        trace.add_event("lint", EventType::Started);
        trace.add_event("lint", EventType::Failed);
        trace.add_event("test", EventType::Started);
        trace.add_event("test", EventType::Completed);

        assert_eq!(trace.failures(), vec!["lint"]);
        let summary = trace.summary();
        assert!(summary.contains("[FAIL] lint"));
        assert!(summary.contains("test"));
        assert!(summary.contains("Total:"));
    }
}
