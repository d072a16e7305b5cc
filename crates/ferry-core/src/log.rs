/// Sink for human-readable progress lines (engine output, stage banners).
///
/// The pipeline never inspects what the sink does with a line.
pub trait ProgressLog: Send + Sync {
    fn print(&self, line: &str);
}

/// Forwards progress lines to `tracing` at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl ProgressLog for TracingLog {
    fn print(&self, line: &str) {
        let line = line.trim_end();
        if !line.is_empty() {
            tracing::info!(target: "ferry::progress", "{line}");
        }
    }
}
