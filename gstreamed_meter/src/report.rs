//! Console report written by the meter's client handler.

/// Report state shared with the meter handler.
#[derive(Debug)]
pub struct ReportData {
    report_count: u64,
    header_interval: u64,
}

const COLUMN_WIDTH: usize = 15;

impl ReportData {
    pub fn new(header_interval: u64) -> Self {
        Self {
            report_count: 0,
            header_interval: header_interval.max(1),
        }
    }

    /// Header row naming one column per source.
    pub fn header(source_count: usize) -> String {
        (0..source_count)
            .map(|source| format!("{:<width$}", format!("FPS {source} (AVG)"), width = COLUMN_WIDTH))
            .collect()
    }

    /// Counter row, `interval (session)` per source.
    pub fn counters(session_avgs: &[f64], interval_avgs: &[f64]) -> String {
        interval_avgs
            .iter()
            .zip(session_avgs)
            .map(|(interval, session)| {
                format!(
                    "{:<width$}",
                    format!("{interval:.2} ({session:.2})"),
                    width = COLUMN_WIDTH
                )
            })
            .collect()
    }

    /// Lines to print for the next report: a blank line and a header every
    /// `header_interval` reports, then the counters.
    pub fn next_lines(
        &mut self,
        session_avgs: &[f64],
        interval_avgs: &[f64],
        source_count: usize,
    ) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        if self.report_count % self.header_interval == 0 {
            lines.push(String::new());
            lines.push(Self::header(source_count));
        }
        lines.push(Self::counters(session_avgs, interval_avgs));
        self.report_count += 1;
        lines
    }

    /// Meter client handler, keeps reporting for as long as the pipeline runs.
    pub fn handle(
        &mut self,
        session_avgs: &[f64],
        interval_avgs: &[f64],
        source_count: usize,
    ) -> bool {
        for line in self.next_lines(session_avgs, interval_avgs, source_count) {
            println!("{line}");
        }
        true
    }
}
