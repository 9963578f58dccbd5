//! 报告收集（按投递顺序保存）
use crate::runtime::ReportSink;
use crate::types::{Flow, Report, ReportId};

/// 收集型回调：按投递顺序记录报告；可设定收到第 N 条后请求停止
#[derive(Debug, Default, Clone)]
pub struct ReportLog {
    reports: Vec<Report>,
    halt_after: Option<usize>,
}

impl ReportLog {
    pub fn new(halt_after: Option<usize>) -> Self {
        Self { reports: Vec::new(), halt_after }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<Report> {
        self.reports
    }

    fn budget_spent(&self) -> bool {
        self.halt_after.is_some_and(|n| self.reports.len() >= n)
    }

    /// 预算已用完时不再记录；记录后恰好用完也请求停止
    fn push(&mut self, report: Report) -> Flow {
        if self.budget_spent() {
            return Flow::Halt;
        }
        self.reports.push(report);
        if self.budget_spent() { Flow::Halt } else { Flow::Continue }
    }
}

impl ReportSink for ReportLog {
    fn report(&mut self, offset: u64, id: ReportId) -> Flow {
        self.push(Report { offset, id, from: None })
    }

    fn report_with_start(&mut self, from: u64, to: u64, id: ReportId) -> Flow {
        self.push(Report { offset: to, id, from: Some(from) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halts_after_budget() {
        let mut log = ReportLog::new(Some(2));
        assert_eq!(log.report(1, 1), Flow::Continue);
        assert_eq!(log.report_with_start(0, 2, 2), Flow::Halt);
        assert_eq!(log.reports()[1], Report { offset: 2, id: 2, from: Some(0) });
    }

    #[test]
    fn zero_budget_records_nothing() {
        let mut log = ReportLog::new(Some(0));
        assert_eq!(log.report(1, 1), Flow::Halt);
        assert_eq!(log.report_with_start(0, 2, 2), Flow::Halt);
        assert!(log.reports().is_empty());
    }

    #[test]
    fn unlimited_by_default() {
        let mut log = ReportLog::default();
        for i in 0..10 {
            assert_eq!(log.report(i, 0), Flow::Continue);
        }
        assert_eq!(log.into_reports().len(), 10);
    }
}
