use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use relaycore::{ExecutionRecord, ExecutionStatus, HistorySink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatistic {
    FourHours,
    OneDay,
    OneWeek,
    OneMonth,
    OneYear,
}

impl PeriodStatistic {
    pub fn rule(self) -> IntervalRule {
        let (number_of_intervals, interval_minutes, lookback_hours) = match self {
            PeriodStatistic::FourHours => (24, 10, 4),
            PeriodStatistic::OneDay => (144, 10, 24),
            PeriodStatistic::OneWeek => (28, 360, 7 * 24),
            PeriodStatistic::OneMonth => (30, 24 * 60, 30 * 24),
            PeriodStatistic::OneYear => (365, 24 * 60, 365 * 24),
        };
        IntervalRule {
            number_of_intervals,
            interval_minutes,
            lookback_hours,
        }
    }
}

impl FromStr for PeriodStatistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "").to_uppercase().as_str() {
            "FOURHOURS" | "FOURHOUR" => Ok(PeriodStatistic::FourHours),
            "ONEDAY" => Ok(PeriodStatistic::OneDay),
            "ONEWEEK" => Ok(PeriodStatistic::OneWeek),
            "ONEMONTH" => Ok(PeriodStatistic::OneMonth),
            "ONEYEAR" => Ok(PeriodStatistic::OneYear),
            _ => Err(format!("Unknown period [{}]", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalRule {
    pub number_of_intervals: i64,
    pub interval_minutes: i64,
    pub lookback_hours: i64,
}

impl IntervalRule {
    /// Rounds down to the interval minute, or by hours for long intervals
    pub fn round(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let mut drop_minutes = if self.interval_minutes <= 60 {
            i64::from(time.minute()) % self.interval_minutes
        } else {
            let hours = (self.interval_minutes / 60).max(1);
            i64::from(time.minute()) + (i64::from(time.hour()) % hours) * 60
        };
        drop_minutes = drop_minutes.max(0);
        time - Duration::minutes(drop_minutes)
            - Duration::seconds(i64::from(time.second()))
            - Duration::nanoseconds(i64::from(time.nanosecond()))
    }

    /// Slot key: day of year, hour and minute of the rounded time
    pub fn slot(&self, time: DateTime<Utc>) -> String {
        let rounded = self.round(time);
        format!("{:03}D{:02}:{:02}", rounded.ordinal(), rounded.hour(), rounded.minute())
    }

    pub fn threshold(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.lookback_hours)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistic {
    pub executions: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub domain_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub slot: String,
    pub human_slot: String,
    pub executions: u64,
    pub sum_ms: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub domain_errors: u64,
    pub peak_ms: u64,
    pub average_ms: u64,
}

impl Interval {
    fn new(slot: String, time: DateTime<Utc>) -> Self {
        Self {
            slot,
            human_slot: time.format("%Y-%m-%d %H:%M").to_string(),
            executions: 0,
            sum_ms: 0,
            succeeded: 0,
            failed: 0,
            domain_errors: 0,
            peak_ms: 0,
            average_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Performance {
    pub peak_ms: u64,
    pub executions: u64,
    pub average_ms: u64,
    pub intervals: Vec<Interval>,
}

/// Keeps execution records in memory and answers statistics over them.
/// Every record is also forwarded to the mirror sinks.
pub struct HistoryFactory {
    records: RwLock<Vec<ExecutionRecord>>,
    mirrors: Vec<Arc<dyn HistorySink>>,
}

impl HistoryFactory {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            mirrors: Vec::new(),
        }
    }

    pub fn with_mirror(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.mirrors.push(sink);
        self
    }

    /// Records of a type since a date, most recent first
    pub async fn executions(
        &self,
        runner_type: &str,
        since: DateTime<Utc>,
        page: usize,
        rows_per_page: usize,
    ) -> Vec<ExecutionRecord> {
        let records = self.records.read().await;
        let mut selected: Vec<ExecutionRecord> = records
            .iter()
            .filter(|r| r.runner_type == runner_type && r.timestamp >= since)
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        selected
            .into_iter()
            .skip(page * rows_per_page)
            .take(rows_per_page)
            .collect()
    }

    pub async fn statistic(&self, runner_type: &str, since: DateTime<Utc>) -> Statistic {
        let records = self.records.read().await;
        let mut statistic = Statistic::default();
        for record in records
            .iter()
            .filter(|r| r.runner_type == runner_type && r.timestamp >= since)
        {
            match record.status {
                ExecutionStatus::Success => statistic.succeeded += 1,
                ExecutionStatus::Fail => statistic.failed += 1,
                ExecutionStatus::DomainError => statistic.domain_errors += 1,
            }
        }
        statistic.executions = statistic.succeeded + statistic.failed + statistic.domain_errors;
        statistic
    }

    /// Statistic over the window of a period
    pub async fn statistic_for_period(
        &self,
        runner_type: &str,
        period: PeriodStatistic,
        now: DateTime<Utc>,
    ) -> Statistic {
        let rule = period.rule();
        let since = now - Duration::minutes(rule.interval_minutes * rule.number_of_intervals);
        self.statistic(runner_type, since).await
    }

    pub async fn performance(&self, runner_type: &str, period: PeriodStatistic, now: DateTime<Utc>) -> Performance {
        let rule = period.rule();
        let threshold = rule.threshold(now);

        let mut intervals: Vec<Interval> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut cursor = rule.round(threshold);
        for _ in 0..=rule.number_of_intervals {
            let slot = rule.slot(cursor);
            if !index.contains_key(&slot) {
                index.insert(slot.clone(), intervals.len());
                intervals.push(Interval::new(slot, cursor));
            }
            cursor = cursor + Duration::minutes(rule.interval_minutes);
        }

        let records = self.records.read().await;
        for record in records
            .iter()
            .filter(|r| r.runner_type == runner_type && r.timestamp >= threshold)
        {
            let slot = rule.slot(record.timestamp);
            let Some(&position) = index.get(&slot) else {
                tracing::error!("Interval is not populated [{}]", slot);
                continue;
            };
            let interval = &mut intervals[position];
            interval.executions += 1;
            interval.sum_ms += record.duration_ms;
            match record.status {
                ExecutionStatus::Success => interval.succeeded += 1,
                ExecutionStatus::Fail => interval.failed += 1,
                ExecutionStatus::DomainError => interval.domain_errors += 1,
            }
            interval.peak_ms = interval.peak_ms.max(record.duration_ms);
        }

        let mut performance = Performance::default();
        let mut total_ms = 0;
        for mut interval in intervals {
            if interval.executions > 0 {
                interval.average_ms = interval.sum_ms / interval.executions;
            }
            total_ms += interval.sum_ms;
            performance.executions += interval.executions;
            performance.peak_ms = performance.peak_ms.max(interval.peak_ms);
            performance.intervals.push(interval);
        }
        if performance.executions > 0 {
            performance.average_ms = total_ms / performance.executions;
        }
        performance
    }

    /// Drops every record of a type, returns how many were removed
    pub async fn purge(&self, runner_type: &str) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.runner_type != runner_type);
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for HistoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySink for HistoryFactory {
    async fn save_execution(&self, record: ExecutionRecord) {
        for mirror in &self.mirrors {
            mirror.save_execution(record.clone()).await;
        }
        self.records.write().await.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relaycore::ExecutorKind;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, h, m, s).unwrap()
    }

    fn record(status: ExecutionStatus, timestamp: DateTime<Utc>, duration_ms: u64) -> ExecutionRecord {
        ExecutionRecord {
            timestamp,
            runner_type: "c-ping".to_string(),
            executor_kind: ExecutorKind::Worker,
            status,
            error_code: None,
            error_message: None,
            duration_ms,
        }
    }

    #[test]
    fn slots_round_down() {
        let short = PeriodStatistic::FourHours.rule();
        assert_eq!(short.slot(at(16, 27, 45)), "074D16:20");

        let week = PeriodStatistic::OneWeek.rule();
        assert_eq!(week.slot(at(16, 27, 45)), "074D12:00");

        let month = PeriodStatistic::OneMonth.rule();
        assert_eq!(month.slot(at(16, 27, 45)), "074D00:00");
    }

    #[test]
    fn period_names() {
        assert_eq!("FOUR_HOURS".parse::<PeriodStatistic>(), Ok(PeriodStatistic::FourHours));
        assert_eq!("oneweek".parse::<PeriodStatistic>(), Ok(PeriodStatistic::OneWeek));
        assert!("forever".parse::<PeriodStatistic>().is_err());
    }

    #[tokio::test]
    async fn performance_buckets_records() {
        let history = HistoryFactory::new();
        let now = at(16, 30, 0);
        history.save_execution(record(ExecutionStatus::Success, at(16, 21, 0), 100)).await;
        history.save_execution(record(ExecutionStatus::Fail, at(16, 25, 0), 300)).await;
        history.save_execution(record(ExecutionStatus::DomainError, at(15, 2, 0), 50)).await;
        // outside the window
        history.save_execution(record(ExecutionStatus::Success, at(10, 0, 0), 999)).await;

        let performance = history.performance("c-ping", PeriodStatistic::FourHours, now).await;
        assert_eq!(performance.intervals.len(), 25);
        assert_eq!(performance.executions, 3);
        assert_eq!(performance.peak_ms, 300);
        assert_eq!(performance.average_ms, 150);

        let slot = performance
            .intervals
            .iter()
            .find(|i| i.slot == "074D16:20")
            .unwrap();
        assert_eq!(slot.executions, 2);
        assert_eq!(slot.average_ms, 200);
        assert_eq!(slot.human_slot, "2024-03-14 16:20");

        let statistic = history.statistic("c-ping", at(12, 0, 0)).await;
        assert_eq!(
            statistic,
            Statistic {
                executions: 3,
                succeeded: 1,
                failed: 1,
                domain_errors: 1
            }
        );

        assert_eq!(history.purge("c-ping").await, 4);
        assert_eq!(history.len().await, 0);
    }
}
