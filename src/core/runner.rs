//! 依序執行部署步驟；第一個失敗就停，不重試也不回滾。

use crate::utils::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// 單一步驟的結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    /// 目標資源已存在，直接沿用
    Reused(String),
    /// 沒有需要做的事
    Skipped(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Completed => f.write_str("completed"),
            StepOutcome::Reused(reason) => write!(f, "reused ({})", reason),
            StepOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub outcome: StepOutcome,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// 一個可以重複執行的部署步驟；`C` 是步驟共用的唯讀上下文
#[async_trait]
pub trait Step<C: Sync>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, context: &C) -> Result<StepOutcome>;
}

/// 步驟序列
pub struct StepSequence<C: Sync> {
    steps: Vec<Box<dyn Step<C>>>,
    execution_id: String,
}

impl<C: Sync> StepSequence<C> {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            execution_id: execution_id.into(),
        }
    }

    pub fn add_step(&mut self, step: Box<dyn Step<C>>) {
        self.steps.push(step);
    }

    pub fn with_step(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// 執行所有步驟；失敗的錯誤會帶上步驟名稱
    pub async fn execute_all(&self, context: &C) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(self.steps.len());
        tracing::info!("🚀 Starting {} ({} steps)", self.execution_id, self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!("▶️ [{}/{}] {}", index + 1, self.steps.len(), step.name());
            let start_time = Instant::now();

            match step.run(context).await {
                Ok(outcome) => {
                    let report = StepReport {
                        step: step.name().to_string(),
                        outcome,
                        duration: start_time.elapsed(),
                    };

                    match &report.outcome {
                        StepOutcome::Completed => tracing::info!(
                            "✅ {} completed ({:?})",
                            report.step,
                            report.duration
                        ),
                        StepOutcome::Reused(reason) => {
                            tracing::info!("♻️ {} reused: {}", report.step, reason)
                        }
                        StepOutcome::Skipped(reason) => {
                            tracing::info!("⏭️ {} skipped: {}", report.step, reason)
                        }
                    }
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!("❌ Step '{}' failed: {}", step.name(), e);
                    return Err(e.in_step(step.name()));
                }
            }
        }

        let summary = Self::get_execution_summary(&reports);
        tracing::info!("📊 Execution summary: {}", summary);
        Ok(reports)
    }

    /// 執行摘要
    pub fn get_execution_summary(reports: &[StepReport]) -> serde_json::Value {
        let total_duration: Duration = reports.iter().map(|r| r.duration).sum();
        let count = |pred: fn(&StepOutcome) -> bool| reports.iter().filter(|r| pred(&r.outcome)).count();

        serde_json::json!({
            "total_steps": reports.len(),
            "completed": count(|o| matches!(o, StepOutcome::Completed)),
            "reused": count(|o| matches!(o, StepOutcome::Reused(_))),
            "skipped": count(|o| matches!(o, StepOutcome::Skipped(_))),
            "total_duration_ms": total_duration.as_millis() as u64,
            "steps": reports,
        })
    }
}
