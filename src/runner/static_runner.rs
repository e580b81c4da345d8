//! Static Runner（演示与测试用）
//!
//! 不访问外部数据，对每个跟踪标的给出一条 hold 推荐。

use async_trait::async_trait;

use crate::runner::{Recommendation, Runner, RunnerError, RunnerInput, RunnerOutput};

pub struct StaticRunner {
    action: String,
}

impl StaticRunner {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }
}

impl Default for StaticRunner {
    fn default() -> Self {
        Self::new("hold")
    }
}

#[async_trait]
impl Runner for StaticRunner {
    fn runner_type(&self) -> &str {
        "static"
    }

    async fn execute(&self, input: RunnerInput) -> Result<RunnerOutput, RunnerError> {
        let rationale = match input.config.risk_profile.as_deref() {
            Some(profile) => format!("static {} profile", profile),
            None => "static".to_string(),
        };
        let recommendations = input
            .config
            .instruments
            .iter()
            .map(|instrument| {
                Recommendation::new(self.action.clone())
                    .for_instrument(instrument.clone())
                    .with_rationale(rationale.clone())
            })
            .collect();
        Ok(RunnerOutput::new(recommendations))
    }
}
