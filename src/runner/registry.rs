//! Runner 注册表
//!
//! 按类型键存放 Arc<dyn Runner>；轮询时 resolve 未知键返回 RunnerResolution（作为轮询失败记录），
//! 启动时可用 contains 提前发现配置里拼错的键。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::OrchestratorError;
use crate::runner::Runner;

#[derive(Default, Clone)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Runner；同名键后注册者覆盖
    pub fn register(&mut self, runner: impl Runner + 'static) {
        self.register_arc(Arc::new(runner));
    }

    pub fn register_arc(&mut self, runner: Arc<dyn Runner>) {
        let key = runner.runner_type().to_string();
        if self.runners.insert(key.clone(), runner).is_some() {
            tracing::warn!("Runner '{}' registered twice, previous one replaced", key);
        }
    }

    pub fn with_runner(mut self, runner: impl Runner + 'static) -> Self {
        self.register(runner);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(key).cloned()
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<dyn Runner>, OrchestratorError> {
        self.get(key)
            .ok_or_else(|| OrchestratorError::RunnerResolution(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.runners.contains_key(key)
    }

    pub fn runner_types(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.runners.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.runner_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StaticRunner;

    #[test]
    fn test_register_and_resolve() {
        let registry = RunnerRegistry::new().with_runner(StaticRunner::default());
        assert!(registry.contains("static"));
        assert!(registry.resolve("static").is_ok());
        assert_eq!(registry.runner_types(), vec!["static"]);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = RunnerRegistry::new();
        match registry.resolve("portfolio") {
            Err(OrchestratorError::RunnerResolution(key)) => assert_eq!(key, "portfolio"),
            other => panic!("Expected RunnerResolution, got {:?}", other.map(|_| ())),
        }
    }
}
