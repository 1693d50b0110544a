// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Ordered multi-step operations with compensating actions.
//!
//! Steps run in order against a shared context. At the first failure every
//! completed step is compensated in reverse order and the original error is
//! returned. Compensation failures are logged, never surfaced.

use async_trait::async_trait;

use crate::error::StratoResult;

/// One step of a saga.
#[async_trait]
pub trait SagaStep<C: Send>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut C) -> StratoResult<()>;

    /// Undo the effect of a successful `execute`.
    async fn compensate(&self, _ctx: &mut C) -> StratoResult<()> {
        Ok(())
    }
}

/// An ordered list of steps executed as a unit.
pub struct Saga<C: Send> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send> Saga<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run all steps, compensating completed ones on failure.
    pub async fn run(&self, ctx: &mut C) -> StratoResult<()> {
        for (index, step) in self.steps.iter().enumerate() {
            tracing::debug!(saga = self.name, step = step.name(), "Executing saga step");

            if let Err(err) = step.execute(ctx).await {
                tracing::warn!(
                    saga = self.name,
                    step = step.name(),
                    error = %err,
                    "Saga step failed, compensating"
                );
                self.compensate(&self.steps[..index], ctx).await;
                return Err(err);
            }
        }
        Ok(())
    }

    async fn compensate(&self, completed: &[Box<dyn SagaStep<C>>], ctx: &mut C) {
        for step in completed.iter().rev() {
            if let Err(err) = step.compensate(ctx).await {
                tracing::error!(
                    saga = self.name,
                    step = step.name(),
                    error = %err,
                    "Compensation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StratoError;

    #[derive(Default)]
    struct Journal {
        events: Vec<String>,
    }

    struct Recorder {
        name: &'static str,
        fail_execute: bool,
        fail_compensate: bool,
    }

    impl Recorder {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail_execute: false,
                fail_compensate: false,
            }
        }
    }

    #[async_trait]
    impl SagaStep<Journal> for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &mut Journal) -> StratoResult<()> {
            if self.fail_execute {
                return Err(StratoError::storage(format!("{} failed", self.name)));
            }
            ctx.events.push(format!("do:{}", self.name));
            Ok(())
        }

        async fn compensate(&self, ctx: &mut Journal) -> StratoResult<()> {
            ctx.events.push(format!("undo:{}", self.name));
            if self.fail_compensate {
                return Err(StratoError::storage("undo failed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let saga = Saga::new("test")
            .step(Recorder::ok("a"))
            .step(Recorder::ok("b"));
        let mut journal = Journal::default();

        saga.run(&mut journal).await.unwrap();
        assert_eq!(journal.events, vec!["do:a", "do:b"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_in_reverse() {
        let saga = Saga::new("test")
            .step(Recorder::ok("a"))
            .step(Recorder::ok("b"))
            .step(Recorder {
                name: "c",
                fail_execute: true,
                fail_compensate: false,
            })
            .step(Recorder::ok("d"));
        let mut journal = Journal::default();

        let err = saga.run(&mut journal).await.unwrap_err();
        assert!(err.to_string().contains("c failed"));
        assert_eq!(journal.events, vec!["do:a", "do:b", "undo:b", "undo:a"]);
    }

    #[tokio::test]
    async fn test_compensation_failure_keeps_original_error() {
        let saga = Saga::new("test")
            .step(Recorder {
                name: "a",
                fail_execute: false,
                fail_compensate: true,
            })
            .step(Recorder::ok("b"))
            .step(Recorder {
                name: "c",
                fail_execute: true,
                fail_compensate: false,
            });
        let mut journal = Journal::default();

        let err = saga.run(&mut journal).await.unwrap_err();
        assert!(err.to_string().contains("c failed"));
        assert_eq!(journal.events, vec!["do:a", "do:b", "undo:b", "undo:a"]);
    }
}
