/// Start/stop orchestration for all sensor runners
use std::future::Future;

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::console::ConsoleReporter;
use crate::error::LifecycleError;
use crate::sensor::{RunnerHandle, RunnerSummary, SensorRunner};

/// Idle → Running → Stopping → Stopped, single shot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

pub struct Controller {
    state: LifecycleState,
    runners: Vec<(RunnerHandle, JoinHandle<RunnerSummary>)>,
    reporter: Option<(RunnerHandle, JoinHandle<()>)>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            runners: Vec::new(),
            reporter: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Spawn every runner as its own task, plus the console reporter if given
    pub fn start(
        &mut self,
        runners: Vec<SensorRunner>,
        reporter: Option<ConsoleReporter>,
    ) -> Result<usize, LifecycleError> {
        if self.state != LifecycleState::Idle {
            return Err(LifecycleError::InvalidTransition {
                action: "start",
                state: self.state,
            });
        }

        if runners.is_empty() {
            warn!("No sensors to run");
        }

        for runner in runners {
            let handle = runner.handle();
            let task = tokio::spawn(runner.run());
            self.runners.push((handle, task));
        }

        if let Some(reporter) = reporter {
            let stop = RunnerHandle::new();
            let task = tokio::spawn(reporter.run(stop.clone()));
            self.reporter = Some((stop, task));
        }

        self.state = LifecycleState::Running;
        info!("{} sensor runners started", self.runners.len());
        Ok(self.runners.len())
    }

    /// Stop every runner and wait until each has finished its cycle and
    /// flushed. Summaries come back in start order.
    pub async fn shutdown(&mut self) -> Result<Vec<RunnerSummary>, LifecycleError> {
        if self.state != LifecycleState::Running {
            return Err(LifecycleError::InvalidTransition {
                action: "stop",
                state: self.state,
            });
        }
        self.state = LifecycleState::Stopping;
        info!("App is closing");

        for (handle, _) in &self.runners {
            handle.stop();
        }
        if let Some((stop, task)) = self.reporter.take() {
            stop.stop();
            if let Err(e) = task.await {
                error!("Console reporter task failed: {}", e);
            }
        }

        let mut summaries = Vec::with_capacity(self.runners.len());
        for (_, task) in self.runners.drain(..) {
            match task.await {
                Ok(summary) => {
                    if summary.pending > 0 {
                        warn!(
                            "Sensor {} exited with {} unstored measurements",
                            summary.sensor, summary.pending
                        );
                    }
                    summaries.push(summary);
                }
                Err(e) => error!("Sensor runner task failed: {}", e),
            }
        }

        self.state = LifecycleState::Stopped;
        info!("All sensor runners stopped");
        Ok(summaries)
    }

    /// Block on `signal`, then shut down
    pub async fn run_until<F>(&mut self, signal: F) -> Result<Vec<RunnerSummary>, LifecycleError>
    where
        F: Future<Output = ()>,
    {
        if self.state != LifecycleState::Running {
            return Err(LifecycleError::InvalidTransition {
                action: "wait",
                state: self.state,
            });
        }
        signal.await;
        self.shutdown().await
    }
}
