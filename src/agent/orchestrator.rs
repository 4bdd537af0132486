//! Orchestrator for the selector → decomposer → refiner pipeline.
//!
//! The orchestrator owns no policy of its own: each agent decides the next
//! route, and the orchestrator only dispatches, counts rounds, and stops at
//! [`Route::Terminal`], at a route with no registered agent, at the round
//! budget, or on cancellation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::decomposer::DecomposerAgent;
use super::dialect::Dialect;
use super::prompt::{DecomposeStyle, PromptSet};
use super::refiner::{RefinePolicy, RefinerAgent};
use super::resilient::ModelClient;
use super::selector::SelectorAgent;
use super::traits::Agent;
use super::work_item::{Route, WorkItem};
use crate::db::pool::ConnectionPool;
use crate::db::schema::SchemaStore;
use crate::error::AgentError;

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Rounds executed for the item so far.
    pub rounds: u32,
    /// Whether the item reached a terminal route within the budget.
    pub completed: bool,
    /// Wall time of this run.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Dispatches a work item between registered agents.
pub struct Orchestrator {
    agents: HashMap<Route, Arc<dyn Agent>>,
    max_rounds: u32,
}

impl Orchestrator {
    /// Creates an orchestrator with no agents.
    #[must_use]
    pub fn new(max_rounds: u32) -> Self {
        Self {
            agents: HashMap::new(),
            max_rounds,
        }
    }

    /// Registers `agent` for the route it serves, replacing any previous one.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.route(), agent);
        self
    }

    /// Round budget per item.
    #[must_use]
    pub const fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Runs `item` until it is terminal or out of rounds.
    ///
    /// Running out of rounds is not an error: the summary reports
    /// `completed: false` and the item keeps its latest candidate.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Cancelled`] if `cancel` fires.
    pub async fn run(
        &self,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, AgentError> {
        let started = Instant::now();

        let completed = loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if item.rounds >= self.max_rounds {
                break item.is_terminal();
            }
            let Some(agent) = self.agents.get(&item.route) else {
                if !item.is_terminal() {
                    warn!(route = %item.route, "no agent registered for route, stopping");
                }
                break true;
            };

            debug!(
                database_id = %item.database_id,
                round = item.rounds + 1,
                agent = agent.name(),
                "dispatching"
            );
            agent.process(item, cancel).await?;
            item.rounds += 1;
        };

        let summary = RunSummary {
            rounds: item.rounds,
            completed,
            elapsed: started.elapsed(),
        };

        if completed {
            info!(
                database_id = %item.database_id,
                rounds = summary.rounds,
                repairs = item.attempt_count,
                failed = item.failure().is_some(),
                "item finished"
            );
        } else {
            warn!(
                database_id = %item.database_id,
                rounds = summary.rounds,
                route = %item.route,
                "round budget exhausted"
            );
        }
        Ok(summary)
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<String> = self.agents.keys().map(ToString::to_string).collect();
        routes.sort();
        f.debug_struct("Orchestrator")
            .field("routes", &routes)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

/// Benchmark family the questions come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// BIRD: evidence-bearing questions, strict result checks.
    Bird,
    /// Spider: no evidence, any successful execution accepted.
    Spider,
    /// Anything else.
    #[default]
    Generic,
}

impl Dataset {
    /// How the decomposer frames generation.
    #[must_use]
    pub const fn decompose_style(self) -> DecomposeStyle {
        match self {
            Self::Bird | Self::Generic => DecomposeStyle::Decomposition,
            Self::Spider => DecomposeStyle::Plain,
        }
    }

    /// Which executions the refiner rejects.
    #[must_use]
    pub const fn refine_policy(self) -> RefinePolicy {
        match self {
            Self::Bird => RefinePolicy::strict(),
            Self::Spider | Self::Generic => RefinePolicy::lenient(),
        }
    }

    /// Post-processing dialect.
    #[must_use]
    pub const fn dialect(self) -> Dialect {
        Dialect::Sqlite
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bird => "bird",
            Self::Spider => "spider",
            Self::Generic => "generic",
        })
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bird" => Ok(Self::Bird),
            "spider" => Ok(Self::Spider),
            "generic" => Ok(Self::Generic),
            other => Err(format!(
                "unknown dataset '{other}' (expected bird, spider, or generic)"
            )),
        }
    }
}

/// Shared dependencies from which per-dataset orchestrators are assembled.
#[derive(Clone)]
pub struct Pipeline {
    /// Model client shared by all agents.
    pub client: Arc<dyn ModelClient>,
    /// Database connections.
    pub pool: Arc<dyn ConnectionPool>,
    /// Schema source for the selector.
    pub schemas: Arc<dyn SchemaStore>,
    /// System prompts.
    pub prompts: PromptSet,
}

impl Pipeline {
    /// Builds the orchestrator registry for `dataset`.
    #[must_use]
    pub fn for_dataset(&self, dataset: Dataset, config: &AgentConfig) -> Orchestrator {
        let selector = SelectorAgent::new(
            config,
            Arc::clone(&self.client),
            Arc::clone(&self.schemas),
            self.prompts.selector.clone(),
        );
        let decomposer = DecomposerAgent::new(
            config,
            Arc::clone(&self.client),
            self.prompts.decomposer.clone(),
            dataset.decompose_style(),
        );
        let refiner = RefinerAgent::new(
            config,
            Arc::clone(&self.client),
            Arc::clone(&self.pool),
            self.prompts.refiner.clone(),
        )
        .with_dialect(dataset.dialect())
        .with_policy(dataset.refine_policy());

        Orchestrator::new(config.max_rounds)
            .with_agent(Arc::new(selector))
            .with_agent(Arc::new(decomposer))
            .with_agent(Arc::new(refiner))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}
