//! Synthetic load through the full execution protocol.

use anyhow::{bail, Result};
use clap::Args;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::build_manager;
use crate::cli::output::{colorize_state, heading, list_table, output, truncate, CommandOutput};
use crate::domain::models::{AgentBreakerStatus, Config, ExecutionRequest, SecurityMetrics};
use crate::services::{ProtectedOutcome, SecurityManager};

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Agent to execute
    #[arg(short, long, default_value = "optimization")]
    pub agent: String,

    /// User the executions run for
    #[arg(short, long, default_value = "simulator")]
    pub user: String,

    /// Number of executions
    #[arg(short = 'n', long, default_value = "20")]
    pub executions: usize,

    /// Executions in flight at once
    #[arg(short = 'c', long, default_value = "4")]
    pub concurrency: usize,

    /// Fail every Nth execution (0 = never fail)
    #[arg(short = 'f', long, default_value = "0")]
    pub fail_every: usize,

    /// Extra fallback route as PRIMARY=FALLBACK (repeatable)
    #[arg(long, value_parser = parse_fallback)]
    pub fallback: Vec<(String, String)>,

    /// Simulated work per execution in milliseconds
    #[arg(long, default_value = "10")]
    pub duration_ms: u64,

    /// Requested timeout per execution in seconds
    #[arg(long)]
    pub timeout: Option<f64>,
}

fn parse_fallback(value: &str) -> Result<(String, String), String> {
    let (primary, fallback) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PRIMARY=FALLBACK, got '{value}'"))?;
    let (primary, fallback) = (primary.trim(), fallback.trim());
    if primary.is_empty() || fallback.is_empty() {
        return Err("agent names cannot be empty".to_string());
    }
    if primary == fallback {
        return Err(format!("agent '{primary}' cannot fall back to itself"));
    }
    Ok((primary.to_string(), fallback.to_string()))
}

#[derive(Debug, Default, Serialize)]
pub struct SimulationReport {
    pub agent: String,
    pub user: String,
    pub executions: usize,
    pub completed: usize,
    pub completed_on_fallback: usize,
    pub failed: usize,
    pub denied: usize,
    pub timed_out: usize,
    pub denial_reasons: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
    pub breakers: Vec<AgentBreakerStatus>,
    pub metrics: SecurityMetrics,
}

impl SimulationReport {
    fn tally(&mut self, outcome: ProtectedOutcome<String>) {
        match outcome {
            ProtectedOutcome::Completed(agent) => {
                self.completed += 1;
                if agent != self.agent {
                    self.completed_on_fallback += 1;
                }
            }
            ProtectedOutcome::Failed(_) => self.failed += 1,
            ProtectedOutcome::Denied(reason) => {
                self.denied += 1;
                *self.denial_reasons.entry(reason).or_insert(0) += 1;
            }
            ProtectedOutcome::TimedOut(_) => self.timed_out += 1,
        }
    }
}

impl CommandOutput for SimulationReport {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Simulated {} execution(s) of '{}' for '{}' in {} ms",
            self.executions, self.agent, self.user, self.elapsed_ms
        )];
        lines.push(format!(
            "  completed: {} ({} on fallback)",
            self.completed, self.completed_on_fallback
        ));
        lines.push(format!("  failed:    {}", self.failed));
        lines.push(format!("  timed out: {}", self.timed_out));
        lines.push(format!("  denied:    {}", self.denied));
        for (reason, count) in &self.denial_reasons {
            lines.push(format!("    {count:>4} x {}", truncate(reason, 80)));
        }

        if !self.breakers.is_empty() {
            lines.push(String::new());
            lines.push(heading("Breakers"));
            let mut table =
                list_table(&["agent", "state", "failures", "requests", "blocked", "recoveries"]);
            for breaker in &self.breakers {
                table.add_row(vec![
                    breaker.agent_name.clone(),
                    colorize_state(breaker.state.as_str()).to_string(),
                    breaker.failure_count.to_string(),
                    breaker.total_requests.to_string(),
                    breaker.blocked_requests.to_string(),
                    breaker.recovery_attempts.to_string(),
                ]);
            }
            lines.push(table.to_string());
        }

        lines.push(String::new());
        lines.push(format!(
            "Average duration: {:.3}s over {} recorded execution(s)",
            self.metrics.average_duration_seconds,
            self.metrics.recorded_executions()
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: SimulateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let manager = build_manager(config)?;
    let report = run(&manager, &args).await?;
    output(&report, json_mode);
    Ok(())
}

/// Run the simulation against `manager`.
pub async fn run(manager: &SecurityManager, args: &SimulateArgs) -> Result<SimulationReport> {
    if args.concurrency == 0 {
        bail!("concurrency must be at least 1");
    }

    for (primary, fallback) in &args.fallback {
        manager
            .circuit_breaker()
            .add_fallback_agent(primary.clone(), fallback.clone())
            .await;
    }
    manager.start().await;

    let started = Instant::now();
    let work = Duration::from_millis(args.duration_ms);
    let outcomes: Vec<ProtectedOutcome<String>> = stream::iter(0..args.executions)
        .map(|iteration| {
            let mut request = ExecutionRequest::new(args.agent.clone(), args.user.clone())
                .with_context(serde_json::json!({ "iteration": iteration }));
            if let Some(timeout) = args.timeout {
                request = request.with_timeout(timeout);
            }
            let fail = args.fail_every > 0 && (iteration + 1) % args.fail_every == 0;

            manager.execute_protected(request, move |ticket| async move {
                tokio::time::sleep(work).await;
                if fail {
                    Err(format!("Simulated failure on iteration {iteration}"))
                } else {
                    Ok(ticket.agent_name)
                }
            })
        })
        .buffer_unordered(args.concurrency)
        .collect()
        .await;

    let mut report = SimulationReport {
        agent: args.agent.clone(),
        user: args.user.clone(),
        executions: args.executions,
        ..Default::default()
    };
    for outcome in outcomes {
        report.tally(outcome);
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report.breakers = manager.circuit_breaker().get_system_status().await.agents;
    report.metrics = manager.get_security_metrics().await;

    manager.shutdown().await;
    Ok(report)
}
