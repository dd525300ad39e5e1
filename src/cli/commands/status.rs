//! Composite security status.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::build_manager;
use crate::cli::output::{colorize_state, heading, list_table, output, CommandOutput};
use crate::domain::models::{Config, SecurityStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    #[serde(flatten)]
    pub status: SecurityStatus,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let status = &self.status;
        let resources = &status.resources;
        let usage = &resources.usage;
        let limits = &resources.limits;
        let mut lines = vec![format!(
            "Overall: {}",
            colorize_state(&status.overall)
        )];

        lines.push(String::new());
        lines.push(heading("Resources"));
        lines.push(format!("  status:      {}", colorize_state(resources.status.as_str())));
        lines.push(format!(
            "  memory:      {:.1} / {:.1} MB ({:.0}%)",
            usage.memory_mb,
            limits.max_memory_mb,
            resources.ratios.memory * 100.0
        ));
        lines.push(format!(
            "  cpu:         {:.1} / {:.1} %",
            usage.cpu_percent, limits.max_cpu_percent
        ));
        lines.push(format!(
            "  disk free:   {:.0} MB (minimum {:.0} MB)",
            usage.disk_space_mb, limits.min_disk_space_mb
        ));
        lines.push(format!(
            "  executions:  {} / {} across {} user(s)",
            usage.concurrent_executions, limits.max_concurrent_global, usage.active_users
        ));
        lines.push(format!(
            "  monitoring:  {}",
            if resources.monitoring_active { "active" } else { "stopped" }
        ));

        let circuits = &status.circuits;
        lines.push(String::new());
        lines.push(heading("Circuits"));
        lines.push(format!("  health:      {}", colorize_state(circuits.health.as_str())));
        lines.push(format!(
            "  open:        {} of {} (half open {})",
            circuits.open_circuits, circuits.total_agents, circuits.half_open_circuits
        ));
        if !circuits.agents.is_empty() {
            let mut table = list_table(&["agent", "state", "failures", "requests", "blocked"]);
            for agent in &circuits.agents {
                table.add_row(vec![
                    agent.agent_name.clone(),
                    colorize_state(agent.state.as_str()).to_string(),
                    agent.failure_count.to_string(),
                    agent.total_requests.to_string(),
                    agent.blocked_requests.to_string(),
                ]);
            }
            lines.push(table.to_string());
        }
        if !circuits.fallback_agents.is_empty() {
            lines.push("  fallbacks:".to_string());
            for (primary, fallback) in &circuits.fallback_agents {
                lines.push(format!("    {primary} -> {fallback}"));
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "Active executions: {}",
            status.active_executions.len()
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(_args: StatusArgs, config: &Config, json_mode: bool) -> Result<()> {
    let manager = build_manager(config)?;
    let status = manager.get_security_status().await;
    output(&StatusOutput { status }, json_mode);
    Ok(())
}
