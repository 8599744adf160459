//! The `run` command: one complete simulation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use meshsim_config::{ConfigLoader, MeshsimConfig};
use meshsim_flow::FlowTracer;
use meshsim_runtime::{LogSink, Settings, SimReport, simulate};

use crate::style::colors::SemanticStyle;
use crate::style::{print_labeled, print_spacer, print_success, print_warn};

/// Overrides for a single run; anything unset comes from configuration.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Architecture description to run instead of the configured one (TOML or JSON).
    #[arg(short, long)]
    pub arch_file: Option<PathBuf>,

    /// How long to drive traffic, e.g. 10s or 1m30s.
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Number of active regions.
    #[arg(short, long)]
    pub regions: Option<usize>,

    /// Service type that loses one node half way through the run.
    #[arg(short, long)]
    pub victim: Option<String>,

    /// Interval between client requests, e.g. 10ms.
    #[arg(long)]
    pub chat: Option<String>,

    /// Write collected flow spans to this JSON file.
    #[arg(short, long)]
    pub flow_file: Option<PathBuf>,

    /// Seed for every random choice.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Log every message received.
    #[arg(long)]
    pub msglog: bool,

    /// Skip flow collection.
    #[arg(long)]
    pub no_flow: bool,
}

impl RunArgs {
    /// Applies the flags on top of loaded configuration.
    pub fn apply(self, mut config: MeshsimConfig) -> Result<MeshsimConfig> {
        if let Some(path) = &self.arch_file {
            config = config
                .with_architecture_file(path)
                .with_context(|| format!("Failed to load architecture from {}", path.display()))?;
            config.simulation.arch = None;
        }
        if let Some(duration) = self.duration {
            config.simulation.duration = duration;
        }
        if let Some(regions) = self.regions {
            config.topology.regions = regions;
        }
        if self.victim.is_some() {
            config.simulation.victim = self.victim;
        }
        if let Some(chat) = self.chat {
            config.activity.chat_rate = chat;
        }
        if self.flow_file.is_some() {
            config.output.flow_file = self.flow_file;
        }
        if self.seed.is_some() {
            config.simulation.seed = self.seed;
        }
        config.output.msglog |= self.msglog;
        if self.no_flow {
            config.output.flow = false;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Runtime settings for a validated configuration.
pub fn settings_from(config: &MeshsimConfig) -> Result<Settings> {
    Ok(Settings {
        arch: config.arch_name().to_string(),
        regions: config.topology.regions,
        region_names: config.topology.region_names.clone(),
        zone_names: config.topology.zone_names.clone(),
        poll_interval: config.poll_interval()?,
        chat_rate: config.activity.chat_rate.clone(),
        registry_buffer: config.discovery.registry_buffer,
        msglog: config.output.msglog,
        seed: config.simulation.seed,
        shutdown_timeout: config.shutdown_timeout()?,
    })
}

pub fn run(project: &Path, args: RunArgs) -> Result<()> {
    let loaded = ConfigLoader::new()
        .with_project_dir(project)
        .load()
        .context("Failed to load configuration")?;
    let config = args.apply(loaded)?;
    let settings = settings_from(&config)?;
    let duration = config.duration()?;
    let tracer = config.output.flow.then(|| Arc::new(FlowTracer::new()));

    println!(
        "Simulating {} across {} region(s) for {}...",
        config.arch_name().header(),
        settings.regions.to_string().header(),
        config.simulation.duration.code()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(simulate(
        settings,
        config.architecture.clone(),
        tracer.clone(),
        Box::new(LogSink::default()),
        duration,
        config.simulation.victim.as_deref(),
    ))?;

    print_report(&report, config.simulation.victim.as_deref());

    if let (Some(tracer), Some(path)) = (&tracer, &config.output.flow_file) {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let spans = tracer.write_json_file(path)?;
        print_labeled("Flow spans", &format!("{spans} written to {}", path.display().code()));
    }
    Ok(())
}

fn print_report(report: &SimReport, wanted_victim: Option<&str>) {
    print_spacer();
    print_success(&format!("Simulation of {} complete", report.arch));
    print_labeled("Nodes", &report.nodes.to_string());
    print_labeled("Registries", &report.registries.to_string());
    print_labeled(
        "Goodbyes",
        &format!("{} sent, {} acknowledged", report.goodbyes_sent, report.acks),
    );
    print_labeled("Registries drained", &report.registries_drained.to_string());
    print_labeled("Flows completed", &report.flows_completed.to_string());
    print_labeled("Elapsed", &format_elapsed(report.elapsed));
    match (&report.victim, wanted_victim) {
        (Some(victim), _) => print_labeled("Chaos victim", victim),
        (None, Some(service)) => print_warn(&format!("no live {service} node to remove")),
        (None, None) => {}
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_configuration() {
        let args = RunArgs {
            duration: Some("2s".to_string()),
            regions: Some(2),
            victim: Some("homepage".to_string()),
            seed: Some(9),
            no_flow: true,
            ..RunArgs::default()
        };
        let config = args.apply(MeshsimConfig::default()).unwrap();

        assert_eq!(config.simulation.duration, "2s");
        assert_eq!(config.topology.regions, 2);
        assert_eq!(config.simulation.victim.as_deref(), Some("homepage"));
        assert_eq!(config.simulation.seed, Some(9));
        assert!(!config.output.flow);
    }

    #[test]
    fn invalid_flag_fails_validation() {
        let args = RunArgs {
            regions: Some(0),
            ..RunArgs::default()
        };
        assert!(args.apply(MeshsimConfig::default()).is_err());
    }

    #[test]
    fn settings_carry_parsed_durations() {
        let mut config = MeshsimConfig::default();
        config.discovery.poll_interval = "250ms".to_string();
        let settings = settings_from(&config).unwrap();

        assert_eq!(settings.arch, "netflixoss");
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.zone_names.len(), 3);
        settings.validate().unwrap();
    }
}
