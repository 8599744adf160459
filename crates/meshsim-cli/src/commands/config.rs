//! Configuration display.

use anyhow::{Context, Result};
use meshsim_config::MeshsimConfig;
use std::path::Path;

use crate::style::colors::SemanticStyle;
use crate::style::{print_labeled, print_spacer};

/// Show the configuration a run in `project` would use.
pub fn show(project: &Path, format: &str) -> Result<()> {
    let config = MeshsimConfig::load_from_dir(project).context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", config.to_toml()?),
        "text" => print_text(&config),
        other => anyhow::bail!("unknown format {other:?}, expected text, toml or json"),
    }
    Ok(())
}

fn print_text(config: &MeshsimConfig) {
    println!("{}", "meshsim configuration".header());
    print_spacer();

    println!("Simulation:");
    print_labeled("Architecture", config.arch_name());
    print_labeled("Duration", &config.simulation.duration);
    print_labeled(
        "Seed",
        &config
            .simulation
            .seed
            .map_or("random".to_string(), |s| s.to_string()),
    );
    print_labeled("Victim", config.simulation.victim.as_deref().unwrap_or("none"));
    print_spacer();

    println!("Topology:");
    print_labeled("Regions", &config.topology.regions.to_string());
    let active = &config.topology.region_names[..config
        .topology
        .regions
        .min(config.topology.region_names.len())];
    print_labeled("Active regions", &active.join(", "));
    print_labeled("Zones", &config.topology.zone_names.join(", "));
    print_spacer();

    println!("Discovery:");
    print_labeled("Poll interval", &config.discovery.poll_interval);
    print_labeled("Registry buffer", &config.discovery.registry_buffer.to_string());
    print_spacer();

    println!("Activity:");
    print_labeled("Chat rate", &config.activity.chat_rate);
    print_spacer();

    println!("Services ({}):", config.architecture.services.len());
    for service in &config.architecture.services {
        let deps = if service.dependencies.is_empty() {
            String::new()
        } else {
            format!(" -> {}", service.dependencies.join(", "))
        };
        println!(
            "  {} {} x{} in {} region(s){}",
            service.name.code(),
            service.package.muted(),
            service.count,
            service.regions,
            deps
        );
    }
}
