use nimbus_deploy::TeardownSummary;
use nimbus_planner::{is_gated, ModelRegistry};

pub fn print_models(registry: &ModelRegistry) {
    println!("\n=== Registered Models ===");
    if registry.is_empty() {
        println!("  (No models registered)");
        return;
    }

    println!(
        "  {:<22} {:<36} {:<42} {:<6}",
        "Name", "Repository", "Revision", "Gated"
    );
    println!("  {:-<108}", "");
    for entry in registry.entries() {
        println!(
            "  {:<22} {:<36} {:<42} {:<6}",
            entry.name,
            entry.repo_id,
            entry.repo_version,
            if is_gated(entry) { "yes" } else { "no" }
        );
    }
    println!();
}

pub fn print_teardown(namespace: &str, name: &str, summary: &TeardownSummary) {
    println!("✓ teardown {namespace}/{name}");
    for target in &summary.deleted {
        println!("  deleted         {target}");
    }
    for target in &summary.already_absent {
        println!("  already absent  {target}");
    }
}
