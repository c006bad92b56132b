use serde_json::Value;

use payoff_engine_core::payoff::TemplateRegistry;

pub fn run_templates() -> Result<Value, Box<dyn std::error::Error>> {
    let registry = TemplateRegistry::default();
    let specs: Vec<_> = registry.specs().collect();
    Ok(serde_json::to_value(specs)?)
}
