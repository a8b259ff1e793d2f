//! The capability → worker registry and dependency-aware ordering.

use crate::capabilities::descriptor::{self, CapabilityDescriptor};
use crate::error::RegistryError;
use crate::types::CapabilityCategory;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

/// Static map from capability categories to the workers providing them.
///
/// Registration order matters: `best_agent` returns the first worker
/// registered for a category. Scoring beyond that is reserved.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capability_map: HashMap<CapabilityCategory, Vec<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in business-automation workers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(
            CapabilityDescriptor::new("branding_agent", CapabilityCategory::BrandCreation)
                .with_skills(&["brand_strategy", "brand_messaging", "brand_identity"])
                .with_requirement("api_access", json!("reasoning"))
                .with_requirement("output_format", json!("structured")),
        );

        registry.register(
            CapabilityDescriptor::new(
                "logo_generation_agent",
                CapabilityCategory::LogoGeneration,
            )
            .with_skills(&["logo_design", "visual_identity", "brand_assets"])
            .with_requirement("image_generation", json!(true))
            .with_duration(120),
        );

        registry.register(
            CapabilityDescriptor::new(
                "market_research_agent",
                CapabilityCategory::MarketAnalysis,
            )
            .with_skills(&["market_sizing", "competitor_analysis", "trend_analysis"])
            .with_requirement("web_access", json!(true))
            .with_requirement("data_sources", json!(["web", "apis"])),
        );

        registry.register(
            CapabilityDescriptor::new(
                "website_generator_agent",
                CapabilityCategory::WebsiteBuilding,
            )
            .with_skills(&["html_generation", "responsive_design", "seo_optimization"])
            .with_requirement("template_access", json!(true))
            .with_requirement("asset_management", json!(true)),
        );

        // Preferred lead source; the scanner below is the fallback.
        registry.register(
            CapabilityDescriptor::new("lead_mining_agent", CapabilityCategory::LeadGeneration)
                .with_skills(&[
                    "prospect_search",
                    "icp_analysis",
                    "lead_qualification",
                ])
                .with_requirement("data_validation", json!(true)),
        );

        registry.register(
            CapabilityDescriptor::new("lead_scanner_agent", CapabilityCategory::LeadGeneration)
                .with_skills(&[
                    "prospect_identification",
                    "contact_discovery",
                    "lead_qualification",
                ])
                .with_requirement("web_access", json!(true))
                .with_requirement("data_extraction", json!(true)),
        );

        registry.register(
            CapabilityDescriptor::new(
                "content_creator_agent",
                CapabilityCategory::ContentCreation,
            )
            .with_skills(&[
                "copywriting",
                "blog_posts",
                "social_media_content",
                "marketing_materials",
            ])
            .with_requirement("output_format", json!("text")),
        );

        registry.register(
            CapabilityDescriptor::new(
                "design_services_agent",
                CapabilityCategory::DesignServices,
            )
            .with_skills(&["visual_design", "ui_design", "graphic_design", "layout_design"])
            .with_requirement("design_tools", json!(true)),
        );

        registry.register(
            CapabilityDescriptor::new(
                "technical_implementation_agent",
                CapabilityCategory::TechnicalImplementation,
            )
            .with_skills(&["system_integration", "api_development", "technical_setup"])
            .with_requirement("development_tools", json!(true)),
        );

        registry.register(
            CapabilityDescriptor::new("data_analysis_agent", CapabilityCategory::DataAnalysis)
                .with_skills(&["data_processing", "statistical_analysis", "reporting"])
                .with_requirement("data_tools", json!(true)),
        );

        registry.register(
            CapabilityDescriptor::new("sales_outreach_agent", CapabilityCategory::SalesOutreach)
                .with_skills(&["outreach_campaigns", "sales_materials", "email_sequences"])
                .with_dependencies(&[CapabilityCategory::LeadGeneration]),
        );

        // Fallback worker for requests nothing else covers.
        registry.register(
            CapabilityDescriptor::new("general_agent", CapabilityCategory::ContentCreation)
                .with_skills(&[
                    "general_assistance",
                    "information_processing",
                    "basic_analysis",
                ]),
        );

        registry
    }

    /// Register a worker descriptor.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) {
        log::info!(
            "Registered {} for {}",
            descriptor.worker_id,
            descriptor.capability
        );
        self.capability_map
            .entry(descriptor.capability)
            .or_default()
            .push(descriptor);
    }

    /// Register every worker defined in a YAML string.
    pub fn register_from_yaml_str(&mut self, yaml: &str) -> Result<usize, RegistryError> {
        let descriptors = descriptor::from_yaml_str(yaml)?;
        let count = descriptors.len();
        for d in descriptors {
            self.register(d);
        }
        Ok(count)
    }

    /// Register every worker defined in a YAML file.
    pub fn register_from_yaml_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<usize, RegistryError> {
        let descriptors = descriptor::from_yaml_file(path)?;
        let count = descriptors.len();
        for d in descriptors {
            self.register(d);
        }
        Ok(count)
    }

    /// All workers that can handle `capability`, in registration order.
    pub fn agents_for(&self, capability: CapabilityCategory) -> &[CapabilityDescriptor] {
        self.capability_map
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The preferred worker for `capability`: first registered.
    pub fn best_agent(&self, capability: CapabilityCategory) -> Option<&CapabilityDescriptor> {
        self.agents_for(capability).first()
    }

    /// Whether any registered worker has this id.
    pub fn worker_exists(&self, worker_id: &str) -> bool {
        self.find_worker(worker_id).is_some()
    }

    /// Look up a descriptor by worker id.
    pub fn find_worker(&self, worker_id: &str) -> Option<&CapabilityDescriptor> {
        self.capability_map
            .values()
            .flatten()
            .find(|d| d.worker_id == worker_id)
    }

    /// Human-readable worker roster for collaborator prompts.
    pub fn worker_descriptions(&self) -> String {
        let mut lines: Vec<String> = self
            .capability_map
            .values()
            .flatten()
            .map(CapabilityDescriptor::prompt_line)
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Order capabilities so dependencies come before dependents.
    ///
    /// Bounded fixed-point pass: each round admits every capability whose
    /// dependencies (judged by its preferred worker) are already placed, or
    /// that has no worker at all. After `2 * len` rounds without finishing,
    /// or a round with no progress, the remainder is appended in its
    /// original order and a warning names the capabilities involved.
    pub fn resolve_order(
        &self,
        capabilities: &[CapabilityCategory],
    ) -> Vec<CapabilityCategory> {
        let mut resolved: Vec<CapabilityCategory> = Vec::with_capacity(capabilities.len());
        let mut remaining: Vec<CapabilityCategory> = capabilities.to_vec();
        let max_iterations = capabilities.len() * 2;
        let mut iteration = 0;

        while !remaining.is_empty() && iteration < max_iterations {
            iteration += 1;
            let mut progress_made = false;

            remaining.retain(|&capability| {
                let satisfied = match self.best_agent(capability) {
                    // No worker: keep it in the order anyway, execution will
                    // flag the gap.
                    None => true,
                    Some(agent) => agent
                        .dependencies
                        .iter()
                        .all(|dep| resolved.contains(dep)),
                };
                if satisfied {
                    resolved.push(capability);
                    progress_made = true;
                    false
                } else {
                    true
                }
            });

            if !progress_made {
                break;
            }
        }

        if !remaining.is_empty() {
            log::warn!(
                "Unresolvable capability dependencies, appending in request order: {:?}",
                remaining
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
            );
            resolved.extend(remaining);
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_all_lookups() {
        let registry = CapabilityRegistry::with_builtins();
        assert!(registry.worker_exists("branding_agent"));
        assert!(registry.worker_exists("general_agent"));
        assert!(!registry.worker_exists("nonexistent_agent"));

        let leads = registry.agents_for(CapabilityCategory::LeadGeneration);
        assert_eq!(leads.len(), 2);
        assert_eq!(
            registry
                .best_agent(CapabilityCategory::LeadGeneration)
                .unwrap()
                .worker_id,
            "lead_mining_agent"
        );
    }

    #[test]
    fn test_resolve_order_puts_dependencies_first() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDescriptor::new(
            "branding_agent",
            CapabilityCategory::BrandCreation,
        ));
        registry.register(
            CapabilityDescriptor::new("logo_agent", CapabilityCategory::LogoGeneration)
                .with_dependencies(&[CapabilityCategory::BrandCreation]),
        );

        let order = registry.resolve_order(&[
            CapabilityCategory::LogoGeneration,
            CapabilityCategory::BrandCreation,
        ]);
        assert_eq!(
            order,
            vec![
                CapabilityCategory::BrandCreation,
                CapabilityCategory::LogoGeneration,
            ]
        );
    }

    #[test]
    fn test_resolve_order_terminates_on_cycle() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            CapabilityDescriptor::new("a", CapabilityCategory::BrandCreation)
                .with_dependencies(&[CapabilityCategory::LogoGeneration]),
        );
        registry.register(
            CapabilityDescriptor::new("b", CapabilityCategory::LogoGeneration)
                .with_dependencies(&[CapabilityCategory::BrandCreation]),
        );

        let input = vec![
            CapabilityCategory::BrandCreation,
            CapabilityCategory::LogoGeneration,
        ];
        let order = registry.resolve_order(&input);
        // Cycle: everything still comes back, in original order.
        assert_eq!(order, input);
    }

    #[test]
    fn test_resolve_order_keeps_capability_without_worker() {
        let registry = CapabilityRegistry::new();
        let order = registry.resolve_order(&[CapabilityCategory::DataAnalysis]);
        assert_eq!(order, vec![CapabilityCategory::DataAnalysis]);
    }

    #[test]
    fn test_register_from_yaml() {
        let mut registry = CapabilityRegistry::new();
        let yaml = r#"
workers:
  - worker_id: custom_agent
    capability: data_analysis
    specific_skills: [forecasting]
"#;
        let count = registry.register_from_yaml_str(yaml).unwrap();
        assert_eq!(count, 1);
        assert!(registry.worker_exists("custom_agent"));
    }
}
