//! Shared closed vocabularies for the orchestration engine.
//!
//! Collaborator replies arrive as free text, so every string that is
//! supposed to name a capability or an execution strategy passes through
//! the normalization functions here before the rest of the system sees it.
//! Unknown values degrade to a known-safe variant instead of propagating
//! untyped strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Core capability categories workers can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    BrandCreation,
    LogoGeneration,
    MarketAnalysis,
    WebsiteBuilding,
    SalesOutreach,
    ContentCreation,
    LeadGeneration,
    DataAnalysis,
    DesignServices,
    TechnicalImplementation,
}

impl CapabilityCategory {
    /// All categories, in declaration order.
    pub const ALL: [CapabilityCategory; 10] = [
        CapabilityCategory::BrandCreation,
        CapabilityCategory::LogoGeneration,
        CapabilityCategory::MarketAnalysis,
        CapabilityCategory::WebsiteBuilding,
        CapabilityCategory::SalesOutreach,
        CapabilityCategory::ContentCreation,
        CapabilityCategory::LeadGeneration,
        CapabilityCategory::DataAnalysis,
        CapabilityCategory::DesignServices,
        CapabilityCategory::TechnicalImplementation,
    ];

    /// The canonical snake_case identifier used in prompts and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityCategory::BrandCreation => "brand_creation",
            CapabilityCategory::LogoGeneration => "logo_generation",
            CapabilityCategory::MarketAnalysis => "market_analysis",
            CapabilityCategory::WebsiteBuilding => "website_building",
            CapabilityCategory::SalesOutreach => "sales_outreach",
            CapabilityCategory::ContentCreation => "content_creation",
            CapabilityCategory::LeadGeneration => "lead_generation",
            CapabilityCategory::DataAnalysis => "data_analysis",
            CapabilityCategory::DesignServices => "design_services",
            CapabilityCategory::TechnicalImplementation => "technical_implementation",
        }
    }

    /// Short description of the category, used when enumerating the
    /// capability vocabulary in collaborator prompts.
    pub fn description(&self) -> &'static str {
        match self {
            CapabilityCategory::BrandCreation => {
                "Creating brand strategy, messaging, and identity"
            }
            CapabilityCategory::LogoGeneration => "Designing logos and visual brand assets",
            CapabilityCategory::MarketAnalysis => {
                "Market research, competitor analysis, trend identification"
            }
            CapabilityCategory::WebsiteBuilding => {
                "Building responsive websites with modern design"
            }
            CapabilityCategory::SalesOutreach => {
                "Creating sales materials and outreach campaigns"
            }
            CapabilityCategory::ContentCreation => {
                "Writing marketing copy, blog posts, social content"
            }
            CapabilityCategory::LeadGeneration => "Finding and qualifying potential customers",
            CapabilityCategory::DataAnalysis => "Analyzing data and creating insights",
            CapabilityCategory::DesignServices => "Visual design and creative services",
            CapabilityCategory::TechnicalImplementation => {
                "Technical development and implementation"
            }
        }
    }

    /// Normalize a free-text capability name against the closed vocabulary.
    ///
    /// Exact snake_case match first, then a small synonym table. Returns
    /// `None` for strings that map to nothing; the caller decides how to
    /// degrade (the Understanding Service defaults to `ContentCreation`).
    pub fn normalize(raw: &str) -> Option<CapabilityCategory> {
        let value = raw.trim().to_lowercase();
        if value.is_empty() || value == "none" || value == "null" {
            return None;
        }

        for cap in CapabilityCategory::ALL {
            if cap.as_str() == value {
                return Some(cap);
            }
        }

        match value.as_str() {
            "branding" | "brand" => Some(CapabilityCategory::BrandCreation),
            "logo" | "logos" => Some(CapabilityCategory::LogoGeneration),
            "market" | "research" | "market research" => {
                Some(CapabilityCategory::MarketAnalysis)
            }
            "website" | "web" => Some(CapabilityCategory::WebsiteBuilding),
            "sales" | "outreach" => Some(CapabilityCategory::SalesOutreach),
            "content" | "writing" | "copywriting" => Some(CapabilityCategory::ContentCreation),
            "leads" | "prospects" | "prospecting" | "lead generation" | "lead mining"
            | "find leads" => Some(CapabilityCategory::LeadGeneration),
            "data" | "analysis" | "analytics" => Some(CapabilityCategory::DataAnalysis),
            "design" | "visual" => Some(CapabilityCategory::DesignServices),
            "technical" | "development" | "engineering" => {
                Some(CapabilityCategory::TechnicalImplementation)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy for scheduling the workers of one workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One worker, synchronous call.
    #[default]
    Single,
    /// All workers dispatched concurrently, joined before consolidation.
    Parallel,
    /// Workers run strictly in registry-resolved order, each result merged
    /// into context before the next dispatch.
    Sequential,
    /// Groups run in sequence, workers inside a group run in parallel.
    Hybrid,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Single => "single",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Hybrid => "hybrid",
        }
    }

    /// Normalize a free-text strategy name. Returns `None` for unknown or
    /// empty values; the parsing boundary falls back to `Single`.
    pub fn normalize(raw: &str) -> Option<ExecutionStrategy> {
        match raw.trim().to_lowercase().as_str() {
            "single" | "single_agent" | "single_worker" => Some(ExecutionStrategy::Single),
            "parallel" | "parallel_multi" => Some(ExecutionStrategy::Parallel),
            "sequential" | "sequential_multi" => Some(ExecutionStrategy::Sequential),
            "hybrid" => Some(ExecutionStrategy::Hybrid),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency hint extracted from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    pub fn normalize(raw: &str) -> Urgency {
        match raw.trim().to_lowercase().as_str() {
            "low" => Urgency::Low,
            "high" => Urgency::High,
            _ => Urgency::Medium,
        }
    }
}
