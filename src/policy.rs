//! Jurisdiction policy packs.
//!
//! The state machine is jurisdiction-agnostic: which signals complete a
//! workflow and how risk bands map to outcomes are data carried by a policy
//! pack, selected per tenant. Default packs for AU, EU, and GCC are
//! registered at construction; deployments override them from configuration.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::{
    signals, Jurisdiction, Outcome, PolicyRef, RiskBand, SignalMap, TenantId,
};

/// Mapping from risk band to decision outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeMapping(pub BTreeMap<RiskBand, Outcome>);

impl OutcomeMapping {
    /// Conservative default: low approves, medium reviews, high and critical
    /// decline.
    pub fn standard() -> Self {
        let mut map = BTreeMap::new();
        map.insert(RiskBand::Low, Outcome::Approve);
        map.insert(RiskBand::Medium, Outcome::Review);
        map.insert(RiskBand::High, Outcome::Decline);
        map.insert(RiskBand::Critical, Outcome::Decline);
        Self(map)
    }

    /// Unmapped bands fall back to review so an incomplete mapping can never
    /// silently approve.
    pub fn outcome_for(&self, band: RiskBand) -> Outcome {
        self.0.get(&band).copied().unwrap_or(Outcome::Review)
    }
}

/// A jurisdiction-specific policy pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPack {
    pub jurisdiction: Jurisdiction,
    pub pack_id: String,
    pub version: String,
    /// Signal names that must all be present before risk is invoked.
    pub required_signals: Vec<String>,
    pub outcome_mapping: OutcomeMapping,
}

impl PolicyPack {
    /// Whether the required signal set is complete.
    pub fn signals_complete(&self, signals: &SignalMap) -> bool {
        self.required_signals.iter().all(|name| signals.contains(name))
    }

    pub fn policy_ref(&self) -> PolicyRef {
        PolicyRef {
            jurisdiction: self.jurisdiction.clone(),
            pack_id: self.pack_id.clone(),
            pack_version: self.version.clone(),
        }
    }

    fn default_required_signals() -> Vec<String> {
        vec![
            signals::LIVENESS_SCORE.to_string(),
            signals::DOCUMENT_QUALITY.to_string(),
            signals::MATCH_SCORE.to_string(),
        ]
    }

    pub fn au_core() -> Self {
        Self {
            jurisdiction: Jurisdiction::au(),
            pack_id: "au-core".to_string(),
            version: "1.0.0".to_string(),
            required_signals: Self::default_required_signals(),
            outcome_mapping: OutcomeMapping::standard(),
        }
    }

    pub fn eu_core() -> Self {
        Self {
            jurisdiction: Jurisdiction::eu(),
            pack_id: "eu-core".to_string(),
            version: "1.0.0".to_string(),
            required_signals: Self::default_required_signals(),
            outcome_mapping: OutcomeMapping::standard(),
        }
    }

    pub fn gcc_core() -> Self {
        // Enhanced due diligence: medium band declines rather than reviews.
        let mut mapping = OutcomeMapping::standard();
        mapping.0.insert(RiskBand::Medium, Outcome::Decline);
        Self {
            jurisdiction: Jurisdiction::gcc(),
            pack_id: "gcc-core".to_string(),
            version: "1.0.0".to_string(),
            required_signals: Self::default_required_signals(),
            outcome_mapping: mapping,
        }
    }
}

/// Registry of policy packs plus tenant-to-jurisdiction routing.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    packs: HashMap<Jurisdiction, PolicyPack>,
    tenant_jurisdictions: HashMap<TenantId, Jurisdiction>,
    default_jurisdiction: Jurisdiction,
}

impl PolicyRegistry {
    /// Registry with the default AU/EU/GCC packs; AU is the fallback.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            packs: HashMap::new(),
            tenant_jurisdictions: HashMap::new(),
            default_jurisdiction: Jurisdiction::au(),
        };
        registry.register(PolicyPack::au_core());
        registry.register(PolicyPack::eu_core());
        registry.register(PolicyPack::gcc_core());
        registry
    }

    pub fn register(&mut self, pack: PolicyPack) {
        tracing::info!(
            jurisdiction = %pack.jurisdiction,
            pack_id = %pack.pack_id,
            version = %pack.version,
            "registered policy pack"
        );
        self.packs.insert(pack.jurisdiction.clone(), pack);
    }

    pub fn route_tenant(&mut self, tenant: TenantId, jurisdiction: Jurisdiction) {
        self.tenant_jurisdictions.insert(tenant, jurisdiction);
    }

    pub fn set_default_jurisdiction(&mut self, jurisdiction: Jurisdiction) {
        self.default_jurisdiction = jurisdiction;
    }

    /// Pack for a tenant, falling back to the default jurisdiction.
    pub fn pack_for(&self, tenant: &TenantId) -> &PolicyPack {
        let jurisdiction = self
            .tenant_jurisdictions
            .get(tenant)
            .unwrap_or(&self.default_jurisdiction);
        self.packs
            .get(jurisdiction)
            .or_else(|| self.packs.get(&self.default_jurisdiction))
            .or_else(|| self.packs.values().next())
            .expect("registry is constructed with at least one policy pack")
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
