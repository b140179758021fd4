use std::collections::BTreeMap;

use fabricd_domain::{
    Aspect, AspectKind, ChassisConfigState, DeviceConfig, P4rtMastershipState,
    PipelineConfigState, StratumAgents, TargetId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Entity,
    Relation,
}

/// The typed aspects an object may carry. One field per known aspect message;
/// each reconciler owns a disjoint subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Aspects {
    pub stratum_agents: Option<StratumAgents>,
    pub device_config: Option<DeviceConfig>,
    pub pipeline_config_state: Option<PipelineConfigState>,
    pub chassis_config_state: Option<ChassisConfigState>,
    pub p4rt_mastership: Option<P4rtMastershipState>,
}

impl Aspects {
    pub fn has(&self, kind: AspectKind) -> bool {
        match kind {
            AspectKind::StratumAgents => self.stratum_agents.is_some(),
            AspectKind::DeviceConfig => self.device_config.is_some(),
            AspectKind::PipelineConfigState => self.pipeline_config_state.is_some(),
            AspectKind::ChassisConfigState => self.chassis_config_state.is_some(),
            AspectKind::P4rtMastership => self.p4rt_mastership.is_some(),
        }
    }

    pub fn set(&mut self, aspect: Aspect) {
        match aspect {
            Aspect::StratumAgents(a) => self.stratum_agents = Some(a),
            Aspect::DeviceConfig(a) => self.device_config = Some(a),
            Aspect::PipelineConfigState(a) => self.pipeline_config_state = Some(a),
            Aspect::ChassisConfigState(a) => self.chassis_config_state = Some(a),
            Aspect::P4rtMastership(a) => self.p4rt_mastership = Some(a),
        }
    }
}

/// An externally owned topology entity. The `revision` is bumped by the store
/// on every update and checked optimistically on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopoObject {
    pub id: TargetId,
    #[serde(default)]
    pub kind: ObjectKind,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub aspects: Aspects,
    #[serde(default)]
    pub revision: u64,
}

impl TopoObject {
    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            kind: ObjectKind::Entity,
            labels: BTreeMap::new(),
            aspects: Aspects::default(),
            revision: 0,
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn aspect(mut self, aspect: Aspect) -> Self {
        self.aspects.set(aspect);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

/// A topology change notification. `Removed` carries the last known snapshot
/// of the object.
#[derive(Debug, Clone, PartialEq)]
pub struct TopoEvent {
    pub kind: EventKind,
    pub object: TopoObject,
}

/// Restricts queries and watches to the entities one engine instance manages:
/// a single label equality, the entity type, and a required-aspect list.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmFilter {
    pub label: String,
    pub value: String,
    pub with_aspects: Vec<AspectKind>,
}

impl RealmFilter {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            with_aspects: Vec::new(),
        }
    }

    pub fn with_aspects(mut self, aspects: impl IntoIterator<Item = AspectKind>) -> Self {
        self.with_aspects.extend(aspects);
        self
    }

    /// The filter shared by all three reconcilers: in-realm entities carrying
    /// both declared intent and connection parameters.
    pub fn device_realm(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, value)
            .with_aspects([AspectKind::DeviceConfig, AspectKind::StratumAgents])
    }

    pub fn matches(&self, object: &TopoObject) -> bool {
        object.kind == ObjectKind::Entity
            && object.labels.get(&self.label).map(String::as_str) == Some(self.value.as_str())
            && self.with_aspects.iter().all(|k| object.aspects.has(*k))
    }
}
