//! Instance scaling plan types

use crate::ids::AppGuid;
use crate::release::InstanceState;
use serde::{Deserialize, Serialize};

/// Order of the two phases of a standard resize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizeStrategy {
    /// Downsize previous releases, then upsize the new one
    DownscaleOldFirst,
    /// Upsize the new release, then downsize previous ones
    #[default]
    UpscaleNewFirst,
}

/// Direction of a scaling entry, derived from its count delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Upsize,
    Downsize,
    Unchanged,
}

/// One step of an instance scaling plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceScalingEntry {
    pub guid: AppGuid,
    pub name: String,
    pub desired_count: u32,
    pub previous_count: u32,
}

impl InstanceScalingEntry {
    pub fn new(guid: AppGuid, name: impl Into<String>, desired: u32, previous: u32) -> Self {
        Self {
            guid,
            name: name.into(),
            desired_count: desired,
            previous_count: previous,
        }
    }

    pub fn direction(&self) -> ScaleDirection {
        match self.desired_count.cmp(&self.previous_count) {
            std::cmp::Ordering::Greater => ScaleDirection::Upsize,
            std::cmp::Ordering::Less => ScaleDirection::Downsize,
            std::cmp::Ordering::Equal => ScaleDirection::Unchanged,
        }
    }

    /// Entry that undoes this one
    pub fn reversed(&self) -> Self {
        Self {
            guid: self.guid.clone(),
            name: self.name.clone(),
            desired_count: self.previous_count,
            previous_count: self.desired_count,
        }
    }
}

/// An instance observed after a scaling step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub release_name: String,
    pub guid: AppGuid,
    pub index: u32,
    pub state: InstanceState,
    /// True when the instance appeared as part of an upsize
    pub is_upsize: bool,
}
