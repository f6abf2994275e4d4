//! Detector registry
//!
//! Registration is static: the standard rule set is built once at startup
//! and shared between cycles through `Arc`.

use super::detection::PatternId;
use super::detectors::{
    BollingerSqueeze, Detector, MacdAlignment, MovingAverageCross, RsiBattle, RsiExtreme,
    RsiMidlineCross, VolumeBreakout,
};
use super::priority::Priority;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicatePatternId { id: PatternId, name: &'static str },
    DuplicateName(&'static str),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicatePatternId { id, name } => {
                write!(f, "pattern id {} registered twice (second: {})", id, name)
            }
            RegistryError::DuplicateName(name) => write!(f, "pattern name {} registered twice", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Static description of a registered rule
#[derive(Debug, Clone, Serialize)]
pub struct DetectorMetadata {
    pub pattern_id: PatternId,
    pub name: &'static str,
    pub priority: Priority,
    pub description: &'static str,
    pub min_len: usize,
}

/// Ordered set of detectors keyed by pattern id
#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Build a registry, rejecting duplicate ids or names
    pub fn new(detectors: Vec<Arc<dyn Detector>>) -> Result<Self, RegistryError> {
        for (i, detector) in detectors.iter().enumerate() {
            for earlier in &detectors[..i] {
                if earlier.pattern_id() == detector.pattern_id() {
                    return Err(RegistryError::DuplicatePatternId {
                        id: detector.pattern_id(),
                        name: detector.name(),
                    });
                }
                if earlier.name() == detector.name() {
                    return Err(RegistryError::DuplicateName(detector.name()));
                }
            }
        }
        Ok(Self { detectors })
    }

    /// The ten shipped rules, in pattern-id order
    pub fn standard() -> Self {
        Self {
            detectors: standard_detectors(),
        }
    }

    pub fn list(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn get(&self, id: PatternId) -> Option<Arc<dyn Detector>> {
        self.detectors.iter().find(|d| d.pattern_id() == id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn metadata(&self) -> Vec<DetectorMetadata> {
        self.detectors
            .iter()
            .map(|d| DetectorMetadata {
                pattern_id: d.pattern_id(),
                name: d.name(),
                priority: d.priority(),
                description: d.description(),
                min_len: d.min_len(),
            })
            .collect()
    }

    pub fn pattern_ids(&self) -> Vec<PatternId> {
        self.detectors.iter().map(|d| d.pattern_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

fn standard_detectors() -> Vec<Arc<dyn Detector>> {
    vec![
        Arc::new(RsiBattle::default()),
        Arc::new(MovingAverageCross::golden()),
        Arc::new(MovingAverageCross::death()),
        Arc::new(RsiExtreme::oversold()),
        Arc::new(RsiExtreme::overbought()),
        Arc::new(BollingerSqueeze::default()),
        Arc::new(MacdAlignment::bullish()),
        Arc::new(MacdAlignment::bearish()),
        Arc::new(VolumeBreakout::default()),
        Arc::new(RsiMidlineCross::default()),
    ]
}
