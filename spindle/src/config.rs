//! Pass configuration
use crate::{Error, graph::visitor::DEFAULT_NODES_HINT};
use serde::{Deserialize, Serialize};

/// Strategy used by the buffer scheduler to pick a donor tensor
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SchedulerMode {
    /// Don't reuse buffers
    None,
    /// Reuse the first buffer which is large enough (or can grow)
    #[default]
    WholeBuffer,
    /// Reuse the buffer which needs the least growth
    MinimizeSize,
    /// Reuse the most recently accessed buffer, which is likely still in cache
    HotMemoryFirst,
}

impl TryFrom<u8> for SchedulerMode {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::WholeBuffer),
            2 => Ok(Self::MinimizeSize),
            3 => Ok(Self::HotMemoryFirst),
            v => Err(Error::BadSchedulerMode(v)),
        }
    }
}

/// Options shared by the graph and IR passes
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PassConfig {
    /// Donor selection strategy for the buffer scheduler
    pub buffer_scheduler_mode: SchedulerMode,
    /// Remove stores whose values are never read before scheduling
    pub eliminate_dead_writes: bool,
    /// Expected number of graph nodes; a sizing hint with no effect on
    /// results
    pub total_nodes_hint: usize,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            buffer_scheduler_mode: SchedulerMode::default(),
            eliminate_dead_writes: true,
            total_nodes_hint: DEFAULT_NODES_HINT,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mode_names() {
        for (i, m) in SchedulerMode::iter().enumerate() {
            assert_eq!(SchedulerMode::try_from(i as u8).unwrap(), m);
            assert_eq!(SchedulerMode::from_str(&m.to_string()).unwrap(), m);
        }
        let hot = SchedulerMode::HotMemoryFirst;
        assert_eq!(hot.to_string(), "hot-memory-first");
        assert!(matches!(
            SchedulerMode::try_from(4),
            Err(Error::BadSchedulerMode(4))
        ));
    }

    #[test]
    fn test_config_json() {
        let c: PassConfig = serde_json::from_str(
            r#"{ "buffer-scheduler-mode": "minimize-size" }"#,
        )
        .unwrap();
        assert_eq!(c.buffer_scheduler_mode, SchedulerMode::MinimizeSize);
        assert!(c.eliminate_dead_writes);
        assert_eq!(c.total_nodes_hint, 30);

        let c: PassConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, PassConfig::default());
    }
}
