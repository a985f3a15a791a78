use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub id: String,
    pub name: String,
    pub color: String,
    pub position: u32,
}

/// Ordered deal stages. Stages are labels only: any stage may follow any other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    stages: Vec<StageConfig>,
}

impl Pipeline {
    pub fn new(mut stages: Vec<StageConfig>) -> Self {
        stages.sort_by_key(|s| s.position);
        Self { stages }
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn contains(&self, stage_id: &str) -> bool {
        self.stage(stage_id).is_some()
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn first(&self) -> Option<&StageConfig> {
        self.stages.first()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Pipeline {
    /// The stock `new → contacted → proposal → closed_won / closed_lost` pipeline.
    pub fn standard() -> Self {
        let stage = |id: &str, name: &str, color: &str, position: u32| StageConfig {
            id: id.into(),
            name: name.into(),
            color: color.into(),
            position,
        };
        Pipeline::new(vec![
            stage("new", "New", "#64748b", 0),
            stage("contacted", "Contacted", "#3b82f6", 1),
            stage("proposal", "Proposal", "#f59e0b", 2),
            stage("closed_won", "Closed Won", "#22c55e", 3),
            stage("closed_lost", "Closed Lost", "#ef4444", 4),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_kept_in_position_order() {
        let pipeline = Pipeline::new(vec![
            StageConfig {
                id: "b".into(),
                name: "B".into(),
                color: "#000".into(),
                position: 2,
            },
            StageConfig {
                id: "a".into(),
                name: "A".into(),
                color: "#000".into(),
                position: 1,
            },
        ]);
        let ids: Vec<_> = pipeline.stages().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn standard_pipeline_starts_at_new() {
        let pipeline = Pipeline::standard();
        assert_eq!(pipeline.first().map(|s| s.id.as_str()), Some("new"));
        assert!(pipeline.contains("closed_lost"));
        assert!(!pipeline.contains("archived"));
    }
}
