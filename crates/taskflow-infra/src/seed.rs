//! Built-in default template, seeded on first startup.

use std::collections::HashMap;

use taskflow_core::repository::TemplateStore;
use taskflow_types::error::StoreError;
use taskflow_types::workflow::{
    GraphEdge, ModelPreference, NodeContract, NodeDefinition, OutputKind, WorkflowGraph,
    WorkflowTemplate,
};

/// The understand / execute / synthesize pipeline shipped with the engine.
pub fn default_template() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "template.default.v1".to_string(),
        name: "Default task pipeline".to_string(),
        version: 1,
        description: Some("Understand the task, execute it, synthesize the results".to_string()),
        graph: WorkflowGraph {
            nodes: vec![
                NodeDefinition {
                    id: "understand_task".to_string(),
                    name: "Understand task".to_string(),
                    description: Some("Break the task down and note constraints".to_string()),
                    depends_on: vec![],
                },
                NodeDefinition {
                    id: "execute_task".to_string(),
                    name: "Execute task".to_string(),
                    description: Some("Carry out the planned work".to_string()),
                    depends_on: vec!["understand_task".to_string()],
                },
                NodeDefinition {
                    id: "synthesize_results".to_string(),
                    name: "Synthesize results".to_string(),
                    description: Some("Combine step outputs into a final answer".to_string()),
                    depends_on: vec!["execute_task".to_string()],
                },
            ],
            edges: vec![
                GraphEdge {
                    source: "understand_task".to_string(),
                    target: "execute_task".to_string(),
                },
                GraphEdge {
                    source: "execute_task".to_string(),
                    target: "synthesize_results".to_string(),
                },
            ],
        },
        contracts: HashMap::from([
            (
                "understand_task".to_string(),
                NodeContract {
                    model_preference: ModelPreference::Cheap,
                    max_retries: 1,
                    output: OutputKind::Plan,
                    ..NodeContract::default()
                },
            ),
            (
                "execute_task".to_string(),
                NodeContract {
                    model_preference: ModelPreference::Default,
                    max_retries: 2,
                    output: OutputKind::Execution,
                    ..NodeContract::default()
                },
            ),
            (
                "synthesize_results".to_string(),
                NodeContract {
                    model_preference: ModelPreference::Expensive,
                    max_retries: 1,
                    output: OutputKind::Synthesis,
                    ..NodeContract::default()
                },
            ),
        ]),
    }
}

/// Insert the default template unless a template with its ID already exists.
pub async fn seed_default_template<T: TemplateStore>(store: &T) -> Result<(), StoreError> {
    let template = default_template();
    if store.get_template(&template.id).await?.is_none() {
        tracing::info!(template_id = %template.id, "seeding default workflow template");
        store.upsert_template(&template).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::dag::validate_graph;

    #[test]
    fn test_default_template_validates() {
        let template = default_template();
        let layers = validate_graph(&template).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["understand_task"]);
    }

    #[test]
    fn test_default_template_contracts() {
        let template = default_template();
        let plan = &template.contracts["understand_task"];
        assert_eq!(plan.model_preference, ModelPreference::Cheap);
        assert_eq!(plan.output, OutputKind::Plan);
        assert_eq!(plan.max_retries, 1);

        let synth = &template.contracts["synthesize_results"];
        assert_eq!(synth.model_preference, ModelPreference::Expensive);
        assert_eq!(synth.output, OutputKind::Synthesis);
    }
}
