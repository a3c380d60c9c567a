//! Workflow Nodes
//!
//! Node service implementations for the generation canvas. Each service
//! registers itself with `inventory`, so linking this crate is enough for
//! `NodeServiceRegistry::with_builtins` to find it.
//!
//! # Categories
//!
//! - **Input**: Nodes that hold user-entered data
//! - **Generation**: Single provider calls (script, image, video, audio)
//! - **Composite**: Multi-stage nodes (character design, storyboard video)

pub mod composite;
mod generate;
pub mod generation;
pub mod input;

#[cfg(test)]
mod test_support;

// Re-export all services for convenience
pub use composite::*;
pub use generation::*;
pub use input::*;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use node_engine::{
        Connection, ExecutionEvent, ImageGeneratorData, Node, NodeData, NodeServiceRegistry, NodeStatus,
        NodeType, PromptInputData, RecordingUpdateSink, ScriptPlannerData, VecEventSink,
    };
    use parking_lot::Mutex;

    use crate::test_support::Fixture;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let fixture = Fixture::new();
        let registry = NodeServiceRegistry::with_builtins(fixture.deps.clone());

        assert_eq!(registry.len(), NodeType::ALL.len());
        for node_type in NodeType::ALL {
            assert!(registry.has_service(node_type), "missing service for {}", node_type);
        }
    }

    #[tokio::test]
    async fn test_batch_runs_prompt_to_image() {
        let _ = env_logger::builder().is_test(true).try_init();
        let fixture = Fixture::new();
        let events = Arc::new(VecEventSink::new());
        let registry = NodeServiceRegistry::with_builtins(fixture.deps.clone()).with_event_sink(events.clone());

        // Listed out of order on purpose
        let nodes = vec![
            Node::new("img", "Key art", ImageGeneratorData::default().into()),
            Node::new("script", "Script", ScriptPlannerData::default().into()),
            Node::new("idea", "Idea", PromptInputData::new("a heist on a zeppelin").into()),
        ];
        let connections = vec![Connection::new("idea", "script"), Connection::new("script", "img")];
        let sink = Arc::new(RecordingUpdateSink::new());
        let progress = Mutex::new(Vec::new());
        let on_progress = |current: usize, total: usize, title: &str| {
            progress.lock().push((current, total, title.to_string()));
        };

        let report = registry
            .execute_nodes_in_order(&nodes, &connections, sink.clone(), Some(&on_progress))
            .await;

        assert!(report.all_succeeded(), "{:?}", report.results);
        assert_eq!(report.order, vec!["idea", "script", "img"]);
        assert_eq!(
            *progress.lock(),
            vec![
                (1, 3, "Idea".to_string()),
                (2, 3, "Script".to_string()),
                (3, 3, "Key art".to_string())
            ]
        );

        // The image prompt is the planner's script, which echoes the idea
        let image_prompt = fixture.image.calls.lock()[0].1.clone();
        assert!(image_prompt.contains("a heist on a zeppelin"));
        assert_eq!(sink.statuses("img"), vec![NodeStatus::Running, NodeStatus::Success]);
        match sink.latest_data("img") {
            Some(NodeData::ImageGenerator(data)) => assert_eq!(data.images.len(), 1),
            other => panic!("unexpected data {:?}", other),
        }

        let recorded = events.events();
        assert!(matches!(recorded.first(), Some(ExecutionEvent::BatchStarted { total: 3, .. })));
        assert!(matches!(
            recorded.last(),
            Some(ExecutionEvent::BatchCompleted { success: 3, failed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_upstream_does_not_stop_batch() {
        let fixture = Fixture::new();
        let registry = NodeServiceRegistry::with_builtins(fixture.deps.clone());

        let nodes = vec![
            Node::new("idea", "Idea", PromptInputData::new("").into()),
            Node::new("img", "Image", ImageGeneratorData::default().into()),
            Node::new("other", "Other", PromptInputData::new("standalone").into()),
        ];
        let connections = vec![Connection::new("idea", "img")];
        let report = registry
            .execute_nodes_in_order(&nodes, &connections, Arc::new(RecordingUpdateSink::new()), None)
            .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.success, 1);
        assert!(report.results["other"].success);
        assert_eq!(fixture.image.call_count(), 0);
    }
}
