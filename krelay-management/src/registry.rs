//! Consumer-group registry.

use krelay_consumer::Consumer;
use std::collections::HashMap;
use std::sync::Arc;

/// Competing consumers sharing one group id on one topic.
pub(crate) struct ConsumerGroup {
    name: String,
    consumers: Vec<Arc<dyn Consumer>>,
}

impl ConsumerGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            consumers: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, consumer: Arc<dyn Consumer>) {
        self.consumers.push(consumer);
    }

    pub(crate) fn consumers(&self) -> &[Arc<dyn Consumer>] {
        &self.consumers
    }
}

/// Physical topic to its consumer groups. Groups are never removed.
#[derive(Default)]
pub(crate) struct Registry {
    topics: HashMap<String, Vec<ConsumerGroup>>,
    closed: bool,
}

impl Registry {
    /// Find or create the group `group_id` on `topic`.
    pub(crate) fn group_mut(&mut self, topic: &str, group_id: &str) -> &mut ConsumerGroup {
        let groups = self.topics.entry(topic.to_string()).or_default();
        let index = match groups.iter().position(|g| g.name == group_id) {
            Some(index) => index,
            None => {
                groups.push(ConsumerGroup::new(group_id));
                groups.len() - 1
            },
        };
        &mut groups[index]
    }

    pub(crate) fn group(&self, topic: &str, group_id: &str) -> Option<&ConsumerGroup> {
        self.topics.get(topic)?.iter().find(|g| g.name == group_id)
    }

    pub(crate) fn consumers(&self) -> impl Iterator<Item = &Arc<dyn Consumer>> {
        self.topics
            .values()
            .flat_map(|groups| groups.iter())
            .flat_map(|group| group.consumers.iter())
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}
