use std::collections::{BTreeSet, HashMap};

/// Device id to subscribed topic.
///
/// Topics are handed out by the platform together with the channel
/// credentials, the registry never derives them itself.
#[derive(Debug, Default, Clone)]
pub struct TopicRegistry {
    entries: HashMap<String, String>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `topic` for `device_id`, returning the topic it replaces.
    pub fn add(&mut self, device_id: impl Into<String>, topic: impl Into<String>) -> Option<String> {
        self.entries.insert(device_id.into(), topic.into())
    }

    // 设备不存在时什么都不做
    pub fn remove(&mut self, device_id: &str) -> Option<String> {
        self.entries.remove(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    pub fn all(&self) -> BTreeSet<String> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut registry = TopicRegistry::new();
        assert!(registry.add("d1", "topic/d1").is_none());
        assert!(registry.add("d2", "topic/d2").is_none());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("d2"));
        assert_eq!(
            registry.all(),
            BTreeSet::from(["topic/d1".to_string(), "topic/d2".to_string()])
        );
    }

    #[test]
    fn test_duplicate_device_overwrites() {
        let mut registry = TopicRegistry::new();
        registry.add("d1", "topic/old");

        let previous = registry.add("d1", "topic/new");
        assert_eq!(previous.as_deref(), Some("topic/old"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.all(), BTreeSet::from(["topic/new".to_string()]));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = TopicRegistry::new();
        registry.add("d1", "topic/d1");

        assert!(registry.remove("nope").is_none());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove("d1").as_deref(), Some("topic/d1"));
        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }
}
