use super::plan::ThinkingPlan;
use crate::config::ThinkingMode;
use crate::outline::OutlineInfo;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Key identifying one planning situation.
///
/// The digest covers the canonical JSON of every input, so changing any one
/// of them yields a different key.
pub fn build_cache_key(
    chapter: u32,
    mode: ThinkingMode,
    outline: &OutlineInfo,
    world_context: &str,
    previous_content: &str,
) -> String {
    // serde_json maps are key-sorted, which makes this canonical
    let payload = serde_json::json!({
        "chapter_num": chapter,
        "thinking_mode": mode.as_str(),
        "outline_info": {
            "volume": outline.volume,
            "phase": outline.phase,
            "specific_goal": outline.specific_goal,
        },
        "world_context": world_context,
        "previous_content": previous_content,
    });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{chapter}:{mode}:{hex}")
}

/// Least-recently-used plan cache. Plans are cloned in and out.
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    entries: VecDeque<(String, ThinkingPlan)>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &str) -> Option<ThinkingPlan> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(idx)?;
        let plan = entry.1.clone();
        self.entries.push_back(entry);
        Some(plan)
    }

    pub fn insert(&mut self, key: String, plan: &ThinkingPlan) {
        if let Some(idx) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(idx);
        }
        self.entries.push_back((key, plan.clone()));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(goal: &str) -> OutlineInfo {
        OutlineInfo {
            volume: "第一卷".into(),
            phase: "破封".into(),
            specific_goal: goal.into(),
        }
    }

    #[test]
    fn test_cache_key_sensitivity() {
        let base = build_cache_key(3, ThinkingMode::Deep, &outline("a"), "world", "prev");
        assert!(base.starts_with("3:deep:"));
        assert_eq!(base, build_cache_key(3, ThinkingMode::Deep, &outline("a"), "world", "prev"));
        for other in [
            build_cache_key(4, ThinkingMode::Deep, &outline("a"), "world", "prev"),
            build_cache_key(3, ThinkingMode::Fast, &outline("a"), "world", "prev"),
            build_cache_key(3, ThinkingMode::Deep, &outline("b"), "world", "prev"),
            build_cache_key(3, ThinkingMode::Deep, &outline("a"), "world2", "prev"),
            build_cache_key(3, ThinkingMode::Deep, &outline("a"), "world", "prev2"),
        ] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = PlanCache::new(2);
        let plan = ThinkingPlan::default();
        cache.insert("a".into(), &plan);
        cache.insert("b".into(), &plan);
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), &plan);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(PlanCache::new(0).capacity(), 1);
    }

    #[test]
    fn test_returned_plans_are_copies() {
        let mut cache = PlanCache::new(4);
        cache.insert("k".into(), &ThinkingPlan::default());
        let mut copy = cache.get("k").unwrap();
        copy.chapter_blueprint.theme = "changed".into();
        assert_eq!(cache.get("k").unwrap().chapter_blueprint.theme, "");
    }
}
