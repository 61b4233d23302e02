//! Event inclusion by camera and zone.

use std::sync::Arc;

use crate::models::EventDescriptor;
use crate::monitor::MonitorConfig;

/// Stateless predicate over [`EventDescriptor`]s backed by a shared
/// [`MonitorConfig`].
///
/// Excluded events are never recorded anywhere, so changing the monitor
/// configuration later is not blocked by stale state.
#[derive(Debug, Clone)]
pub struct EventFilter {
    monitor: Arc<MonitorConfig>,
}

impl EventFilter {
    pub fn new(monitor: Arc<MonitorConfig>) -> Self {
        Self { monitor }
    }

    pub fn include(&self, event: &EventDescriptor) -> bool {
        self.monitor.matches(&event.camera, &event.zones)
    }

    pub fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(camera: &str, zones: &[&str]) -> EventDescriptor {
        EventDescriptor {
            id: format!("{}-1", camera),
            camera: camera.to_string(),
            zones: zones.iter().map(|z| z.to_string()).collect(),
            label: "person".to_string(),
            sub_label: None,
            confidence: Some(80),
            start_time: 1_700_000_000.0,
            end_time: None,
            has_clip: true,
            has_snapshot: true,
        }
    }

    #[test]
    fn test_include_agrees_with_monitor_in_any_order() {
        let monitor = Arc::new(
            MonitorConfig::parse("front_door:yard;back")
                .unwrap()
                .config,
        );
        let filter = EventFilter::new(monitor.clone());
        let events = vec![
            event("front_door", &["yard"]),
            event("front_door", &["porch"]),
            event("front_door", &[]),
            event("back", &[]),
            event("garage", &["yard"]),
        ];

        let forward: Vec<bool> = events.iter().map(|e| filter.include(e)).collect();
        let mut backward: Vec<bool> = events.iter().rev().map(|e| filter.include(e)).collect();
        backward.reverse();

        assert_eq!(forward, vec![true, false, false, true, false]);
        assert_eq!(forward, backward);
        for e in &events {
            assert_eq!(filter.include(e), monitor.matches(&e.camera, &e.zones));
        }
    }

    #[test]
    fn test_empty_monitor_includes_everything() {
        let filter = EventFilter::new(Arc::new(MonitorConfig::monitor_all()));
        assert!(filter.include(&event("any", &[])));
    }
}
