use crate::filter::ValueCache;

/// Time window during which retained "cur" snapshots are replayed.
///
/// Re-opening an open window restarts it under a new generation; a timer
/// armed for an older generation must not close it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CatchupWindow {
    open: bool,
    generation: u64,
    opened_at: f64,
    live_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opening {
    /// The window was closed; the caller subscribes to the snapshot topic.
    Opened(u64),
    Extended(u64),
}

impl Opening {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Opened(generation) | Self::Extended(generation) => *generation,
        }
    }
}

/// What to do with one retained "cur" snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotAction {
    /// The device is gone; clear the retained snapshot.
    pub retract: bool,
    /// Merge and republish as an uplink so entities get their last value.
    pub replay_uplink: bool,
    /// Merge and republish a fresh snapshot carrying device status.
    pub refresh_live: bool,
}

impl CatchupWindow {
    pub fn open(&mut self, now: f64, live_check: bool) -> Opening {
        self.generation += 1;
        self.opened_at = now;
        self.live_check |= live_check;
        if self.open {
            Opening::Extended(self.generation)
        } else {
            self.open = true;
            Opening::Opened(self.generation)
        }
    }

    /// Closes the window. Returns whether it was open.
    pub fn close(&mut self) -> bool {
        self.live_check = false;
        std::mem::replace(&mut self.open, false)
    }

    /// Closes the window when `generation` is still the current one.
    pub fn expire(&mut self, generation: u64) -> bool {
        generation == self.generation && self.close()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn live_check(&self) -> bool {
        self.live_check
    }

    pub fn opened_at(&self) -> f64 {
        self.opened_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Decides how a snapshot stamped `time_stamp` is handled. Snapshots
    /// stamped at or after `pass_started` are this bridge's own output.
    pub fn snapshot_action(
        &self,
        cache: &ValueCache,
        pass_started: f64,
        dev_eui: &str,
        time_stamp: Option<f64>,
    ) -> SnapshotAction {
        let mut action = SnapshotAction::default();
        let Some(ts) = time_stamp else {
            return action;
        };
        if !self.open {
            return action;
        }
        if ts < pass_started {
            if !cache.contains(dev_eui) {
                action.retract = true;
                return action;
            }
            action.replay_uplink = cache.is_empty_for(dev_eui) && ts < self.opened_at;
        }
        action.refresh_live = self.live_check && ts < self.opened_at && cache.contains(dev_eui);
        action
    }

    /// The window may close early once every device has a cached value,
    /// unless a live check needs to see every snapshot.
    pub fn can_close_early(&self, cache: &ValueCache) -> bool {
        self.open && !self.live_check && cache.pending() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FieldFilter;
    use serde_json::json;

    fn cache() -> ValueCache {
        let mut cache = ValueCache::default();
        cache.reset(
            FieldFilter::from_templates(["{{ value_json.object.counter }}"]),
            ["a".to_string(), "b".to_string()],
        );
        cache
    }

    #[test]
    fn reopening_extends_and_stale_timers_are_ignored() {
        let mut window = CatchupWindow::default();
        let first = window.open(10.0, false);
        assert_eq!(first, Opening::Opened(1));
        let second = window.open(12.0, true);
        assert_eq!(second, Opening::Extended(2));
        assert_eq!(window.opened_at(), 12.0);
        assert!(window.live_check());

        assert!(!window.expire(first.generation()));
        assert!(window.is_open());
        assert!(window.expire(second.generation()));
        assert!(!window.is_open());
        assert!(!window.live_check());
        assert!(!window.close());
    }

    #[test]
    fn old_snapshots_are_replayed_and_own_echoes_ignored() {
        let cache = cache();
        let mut window = CatchupWindow::default();
        window.open(100.0, false);

        let old = window.snapshot_action(&cache, 90.0, "a", Some(50.0));
        assert!(old.replay_uplink && !old.retract && !old.refresh_live);

        let echo = window.snapshot_action(&cache, 90.0, "a", Some(95.0));
        assert_eq!(echo, SnapshotAction::default());

        let orphan = window.snapshot_action(&cache, 90.0, "gone", Some(50.0));
        assert!(orphan.retract && !orphan.replay_uplink);

        assert_eq!(window.snapshot_action(&cache, 90.0, "a", None), SnapshotAction::default());
    }

    #[test]
    fn filled_devices_are_not_replayed_twice() {
        let mut cache = cache();
        cache.merge("a", &json!({"object": {"counter": 1}}));
        let mut window = CatchupWindow::default();
        window.open(100.0, false);
        assert!(!window.snapshot_action(&cache, 90.0, "a", Some(50.0)).replay_uplink);
        assert!(!window.can_close_early(&cache));
        cache.merge("b", &json!({"object": {"counter": 2}}));
        assert!(window.can_close_early(&cache));
    }

    #[test]
    fn live_check_refreshes_snapshots_older_than_the_window() {
        let mut cache = cache();
        cache.merge("a", &json!({"object": {"counter": 1}}));
        cache.merge("b", &json!({"object": {"counter": 1}}));
        let mut window = CatchupWindow::default();
        window.open(200.0, true);

        let action = window.snapshot_action(&cache, 90.0, "a", Some(150.0));
        assert!(action.refresh_live && !action.replay_uplink);
        assert!(!window.snapshot_action(&cache, 90.0, "a", Some(250.0)).refresh_live);
        assert!(!window.can_close_early(&cache));
    }

    #[test]
    fn closed_window_ignores_everything() {
        let cache = cache();
        let window = CatchupWindow::default();
        assert_eq!(window.snapshot_action(&cache, 90.0, "gone", Some(1.0)), SnapshotAction::default());
    }
}
