//! Per-entity countdown timers advanced once per tick
//!
//! Combo windows, buff durations and passive cooldowns are all entries in a
//! [`TimerTable`]. Cancelling a timer turns it into a no-op that is swept on
//! the next advance; nothing ever blocks on a timer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    ComboWindow,
    BuffExpiry { buff_id: u32 },
    ConditionCooldown { equipment_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub remaining_ticks: u32,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimerTable {
    timers: Vec<Timer>,
    next_id: u32,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` to fire after `ticks` advances. Zero fires on the next advance.
    pub fn schedule(&mut self, kind: TimerKind, ticks: u32) -> TimerId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = TimerId(self.next_id);
        self.timers.push(Timer {
            id,
            kind,
            remaining_ticks: ticks,
            cancelled: false,
        });
        id
    }

    /// Replaces the pending timer with a no-op. Returns false if it had already fired.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.iter_mut().find(|t| t.id == id && !t.cancelled) {
            Some(timer) => {
                timer.cancelled = true;
                true
            }
            None => false,
        }
    }

    pub fn cancel_where<F: Fn(&TimerKind) -> bool>(&mut self, predicate: F) {
        for timer in self.timers.iter_mut().filter(|t| predicate(&t.kind)) {
            timer.cancelled = true;
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id && !t.cancelled)
    }

    pub fn remaining(&self, id: TimerId) -> Option<u32> {
        self.timers
            .iter()
            .find(|t| t.id == id && !t.cancelled)
            .map(|t| t.remaining_ticks)
    }

    /// Counts every live timer down by one tick and returns the kinds that
    /// fired, in scheduling order. Cancelled timers are dropped silently.
    pub fn advance(&mut self) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        self.timers.retain_mut(|timer| {
            if timer.cancelled {
                return false;
            }
            if timer.remaining_ticks <= 1 {
                fired.push(timer.kind);
                return false;
            }
            timer.remaining_ticks -= 1;
            true
        });
        fired
    }

    pub fn len(&self) -> usize {
        self.timers.iter().filter(|t| !t.cancelled).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_after_ticks() {
        let mut table = TimerTable::new();
        table.schedule(TimerKind::ComboWindow, 3);

        assert!(table.advance().is_empty());
        assert!(table.advance().is_empty());
        assert_eq!(table.advance(), vec![TimerKind::ComboWindow]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut table = TimerTable::new();
        let id = table.schedule(TimerKind::ComboWindow, 2);
        assert!(table.is_pending(id));
        assert!(table.cancel(id));
        assert!(!table.is_pending(id));
        assert!(!table.cancel(id));

        assert!(table.advance().is_empty());
        assert!(table.advance().is_empty());
    }

    #[test]
    fn test_fire_order_is_schedule_order() {
        let mut table = TimerTable::new();
        table.schedule(TimerKind::BuffExpiry { buff_id: 2 }, 1);
        table.schedule(TimerKind::BuffExpiry { buff_id: 1 }, 1);
        assert_eq!(
            table.advance(),
            vec![
                TimerKind::BuffExpiry { buff_id: 2 },
                TimerKind::BuffExpiry { buff_id: 1 }
            ]
        );
    }

    #[test]
    fn test_cancel_where() {
        let mut table = TimerTable::new();
        table.schedule(TimerKind::ConditionCooldown { equipment_id: 7 }, 5);
        let keep = table.schedule(TimerKind::ComboWindow, 5);
        table.cancel_where(|k| matches!(k, TimerKind::ConditionCooldown { equipment_id: 7 }));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remaining(keep), Some(5));
    }
}
