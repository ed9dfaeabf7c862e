//! Client-side snapshot history and rollback
//!
//! The client records the state it predicted after every tick, together with
//! the root commands it submitted for that tick. When the server acknowledges
//! a tick, the prediction for that tick is compared slice by slice with the
//! authoritative state. Matching predictions are simply pruned; a divergent
//! one is repaired by refreshing only the divergent slices and replaying the
//! unacknowledged ticks on top.

use crate::command::NetworkCommand;
use crate::state::{PlayerState, SliceKind};
use log::{debug, warn};
use std::collections::VecDeque;

/// One predicted tick
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedTick {
    pub tick: u32,
    /// Root commands submitted for this tick, in submission order
    pub commands: Vec<NetworkCommand>,
    /// Whole predicted state; its combat slice carries the animation clock
    pub state: PlayerState,
}

/// Result of a correction
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Corrected present state
    pub state: PlayerState,
    pub refreshed: Vec<SliceKind>,
    pub replayed: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    entries: VecDeque<PredictedTick>,
    capacity: usize,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tick: u32) -> Option<&PredictedTick> {
        self.entries.iter().find(|entry| entry.tick == tick)
    }

    pub fn latest(&self) -> Option<&PredictedTick> {
        self.entries.back()
    }

    /// Ticks still waiting for acknowledgement, oldest first
    pub fn pending_ticks(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.tick).collect()
    }

    /// Records the predicted result of `tick`. Ticks must be recorded in
    /// increasing order; the oldest entry is evicted when full.
    pub fn record(&mut self, tick: u32, commands: Vec<NetworkCommand>, state: PlayerState) {
        if let Some(latest) = self.entries.back() {
            if tick <= latest.tick {
                warn!("Ignoring out-of-order snapshot for tick {} after {}", tick, latest.tick);
                return;
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(PredictedTick {
            tick,
            commands,
            state,
        });
    }

    /// Applies the server's verdict for every tick up to `acknowledged`.
    ///
    /// `resimulate` re-runs one recorded tick group on a state and returns
    /// the resulting state. Returns `None` when the prediction held.
    pub fn reconcile<F>(
        &mut self,
        acknowledged: u32,
        rejected: &[u32],
        authoritative: &PlayerState,
        mut resimulate: F,
    ) -> Option<Reconciliation>
    where
        F: FnMut(&PlayerState, u32, &[NetworkCommand]) -> PlayerState,
    {
        let predicted = self.get(acknowledged).map(|entry| entry.state.clone());
        let divergent = match &predicted {
            Some(predicted) => predicted.divergent_slices(authoritative),
            None => SliceKind::ALL.to_vec(),
        };
        while self.entries.front().map_or(false, |entry| entry.tick <= acknowledged) {
            self.entries.pop_front();
        }

        if divergent.is_empty() {
            return None;
        }
        if !rejected.is_empty() {
            debug!("Server rejected tick(s) {:?}", rejected);
        }

        let mut state = predicted.unwrap_or_else(|| authoritative.clone());
        state.refresh(authoritative, &divergent);

        let mut replayed = 0;
        for entry in self.entries.iter_mut() {
            state = resimulate(&state, entry.tick, &entry.commands);
            entry.state = state.clone();
            replayed += 1;
        }
        debug!(
            "Reconciled at tick {}: refreshed {:?}, replayed {} tick(s)",
            acknowledged, divergent, replayed
        );
        Some(Reconciliation {
            state,
            refreshed: divergent,
            replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::animation::AnimationState;
    use crate::config::GameConfig;
    use crate::math::Vec3;

    fn state() -> PlayerState {
        PlayerState::spawn(1, &GameConfig::default())
    }

    fn at(z: f32) -> PlayerState {
        let mut state = state();
        state.movement.position.z = z;
        state
    }

    /// Moves one unit along Z per replayed tick
    fn step(state: &PlayerState, _tick: u32, _commands: &[NetworkCommand]) -> PlayerState {
        let mut next = state.clone();
        next.movement.position = next.movement.position.add(&Vec3::new(0.0, 0.0, 1.0));
        next
    }

    #[test]
    fn test_matching_prediction_only_prunes() {
        let mut buffer = SnapshotBuffer::new(8);
        for tick in 1..=4 {
            buffer.record(tick, vec![], at(tick as f32));
        }
        let result = buffer.reconcile(2, &[], &at(2.0), |_, _, _| panic!("no replay expected"));
        assert!(result.is_none());
        assert_eq!(buffer.pending_ticks(), vec![3, 4]);
    }

    #[test]
    fn test_divergence_refreshes_and_replays() {
        let mut buffer = SnapshotBuffer::new(8);
        for tick in 1..=4 {
            buffer.record(tick, vec![], at(tick as f32));
        }
        let mut authoritative = at(10.0);
        authoritative.inventory.gold = 7;

        let result = buffer.reconcile(2, &[2], &authoritative, step).unwrap();
        assert_eq!(result.refreshed, vec![SliceKind::Movement, SliceKind::Inventory]);
        assert_eq!(result.replayed, 2);
        assert_eq!(result.state.movement.position.z, 12.0);
        assert_eq!(result.state.inventory.gold, 7);
        assert_eq!(buffer.get(3).unwrap().state.movement.position.z, 11.0);
    }

    #[test]
    fn test_missing_snapshot_takes_authoritative_baseline() {
        let mut buffer = SnapshotBuffer::new(2);
        for tick in 1..=5 {
            buffer.record(tick, vec![], at(tick as f32));
        }
        assert_eq!(buffer.pending_ticks(), vec![4, 5]);

        let result = buffer.reconcile(3, &[], &at(0.5), step).unwrap();
        assert_eq!(result.refreshed, SliceKind::ALL.to_vec());
        assert_eq!(result.replayed, 2);
        assert_eq!(result.state.movement.position.z, 2.5);
    }

    #[test]
    fn test_combat_divergence_rolls_back_animation_clock() {
        let mut buffer = SnapshotBuffer::new(8);
        for tick in 1..=3 {
            let mut predicted = at(tick as f32);
            predicted.combat.animation.combo_stage = 2;
            predicted.combat.animation.animation_speed = 1.5;
            predicted
                .combat
                .animation
                .cooldowns
                .insert(AnimationState::Attack, 20 - tick);
            buffer.record(tick, vec![], predicted);
        }

        let mut authoritative = at(1.0);
        authoritative.combat.animation.combo_stage = 1;
        authoritative
            .combat
            .animation
            .cooldowns
            .insert(AnimationState::Attack, 4);

        let result = buffer.reconcile(1, &[1], &authoritative, step).unwrap();
        assert_eq!(result.refreshed, vec![SliceKind::Combat]);
        let animation = &result.state.combat.animation;
        assert_eq!(animation.combo_stage, 1);
        assert_eq!(animation.animation_speed, 1.0);
        assert_eq!(animation.cooldown(AnimationState::Attack), 4);
        assert_eq!(buffer.get(2).unwrap().state.combat.animation.combo_stage, 1);
    }

    #[test]
    fn test_out_of_order_record_ignored() {
        let mut buffer = SnapshotBuffer::new(4);
        buffer.record(5, vec![], at(5.0));
        buffer.record(4, vec![], at(4.0));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest().unwrap().tick, 5);
    }
}
