//! Command admission and application
//!
//! Every command goes through [`CommandDispatcher::admit`] exactly once. An
//! admitted command is applied together with all of its follow-ups as one
//! transaction: if anything in the cascade fails, every player state the
//! cascade touched is restored and the error is logged with the root header.

use crate::calculators::battle::DefenderView;
use crate::calculators::equipment::TriggerType;
use crate::calculators::{Calculators, Computed, TickContext};
use crate::command::{
    AnimationCommand, AttackResultCommand, CommandAuthority, CommandExecuteType, CommandHeader, CommandPayload,
    CommandType, NetworkCommand, PlayerTraceOtherPlayerHpCommand, TriggerCommand,
};
use crate::calculators::animation::AnimationAction;
use crate::config::GameConfig;
use crate::error::{CommandError, ErrorSeverity};
use crate::property::{PropertyType, SubjectedStateType};
use crate::state::{PlayerArena, PlayerState};
use log::{debug, error, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Server,
    Client { local_connection_id: u32 },
}

impl ProcessRole {
    pub fn authority(&self) -> CommandAuthority {
        match self {
            ProcessRole::Server => CommandAuthority::Server,
            ProcessRole::Client { .. } => CommandAuthority::Client,
        }
    }
}

/// Where a command entered this process from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    /// Produced by this process: server systems, or the client's own input
    Local,
    /// Received from a remote connection
    Remote(u32),
}

/// What to do with an admitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Apply now, at the current tick boundary
    Apply,
    /// Append to the prediction queue for `(connection, tick)`
    Queue,
    /// Client request that only the server may apply; send it on
    Forward,
}

/// Command types a client connection may author
pub fn client_sendable(command_type: CommandType) -> bool {
    matches!(
        command_type,
        CommandType::Input
            | CommandType::Skill
            | CommandType::ItemDrop
            | CommandType::ItemLock
            | CommandType::ItemEquip
            | CommandType::ItemExchange
            | CommandType::ItemUse
            | CommandType::ShopBuy
            | CommandType::ShopSell
            | CommandType::ShopRefresh
    )
}

/// Logs a failed command with its full header, at a level matching severity.
pub fn log_failure(header: &CommandHeader, err: &CommandError) {
    match err.severity() {
        ErrorSeverity::Fatal => error!(
            "Fatal {:?} connection={} authority={:?} execute={:?} tick={}: {}",
            header.command_type, header.connection_id, header.authority, header.execute_type, header.tick, err
        ),
        ErrorSeverity::Aborted => warn!(
            "Aborted {:?} connection={} authority={:?} execute={:?} tick={}: {}",
            header.command_type, header.connection_id, header.authority, header.execute_type, header.tick, err
        ),
        ErrorSeverity::Rejected => debug!(
            "Rejected {:?} connection={} authority={:?} execute={:?} tick={}: {}",
            header.command_type, header.connection_id, header.authority, header.execute_type, header.tick, err
        ),
    }
}

/// Outcome of simulating one connection's tick group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupOutcome {
    pub applied: usize,
    pub failed: usize,
    pub fatal: bool,
}

/// Arena writes that can be undone as a unit
struct Transaction<'a> {
    arena: &'a mut PlayerArena,
    originals: BTreeMap<u32, PlayerState>,
}

impl<'a> Transaction<'a> {
    fn new(arena: &'a mut PlayerArena) -> Self {
        Self {
            arena,
            originals: BTreeMap::new(),
        }
    }

    fn read(&self, connection_id: u32) -> Result<&PlayerState, CommandError> {
        self.arena
            .get(connection_id)
            .ok_or(CommandError::MissingPlayer(connection_id))
    }

    fn write(&mut self, state: PlayerState) {
        let connection_id = state.connection_id;
        if !self.originals.contains_key(&connection_id) {
            if let Some(previous) = self.arena.get(connection_id) {
                self.originals.insert(connection_id, previous.clone());
            }
        }
        self.arena.insert(state);
    }

    fn rollback(self) {
        for (_, original) in self.originals {
            self.arena.insert(original);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    calculators: Calculators,
    role: ProcessRole,
}

impl CommandDispatcher {
    pub fn new(config: Arc<GameConfig>, role: ProcessRole) -> Self {
        Self {
            calculators: Calculators::new(config),
            role,
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        &self.calculators.config
    }

    pub fn calculators(&self) -> &Calculators {
        &self.calculators
    }

    /// Admission check. Server authority is trusted only from this process
    /// when it is the server, and a connection may only author its own
    /// client-sendable commands.
    pub fn admit(&self, command: &NetworkCommand, origin: CommandOrigin) -> Result<Route, CommandError> {
        let header = &command.header;
        let violation = |connection_id: u32, reason: String| CommandError::ProtocolViolation { connection_id, reason };

        if let CommandOrigin::Remote(sender) = origin {
            if header.connection_id != sender {
                return Err(violation(
                    sender,
                    format!("command addressed to connection {}", header.connection_id),
                ));
            }
        }

        match header.authority {
            CommandAuthority::Server => {
                if self.role != ProcessRole::Server || origin != CommandOrigin::Local {
                    return Err(violation(
                        header.connection_id,
                        format!("server-authority {:?} from a non-server origin", header.command_type),
                    ));
                }
            }
            CommandAuthority::Client => {
                if !client_sendable(header.command_type) {
                    return Err(violation(
                        header.connection_id,
                        format!("clients may not author {:?}", header.command_type),
                    ));
                }
                if let ProcessRole::Client { local_connection_id } = self.role {
                    if header.connection_id != local_connection_id {
                        return Err(violation(
                            header.connection_id,
                            format!("client {} cannot command another player", local_connection_id),
                        ));
                    }
                }
            }
        }

        Ok(match (header.execute_type, self.role, header.authority) {
            (CommandExecuteType::Predicate, _, _) => Route::Queue,
            (CommandExecuteType::Immediate, ProcessRole::Client { .. }, CommandAuthority::Client) => Route::Forward,
            (CommandExecuteType::Immediate, _, _) => Route::Apply,
        })
    }

    /// Applies `root` and its follow-up cascade as one transaction.
    pub fn apply(&self, arena: &mut PlayerArena, root: &NetworkCommand) -> Result<usize, CommandError> {
        let mut tx = Transaction::new(arena);
        match self.cascade(&mut tx, vec![root.clone()]) {
            Ok(applied) => Ok(applied),
            Err(err) => {
                tx.rollback();
                log_failure(&root.header, &err);
                Err(err)
            }
        }
    }

    /// Runs the per-tick systems for one player and applies what they emit.
    pub fn advance_player(
        &self,
        arena: &mut PlayerArena,
        connection_id: u32,
        tick: u32,
        defenders: &[DefenderView],
    ) -> Result<usize, CommandError> {
        let context = TickContext {
            connection_id,
            tick,
            authority: self.role.authority(),
        };
        let mut tx = Transaction::new(arena);
        let result = tx.read(connection_id).and_then(|state| {
            let computed = self.calculators.advance(state, &context, defenders)?;
            Ok(self.finalize_death(computed, &context))
        });
        let outcome = result.and_then(|computed| {
            tx.write(computed.state);
            self.cascade(&mut tx, computed.follow_ups)
        });
        if let Err(err) = &outcome {
            tx.rollback();
            error!("Advancing connection {} at tick {} failed: {}", connection_id, tick, err);
        }
        outcome
    }

    /// Applies one connection's commands for `tick` in arrival order, then
    /// advances that player exactly once.
    pub fn simulate_group(
        &self,
        arena: &mut PlayerArena,
        connection_id: u32,
        tick: u32,
        commands: &[NetworkCommand],
        defenders: &[DefenderView],
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome::default();
        for command in commands {
            match self.apply(arena, command) {
                Ok(applied) => outcome.applied += applied,
                Err(err) => {
                    outcome.failed += 1;
                    outcome.fatal |= err.severity() == ErrorSeverity::Fatal;
                }
            }
        }
        if let Err(err) = self.advance_player(arena, connection_id, tick, defenders) {
            outcome.fatal |= err.severity() == ErrorSeverity::Fatal;
        }
        outcome
    }

    /// Re-runs a recorded tick group against `state` in a scratch arena.
    pub fn replay(&self, state: &PlayerState, tick: u32, commands: &[NetworkCommand], defenders: &[DefenderView]) -> PlayerState {
        let mut scratch = PlayerArena::new();
        scratch.insert(state.clone());
        self.simulate_group(&mut scratch, state.connection_id, tick, commands, defenders);
        scratch.remove(state.connection_id).unwrap_or_else(|| state.clone())
    }

    /// Breadth-first follow-up application, bounded by the cascade depth limit.
    fn cascade(&self, tx: &mut Transaction<'_>, roots: Vec<NetworkCommand>) -> Result<usize, CommandError> {
        let max_depth = self.config().sync.max_cascade_depth;
        let mut queue: VecDeque<(NetworkCommand, usize)> = roots.into_iter().map(|c| (c, 0)).collect();
        let mut applied = 0;
        while let Some((command, depth)) = queue.pop_front() {
            if depth > max_depth {
                return Err(CommandError::CascadeOverflow(max_depth));
            }
            let follow_ups = self.apply_one(tx, &command)?;
            applied += 1;
            queue.extend(follow_ups.into_iter().map(|c| (c, depth + 1)));
        }
        Ok(applied)
    }

    fn apply_one(&self, tx: &mut Transaction<'_>, command: &NetworkCommand) -> Result<Vec<NetworkCommand>, CommandError> {
        match &command.payload {
            CommandPayload::Attack(_) | CommandPayload::AttackResult(_) if self.role != ProcessRole::Server => {
                // hits are resolved by the server only
                Ok(Vec::new())
            }
            CommandPayload::Attack(_) => self.resolve_attack(tx, command),
            CommandPayload::AttackResult(result) => self.apply_attack_result(tx, command, result),
            _ => {
                let state = tx.read(command.header.connection_id)?;
                let computed = self.calculators.compute(command, state)?;
                let context = TickContext {
                    connection_id: command.header.connection_id,
                    tick: command.header.tick,
                    authority: command.header.authority,
                };
                let computed = self.finalize_death(computed, &context);
                tx.write(computed.state);
                Ok(computed.follow_ups)
            }
        }
    }

    fn resolve_attack(&self, tx: &mut Transaction<'_>, command: &NetworkCommand) -> Result<Vec<NetworkCommand>, CommandError> {
        let attack = match &command.payload {
            CommandPayload::Attack(attack) => attack,
            _ => return Ok(Vec::new()),
        };
        let attacker_id = command.header.connection_id;
        let attacker = tx.read(attacker_id)?;
        if attacker.property.is_dead() {
            return Ok(Vec::new());
        }
        let defenders = tx.arena.defender_views(self.config(), Some(attacker_id));
        let results = self.calculators.battle.resolve(attacker, attack, &defenders);
        if results.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Attack {:?} from connection {} hit {} defender(s) at tick {}",
            attack.source,
            attacker_id,
            results.len(),
            command.header.tick
        );
        Ok(vec![NetworkCommand::server(
            attacker_id,
            command.header.tick,
            CommandPayload::AttackResult(AttackResultCommand {
                attacker_connection_id: attacker_id,
                results,
            }),
        )])
    }

    fn apply_attack_result(
        &self,
        tx: &mut Transaction<'_>,
        command: &NetworkCommand,
        result: &AttackResultCommand,
    ) -> Result<Vec<NetworkCommand>, CommandError> {
        let tick = command.header.tick;
        let attacker = TickContext {
            connection_id: result.attacker_connection_id,
            tick,
            authority: CommandAuthority::Server,
        };
        let mut follow_ups = Vec::new();
        let mut dealt = 0.0;
        let mut kills = 0;

        for hit in &result.results {
            let defender = match tx.arena.get(hit.defender_connection_id) {
                Some(defender) => defender.clone(),
                None => {
                    warn!(
                        "Defender {} left before its hit from {} landed",
                        hit.defender_connection_id, result.attacker_connection_id
                    );
                    continue;
                }
            };
            let context = TickContext {
                connection_id: hit.defender_connection_id,
                tick,
                authority: CommandAuthority::Server,
            };
            let was_dead = defender.property.is_dead();
            let computed = self.calculators.battle.apply_hit(
                &defender,
                result.attacker_connection_id,
                hit,
                &self.calculators.element,
                &context,
            );
            let computed = self.finalize_death(computed, &context);
            if !was_dead && computed.state.property.is_dead() {
                kills += 1;
            }
            dealt += hit.damage;

            let health = computed.state.property.get(PropertyType::Health);
            follow_ups.push(attacker.command(CommandPayload::PlayerTraceOtherPlayerHp(
                PlayerTraceOtherPlayerHpCommand {
                    target_connection_id: hit.defender_connection_id,
                    current_hp: health.map_or(0.0, |h| h.current_value),
                    max_hp: health.map_or(0.0, |h| h.max_current_value),
                },
            )));
            tx.write(computed.state);
            follow_ups.extend(computed.follow_ups);
        }

        if dealt > 0.0 {
            follow_ups.push(attacker.command(CommandPayload::Trigger(TriggerCommand {
                trigger_type: TriggerType::OnAttackHit,
                value: dealt,
            })));
        }
        for _ in 0..kills {
            follow_ups.push(attacker.command(CommandPayload::Trigger(TriggerCommand {
                trigger_type: TriggerType::OnKill,
                value: 1.0,
            })));
        }
        Ok(follow_ups)
    }

    /// Marks a player whose health ran out as dead and queues the death animation.
    fn finalize_death(&self, mut computed: Computed, context: &TickContext) -> Computed {
        let state = &mut computed.state;
        let depleted = state
            .property
            .get(PropertyType::Health)
            .map_or(false, |health| health.is_depleted());
        if depleted && !state.property.is_dead() {
            state.property.subjected.insert(SubjectedStateType::DEAD);
            debug!("Connection {} died at tick {}", state.connection_id, context.tick);
            computed.follow_ups.push(context.command(CommandPayload::Animation(AnimationCommand {
                action: AnimationAction::Die,
            })));
        }
        computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculators::movement::ProbeResult;
    use crate::command::{
        GoldChangedCommand, InputCommand, ItemDropCommand, ItemEquipCommand, ItemGetCommand, ShopBuyCommand,
    };
    use crate::math::Vec3;
    use crate::property::{BuffIncreaseData, BuffOperationType};

    fn server() -> (CommandDispatcher, PlayerArena) {
        let config = Arc::new(GameConfig::default());
        let mut arena = PlayerArena::new();
        arena.insert(PlayerState::spawn(1, &config));
        arena.insert(PlayerState::spawn(2, &config));
        (CommandDispatcher::new(config, ProcessRole::Server), arena)
    }

    fn input(connection_id: u32, tick: u32, attack: bool) -> NetworkCommand {
        NetworkCommand::predicted(
            connection_id,
            tick,
            CommandPayload::Input(InputCommand {
                movement: Vec3::ZERO,
                sprint: false,
                jump: false,
                roll: false,
                attack,
                probe: ProbeResult::grounded(),
            }),
        )
    }

    #[test]
    fn test_server_authority_from_connection_is_violation() {
        let (dispatcher, _) = server();
        let forged = NetworkCommand::server(1, 5, CommandPayload::GoldChanged(GoldChangedCommand { delta: 1_000 }));
        let err = dispatcher.admit(&forged, CommandOrigin::Remote(1)).unwrap_err();
        assert!(matches!(err, CommandError::ProtocolViolation { connection_id: 1, .. }));
        assert_eq!(dispatcher.admit(&forged, CommandOrigin::Local).unwrap(), Route::Apply);
    }

    #[test]
    fn test_spoofed_connection_is_violation() {
        let (dispatcher, _) = server();
        let err = dispatcher.admit(&input(2, 5, false), CommandOrigin::Remote(1)).unwrap_err();
        assert!(matches!(err, CommandError::ProtocolViolation { connection_id: 1, .. }));
    }

    #[test]
    fn test_client_cannot_author_server_only_types() {
        let (dispatcher, _) = server();
        let grant = NetworkCommand::request(1, 5, CommandPayload::ItemGet(ItemGetCommand { item_id: 10, count: 1 }));
        assert!(dispatcher.admit(&grant, CommandOrigin::Remote(1)).is_err());
    }

    #[test]
    fn test_routes() {
        let (dispatcher, _) = server();
        assert_eq!(dispatcher.admit(&input(1, 5, false), CommandOrigin::Remote(1)).unwrap(), Route::Queue);
        let buy = NetworkCommand::request(1, 5, CommandPayload::ShopBuy(ShopBuyCommand { shop_slot: 0 }));
        assert_eq!(dispatcher.admit(&buy, CommandOrigin::Remote(1)).unwrap(), Route::Apply);

        let config = Arc::clone(dispatcher.config());
        let client = CommandDispatcher::new(config, ProcessRole::Client { local_connection_id: 1 });
        assert_eq!(client.admit(&buy, CommandOrigin::Local).unwrap(), Route::Forward);
        assert_eq!(client.admit(&input(1, 5, false), CommandOrigin::Local).unwrap(), Route::Queue);
        assert!(client.admit(&input(2, 5, false), CommandOrigin::Local).is_err());
        let server_only = NetworkCommand::server(1, 5, CommandPayload::GoldChanged(GoldChangedCommand { delta: 1 }));
        assert!(client.admit(&server_only, CommandOrigin::Local).is_err());
    }

    #[test]
    fn test_equip_cascade_applies_follow_ups() {
        let (dispatcher, mut arena) = server();
        let grant = NetworkCommand::server(1, 1, CommandPayload::ItemGet(ItemGetCommand { item_id: 10, count: 1 }));
        dispatcher.apply(&mut arena, &grant).unwrap();

        let equip = NetworkCommand::request(1, 2, CommandPayload::ItemEquip(ItemEquipCommand { slot: 0, equip: true }));
        let applied = dispatcher.apply(&mut arena, &equip).unwrap();
        // ItemEquip -> Equipment -> SkillLoad
        assert_eq!(applied, 3);
        let state = arena.get(1).unwrap();
        assert_eq!(state.inventory.equipment.equipped.len(), 1);
        assert_eq!(state.skills.checkers.len(), 1);
    }

    #[test]
    fn test_failed_cascade_rolls_back_every_write() {
        let (dispatcher, mut arena) = server();
        let before = arena.get(1).unwrap().clone();
        let drop = NetworkCommand::request(1, 2, CommandPayload::ItemDrop(ItemDropCommand { slot: 4, count: 1 }));
        let err = dispatcher.apply(&mut arena, &drop).unwrap_err();
        assert_eq!(err.severity(), ErrorSeverity::Aborted);
        assert_eq!(arena.get(1).unwrap(), &before);
    }

    #[test]
    fn test_combo_attack_damages_defender_in_front() {
        let (dispatcher, mut arena) = server();
        let defender_at = arena.get(1).unwrap().movement.position.add(&Vec3::new(0.0, 0.0, 1.5));
        arena.get_mut(2).unwrap().movement.position = defender_at;

        dispatcher.apply(&mut arena, &input(1, 1, true)).unwrap();
        let defender = arena.get(2).unwrap();
        assert!(defender.property.current(PropertyType::Health) < 100.0);
        let attacker = arena.get(1).unwrap();
        assert!(attacker.round.traced_hp.contains_key(&2));
    }

    #[test]
    fn test_lethal_damage_marks_dead() {
        let (dispatcher, mut arena) = server();
        let state = arena.get(2).unwrap().clone();
        let hit = NetworkCommand::server(
            2,
            3,
            CommandPayload::PropertyEnvironmentChange(crate::command::PropertyEnvironmentChangeCommand {
                changes: vec![(
                    PropertyType::Health,
                    BuffIncreaseData::current(BuffOperationType::Subtract, 500.0),
                )],
            }),
        );
        dispatcher.apply(&mut arena, &hit).unwrap();
        let dead = arena.get(2).unwrap();
        assert!(dead.property.is_dead());
        assert!(!state.property.is_dead());
        assert_eq!(
            dead.combat.animation.current,
            crate::calculators::animation::AnimationState::Dead
        );
    }

    #[test]
    fn test_client_drops_attacks() {
        let config = Arc::new(GameConfig::default());
        let mut arena = PlayerArena::new();
        arena.insert(PlayerState::spawn(1, &config));
        let client = CommandDispatcher::new(config, ProcessRole::Client { local_connection_id: 1 });
        // Attack follow-up is ignored, the Input itself still applies
        assert_eq!(client.apply(&mut arena, &input(1, 1, true)).unwrap(), 2);
    }

    #[test]
    fn test_replay_matches_live_simulation() {
        let (dispatcher, mut arena) = server();
        let start = arena.get(1).unwrap().clone();
        let commands = vec![input(1, 1, true)];
        dispatcher.simulate_group(&mut arena, 1, 1, &commands, &[]);
        let replayed = dispatcher.replay(&start, 1, &commands, &[]);
        assert_eq!(&replayed.movement, &arena.get(1).unwrap().movement);
        assert_eq!(&replayed.combat, &arena.get(1).unwrap().combat);
    }
}
