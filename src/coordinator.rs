//! Per-turn driver of the military subsystem
//!
//! Owns the defense manager, the transport manager and the side tags they
//! share, and runs them in a fixed order every AI turn.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::CommandQueue;
use crate::context::TurnContext;
use crate::core::config::PetraConfig;
use crate::core::error::Result;
use crate::defense::DefenseManager;
use crate::state::{EventBatch, GameState};
use crate::tags::TagStore;
use crate::transport::TransportManager;

/// Everything that survives a save/load cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub defense: DefenseManager,
    pub transports: TransportManager,
    pub tags: TagStore,
}

pub struct MilitaryCoordinator {
    config: PetraConfig,
    tags: TagStore,
    defense: DefenseManager,
    transports: TransportManager,
}

impl MilitaryCoordinator {
    pub fn new(config: PetraConfig) -> Self {
        let defense = DefenseManager::new(&config);
        Self {
            config,
            tags: TagStore::new(),
            defense,
            transports: TransportManager::new(),
        }
    }

    pub fn config(&self) -> &PetraConfig {
        &self.config
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn defense(&self) -> &DefenseManager {
        &self.defense
    }

    pub fn transports(&self) -> &TransportManager {
        &self.transports
    }

    /// Borrow everything needed to call into the managers directly
    pub fn parts<'a>(
        &'a mut self,
        state: &'a dyn GameState,
        commands: &'a mut CommandQueue,
    ) -> (TurnContext<'a>, &'a mut DefenseManager, &'a mut TransportManager) {
        let ctx = TurnContext::new(state, &self.config, &mut self.tags, commands);
        (ctx, &mut self.defense, &mut self.transports)
    }

    /// Play one AI turn: events, defense, transports, then hand the units
    /// dropped by transports back to their armies
    pub fn run_turn(&mut self, state: &dyn GameState, events: &EventBatch) -> CommandQueue {
        let mut commands = CommandQueue::new();
        for evt in &events.renamed {
            self.tags.rename(evt.entity, evt.new_entity);
        }

        {
            let mut ctx = TurnContext::new(state, &self.config, &mut self.tags, &mut commands);
            self.defense.update(&mut ctx, &mut self.transports, events);
            let reset = self.transports.update(&mut ctx);
            if !reset.is_empty() {
                self.defense.release_units(&mut ctx, &mut self.transports, &reset);
            }
        }

        self.tags.retain(|id| state.entity(id).is_some());
        debug!(
            "turn {}: {} armies, {} transports, {} commands",
            state.played_turn(),
            self.defense.armies().len(),
            self.transports.plans().len(),
            commands.len()
        );
        commands
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            defense: self.defense.clone(),
            transports: self.transports.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Serialize the whole military state to JSON
    pub fn save(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Restore a state produced by [`save`](Self::save)
    pub fn load(config: PetraConfig, data: &str) -> Result<Self> {
        let snapshot: CoordinatorSnapshot = serde_json::from_str(data)?;
        Ok(Self {
            config,
            tags: snapshot.tags,
            defense: snapshot.defense,
            transports: snapshot.transports,
        })
    }
}
