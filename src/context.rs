//! Borrowed state threaded through one AI turn

use crate::command::CommandQueue;
use crate::core::config::PetraConfig;
use crate::core::types::{EntityId, GameTime, PlayerId};
use crate::state::{EntityInfo, GameState};
use crate::tags::TagStore;

pub struct TurnContext<'a> {
    pub state: &'a dyn GameState,
    pub config: &'a PetraConfig,
    pub tags: &'a mut TagStore,
    pub commands: &'a mut CommandQueue,
}

impl<'a> TurnContext<'a> {
    pub fn new(
        state: &'a dyn GameState,
        config: &'a PetraConfig,
        tags: &'a mut TagStore,
        commands: &'a mut CommandQueue,
    ) -> Self {
        Self {
            state,
            config,
            tags,
            commands,
        }
    }

    pub fn player(&self) -> PlayerId {
        self.state.player()
    }

    pub fn time(&self) -> GameTime {
        self.state.elapsed_time()
    }

    /// Entity lookup whose result does not borrow the context
    pub fn entity(&self, id: EntityId) -> Option<&'a EntityInfo> {
        let state: &'a dyn GameState = self.state;
        state.entity(id)
    }
}
