//! Local session and the group-switch state machine.
//!
//! ```text
//! Idle(Some(A)) --switch(B)--> Leaving{A,B} --left--> Joining(B) --loaded--> Idle(Some(B))
//! Idle(None)    --switch(B)--> Joining(B)
//! Joining(B)    --switch(C)--> Joining(C)        (B's late data is discarded)
//! ```

use crate::common::models::{GroupId, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchState {
    Idle(Option<GroupId>),
    Leaving { from: GroupId, to: GroupId },
    Joining(GroupId),
}

/// Identifies one switch request; results carrying an older generation are
/// stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTicket {
    pub generation: u64,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPlan {
    /// Group to send `leave` for before joining.
    pub leave: Option<GroupId>,
    pub ticket: SwitchTicket,
}

#[derive(Debug, Clone)]
pub struct GroupSwitch {
    state: SwitchState,
    generation: u64,
}

impl Default for GroupSwitch {
    fn default() -> Self {
        Self {
            state: SwitchState::Idle(None),
            generation: 0,
        }
    }
}

impl GroupSwitch {
    pub fn state(&self) -> &SwitchState {
        &self.state
    }

    pub fn active(&self) -> Option<&str> {
        match &self.state {
            SwitchState::Idle(group) => group.as_deref(),
            _ => None,
        }
    }

    /// Starts switching to `to`. Returns `None` when already idle in `to`.
    /// A request made mid-switch supersedes the one in flight.
    pub fn begin(&mut self, to: GroupId) -> Option<SwitchPlan> {
        let leave = match &self.state {
            SwitchState::Idle(Some(current)) if *current == to => return None,
            SwitchState::Idle(Some(current)) => Some(current.clone()),
            SwitchState::Idle(None) | SwitchState::Leaving { .. } | SwitchState::Joining(_) => {
                None
            }
        };
        self.generation += 1;
        self.state = match &leave {
            Some(from) => SwitchState::Leaving {
                from: from.clone(),
                to: to.clone(),
            },
            None => SwitchState::Joining(to.clone()),
        };
        Some(SwitchPlan {
            leave,
            ticket: SwitchTicket {
                generation: self.generation,
                group_id: to,
            },
        })
    }

    /// The leave for the old group has been issued.
    pub fn left(&mut self) {
        if let SwitchState::Leaving { to, .. } = &self.state {
            self.state = SwitchState::Joining(to.clone());
        }
    }

    pub fn is_current(&self, ticket: &SwitchTicket) -> bool {
        ticket.generation == self.generation
            && matches!(&self.state, SwitchState::Joining(g) if *g == ticket.group_id)
    }

    /// Finishes the switch for `ticket`. Stale tickets are rejected.
    pub fn complete(&mut self, ticket: &SwitchTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.state = SwitchState::Idle(Some(ticket.group_id.clone()));
        true
    }

    /// Abandons the switch for `ticket` after a failed load.
    pub fn fail(&mut self, ticket: &SwitchTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.state = SwitchState::Idle(None);
        true
    }
}

/// Identity of the local user plus the group they are switching between.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserProfile,
    pub switch: GroupSwitch,
}

impl Session {
    pub fn new(user: UserProfile) -> Self {
        Self {
            user,
            switch: GroupSwitch::default(),
        }
    }

    pub fn active_group(&self) -> Option<&str> {
        self.switch.active()
    }
}
