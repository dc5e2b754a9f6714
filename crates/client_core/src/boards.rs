//! Thin per-board bindings. Each dashboard board is the one generic engine
//! plus a record type, a group accessor, and a canonical column set.

use std::sync::Arc;

use shared::domain::{
    ClientId, ClientRecord, ClientType, ProjectId, ProjectRecord, ProjectStatus, TicketId,
    TicketPriority, TicketRecord,
};

use crate::{
    board::{BoardEngine, BoardEntity},
    coordinator::GroupMutator,
};

impl BoardEntity for ClientRecord {
    type Id = ClientId;
    type Group = ClientType;

    fn id(&self) -> ClientId {
        self.client_id.clone()
    }

    fn group(&self) -> ClientType {
        self.client_type
    }

    fn set_group(&mut self, group: ClientType) {
        self.client_type = group;
    }
}

impl BoardEntity for TicketRecord {
    type Id = TicketId;
    type Group = TicketPriority;

    fn id(&self) -> TicketId {
        self.ticket_id.clone()
    }

    fn group(&self) -> TicketPriority {
        self.priority
    }

    fn set_group(&mut self, group: TicketPriority) {
        self.priority = group;
    }
}

impl BoardEntity for ProjectRecord {
    type Id = ProjectId;
    type Group = ProjectStatus;

    fn id(&self) -> ProjectId {
        self.project_id.clone()
    }

    fn group(&self) -> ProjectStatus {
        self.status
    }

    fn set_group(&mut self, group: ProjectStatus) {
        self.status = group;
    }
}

pub type ClientBoard = BoardEngine<ClientRecord>;
pub type TicketBoard = BoardEngine<TicketRecord>;
pub type ProjectBoard = BoardEngine<ProjectRecord>;

pub fn client_board(mutator: Arc<dyn GroupMutator<ClientId, ClientType>>) -> ClientBoard {
    BoardEngine::new(ClientType::COLUMNS.to_vec(), mutator)
}

pub fn ticket_board(mutator: Arc<dyn GroupMutator<TicketId, TicketPriority>>) -> TicketBoard {
    BoardEngine::new(TicketPriority::COLUMNS.to_vec(), mutator)
}

pub fn project_board(mutator: Arc<dyn GroupMutator<ProjectId, ProjectStatus>>) -> ProjectBoard {
    BoardEngine::new(ProjectStatus::COLUMNS.to_vec(), mutator)
}

#[cfg(test)]
#[path = "tests/boards_tests.rs"]
mod tests;
