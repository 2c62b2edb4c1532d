// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain entities.
//!
//! ## Overview
//!
//! Plain serde-friendly records plus the small amount of behavior that
//! belongs to the data itself (lifecycle derivation on [`Procedure`],
//! rank bookkeeping on [`PriorityList`]). Everything stateful lives in the
//! services that operate on these records.

pub mod campaign;
pub mod event;
pub mod ids;
pub mod priority_list;
pub mod procedure;
pub mod registration;
pub mod user;

pub use campaign::Campaign;
pub use event::Event;
pub use ids::{
    CampaignId, EventId, PriorityListId, ProcedureId, RegistrationId, RuleSetId, StudyCourseId,
    TenantId, UserId,
};
pub use priority_list::{
    ItemResolution, ListStatus, NewPriorityList, PriorityList, PriorityListItem,
};
pub use procedure::{Procedure, ProcedureKind, ProcedureState};
pub use registration::{ConfirmedRegistration, RegistrationDraft};
pub use user::User;
