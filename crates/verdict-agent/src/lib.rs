//! Agent-side building blocks: identities, signed document builders, the
//! paid provider call, and the scripted happy/dispute flows.

pub mod client;
pub mod flow;
pub mod identity;
pub mod paid;

pub use client::{ReceiptClient, ReceiptSpec};
pub use flow::{run_dispute_flow, run_happy_flow, FlowContext, ProgressSink};
pub use identity::ActorIdentity;
pub use paid::{PaidClient, PaidResponse};
