//! Membership view and gossip merge
//!
//! Each node keeps one `MembershipView`: its belief about every member it has
//! heard of, itself included. Remote snapshots piggybacked on probe traffic
//! are folded in through `MembershipView::merge`, which resolves conflicts per
//! entry using the status kind and the owner's incarnation number.

mod types;
mod view;

pub use types::{MembershipEvent, PeerId, Snapshot, Status, StatusKind};
pub use view::{MembershipView, MergeEffect};
