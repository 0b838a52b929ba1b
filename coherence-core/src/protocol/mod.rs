//! The request/response and server-push model exchanged with the grid.
//!
//! These types describe *what* crosses the session channel; how they are
//! framed on the wire is the transport's concern.

mod cursor;
mod message;

pub use cursor::PageCursor;
pub use message::{
    EntryEventKind, EntryPush, IterationKind, LifecycleKind, LifecyclePush, ListenerScope,
    Request, RequestOp, Response, ServerPush, StreamItem,
};
