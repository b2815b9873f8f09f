//! REST surface consumed by the client facade as the fallback for
//! every realtime action.

pub mod attachments;
pub mod conversations;
pub mod messages;
