//! Continuation state and its opaque token form.

mod codec;
mod cursor;

pub use codec::{decode, encode};
pub use cursor::{CursorGroup, PageCursor, PaginationInfo};
