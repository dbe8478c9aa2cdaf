//! Handler pipeline: cross-cutting handlers, user routes, and the router
//! each server instance builds from them.

mod assembler;
mod handlers;
mod router;

pub use assembler::assemble;
pub use handlers::{CrossCutting, DateClock, SERVER_HEADER_VALUE};
pub use router::{Handler, HandlerMode, Route, RouteEntry, RouteError, Router};
