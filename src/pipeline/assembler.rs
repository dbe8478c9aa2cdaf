//! Assembly of the effective route list.

use super::handlers::{CrossCutting, DateClock};
use super::router::RouteEntry;
use crate::runtime::FeatureFlags;

/// Prepend the enabled cross-cutting handlers to `routes`.
///
/// The order is fixed: request logging, `Date` header, content-type
/// inference, `Server` header. User entries follow unchanged. `routes` is
/// left untouched; the result is a new sequence.
pub fn assemble(features: &FeatureFlags, clock: &DateClock, routes: &[RouteEntry]) -> Vec<RouteEntry> {
    let mut pipeline = Vec::with_capacity(routes.len() + 4);

    if features.debug {
        pipeline.push(RouteEntry::CrossCutting(CrossCutting::RequestLogger));
    }
    if features.add_date_header {
        pipeline.push(RouteEntry::CrossCutting(CrossCutting::DateHeader(clock.clone())));
    }
    if features.add_content_type_header {
        pipeline.push(RouteEntry::CrossCutting(CrossCutting::ContentType));
    }
    if features.add_server_header {
        pipeline.push(RouteEntry::CrossCutting(CrossCutting::ServerHeader));
    }

    pipeline.extend(routes.iter().cloned());
    pipeline
}
