//! Page-cursor walking for paginated upstream operations.

use std::future::Future;

use tracing::debug;

use crate::interfaces::{FlowSourceError, Page};

/// Fetch pages starting at 1 until the upstream reports no further page.
///
/// A connection closed without any reply ends the walk and returns what was
/// collected so far; the upstream does this when it has nothing to send.
pub async fn collect_pages<T, F, Fut>(operation: &str, mut fetch: F) -> Result<Vec<T>, FlowSourceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, FlowSourceError>>,
{
    let mut collected = Vec::new();
    let mut page_number = 1;

    loop {
        let page = match fetch(page_number).await {
            Ok(page) => page,
            Err(e) if e.is_empty_reply() => {
                debug!(operation, page = page_number, "Empty reply, no more data");
                break;
            }
            Err(e) => return Err(e),
        };

        let has_next = page.has_next() && !page.items.is_empty();
        collected.extend(page.items);
        if !has_next {
            break;
        }
        page_number += 1;
    }

    Ok(collected)
}
