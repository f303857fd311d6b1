// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Page collation over cursor-paginated store reads
//!
//! A store round-trip returns a variable number of items (the store pages
//! before filtering), so a fixed-size page window has to be assembled by
//! walking the cursor chain and counting. Items that belong to pages before
//! the target are only counted, never kept.

use tracing::debug;

use crate::error::StoreError;
use crate::store::{Document, Filter, KeyCondition, Store};

/// Default number of items per collated page
pub const PAGE_SIZE: usize = 100;

/// The store read a collation walks
#[derive(Debug, Clone, PartialEq)]
pub enum PageQuery {
    /// Partition query with an optional filter
    Query {
        condition: KeyCondition,
        filter: Option<Filter>,
    },
    /// Full-table scan with an optional filter
    Scan { filter: Option<Filter> },
}

/// Running state of a collation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageCollation {
    /// Page currently being filled
    pub page: usize,
    /// Items placed into the current page so far
    pub count: usize,
    /// Contents of the target page
    pub items: Vec<Document>,
}

impl PageCollation {
    /// Start a collation at page 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one store batch into the window.
    pub fn absorb(&mut self, batch: Vec<Document>, target_page: usize, page_size: usize) {
        let page_size = page_size.max(1);
        let mut batch = batch.into_iter();
        let mut remaining = batch.len();

        while self.page < target_page && remaining > 0 {
            let open = page_size - self.count;
            if remaining >= open {
                batch.by_ref().take(open).for_each(drop);
                remaining -= open;
                self.page += 1;
                self.count = 0;
            } else {
                self.count += remaining;
                remaining = 0;
            }
        }

        if self.page == target_page {
            let take = (page_size - self.count).min(remaining);
            self.items.extend(batch.take(take));
            self.count += take;
        }
    }

    /// Whether the target page is full
    pub fn is_complete(&self, target_page: usize, page_size: usize) -> bool {
        self.page == target_page && self.count >= page_size.max(1)
    }
}

/// Collect page `target_page` of a query or scan.
///
/// Store reads are issued one after another. Any store error aborts the
/// whole chain; a page beyond the data is an empty result.
pub async fn collate_page(
    store: &dyn Store,
    table: &str,
    query: &PageQuery,
    target_page: usize,
    page_size: usize,
) -> Result<Vec<Document>, StoreError> {
    let mut state = PageCollation::new();
    let mut cursor = None;
    let mut round_trips = 0usize;

    loop {
        let result = match query {
            PageQuery::Query { condition, filter } => {
                store
                    .query(table, condition, filter.as_ref(), cursor.as_ref())
                    .await?
            }
            PageQuery::Scan { filter } => {
                store.scan(table, filter.as_ref(), cursor.as_ref()).await?
            }
        };
        round_trips += 1;

        state.absorb(result.items, target_page, page_size);

        if state.is_complete(target_page, page_size) {
            break;
        }
        match result.last_evaluated_key {
            Some(key) => cursor = Some(key),
            None => break,
        }
    }

    debug!(
        table,
        page = target_page,
        items = state.items.len(),
        round_trips,
        "Collated page"
    );
    Ok(state.items)
}
