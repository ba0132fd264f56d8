//! Handler for `ItemInventoryQueryRq` responses.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info};

use crate::dispatch::ResponseHandler;
use crate::error::ConnectorError;

/// Catalog name of the inventory query request.
pub const INVENTORY_REQUEST: &str = "ItemInventoryQueryRq";

const ITEM_ELEMENT: &[u8] = b"ItemInventoryRet";
const FULL_NAME_ELEMENT: &[u8] = b"FullName";

/// Walks the `ItemInventoryRet` records of an inventory query response.
#[derive(Debug, Clone)]
pub struct InventoryHandler {
    parse_limit: usize,
}

/// Summary of one parsed inventory response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySummary {
    /// Records processed (never more than the parse limit).
    pub processed: usize,
    /// Records present beyond the parse limit.
    pub skipped: usize,
    /// `FullName` of each processed record, in document order.
    pub names: Vec<String>,
}

impl InventoryHandler {
    pub fn new(parse_limit: usize) -> Self {
        Self { parse_limit }
    }

    /// Parse `response`, processing at most `parse_limit` records.
    pub fn summarize(&self, response: &str) -> Result<InventorySummary, ConnectorError> {
        let mut reader = Reader::from_str(response.trim());
        reader.config_mut().trim_text(true);

        let mut summary = InventorySummary::default();
        let mut in_item = false;
        let mut in_name = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == ITEM_ELEMENT => {
                    if summary.processed < self.parse_limit {
                        summary.processed += 1;
                        in_item = true;
                    } else {
                        summary.skipped += 1;
                    }
                }
                Event::End(e) if e.local_name().as_ref() == ITEM_ELEMENT => in_item = false,
                Event::Start(e) if in_item && e.local_name().as_ref() == FULL_NAME_ELEMENT => {
                    in_name = true;
                }
                Event::End(e) if e.local_name().as_ref() == FULL_NAME_ELEMENT => in_name = false,
                Event::Text(t) if in_name => summary.names.push(t.unescape()?.into_owned()),
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl ResponseHandler for InventoryHandler {
    async fn handle(&self, payload: String) -> Result<(), ConnectorError> {
        info!(bytes = payload.len(), "received inventory response; parsing");
        let summary = self.summarize(&payload)?;
        for name in &summary.names {
            debug!(item = %name, "inventory item");
        }
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            "finished processing inventory response"
        );
        Ok(())
    }
}
