//! Startup round-trip against every table.

use super::PushDatabase;
use crate::error::{Error, Result};
use crate::types::{new_id, RegisterOutcome, UserRecord};
use tracing::{debug, info};

/// Version written by the legacy-store probe.
const PROBE_VERSION: u64 = 12;

/// Router type written by the router probe.
const PROBE_ROUTER_TYPE: &str = "simplepush";

fn failed(what: &str) -> Error {
    Error::Preflight(what.to_string())
}

pub(super) async fn run(db: &PushDatabase) -> Result<()> {
    let uaid = new_id();
    let chid = new_id();
    let node_id = &db.config().preflight_node_id;
    debug!(%uaid, %chid, "starting preflight check");

    let storage = db.storage();
    if !storage.save(&uaid, &chid, PROBE_VERSION).await? {
        return Err(failed("legacy notification was not saved"));
    }
    if storage.fetch(&uaid).await?.is_empty() {
        return Err(failed("saved legacy notification is not readable"));
    }
    if !storage.delete(&uaid, &chid, Some(PROBE_VERSION)).await? {
        return Err(failed("legacy notification was not deleted"));
    }

    let router = db.router();
    let record = UserRecord::new(uaid.clone())
        .with_node(node_id.clone(), 0)
        .with_router_type(PROBE_ROUTER_TYPE);
    if let RegisterOutcome::Rejected = router.register_user(&record).await? {
        return Err(failed("router record was rejected"));
    }
    let stored = router.get_user(&uaid).await?;
    if stored.node_id.as_deref() != Some(node_id.as_str()) {
        return Err(failed("router record has the wrong node id"));
    }
    if !router.release_node(&stored).await? {
        return Err(failed("node could not be released"));
    }
    router.unregister_user(&uaid).await?;

    info!(node_id = %node_id, "preflight check passed");
    Ok(())
}
