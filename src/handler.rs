//! Event handler: one delivered event in, one actuation decision out.
//!
//! The scheduler only sees [`EventHandler`]; filtering (allow-lists,
//! sub-type branching) lives behind it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{BridgeError, BridgeResult};
use crate::event::{Event, EventSchema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuationDecision {
    Open,
    Ignore { reason: String },
}

pub trait EventHandler: Send + Sync {
    /// Decide what to do with `event`. Must depend on the event content
    /// and the handler's fixed configuration only.
    fn handle(&self, event: &Event) -> BridgeResult<ActuationDecision>;
}

/// Who gets the door opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Every watched event opens.
    #[default]
    OpenAll,
    /// Open only when the address in `field` is listed.
    AllowList { field: String, addresses: HashSet<String> },
}

/// Allow-list as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListConfig {
    pub field: String,
    pub addresses: Vec<String>,
}

impl AccessPolicy {
    pub fn allow_list(field: impl Into<String>, addresses: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        AccessPolicy::AllowList {
            field: field.into(),
            addresses: addresses.into_iter().map(|a| a.as_ref().to_ascii_lowercase()).collect(),
        }
    }
}

impl From<Option<&AllowListConfig>> for AccessPolicy {
    fn from(config: Option<&AllowListConfig>) -> Self {
        match config {
            Some(c) => AccessPolicy::allow_list(&c.field, &c.addresses),
            None => AccessPolicy::OpenAll,
        }
    }
}

/// Decodes with the watched event schema, then applies the policy.
pub struct AccessHandler {
    schema: EventSchema,
    policy: AccessPolicy,
}

impl AccessHandler {
    pub fn new(schema: EventSchema) -> Self {
        Self { schema, policy: AccessPolicy::OpenAll }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }
}

impl EventHandler for AccessHandler {
    fn handle(&self, event: &Event) -> BridgeResult<ActuationDecision> {
        let decoded = self.schema.decode(event)?;

        match &self.policy {
            AccessPolicy::OpenAll => Ok(ActuationDecision::Open),
            AccessPolicy::AllowList { field, addresses } => {
                let address = decoded.address(field).ok_or_else(|| {
                    BridgeError::malformed(event.position, format!("no address field '{field}'"))
                })?;
                if addresses.contains(address) {
                    Ok(ActuationDecision::Open)
                } else {
                    Ok(ActuationDecision::Ignore { reason: format!("{address} not on allow-list") })
                }
            }
        }
    }
}
