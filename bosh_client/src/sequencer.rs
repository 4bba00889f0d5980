//! Outbound queue and request-id assignment.
//!
//! Callers enqueue [`OutboundItem`]s from any task. When the session decides
//! to dispatch, [`RequestSequencer::materialize`] drains *everything* pending
//! into one [`WireRequest`] and assigns the next rid in the same step, so
//! rids are gapless and follow submission order.

use std::collections::{BTreeMap, VecDeque};

use bosh_body::{Body, attr};
use rand::Rng;

/// Exclusive upper bound of a randomly chosen first rid.
pub const MAX_INITIAL_RID: u64 = 1 << 52;

/// A caller payload waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundItem {
    /// Position in submission order.
    pub ordinal: u64,

    /// The caller's body.
    pub body: Body,

    /// Whether this item asks the CM to terminate the session.
    pub terminate: bool,
}

/// Pending items bundled under one rid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    /// Request id.
    pub rid: u64,

    /// Items carried, in submission order. Empty for a poll.
    pub items: Vec<OutboundItem>,
}

impl WireRequest {
    /// Whether the request carries no items.
    #[must_use]
    pub fn is_poll(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the request carries the terminate marker.
    #[must_use]
    pub fn is_terminate(&self) -> bool {
        self.items.iter().any(|item| item.terminate)
    }

    /// Ordinals of the carried items.
    pub fn ordinals(&self) -> impl Iterator<Item = u64> + '_ {
        self.items.iter().map(|item| item.ordinal)
    }

    /// Assemble the wrapper body that goes on the wire.
    ///
    /// Item attributes and namespaces are merged in order, payloads are
    /// concatenated. `defaults` are added only where no item set them. `sid`
    /// and `rid` are always the engine's. A caller-supplied `type` is
    /// dropped unless this is the terminate request.
    #[must_use]
    pub fn to_body(&self, sid: Option<&str>, defaults: &[(&str, String)]) -> Body {
        let mut attributes: BTreeMap<String, String> = BTreeMap::new();
        let mut builder = Body::builder();

        for item in &self.items {
            for (name, value) in item.body.attributes() {
                attributes.insert(name.to_owned(), value.to_owned());
            }
            for (prefix, uri) in item.body.namespaces() {
                builder = builder.namespace(prefix, uri);
            }
            builder = builder.append_payload_xml(item.body.payload_xml());
        }

        for (name, value) in defaults {
            attributes
                .entry((*name).to_owned())
                .or_insert_with(|| value.clone());
        }

        if self.is_terminate() {
            attributes.insert(attr::TYPE.to_owned(), attr::TYPE_TERMINATE.to_owned());
        } else {
            attributes.remove(attr::TYPE);
        }

        attributes.remove(attr::SID);
        if let Some(sid) = sid {
            attributes.insert(attr::SID.to_owned(), sid.to_owned());
        }
        attributes.insert(attr::RID.to_owned(), self.rid.to_string());

        for (name, value) in attributes {
            builder = builder.attribute(name, value);
        }
        builder.build()
    }
}

/// FIFO of pending items plus the rid counter.
#[derive(Debug)]
pub struct RequestSequencer {
    next_rid: u64,
    next_ordinal: u64,
    pending: VecDeque<OutboundItem>,
}

impl RequestSequencer {
    /// Start at `initial_rid`, or at a random rid in `[1, 2^52)`.
    #[must_use]
    pub fn new(initial_rid: Option<u64>) -> Self {
        let next_rid =
            initial_rid.unwrap_or_else(|| rand::thread_rng().gen_range(1..MAX_INITIAL_RID));
        Self {
            next_rid,
            next_ordinal: 0,
            pending: VecDeque::new(),
        }
    }

    /// Queue a body; returns its ordinal.
    pub fn enqueue(&mut self, body: Body, terminate: bool) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.pending.push_back(OutboundItem {
            ordinal,
            body,
            terminate,
        });
        ordinal
    }

    /// Drain every pending item into a request with the next rid.
    pub fn materialize(&mut self) -> WireRequest {
        let rid = self.next_rid;
        self.next_rid += 1;
        WireRequest {
            rid,
            items: self.pending.drain(..).collect(),
        }
    }

    /// Put items of a failed request back in front of the queue.
    pub fn requeue_front(&mut self, items: Vec<OutboundItem>) {
        for item in items.into_iter().rev() {
            self.pending.push_front(item);
        }
    }

    /// Drop everything pending.
    pub fn discard(&mut self) -> Vec<OutboundItem> {
        self.pending.drain(..).collect()
    }

    /// Whether anything is waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The rid the next request will get.
    #[must_use]
    pub const fn next_rid(&self) -> u64 {
        self.next_rid
    }

    /// Ordinal of the most recently enqueued item, if any.
    #[must_use]
    pub fn last_ordinal(&self) -> Option<u64> {
        self.next_ordinal.checked_sub(1)
    }
}
