//! Control requests, their replies, and dispatch onto the engine.

use tracing::{debug, warn};
use tunterm_types::{AddressFamily, SwIfIndex, TableIndex};

use super::status::ApiStatus;
use super::wire::{self, MessageHeader, MessageKind, WireError};
use crate::control::TuntermAcl;
use crate::table::TunTermRule;

/// A decoded control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    AddReplace {
        context: u32,
        af: AddressFamily,
        /// `None` creates a new table.
        table: Option<TableIndex>,
        rules: Vec<TunTermRule>,
    },
    Delete {
        context: u32,
        table: Option<TableIndex>,
    },
    InterfaceAddDel {
        context: u32,
        sw_if_index: Option<SwIfIndex>,
        table: Option<TableIndex>,
        is_add: bool,
    },
}

/// The single reply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReply {
    pub kind: MessageKind,
    pub context: u32,
    pub status: ApiStatus,
    /// Table index, AddReplace only; `None` on failure.
    pub table: Option<TableIndex>,
}

impl ControlReply {
    pub fn rejected(header: MessageHeader, status: ApiStatus) -> Self {
        Self {
            kind: header.kind,
            context: header.context,
            status,
            table: None,
        }
    }
}

impl ControlRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            ControlRequest::AddReplace { .. } => MessageKind::AddReplace,
            ControlRequest::Delete { .. } => MessageKind::Delete,
            ControlRequest::InterfaceAddDel { .. } => MessageKind::InterfaceAddDel,
        }
    }

    pub fn context(&self) -> u32 {
        match self {
            ControlRequest::AddReplace { context, .. }
            | ControlRequest::Delete { context, .. }
            | ControlRequest::InterfaceAddDel { context, .. } => *context,
        }
    }

    /// Applies the request to the engine.
    pub fn execute(&self, acl: &mut TuntermAcl) -> ControlReply {
        let mut reply = ControlReply {
            kind: self.kind(),
            context: self.context(),
            status: ApiStatus::Success,
            table: None,
        };

        let status = match self {
            ControlRequest::AddReplace { af, table, rules, .. } => {
                match acl.add_replace(*af, *table, rules) {
                    Ok(index) => {
                        reply.table = Some(index);
                        ApiStatus::Success
                    }
                    Err(e) => {
                        warn!(error = %e, "add_replace rejected");
                        ApiStatus::from(&e)
                    }
                }
            }
            ControlRequest::Delete { table, .. } => match acl.delete(*table) {
                Ok(()) => ApiStatus::Success,
                Err(e) => {
                    warn!(error = %e, "delete rejected");
                    ApiStatus::from(&e)
                }
            },
            ControlRequest::InterfaceAddDel {
                sw_if_index,
                table,
                is_add,
                ..
            } => match (table, sw_if_index) {
                (None, _) => ApiStatus::InvalidValue,
                (Some(_), None) => ApiStatus::InvalidSwIfIndex,
                (Some(_), Some(sw_if_index)) => {
                    match acl.interface_add_del(*sw_if_index, *table, *is_add) {
                        Ok(()) => ApiStatus::Success,
                        Err(e) => {
                            warn!(error = %e, "interface_add_del rejected");
                            ApiStatus::from(&e)
                        }
                    }
                }
            },
        };

        reply.status = status;
        debug!(kind = ?reply.kind, context = reply.context, status = %reply.status, "handled request");
        reply
    }
}

/// Decodes one message, applies it and encodes its reply.
///
/// Malformed bodies still get a reply carrying the error status. Only a
/// message whose header cannot be read, or whose id is unknown, fails.
pub fn handle_message(acl: &mut TuntermAcl, msg: &[u8]) -> Result<Vec<u8>, WireError> {
    let header = MessageHeader::decode(msg)?;
    let reply = match wire::decode_request(msg) {
        Ok(request) => request.execute(acl),
        Err(e) => {
            warn!(kind = ?header.kind, error = %e, "malformed request");
            ControlReply::rejected(header, ApiStatus::from(&e))
        }
    };
    Ok(wire::encode_reply(&reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fib::{AdjacencyTable, RoutePathDescriptor};
    use crate::host::{FeatureFlags, InterfaceMap};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn acl() -> TuntermAcl {
        let interfaces = Arc::new(InterfaceMap::new());
        interfaces.add(SwIfIndex::new(1), "eth1");
        interfaces.add(SwIfIndex::new(2), "eth2");
        let resolver = Arc::new(AdjacencyTable::new(interfaces.clone()));
        TuntermAcl::new(interfaces, Arc::new(FeatureFlags::new()), resolver)
    }

    fn create_v4(context: u32) -> ControlRequest {
        ControlRequest::AddReplace {
            context,
            af: AddressFamily::V4,
            table: None,
            rules: vec![TunTermRule::new(
                "10.0.0.5".parse().unwrap(),
                RoutePathDescriptor::via(SwIfIndex::new(2), "192.168.1.1".parse().unwrap()),
            )],
        }
    }

    fn handle(acl: &mut TuntermAcl, request: &ControlRequest) -> ControlReply {
        let bytes = handle_message(acl, &wire::encode_request(request)).unwrap();
        wire::decode_reply(&bytes).unwrap()
    }

    #[test]
    fn test_add_replace_reply_carries_index() {
        let mut acl = acl();
        let reply = handle(&mut acl, &create_v4(11));
        assert_eq!(reply.kind, MessageKind::AddReplace);
        assert_eq!(reply.context, 11);
        assert_eq!(reply.status, ApiStatus::Success);
        assert_eq!(reply.table, Some(TableIndex::new(0)));
    }

    #[test]
    fn test_failed_add_replace_returns_sentinel() {
        let mut acl = acl();
        let request = ControlRequest::AddReplace {
            context: 1,
            af: AddressFamily::V4,
            table: None,
            rules: vec![TunTermRule::new(
                "2001:db8::1".parse().unwrap(),
                RoutePathDescriptor::via(SwIfIndex::new(2), "192.168.1.1".parse().unwrap()),
            )],
        };
        let reply = handle(&mut acl, &request);
        assert_eq!(reply.status, ApiStatus::InvalidValue3);
        assert_eq!(reply.table, None);
        assert_eq!(acl.tables().table_count(), 0);
    }

    #[test]
    fn test_short_message_rejected_without_processing() {
        let mut acl = acl();
        let mut msg = wire::encode_request(&create_v4(3));
        msg.truncate(msg.len() - 10);

        let reply = wire::decode_reply(&handle_message(&mut acl, &msg).unwrap()).unwrap();
        assert_eq!(reply.status, ApiStatus::InvalidValue);
        assert_eq!(reply.context, 3);
        assert_eq!(acl.tables().table_count(), 0);
    }

    #[test]
    fn test_padded_add_replace_accepted() {
        let mut acl = acl();
        let mut msg = wire::encode_request(&create_v4(5));
        msg.extend_from_slice(&[0; 4]);

        let reply = wire::decode_reply(&handle_message(&mut acl, &msg).unwrap()).unwrap();
        assert_eq!(reply.status, ApiStatus::Success);
        assert_eq!(reply.table, Some(TableIndex::new(0)));
        assert_eq!(acl.tables().table_count(), 1);
    }

    #[test]
    fn test_unknown_message_fails_fast() {
        let mut acl = acl();
        assert_eq!(
            handle_message(&mut acl, &[0, 77, 0, 0, 0, 0]),
            Err(WireError::UnhandledMessage(77))
        );
    }

    #[test]
    fn test_interface_add_del_statuses() {
        let mut acl = acl();
        let table = handle(&mut acl, &create_v4(1)).table;

        let bind = |sw_if_index: Option<SwIfIndex>, table: Option<TableIndex>, is_add: bool| {
            ControlRequest::InterfaceAddDel {
                context: 2,
                sw_if_index,
                table,
                is_add,
            }
        };

        let reply = handle(&mut acl, &bind(Some(SwIfIndex::new(1)), None, true));
        assert_eq!(reply.status, ApiStatus::InvalidValue);

        let reply = handle(&mut acl, &bind(None, table, true));
        assert_eq!(reply.status, ApiStatus::InvalidSwIfIndex);

        let reply = handle(&mut acl, &bind(Some(SwIfIndex::new(9)), table, true));
        assert_eq!(reply.status, ApiStatus::InvalidSwIfIndex);

        let reply = handle(&mut acl, &bind(Some(SwIfIndex::new(1)), table, false));
        assert_eq!(reply.status, ApiStatus::InvalidValue2);

        let reply = handle(&mut acl, &bind(Some(SwIfIndex::new(1)), table, true));
        assert_eq!(reply.status, ApiStatus::Success);
        assert_eq!(reply.kind, MessageKind::InterfaceAddDel);

        let delete = ControlRequest::Delete { context: 4, table };
        assert_eq!(handle(&mut acl, &delete).status, ApiStatus::ResourceInUse);
    }
}
