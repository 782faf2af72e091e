//! Parser for node status pushes.
//!
//! Node firmware reports state changes as ASCII text of the form
//! `k1=v1;k2=v2;…`. Recognized keys map to [`StatusItem`] variants; keys
//! this coordinator does not know are surfaced as [`StatusItem::Unknown`]
//! so the dispatcher can log and count them without failing the push.

use otsim_common::{ExtAddr, JoinerState, NodeMode, NodeRole, Rloc16};

use crate::EventError;

/// One `k=v` item of a status push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusItem {
    /// `role=<decimal>` — device role changed.
    Role(NodeRole),
    /// `rloc16=<decimal>` — routing locator changed.
    Rloc16(Rloc16),
    /// `parid=<hex>` — partition id changed.
    PartitionId(u32),
    /// `extaddr=<hex16>` — extended address changed.
    ExtAddr(ExtAddr),
    /// `mode=<flags>` — MLE device mode.
    Mode(NodeMode),
    /// `ping_request=<dst>,<size>,<timestamp_ms>`.
    PingRequest {
        /// Destination address text as the firmware printed it.
        dst: String,
        /// Payload size in bytes.
        data_size: u16,
        /// Firmware send timestamp, milliseconds.
        timestamp_ms: u64,
    },
    /// `ping_reply=<dst>,<size>,<timestamp_ms>,<hop_limit>`.
    PingReply {
        /// Destination address the reply came from.
        dst: String,
        /// Payload size in bytes.
        data_size: u16,
        /// Echoed send timestamp, milliseconds.
        timestamp_ms: u64,
        /// Remaining hop limit on the reply.
        hop_limit: u8,
    },
    /// `coap=<action>,<msg_id>,<type>,<code>,<uri>,<ip>,<port>[,<error>]`.
    Coap(CoapStatus),
    /// `router_added=<extaddr-hex>`.
    RouterAdded(ExtAddr),
    /// `router_removed=<extaddr-hex>`.
    RouterRemoved(ExtAddr),
    /// `child_added=<extaddr-hex>`.
    ChildAdded(ExtAddr),
    /// `child_removed=<extaddr-hex>`.
    ChildRemoved(ExtAddr),
    /// `parent=<extaddr-hex>`.
    Parent(ExtAddr),
    /// `joiner_state=<decimal>`.
    Joiner(JoinerState),
    /// `transmit=<channel>[,<dst-rloc16-hex>]` — visualization hint for a
    /// frame send; no destination means broadcast.
    Transmit {
        /// Channel the frame went out on.
        channel: u8,
        /// Unicast destination, if any.
        dst_rloc16: Option<Rloc16>,
    },
    /// Anything this coordinator does not recognize.
    Unknown {
        /// The key text.
        key: String,
        /// The value text.
        value: String,
    },
}

/// A CoAP message observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapStatus {
    /// `send`, `recv`, or another firmware-defined action.
    pub action: String,
    /// CoAP message id.
    pub msg_id: u64,
    /// Message type text (`con`, `non`, `ack`, `rst`).
    pub coap_type: String,
    /// CoAP code.
    pub code: u8,
    /// Request URI path.
    pub uri: String,
    /// Peer IP address text.
    pub peer_ip: String,
    /// Peer UDP port.
    pub peer_port: u16,
    /// Error text for failed sends.
    pub error: Option<String>,
}

/// Parse a full status-push payload into items.
///
/// Fails only on malformed values for *recognized* keys; unknown keys come
/// back as [`StatusItem::Unknown`].
pub fn parse(text: &str) -> Result<Vec<StatusItem>, EventError> {
    text.split(';')
        .filter(|part| !part.is_empty())
        .map(parse_item)
        .collect()
}

fn parse_item(part: &str) -> Result<StatusItem, EventError> {
    let (key, value) = part.split_once('=').unwrap_or((part, ""));
    let err = |reason: String| EventError::MalformedStatus {
        key: key.to_string(),
        reason,
    };

    let item = match key {
        "role" => {
            let v: u8 = value.parse().map_err(|_| err(format!("bad number {value:?}")))?;
            StatusItem::Role(NodeRole::from_u8(v).map_err(|e| err(e.to_string()))?)
        }
        "rloc16" => {
            let v: Rloc16 = value.parse().map_err(|_| err(format!("bad number {value:?}")))?;
            StatusItem::Rloc16(v)
        }
        "parid" => StatusItem::PartitionId(parse_hex32(value).map_err(err)?),
        "extaddr" => StatusItem::ExtAddr(parse_extaddr(value).map_err(err)?),
        "mode" => StatusItem::Mode(NodeMode::parse(value).map_err(|e| err(e.to_string()))?),
        "ping_request" => {
            let fields: Vec<&str> = value.split(',').collect();
            if fields.len() != 3 {
                return Err(err(format!("expected 3 fields, got {}", fields.len())));
            }
            StatusItem::PingRequest {
                dst: fields[0].to_string(),
                data_size: fields[1].parse().map_err(|_| err("bad size".into()))?,
                timestamp_ms: fields[2].parse().map_err(|_| err("bad timestamp".into()))?,
            }
        }
        "ping_reply" => {
            let fields: Vec<&str> = value.split(',').collect();
            if fields.len() != 4 {
                return Err(err(format!("expected 4 fields, got {}", fields.len())));
            }
            StatusItem::PingReply {
                dst: fields[0].to_string(),
                data_size: fields[1].parse().map_err(|_| err("bad size".into()))?,
                timestamp_ms: fields[2].parse().map_err(|_| err("bad timestamp".into()))?,
                hop_limit: fields[3].parse().map_err(|_| err("bad hop limit".into()))?,
            }
        }
        "coap" => StatusItem::Coap(parse_coap(value).map_err(err)?),
        "router_added" => StatusItem::RouterAdded(parse_extaddr(value).map_err(err)?),
        "router_removed" => StatusItem::RouterRemoved(parse_extaddr(value).map_err(err)?),
        "child_added" => StatusItem::ChildAdded(parse_extaddr(value).map_err(err)?),
        "child_removed" => StatusItem::ChildRemoved(parse_extaddr(value).map_err(err)?),
        "parent" => StatusItem::Parent(parse_extaddr(value).map_err(err)?),
        "joiner_state" => {
            let v: u8 = value.parse().map_err(|_| err(format!("bad number {value:?}")))?;
            StatusItem::Joiner(JoinerState::from_u8(v).map_err(|e| err(e.to_string()))?)
        }
        "transmit" => {
            let mut fields = value.split(',');
            let channel = fields
                .next()
                .unwrap_or("")
                .parse()
                .map_err(|_| err("bad channel".into()))?;
            let dst_rloc16 = match fields.next() {
                Some(f) => Some(
                    u16::from_str_radix(f, 16).map_err(|_| err("bad destination".into()))?,
                ),
                None => None,
            };
            StatusItem::Transmit { channel, dst_rloc16 }
        }
        _ => StatusItem::Unknown {
            key: key.to_string(),
            value: value.to_string(),
        },
    };
    Ok(item)
}

fn parse_hex32(value: &str) -> Result<u32, String> {
    u32::from_str_radix(value, 16).map_err(|_| format!("bad hex value {value:?}"))
}

fn parse_extaddr(value: &str) -> Result<ExtAddr, String> {
    u64::from_str_radix(value, 16)
        .map(ExtAddr)
        .map_err(|_| format!("bad extaddr {value:?}"))
}

fn parse_coap(value: &str) -> Result<CoapStatus, String> {
    let fields: Vec<&str> = value.split(',').collect();
    if fields.len() < 7 {
        return Err(format!("expected at least 7 fields, got {}", fields.len()));
    }
    Ok(CoapStatus {
        action: fields[0].to_string(),
        msg_id: fields[1].parse().map_err(|_| "bad msg id".to_string())?,
        coap_type: fields[2].to_string(),
        code: fields[3].parse().map_err(|_| "bad code".to_string())?,
        uri: fields[4].to_string(),
        peer_ip: fields[5].to_string(),
        peer_port: fields[6].parse().map_err(|_| "bad port".to_string())?,
        error: fields.get(7).map(|s| s.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_item_push() {
        let items = parse("role=4;rloc16=50176;parid=33e6ab21").unwrap();
        assert_eq!(
            items,
            vec![
                StatusItem::Role(NodeRole::Leader),
                StatusItem::Rloc16(50176),
                StatusItem::PartitionId(0x33e6_ab21),
            ]
        );
    }

    #[test]
    fn parses_extaddr_and_topology_keys() {
        let items = parse("extaddr=1a2b3c4d5e6f7081;parent=0000000000000001").unwrap();
        assert_eq!(
            items,
            vec![
                StatusItem::ExtAddr(ExtAddr(0x1a2b_3c4d_5e6f_7081)),
                StatusItem::Parent(ExtAddr(1)),
            ]
        );
    }

    #[test]
    fn parses_ping_pair() {
        let items = parse("ping_request=fdde:ad00:beef:0:0:ff:fe00:c400,64,12000").unwrap();
        assert_eq!(
            items[0],
            StatusItem::PingRequest {
                dst: "fdde:ad00:beef:0:0:ff:fe00:c400".to_string(),
                data_size: 64,
                timestamp_ms: 12000,
            }
        );

        let items = parse("ping_reply=fdde:ad00:beef:0:0:ff:fe00:c400,64,12000,64").unwrap();
        assert_eq!(
            items[0],
            StatusItem::PingReply {
                dst: "fdde:ad00:beef:0:0:ff:fe00:c400".to_string(),
                data_size: 64,
                timestamp_ms: 12000,
                hop_limit: 64,
            }
        );
    }

    #[test]
    fn parses_coap_with_and_without_error() {
        let ok = parse("coap=send,5,con,2,a/rl,fd00::1,61631").unwrap();
        match &ok[0] {
            StatusItem::Coap(c) => {
                assert_eq!(c.action, "send");
                assert_eq!(c.msg_id, 5);
                assert_eq!(c.error, None);
            }
            other => panic!("expected coap, got {other:?}"),
        }

        let failed = parse("coap=send,6,con,2,a/rl,fd00::1,61631,NoRoute").unwrap();
        match &failed[0] {
            StatusItem::Coap(c) => assert_eq!(c.error.as_deref(), Some("NoRoute")),
            other => panic!("expected coap, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_preserved_not_fatal() {
        let items = parse("frobnicate=1;role=2").unwrap();
        assert_eq!(
            items[0],
            StatusItem::Unknown {
                key: "frobnicate".to_string(),
                value: "1".to_string(),
            }
        );
        assert_eq!(items[1], StatusItem::Role(NodeRole::Child));
    }

    #[test]
    fn malformed_known_key_fails() {
        assert!(parse("role=banana").is_err());
        assert!(parse("ping_request=fd00::1,64").is_err());
        assert!(parse("joiner_state=9").is_err());
    }

    #[test]
    fn transmit_hint() {
        assert_eq!(
            parse("transmit=12,c401").unwrap()[0],
            StatusItem::Transmit {
                channel: 12,
                dst_rloc16: Some(0xc401),
            }
        );
        assert_eq!(
            parse("transmit=26").unwrap()[0],
            StatusItem::Transmit {
                channel: 26,
                dst_rloc16: None,
            }
        );
    }
}
