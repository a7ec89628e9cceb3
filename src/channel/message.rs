//! Text-framed control messages between daemon and clients

use crate::{
    error::{HermodError, Result},
    memory::{AccessMode, SegmentMap, SegmentMapping},
    port::ServiceId,
    queue::QueuePolicy,
};

/// Largest frame either side will send or accept
pub const MAX_FRAME_BYTES: usize = 4096;

/// Append one field as `<decimal length>:<bytes>`
fn push_field(frame: &mut String, field: &str) {
    use std::fmt::Write;
    let _ = write!(frame, "{}:{}", field.len(), field);
}

/// Split a frame into its fields.
///
/// Lengths count bytes; a frame that ends mid-field, carries a non-numeric
/// length, or holds non-UTF-8 bytes is malformed.
fn split_fields(frame: &str) -> Result<Vec<String>> {
    let bytes = frame.as_bytes();
    let mut fields = Vec::new();
    let mut at = 0;

    while at < bytes.len() {
        let colon = bytes[at..]
            .iter()
            .position(|b| *b == b':')
            .map(|p| at + p)
            .ok_or_else(|| HermodError::protocol("field length without terminator"))?;

        let len: usize = std::str::from_utf8(&bytes[at..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| HermodError::protocol("invalid field length"))?;

        let start = colon + 1;
        let end = start
            .checked_add(len)
            .filter(|e| *e <= bytes.len())
            .ok_or_else(|| HermodError::protocol("field length exceeds frame"))?;

        let field = std::str::from_utf8(&bytes[start..end])
            .map_err(|_| HermodError::protocol("field is not valid UTF-8"))?;
        fields.push(field.to_string());
        at = end;
    }

    if fields.is_empty() {
        return Err(HermodError::protocol("empty frame"));
    }
    Ok(fields)
}

struct FieldReader {
    fields: std::vec::IntoIter<String>,
}

impl FieldReader {
    fn new(fields: Vec<String>) -> Self {
        Self {
            fields: fields.into_iter(),
        }
    }

    fn next(&mut self) -> Result<String> {
        self.fields
            .next()
            .ok_or_else(|| HermodError::protocol("missing field"))
    }

    fn next_u64(&mut self) -> Result<u64> {
        self.next()?
            .parse()
            .map_err(|_| HermodError::protocol("expected numeric field"))
    }

    fn next_u32(&mut self) -> Result<u32> {
        self.next()?
            .parse()
            .map_err(|_| HermodError::protocol("expected numeric field"))
    }

    fn next_usize(&mut self) -> Result<usize> {
        self.next()?
            .parse()
            .map_err(|_| HermodError::protocol("expected numeric field"))
    }

    fn next_bool(&mut self) -> Result<bool> {
        match self.next()?.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(HermodError::protocol("expected boolean field")),
        }
    }

    fn next_service(&mut self) -> Result<ServiceId> {
        ServiceId::new(self.next()?, self.next()?, self.next()?)
    }

    fn finished(&mut self) -> Result<()> {
        if self.fields.next().is_some() {
            return Err(HermodError::protocol("trailing fields"));
        }
        Ok(())
    }

    fn remaining(self) -> Vec<String> {
        self.fields.collect()
    }
}

fn push_service(frame: &mut String, service: &ServiceId) {
    push_field(frame, service.service());
    push_field(frame, service.instance());
    push_field(frame, service.event());
}

/// Daemon-inbound control operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Register {
        name: String,
        pid: u32,
        uid: u32,
        monitored: bool,
    },
    Deregister {
        name: String,
        session: u64,
    },
    CreatePublisher {
        name: String,
        session: u64,
        service: ServiceId,
        history_capacity: usize,
    },
    DestroyPublisher {
        name: String,
        session: u64,
        port_id: u64,
    },
    CreateSubscriber {
        name: String,
        session: u64,
        service: ServiceId,
        queue_capacity: usize,
        policy: QueuePolicy,
    },
    DestroySubscriber {
        name: String,
        session: u64,
        port_id: u64,
    },
    Offer {
        name: String,
        session: u64,
        port_id: u64,
    },
    StopOffer {
        name: String,
        session: u64,
        port_id: u64,
    },
    Keepalive {
        name: String,
        session: u64,
    },
}

impl ControlRequest {
    /// The operation name carried in the first field
    pub fn op(&self) -> &'static str {
        match self {
            ControlRequest::Register { .. } => "REG",
            ControlRequest::Deregister { .. } => "DEREG",
            ControlRequest::CreatePublisher { .. } => "CREATE_PUBLISHER",
            ControlRequest::DestroyPublisher { .. } => "DESTROY_PUBLISHER",
            ControlRequest::CreateSubscriber { .. } => "CREATE_SUBSCRIBER",
            ControlRequest::DestroySubscriber { .. } => "DESTROY_SUBSCRIBER",
            ControlRequest::Offer { .. } => "OFFER",
            ControlRequest::StopOffer { .. } => "STOP_OFFER",
            ControlRequest::Keepalive { .. } => "KEEPALIVE",
        }
    }

    /// The sending process's name
    pub fn sender(&self) -> &str {
        match self {
            ControlRequest::Register { name, .. }
            | ControlRequest::Deregister { name, .. }
            | ControlRequest::CreatePublisher { name, .. }
            | ControlRequest::DestroyPublisher { name, .. }
            | ControlRequest::CreateSubscriber { name, .. }
            | ControlRequest::DestroySubscriber { name, .. }
            | ControlRequest::Offer { name, .. }
            | ControlRequest::StopOffer { name, .. }
            | ControlRequest::Keepalive { name, .. } => name,
        }
    }

    /// The session the message claims, if the operation carries one
    pub fn session(&self) -> Option<u64> {
        match self {
            ControlRequest::Register { .. } => None,
            ControlRequest::Deregister { session, .. }
            | ControlRequest::CreatePublisher { session, .. }
            | ControlRequest::DestroyPublisher { session, .. }
            | ControlRequest::CreateSubscriber { session, .. }
            | ControlRequest::DestroySubscriber { session, .. }
            | ControlRequest::Offer { session, .. }
            | ControlRequest::StopOffer { session, .. }
            | ControlRequest::Keepalive { session, .. } => Some(*session),
        }
    }

    /// Encode into a wire frame
    pub fn encode(&self) -> String {
        let mut frame = String::new();
        push_field(&mut frame, self.op());

        match self {
            ControlRequest::Register {
                name,
                pid,
                uid,
                monitored,
            } => {
                push_field(&mut frame, name);
                push_field(&mut frame, &pid.to_string());
                push_field(&mut frame, &uid.to_string());
                push_field(&mut frame, if *monitored { "1" } else { "0" });
            }
            ControlRequest::Deregister { name, session }
            | ControlRequest::Keepalive { name, session } => {
                push_field(&mut frame, name);
                push_field(&mut frame, &session.to_string());
            }
            ControlRequest::CreatePublisher {
                name,
                session,
                service,
                history_capacity,
            } => {
                push_field(&mut frame, name);
                push_field(&mut frame, &session.to_string());
                push_service(&mut frame, service);
                push_field(&mut frame, &history_capacity.to_string());
            }
            ControlRequest::CreateSubscriber {
                name,
                session,
                service,
                queue_capacity,
                policy,
            } => {
                push_field(&mut frame, name);
                push_field(&mut frame, &session.to_string());
                push_service(&mut frame, service);
                push_field(&mut frame, &queue_capacity.to_string());
                push_field(&mut frame, policy.as_str());
            }
            ControlRequest::DestroyPublisher {
                name,
                session,
                port_id,
            }
            | ControlRequest::DestroySubscriber {
                name,
                session,
                port_id,
            }
            | ControlRequest::Offer {
                name,
                session,
                port_id,
            }
            | ControlRequest::StopOffer {
                name,
                session,
                port_id,
            } => {
                push_field(&mut frame, name);
                push_field(&mut frame, &session.to_string());
                push_field(&mut frame, &port_id.to_string());
            }
        }
        frame
    }

    /// Decode a wire frame
    pub fn decode(frame: &str) -> Result<Self> {
        let mut reader = FieldReader::new(split_fields(frame)?);
        let op = reader.next()?;

        let request = match op.as_str() {
            "REG" => ControlRequest::Register {
                name: reader.next()?,
                pid: reader.next_u32()?,
                uid: reader.next_u32()?,
                monitored: reader.next_bool()?,
            },
            "DEREG" => ControlRequest::Deregister {
                name: reader.next()?,
                session: reader.next_u64()?,
            },
            "CREATE_PUBLISHER" => ControlRequest::CreatePublisher {
                name: reader.next()?,
                session: reader.next_u64()?,
                service: reader.next_service()?,
                history_capacity: reader.next_usize()?,
            },
            "DESTROY_PUBLISHER" => ControlRequest::DestroyPublisher {
                name: reader.next()?,
                session: reader.next_u64()?,
                port_id: reader.next_u64()?,
            },
            "CREATE_SUBSCRIBER" => {
                let name = reader.next()?;
                let session = reader.next_u64()?;
                let service = reader.next_service()?;
                let queue_capacity = reader.next_usize()?;
                let policy = reader.next().and_then(|p| {
                    QueuePolicy::parse(&p)
                        .ok_or_else(|| HermodError::protocol("unknown queue policy"))
                })?;
                ControlRequest::CreateSubscriber {
                    name,
                    session,
                    service,
                    queue_capacity,
                    policy,
                }
            }
            "DESTROY_SUBSCRIBER" => ControlRequest::DestroySubscriber {
                name: reader.next()?,
                session: reader.next_u64()?,
                port_id: reader.next_u64()?,
            },
            "OFFER" => ControlRequest::Offer {
                name: reader.next()?,
                session: reader.next_u64()?,
                port_id: reader.next_u64()?,
            },
            "STOP_OFFER" => ControlRequest::StopOffer {
                name: reader.next()?,
                session: reader.next_u64()?,
                port_id: reader.next_u64()?,
            },
            "KEEPALIVE" => ControlRequest::Keepalive {
                name: reader.next()?,
                session: reader.next_u64()?,
            },
            _ => return Err(HermodError::UnknownOperation { op }),
        };

        reader.finished()?;
        Ok(request)
    }
}

/// Daemon-outbound control messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    RegAck {
        session: u64,
        segments: SegmentMap,
    },
    PortAck {
        port_id: u64,
    },
    Matched {
        service: ServiceId,
        peer: String,
    },
    Unmatched {
        service: ServiceId,
        peer: String,
    },
    Terminate,
    Error {
        message: String,
    },
}

impl ControlResponse {
    /// The operation name carried in the first field
    pub fn op(&self) -> &'static str {
        match self {
            ControlResponse::RegAck { .. } => "REG_ACK",
            ControlResponse::PortAck { .. } => "PORT_ACK",
            ControlResponse::Matched { .. } => "MATCHED",
            ControlResponse::Unmatched { .. } => "UNMATCHED",
            ControlResponse::Terminate => "TERMINATE",
            ControlResponse::Error { .. } => "ERROR",
        }
    }

    /// Encode into a wire frame
    pub fn encode(&self) -> String {
        let mut frame = String::new();
        push_field(&mut frame, self.op());

        match self {
            ControlResponse::RegAck { session, segments } => {
                push_field(&mut frame, &session.to_string());
                for mapping in segments.iter() {
                    push_field(&mut frame, &mapping.segment_id.to_string());
                    push_field(&mut frame, &mapping.name);
                    push_field(&mut frame, &mapping.size.to_string());
                    push_field(&mut frame, mapping.mode.as_str());
                }
            }
            ControlResponse::PortAck { port_id } => {
                push_field(&mut frame, &port_id.to_string());
            }
            ControlResponse::Matched { service, peer }
            | ControlResponse::Unmatched { service, peer } => {
                push_service(&mut frame, service);
                push_field(&mut frame, peer);
            }
            ControlResponse::Terminate => {}
            ControlResponse::Error { message } => {
                push_field(&mut frame, message);
            }
        }
        frame
    }

    /// Decode a wire frame
    pub fn decode(frame: &str) -> Result<Self> {
        let mut reader = FieldReader::new(split_fields(frame)?);
        let op = reader.next()?;

        let response = match op.as_str() {
            "REG_ACK" => {
                let session = reader.next_u64()?;
                let mut segments = SegmentMap::new();
                let rest = reader.remaining();
                if rest.len() % 4 != 0 {
                    return Err(HermodError::protocol("truncated segment map"));
                }
                for quad in rest.chunks(4) {
                    segments.push(SegmentMapping {
                        segment_id: quad[0]
                            .parse()
                            .map_err(|_| HermodError::protocol("invalid segment id"))?,
                        name: quad[1].clone(),
                        size: quad[2]
                            .parse()
                            .map_err(|_| HermodError::protocol("invalid segment size"))?,
                        mode: AccessMode::parse(&quad[3])
                            .ok_or_else(|| HermodError::protocol("invalid access mode"))?,
                    });
                }
                return Ok(ControlResponse::RegAck { session, segments });
            }
            "PORT_ACK" => ControlResponse::PortAck {
                port_id: reader.next_u64()?,
            },
            "MATCHED" => ControlResponse::Matched {
                service: reader.next_service()?,
                peer: reader.next()?,
            },
            "UNMATCHED" => ControlResponse::Unmatched {
                service: reader.next_service()?,
                peer: reader.next()?,
            },
            "TERMINATE" => ControlResponse::Terminate,
            "ERROR" => ControlResponse::Error {
                message: reader.next()?,
            },
            _ => return Err(HermodError::UnknownOperation { op }),
        };

        reader.finished()?;
        Ok(response)
    }
}
