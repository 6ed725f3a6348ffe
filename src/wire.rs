//! Newline-delimited JSON request layer.
//!
//! Each line is one request object tagged by `op`; each reply is one line:
//! `{"ok":true,"data":...}` or `{"ok":false,"error":{"kind":...,"message":...}}`.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateResource {
        id: Option<Ulid>,
        name: Option<String>,
        contact_email: Option<String>,
    },
    SetRate {
        resource_id: Ulid,
        option: String,
        price_per_night: Price,
    },
    GetResource {
        resource_id: Ulid,
    },
    ListResources,
    Availability {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    CreateBooking {
        resource_id: Ulid,
        guest: GuestInfo,
        option: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        /// Resolved from the rate sheet when omitted.
        price_per_night: Option<Price>,
    },
    GetBooking {
        booking_id: Ulid,
    },
    ListBookings {
        #[serde(default)]
        resource_id: Option<Ulid>,
        #[serde(default)]
        status: Option<BookingStatus>,
    },
    Stats {
        #[serde(default)]
        resource_id: Option<Ulid>,
    },
    Approve {
        booking_id: Ulid,
        admin_notes: Option<String>,
    },
    Reject {
        booking_id: Ulid,
        reason: String,
    },
    Block {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        reason: Option<String>,
    },
    Unblock {
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    ToggleAvailability {
        resource_id: Ulid,
        is_available: bool,
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    token: Option<String>,
    #[serde(flatten)]
    request: Request,
}

impl Request {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Request::CreateResource { .. } => "create_resource",
            Request::SetRate { .. } => "set_rate",
            Request::GetResource { .. } => "get_resource",
            Request::ListResources => "list_resources",
            Request::Availability { .. } => "availability",
            Request::CreateBooking { .. } => "create_booking",
            Request::GetBooking { .. } => "get_booking",
            Request::ListBookings { .. } => "list_bookings",
            Request::Stats { .. } => "stats",
            Request::Approve { .. } => "approve",
            Request::Reject { .. } => "reject",
            Request::Block { .. } => "block",
            Request::Unblock { .. } => "unblock",
            Request::ToggleAvailability { .. } => "toggle_availability",
        }
    }

    /// Guest-facing operations need no admin token.
    pub fn is_admin(&self) -> bool {
        !matches!(
            self,
            Request::GetResource { .. }
                | Request::ListResources
                | Request::Availability { .. }
                | Request::CreateBooking { .. }
        )
    }
}

/// Failure modes of a single request, as reported on the wire.
enum Failure {
    BadRequest(String),
    Unauthorized,
    Engine(EngineError),
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Failure::Engine(e)
    }
}

impl Failure {
    fn kind(&self) -> &'static str {
        match self {
            Failure::BadRequest(_) => "bad_request",
            Failure::Unauthorized => "unauthorized",
            Failure::Engine(e) => e.kind(),
        }
    }

    fn into_reply(self) -> Value {
        let kind = self.kind();
        let (message, detail) = match self {
            Failure::BadRequest(msg) => (msg, Value::Null),
            Failure::Unauthorized => ("admin token required".to_string(), Value::Null),
            Failure::Engine(e) => {
                let detail = match &e {
                    EngineError::ResourceUnavailable { reason, .. }
                    | EngineError::ResourceNoLongerAvailable { reason, .. } => json!(reason),
                    _ => Value::Null,
                };
                (e.to_string(), detail)
            }
        };
        json!({ "ok": false, "error": { "kind": kind, "message": message, "reason": detail } })
    }
}

fn date_span(from: NaiveDate, to: NaiveDate) -> Result<Span, Failure> {
    Span::from_dates(from, to).ok_or(Failure::Engine(EngineError::Validation(
        "range end must be after its start",
    )))
}

async fn execute(engine: &Engine, request: Request) -> Result<Value, Failure> {
    let data = match request {
        Request::CreateResource {
            id,
            name,
            contact_email,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_resource(id, name, contact_email).await?;
            json!({ "id": id })
        }
        Request::SetRate {
            resource_id,
            option,
            price_per_night,
        } => {
            engine.set_rate(resource_id, &option, price_per_night).await?;
            Value::Null
        }
        Request::GetResource { resource_id } => json!(engine.resource_info(resource_id).await?),
        Request::ListResources => json!(engine.list_resources().await),
        Request::Availability {
            resource_id,
            from,
            to,
        } => json!(engine.compute_availability(resource_id, date_span(from, to)?).await?),
        Request::CreateBooking {
            resource_id,
            guest,
            option,
            check_in,
            check_out,
            guests,
            price_per_night,
        } => {
            let price_per_night = match price_per_night {
                Some(p) => p,
                None => engine
                    .price_for(resource_id, &option)
                    .await?
                    .ok_or(EngineError::Validation("no rate listed for booking option"))?,
            };
            let booking = engine
                .create_booking(BookingRequest {
                    resource_id,
                    guest,
                    option,
                    check_in,
                    check_out,
                    guests,
                    price_per_night,
                })
                .await?;
            json!(booking)
        }
        Request::GetBooking { booking_id } => json!(engine.get_booking(booking_id).await?),
        Request::ListBookings {
            resource_id,
            status,
        } => json!(engine.list_bookings(&BookingFilter { resource_id, status }).await),
        Request::Stats { resource_id } => json!(engine.booking_stats(resource_id).await),
        Request::Approve {
            booking_id,
            admin_notes,
        } => json!(engine.approve_booking(booking_id, admin_notes).await?),
        Request::Reject { booking_id, reason } => json!(engine.reject_booking(booking_id, &reason).await?),
        Request::Block {
            resource_id,
            from,
            to,
            reason,
        } => json!(engine.manually_block(resource_id, date_span(from, to)?, reason).await?),
        Request::Unblock {
            resource_id,
            from,
            to,
        } => {
            let removed = engine.unblock(resource_id, date_span(from, to)?).await?;
            json!({ "removed": removed })
        }
        Request::ToggleAvailability {
            resource_id,
            is_available,
            message,
        } => {
            engine
                .toggle_availability(resource_id, is_available, message)
                .await?;
            Value::Null
        }
    };
    Ok(data)
}

/// Decode, authorize, and run one request line; always yields a reply.
pub async fn handle_line(engine: &Engine, admin_token: Option<&str>, line: &str) -> Value {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request").increment(1);
            return Failure::BadRequest(e.to_string()).into_reply();
        }
    };
    let op = envelope.request.label();
    let start = Instant::now();

    let result = if envelope.request.is_admin()
        && admin_token.is_some_and(|expected| envelope.token.as_deref() != Some(expected))
    {
        Err(Failure::Unauthorized)
    } else {
        execute(engine, envelope.request).await
    };

    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
    match result {
        Ok(data) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(failure) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => failure.kind()).increment(1);
            tracing::debug!(op, kind = failure.kind(), "request failed");
            failure.into_reply()
        }
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    admin_token: Option<Arc<str>>,
) -> Result<(), WireError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&engine, admin_token.as_deref(), &line).await;
        framed.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}
