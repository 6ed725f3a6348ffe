mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::{check_admissible, is_admissible};
pub use error::{EngineError, Inadmissible};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotifyHub;

pub(crate) use conflict::now_ms;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedBooking = Arc<RwLock<Booking>>;

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Write and fsync the whole batch at once; a failure leaves none of it.
/// 4. Respond to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut journal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before compacting or reporting counters.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut journal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let (events, senders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    let result = journal.append_batch(&events);
    if let Err(e) = &result {
        error!(records = events.len(), "journal batch failed: {e}");
    }

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for tx in senders {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            commit_batch(journal, vec![(event, response)]);
        }
    }
}

/// The availability & approval engine: resource and booking stores plus the
/// journal that makes them durable.
pub struct Engine {
    resources: DashMap<Ulid, SharedResourceState>,
    bookings: DashMap<Ulid, SharedBooking>,
    journal_tx: mpsc::Sender<JournalCommand>,
    /// Shared by every mutation; held exclusively while compacting.
    compaction_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

/// Apply an event to a resource record (no locking — caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, now: Ms) {
    match event {
        Event::RateSet {
            option,
            price_per_night,
            ..
        } => {
            rs.rates.insert(option.clone(), *price_per_night);
        }
        Event::AvailabilityToggled {
            is_available, note, ..
        } => {
            rs.is_available = *is_available;
            rs.availability_note = note.clone();
        }
        Event::BlackoutAdded { span, reason, .. } => {
            rs.insert_blackout(Blackout {
                span: *span,
                reason: reason.clone(),
            });
        }
        Event::BlackoutRemoved { span, .. } => {
            rs.remove_blackouts_matching(span);
        }
        Event::BookingApproved { span, .. } => rs.insert_booked(*span),
        // Handled at the map level or booking-only.
        Event::ResourceCreated { .. } | Event::BookingCreated { .. } | Event::BookingRejected { .. } => {
            return;
        }
    }
    rs.version += 1;
    rs.refresh_status(now);
}

/// Apply a decision event to a booking record (caller holds the lock).
fn apply_to_booking(booking: &mut Booking, event: &Event) {
    match event {
        Event::BookingApproved { at, admin_notes, .. } => {
            booking.status = BookingStatus::Approved;
            booking.approved_at = Some(*at);
            if admin_notes.is_some() {
                booking.admin_notes = admin_notes.clone();
            }
        }
        Event::BookingRejected { at, reason, .. } => {
            booking.status = BookingStatus::Rejected;
            booking.rejected_at = Some(*at);
            booking.admin_notes = Some(reason.clone());
        }
        _ => {}
    }
}

impl Engine {
    /// Open the journal at `journal_path`, replay it, and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(journal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        // Rebuild plain state first; nothing else can see it yet.
        let mut resources: HashMap<Ulid, ResourceState> = HashMap::new();
        let mut bookings: HashMap<Ulid, Booking> = HashMap::new();
        let now = now_ms();
        for event in &events {
            match event {
                Event::ResourceCreated {
                    id,
                    name,
                    contact_email,
                } => {
                    resources.insert(*id, ResourceState::new(*id, name.clone(), contact_email.clone()));
                }
                Event::BookingCreated { booking } => {
                    bookings.insert(booking.id, (**booking).clone());
                }
                other => {
                    if let Some(rid) = other.mutated_resource() {
                        match resources.get_mut(&rid) {
                            Some(rs) => apply_to_resource(rs, other, now),
                            None => warn!("replay: record for unknown resource {rid}"),
                        }
                    }
                    if let Some(bid) = other.decided_booking() {
                        match bookings.get_mut(&bid) {
                            Some(b) => apply_to_booking(b, other),
                            None => warn!("replay: decision for unknown booking {bid}"),
                        }
                    }
                }
            }
        }

        let engine = Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
            journal_tx,
            compaction_gate: RwLock::new(()),
            notify,
        };
        for (id, mut rs) in resources {
            rs.refresh_status(now);
            engine.resources.insert(id, Arc::new(RwLock::new(rs)));
        }
        for (id, booking) in bookings {
            engine.bookings.insert(id, Arc::new(RwLock::new(booking)));
        }
        Ok(engine)
    }

    /// Write a record via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn get_booking_handle(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    fn resource_or_not_found(&self, id: Ulid) -> Result<SharedResourceState, EngineError> {
        self.get_resource(&id).ok_or(EngineError::ResourceNotFound(id))
    }

    /// Journal-append + apply in one call. Caller holds the resource write lock.
    async fn persist_and_apply(&self, rs: &mut ResourceState, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_resource(rs, event, now_ms());
        Ok(())
    }

    /// Read-modify-write on one resource under its write lock.
    ///
    /// `decide` sees the current record and returns the event to commit; its
    /// verdict is final. `seen_version` is the version of the caller's earlier
    /// snapshot and only tells whether that snapshot went stale.
    async fn run_transaction<F>(
        &self,
        rs: &SharedResourceState,
        seen_version: u64,
        decide: F,
    ) -> Result<Event, EngineError>
    where
        F: FnOnce(&ResourceState) -> Result<Event, EngineError>,
    {
        let mut guard = rs.write().await;
        if guard.version != seen_version {
            metrics::counter!(crate::observability::TXN_STALE_SNAPSHOTS_TOTAL).increment(1);
            debug!(resource = %guard.id, seen_version, current = guard.version, "snapshot stale, re-deciding under lock");
        }
        let event = decide(&guard)?;
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(event)
    }
}
