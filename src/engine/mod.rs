mod conflict;
mod error;
mod mutations;
mod occupancy;
mod queries;
mod resolver;
mod slots;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use slots::{free_slots, generate_slots, weekday_to_date};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedDiary = Arc<RwLock<StaffDiary>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have, then handle the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't leak into the next batch (these callers were told they failed).
    let flush_err = wal.flush_sync().err();
    let result = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The whole document store: salons, clients, staff, services, working-hour
/// windows, and per-staff appointment diaries, durably backed by the WAL.
pub struct Engine {
    pub(crate) salons: DashMap<Ulid, Salon>,
    pub(crate) clients: DashMap<Ulid, Client>,
    pub(crate) staff: DashMap<Ulid, Staff>,
    pub(crate) services: DashMap<Ulid, Service>,
    pub(crate) windows: DashMap<Ulid, WorkingWindow>,
    /// Salon → window ids, for O(1) window listing.
    pub(crate) salon_windows: DashMap<Ulid, Vec<Ulid>>,
    /// Staff → diary. A booking commit write-locks exactly one diary.
    pub(crate) diaries: DashMap<Ulid, SharedDiary>,
    /// Appointment id → staff id, for cancellation lookups.
    pub(crate) appointment_staff: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an appointment event to a diary (no locking — caller holds the lock).
fn apply_to_diary(diary: &mut StaffDiary, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AppointmentBooked {
            id,
            salon_id,
            client_id,
            staff_id,
            service_id,
            extra_service_ids,
            start,
            price_cents,
        } => {
            diary.insert(Appointment {
                id: *id,
                salon_id: *salon_id,
                client_id: *client_id,
                staff_id: *staff_id,
                service_id: *service_id,
                extra_service_ids: extra_service_ids.clone(),
                start: *start,
                price_cents: *price_cents,
                status: AppointmentStatus::Active,
            });
            index.insert(*id, *staff_id);
        }
        Event::AppointmentCancelled { id } => {
            // Soft cancel: the record stays, the index stays.
            diary.cancel(*id);
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            salons: DashMap::new(),
            clients: DashMap::new(),
            staff: DashMap::new(),
            services: DashMap::new(),
            windows: DashMap::new(),
            salon_windows: DashMap::new(),
            diaries: DashMap::new(),
            appointment_staff: DashMap::new(),
            wal_tx,
        };

        // Replay. We're the sole owner of the diary Arcs here, so try_write
        // always succeeds instantly; never block inside an async context.
        for event in &events {
            match event {
                Event::AppointmentBooked { staff_id, .. } => {
                    if let Some(entry) = engine.diaries.get(staff_id) {
                        let diary = entry.value().clone();
                        let mut guard = diary.try_write().expect("replay: uncontended write");
                        apply_to_diary(&mut guard, event, &engine.appointment_staff);
                    }
                }
                Event::AppointmentCancelled { id } => {
                    if let Some(staff_id) = engine.appointment_staff.get(id).map(|e| *e.value())
                        && let Some(entry) = engine.diaries.get(&staff_id)
                    {
                        let diary = entry.value().clone();
                        let mut guard = diary.try_write().expect("replay: uncontended write");
                        apply_to_diary(&mut guard, event, &engine.appointment_staff);
                    }
                }
                other => engine.apply_table(other),
            }
        }

        Ok(engine)
    }

    /// Apply a document (non-appointment) event to the tables.
    fn apply_table(&self, event: &Event) {
        match event {
            Event::SalonCreated { id, name } => {
                self.salons.insert(
                    *id,
                    Salon {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::ClientRegistered { id, name, phone } => {
                self.clients.insert(
                    *id,
                    Client {
                        id: *id,
                        name: name.clone(),
                        phone: phone.clone(),
                    },
                );
            }
            Event::StaffHired {
                id,
                salon_id,
                name,
                photo,
            } => {
                self.staff.insert(
                    *id,
                    Staff {
                        id: *id,
                        salon_id: *salon_id,
                        name: name.clone(),
                        photo: photo.clone(),
                    },
                );
                self.diaries
                    .insert(*id, Arc::new(RwLock::new(StaffDiary::new(*id))));
            }
            Event::ServiceAdded {
                id,
                salon_id,
                name,
                price_cents,
                duration_min,
            } => {
                self.services.insert(
                    *id,
                    Service {
                        id: *id,
                        salon_id: *salon_id,
                        name: name.clone(),
                        price_cents: *price_cents,
                        duration_min: *duration_min,
                        status: ServiceStatus::Available,
                    },
                );
            }
            Event::ServiceStatusChanged { id, status } => {
                if let Some(mut service) = self.services.get_mut(id) {
                    service.status = *status;
                }
            }
            Event::WindowAdded {
                id,
                salon_id,
                weekdays,
                services,
                staff,
                opens,
                closes,
            } => {
                self.windows.insert(
                    *id,
                    WorkingWindow {
                        id: *id,
                        salon_id: *salon_id,
                        weekdays: weekdays.clone(),
                        services: services.clone(),
                        staff: staff.clone(),
                        opens: *opens,
                        closes: *closes,
                    },
                );
                self.salon_windows.entry(*salon_id).or_default().push(*id);
            }
            Event::WindowUpdated {
                id,
                weekdays,
                services,
                staff,
                opens,
                closes,
            } => {
                if let Some(mut window) = self.windows.get_mut(id) {
                    window.weekdays = weekdays.clone();
                    window.services = services.clone();
                    window.staff = staff.clone();
                    window.opens = *opens;
                    window.closes = *closes;
                }
            }
            Event::WindowRemoved { id } => {
                if let Some((_, window)) = self.windows.remove(id)
                    && let Some(mut ids) = self.salon_windows.get_mut(&window.salon_id)
                {
                    ids.retain(|w| w != id);
                }
            }
            Event::AppointmentBooked { .. } | Event::AppointmentCancelled { .. } => {}
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply for document events.
    pub(super) async fn persist_table(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_table(event);
        Ok(())
    }

    /// WAL-append + apply for appointment events. Caller holds the diary lock,
    /// so nothing else can slip between the conflict check and this commit.
    pub(super) async fn persist_to_diary(
        &self,
        diary: &mut StaffDiary,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_diary(diary, event, &self.appointment_staff);
        Ok(())
    }

    pub fn diary(&self, staff_id: &Ulid) -> Option<SharedDiary> {
        self.diaries.get(staff_id).map(|e| e.value().clone())
    }

    pub fn staff_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_staff
            .get(appointment_id)
            .map(|e| *e.value())
    }
}
