use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::auth::PasswordGate;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_BYTES;
use crate::model::{Appointment, AvailabilityPage, WorkingWindow};
use crate::observability;
use crate::protocol::{Request, fmt_date, fmt_datetime, fmt_hhmm};

/// Serve one connection: a password handshake line, then one JSON request per
/// line, one JSON response per line. Every failure is recovered into an
/// `{"error":true,...}` body — nothing escapes as a fault.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    gate: Arc<PasswordGate>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    let Some(first) = framed.next().await else {
        return Ok(());
    };
    let authed = serde_json::from_str::<Value>(&first?)
        .ok()
        .and_then(|v| v.get("auth").and_then(Value::as_str).map(|s| gate.verify(s)))
        .unwrap_or(false);
    if !authed {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        framed
            .send(json!({"error": true, "kind": "auth", "message": "authentication required"}).to_string())
            .await?;
        return Ok(());
    }
    framed.send(json!({"ok": true}).to_string()).await?;

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let op = observability::op_label(&req);
                let started = std::time::Instant::now();
                let result = handle_request(&engine, req).await;
                metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
                    .record(started.elapsed().as_secs_f64());

                match result {
                    Ok(body) => {
                        metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok")
                            .increment(1);
                        body
                    }
                    Err(e) => {
                        metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "error")
                            .increment(1);
                        match &e {
                            EngineError::Conflict(_) => {
                                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL)
                                    .increment(1);
                            }
                            EngineError::WalError(_) => tracing::error!("{op} failed: {e}"),
                            _ => {}
                        }
                        error_body(&e)
                    }
                }
            }
            Err(e) => json!({
                "error": true,
                "kind": "validation",
                "message": format!("bad request: {e}"),
            }),
        };

        framed.send(response.to_string()).await?;
    }

    Ok(())
}

fn error_body(e: &EngineError) -> Value {
    json!({"error": true, "kind": e.kind(), "message": e.to_string()})
}

async fn handle_request(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::CreateSalon { id, name } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_salon(id, name).await?;
            Ok(json!({"ok": true, "id": id}))
        }
        Request::RegisterClient { id, name, phone } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.register_client(id, name, phone).await?;
            Ok(json!({"ok": true, "id": id}))
        }
        Request::HireStaff {
            id,
            salon_id,
            name,
            photo,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.hire_staff(id, salon_id, name, photo).await?;
            Ok(json!({"ok": true, "id": id}))
        }
        Request::AddService {
            id,
            salon_id,
            name,
            price_cents,
            duration,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .add_service(id, salon_id, name, price_cents, duration.0)
                .await?;
            Ok(json!({"ok": true, "id": id}))
        }
        Request::SetServiceStatus { id, status } => {
            engine.set_service_status(id, status).await?;
            Ok(json!({"ok": true}))
        }
        Request::AddWindow {
            id,
            salon_id,
            weekdays,
            services,
            staff,
            opens,
            closes,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .add_window(id, salon_id, weekdays, services, staff, opens, closes)
                .await?;
            Ok(json!({"ok": true, "id": id}))
        }
        Request::UpdateWindow {
            id,
            weekdays,
            services,
            staff,
            opens,
            closes,
        } => {
            engine
                .update_window(id, weekdays, services, staff, opens, closes)
                .await?;
            Ok(json!({"ok": true}))
        }
        Request::RemoveWindow { id } => {
            engine.remove_window(id).await?;
            Ok(json!({"ok": true}))
        }
        Request::Availability {
            salon_id,
            service_id,
            date,
            staff_id,
        } => {
            let page = engine
                .find_availability(salon_id, service_id, date, staff_id)
                .await?;
            Ok(availability_body(&page))
        }
        Request::Book {
            client_id,
            salon_id,
            service_id,
            extra_service_ids,
            staff_id,
            start,
        } => {
            let appt = engine
                .book_appointment(
                    Ulid::new(),
                    salon_id,
                    client_id,
                    staff_id,
                    service_id,
                    extra_service_ids,
                    start,
                )
                .await?;
            Ok(json!({"appointment": appointment_body(&appt)}))
        }
        Request::Cancel { id } => {
            let appt = engine.cancel_appointment(id).await?;
            Ok(json!({"appointment": appointment_body(&appt)}))
        }
        Request::ListWindows { salon_id } => {
            let windows = engine.list_windows(salon_id)?;
            let bodies: Vec<Value> = windows.iter().map(window_body).collect();
            Ok(json!({"windows": bodies}))
        }
        Request::ListAppointments { staff_id, from, to } => {
            let appointments = engine.list_appointments(staff_id, from, to).await?;
            let bodies: Vec<Value> = appointments.iter().map(appointment_body).collect();
            Ok(json!({"appointments": bodies}))
        }
    }
}

fn availability_body(page: &AvailabilityPage) -> Value {
    let staff: Vec<Value> = page
        .staff
        .iter()
        .map(|s| json!({"id": s.id, "name": s.name, "photo": s.photo}))
        .collect();

    let days: Vec<Value> = page
        .days
        .iter()
        .map(|day| {
            let mut schedule = serde_json::Map::new();
            for (staff_id, slots) in &day.by_staff {
                let slots: Vec<String> = slots.iter().copied().map(fmt_hhmm).collect();
                schedule.insert(staff_id.to_string(), json!(slots));
            }
            json!({"date": fmt_date(day.date), "schedule": schedule})
        })
        .collect();

    json!({"staff": staff, "days": days})
}

fn appointment_body(appt: &Appointment) -> Value {
    json!({
        "id": appt.id,
        "salon_id": appt.salon_id,
        "client_id": appt.client_id,
        "staff_id": appt.staff_id,
        "service_id": appt.service_id,
        "extra_service_ids": appt.extra_service_ids,
        "start": fmt_datetime(appt.start),
        "price_cents": appt.price_cents,
        "status": appt.status,
    })
}

fn window_body(window: &WorkingWindow) -> Value {
    json!({
        "id": window.id,
        "salon_id": window.salon_id,
        "weekdays": window.weekdays,
        "services": window.services,
        "staff": window.staff,
        "opens": fmt_hhmm(window.opens),
        "closes": fmt_hhmm(window.closes),
    })
}
