use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, Days, Duration, NaiveDate, NaiveTime};
use ulid::Ulid;

use super::conflict::now_naive;
use super::*;
use crate::limits::SCHEDULE_DAYS;
use crate::model::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("coiffe_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// First date with the given Sunday-indexed weekday at least `min_ahead` days
/// out. Keeps availability tests clear of today's past-suppression and keeps
/// booking starts in the future.
fn upcoming(weekday: u8, min_ahead: u64) -> NaiveDate {
    let mut d = now_naive().date() + Days::new(min_ahead);
    while d.weekday().num_days_from_sunday() as u8 != weekday {
        d = d.succ_opt().unwrap();
    }
    d
}

struct Fixture {
    engine: Arc<Engine>,
    salon: Ulid,
    marta: Ulid,
    rui: Ulid,
    cut: Ulid,
    tint: Ulid,
    window: Ulid,
}

/// Salon with two staff members, a 30-min cut and a 60-min tint, and one
/// Monday 09:00–12:00 window covering both services and both staff.
async fn salon_fixture(name: &str) -> Fixture {
    let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());

    let salon = Ulid::new();
    engine
        .create_salon(salon, "Maison Duval".into())
        .await
        .unwrap();

    let marta = Ulid::new();
    let rui = Ulid::new();
    engine
        .hire_staff(marta, salon, "Marta Silva".into(), Some("marta.jpg".into()))
        .await
        .unwrap();
    engine
        .hire_staff(rui, salon, "Rui Costa".into(), None)
        .await
        .unwrap();

    let cut = Ulid::new();
    let tint = Ulid::new();
    engine
        .add_service(cut, salon, "Cut".into(), 2500, 30)
        .await
        .unwrap();
    engine
        .add_service(tint, salon, "Tint".into(), 4000, 60)
        .await
        .unwrap();

    let window = Ulid::new();
    engine
        .add_window(
            window,
            salon,
            vec![1], // Monday
            vec![cut, tint],
            vec![marta, rui],
            t(9, 0),
            t(12, 0),
        )
        .await
        .unwrap();

    Fixture {
        engine,
        salon,
        marta,
        rui,
        cut,
        tint,
        window,
    }
}

async fn register_client(engine: &Engine, name: &str) -> Ulid {
    let id = Ulid::new();
    engine.register_client(id, name.into(), None).await.unwrap();
    id
}

// ── Availability resolution ──────────────────────────────────────

#[tokio::test]
async fn availability_happy_path() {
    let f = salon_fixture("availability_happy.wal").await;
    let monday = upcoming(1, 2);

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await
        .unwrap();

    assert_eq!(page.days.len(), SCHEDULE_DAYS);
    assert_eq!(page.days[0].date, monday);

    let expected = vec![t(9, 0), t(9, 30), t(10, 0), t(10, 30), t(11, 0), t(11, 30)];
    assert_eq!(page.days[0].by_staff[&f.marta], expected);
    assert_eq!(page.days[0].by_staff[&f.rui], expected);

    let names: Vec<&str> = page.staff.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"Marta"));
    assert!(names.contains(&"Rui"));
    let marta = page.staff.iter().find(|s| s.id == f.marta).unwrap();
    assert_eq!(marta.photo.as_deref(), Some("marta.jpg"));
}

#[tokio::test]
async fn qualifying_days_are_consecutive_mondays() {
    let f = salon_fixture("availability_mondays.wal").await;
    let monday = upcoming(1, 2);

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await
        .unwrap();

    for (i, day) in page.days.iter().enumerate() {
        assert_eq!(day.date.weekday().num_days_from_sunday(), 1);
        assert_eq!(day.date, monday + Days::new(7 * i as u64));
    }
}

#[tokio::test]
async fn booking_removes_its_slot() {
    let f = salon_fixture("booking_removes_slot.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await
        .unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await
        .unwrap();

    let marta_slots = &page.days[0].by_staff[&f.marta];
    assert!(!marta_slots.contains(&t(10, 0)));
    assert_eq!(marta_slots.len(), 5);
    // The other staff member is untouched.
    assert_eq!(page.days[0].by_staff[&f.rui].len(), 6);
}

#[tokio::test]
async fn wide_probe_blocks_reaching_candidates() {
    // A 30-min booking at 10:00, resolved for the 60-min tint: 9:30 would run
    // into the booking, so it goes too.
    let f = salon_fixture("wide_probe.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await
        .unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.tint, monday, Some(f.marta))
        .await
        .unwrap();

    assert_eq!(
        page.days[0].by_staff[&f.marta],
        vec![t(9, 0), t(10, 30), t(11, 0), t(11, 30)]
    );
}

#[tokio::test]
async fn overlapping_windows_deduplicate_slots() {
    let f = salon_fixture("dedupe_windows.wal").await;
    // Second window overlapping the first for the same staff and weekday.
    f.engine
        .add_window(
            Ulid::new(),
            f.salon,
            vec![1],
            vec![f.cut],
            vec![f.marta],
            t(10, 0),
            t(13, 0),
        )
        .await
        .unwrap();

    let monday = upcoming(1, 2);
    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, Some(f.marta))
        .await
        .unwrap();

    let slots = &page.days[0].by_staff[&f.marta];
    // 9:00..12:30 union, each start exactly once, in order.
    assert_eq!(
        slots,
        &vec![
            t(9, 0),
            t(9, 30),
            t(10, 0),
            t(10, 30),
            t(11, 0),
            t(11, 30),
            t(12, 0),
            t(12, 30)
        ]
    );
}

#[tokio::test]
async fn staff_filter_narrows_resolution() {
    let f = salon_fixture("staff_filter.wal").await;
    let monday = upcoming(1, 2);

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, Some(f.rui))
        .await
        .unwrap();

    assert_eq!(page.staff.len(), 1);
    assert_eq!(page.staff[0].id, f.rui);
    for day in &page.days {
        assert!(day.by_staff.keys().all(|&id| id == f.rui));
    }
}

#[tokio::test]
async fn no_windows_means_empty_result() {
    let path = test_wal_path("no_windows.wal");
    let engine = Engine::new(path).unwrap();

    let salon = Ulid::new();
    engine.create_salon(salon, "Bare".into()).await.unwrap();
    let service = Ulid::new();
    engine
        .add_service(service, salon, "Cut".into(), 2500, 30)
        .await
        .unwrap();

    let page = engine
        .find_availability(salon, service, upcoming(1, 2), None)
        .await
        .unwrap();
    assert!(page.days.is_empty());
    assert!(page.staff.is_empty());
}

#[tokio::test]
async fn resolver_is_idempotent() {
    let f = salon_fixture("resolver_idempotent.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(9, 30)),
        )
        .await
        .unwrap();

    let first = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await
        .unwrap();
    let second = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_salon_and_service_are_not_found() {
    let f = salon_fixture("unknown_refs.wal").await;
    let monday = upcoming(1, 2);

    let r = f
        .engine
        .find_availability(Ulid::new(), f.cut, monday, None)
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));

    let r = f
        .engine
        .find_availability(f.salon, Ulid::new(), monday, None)
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn retired_service_is_invisible() {
    let f = salon_fixture("retired_service.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    f.engine
        .set_service_status(f.cut, ServiceStatus::Retired)
        .await
        .unwrap();

    let r = f
        .engine
        .find_availability(f.salon, f.cut, monday, None)
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));

    let r = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await;
    assert!(matches!(r, Err(EngineError::ServiceRetired(_))));
}

#[tokio::test]
async fn unavailable_service_still_resolves() {
    let f = salon_fixture("unavailable_service.wal").await;
    f.engine
        .set_service_status(f.cut, ServiceStatus::Unavailable)
        .await
        .unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.cut, upcoming(1, 2), None)
        .await
        .unwrap();
    assert!(!page.days.is_empty());
}

#[tokio::test]
async fn updated_window_moves_weekday() {
    let f = salon_fixture("update_window.wal").await;
    f.engine
        .update_window(
            f.window,
            vec![2], // Tuesday
            vec![f.cut, f.tint],
            vec![f.marta, f.rui],
            t(9, 0),
            t(12, 0),
        )
        .await
        .unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.cut, upcoming(1, 2), None)
        .await
        .unwrap();
    for day in &page.days {
        assert_eq!(day.date.weekday().num_days_from_sunday(), 2);
    }
}

#[tokio::test]
async fn removed_window_stops_offering() {
    let f = salon_fixture("remove_window.wal").await;
    f.engine.remove_window(f.window).await.unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.cut, upcoming(1, 2), None)
        .await
        .unwrap();
    assert!(page.days.is_empty());
}

// ── Booking commits ──────────────────────────────────────────────

#[tokio::test]
async fn identical_booking_conflicts_and_leaves_no_record() {
    let f = salon_fixture("identical_conflict.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;
    let start = monday.and_time(t(10, 0));

    f.engine
        .book_appointment(Ulid::new(), f.salon, client, f.marta, f.cut, vec![], start)
        .await
        .unwrap();

    let r = f
        .engine
        .book_appointment(Ulid::new(), f.salon, client, f.marta, f.cut, vec![], start)
        .await;
    assert!(matches!(r, Err(EngineError::Conflict(_))));

    let diary = f.engine.diary(&f.marta).unwrap();
    assert_eq!(diary.read().await.appointments.len(), 1);
}

#[tokio::test]
async fn earlier_long_appointment_blocks_later_start() {
    // Tint 10:00–11:00, then a cut at 10:30: the existing appointment starts
    // before the new interval but overlaps into it.
    let f = salon_fixture("earlier_overlap.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.tint,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await
        .unwrap();

    let r = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 30)),
        )
        .await;
    assert!(matches!(r, Err(EngineError::Conflict(_))));

    // Back-to-back at 11:00 is fine.
    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(11, 0)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn extras_extend_duration_and_price() {
    let f = salon_fixture("extras.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    let appt = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![f.tint],
            monday.and_time(t(9, 0)),
        )
        .await
        .unwrap();
    assert_eq!(appt.price_cents, 2500 + 4000);

    // Cut + tint runs 9:00–10:30, so 10:00 is taken...
    let r = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await;
    assert!(matches!(r, Err(EngineError::Conflict(_))));

    // ...and 10:30 is free.
    f.engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 30)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn past_booking_rejected() {
    let f = salon_fixture("past_booking.wal").await;
    let client = register_client(&f.engine, "Ana Reis").await;

    let r = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            now_naive() - Duration::hours(1),
        )
        .await;
    assert!(matches!(r, Err(EngineError::PastStart(_))));
}

#[tokio::test]
async fn booking_unknown_refs_rejected() {
    let f = salon_fixture("booking_unknown.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;
    let start = monday.and_time(t(10, 0));

    let unknown = Ulid::new();
    for (salon, cl, staff, service) in [
        (unknown, client, f.marta, f.cut),
        (f.salon, unknown, f.marta, f.cut),
        (f.salon, client, unknown, f.cut),
        (f.salon, client, f.marta, unknown),
    ] {
        let r = f
            .engine
            .book_appointment(Ulid::new(), salon, cl, staff, service, vec![], start)
            .await;
        assert!(matches!(r, Err(EngineError::NotFound(_))));
    }
}

#[tokio::test]
async fn cancellation_frees_the_slot() {
    let f = salon_fixture("cancellation_frees.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    let appt = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await
        .unwrap();

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, Some(f.marta))
        .await
        .unwrap();
    assert!(!page.days[0].by_staff[&f.marta].contains(&t(10, 0)));

    let cancelled = f.engine.cancel_appointment(appt.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, Some(f.marta))
        .await
        .unwrap();
    assert!(page.days[0].by_staff[&f.marta].contains(&t(10, 0)));

    // The record survives the cancel.
    let diary = f.engine.diary(&f.marta).unwrap();
    assert_eq!(diary.read().await.appointments.len(), 1);
}

#[tokio::test]
async fn rebooking_a_cancelled_slot_succeeds() {
    let f = salon_fixture("rebook_cancelled.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;
    let start = monday.and_time(t(10, 0));

    let appt = f
        .engine
        .book_appointment(Ulid::new(), f.salon, client, f.marta, f.cut, vec![], start)
        .await
        .unwrap();
    f.engine.cancel_appointment(appt.id).await.unwrap();

    f.engine
        .book_appointment(Ulid::new(), f.salon, client, f.marta, f.cut, vec![], start)
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_bookings_commit_exactly_once() {
    let f = salon_fixture("concurrent_bookings.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;
    let start = monday.and_time(t(10, 0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = f.engine.clone();
        let (salon, staff, service) = (f.salon, f.marta, f.cut);
        handles.push(tokio::spawn(async move {
            engine
                .book_appointment(Ulid::new(), salon, client, staff, service, vec![], start)
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);

    let diary = f.engine.diary(&f.marta).unwrap();
    let guard = diary.read().await;
    let active = guard
        .appointments
        .iter()
        .filter(|a| a.status == AppointmentStatus::Active)
        .count();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn concurrent_distinct_slots_all_commit() {
    let f = salon_fixture("concurrent_distinct.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    let mut handles = Vec::new();
    for i in 0..6u32 {
        let engine = f.engine.clone();
        let (salon, staff, service) = (f.salon, f.marta, f.cut);
        let start = monday.and_time(t(9 + i / 2, (i % 2) * 30));
        handles.push(tokio::spawn(async move {
            engine
                .book_appointment(Ulid::new(), salon, client, staff, service, vec![], start)
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let page = f
        .engine
        .find_availability(f.salon, f.cut, monday, Some(f.marta))
        .await
        .unwrap();
    // Monday is fully booked; the first qualifying day moves a week out.
    assert!(page.days.is_empty() || page.days[0].date != monday);
}

// ── Queries ──────────────────────────────────────────────────────

#[tokio::test]
async fn list_appointments_in_range() {
    let f = salon_fixture("list_appointments.wal").await;
    let monday = upcoming(1, 2);
    let client = register_client(&f.engine, "Ana Reis").await;

    let kept = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(9, 0)),
        )
        .await
        .unwrap();
    let dropped = f
        .engine
        .book_appointment(
            Ulid::new(),
            f.salon,
            client,
            f.marta,
            f.cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await
        .unwrap();
    f.engine.cancel_appointment(dropped.id).await.unwrap();

    let listed = f
        .engine
        .list_appointments(f.marta, monday, monday)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, kept.id);

    // A window of other days sees nothing.
    let empty = f
        .engine
        .list_appointments(f.marta, monday + Days::new(1), monday + Days::new(3))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn list_windows_for_salon() {
    let f = salon_fixture("list_windows.wal").await;
    let windows = f.engine.list_windows(f.salon).unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].id, f.window);
    assert!(matches!(
        f.engine.list_windows(Ulid::new()),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn staff_summary_uses_first_name_token() {
    let f = salon_fixture("staff_summary.wal").await;
    let summaries = f.engine.staff_summaries(&[f.marta, f.rui, Ulid::new()]);
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "Marta");
    assert_eq!(summaries[1].name, "Rui");
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_bookings() {
    let path = test_wal_path("replay_restores.wal");
    let monday = upcoming(1, 2);

    let (salon, marta, cut, client);
    {
        let engine = Engine::new(path.clone()).unwrap();
        salon = Ulid::new();
        engine.create_salon(salon, "Maison Duval".into()).await.unwrap();
        marta = Ulid::new();
        engine
            .hire_staff(marta, salon, "Marta Silva".into(), None)
            .await
            .unwrap();
        cut = Ulid::new();
        engine
            .add_service(cut, salon, "Cut".into(), 2500, 30)
            .await
            .unwrap();
        engine
            .add_window(
                Ulid::new(),
                salon,
                vec![1],
                vec![cut],
                vec![marta],
                t(9, 0),
                t(12, 0),
            )
            .await
            .unwrap();
        client = register_client(&engine, "Ana Reis").await;
        engine
            .book_appointment(
                Ulid::new(),
                salon,
                client,
                marta,
                cut,
                vec![],
                monday.and_time(t(10, 0)),
            )
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let page = engine
        .find_availability(salon, cut, monday, None)
        .await
        .unwrap();
    assert!(!page.days[0].by_staff[&marta].contains(&t(10, 0)));

    // The restored diary still rejects the same slot.
    let r = engine
        .book_appointment(
            Ulid::new(),
            salon,
            client,
            marta,
            cut,
            vec![],
            monday.and_time(t(10, 0)),
        )
        .await;
    assert!(matches!(r, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn compaction_preserves_cancelled_records() {
    let path = test_wal_path("compact_preserves.wal");
    let monday = upcoming(1, 2);

    let f = {
        let f = salon_fixture("compact_preserves.wal").await;
        let client = register_client(&f.engine, "Ana Reis").await;
        f.engine
            .book_appointment(
                Ulid::new(),
                f.salon,
                client,
                f.marta,
                f.cut,
                vec![],
                monday.and_time(t(9, 0)),
            )
            .await
            .unwrap();
        let second = f
            .engine
            .book_appointment(
                Ulid::new(),
                f.salon,
                client,
                f.marta,
                f.cut,
                vec![],
                monday.and_time(t(10, 0)),
            )
            .await
            .unwrap();
        f.engine.cancel_appointment(second.id).await.unwrap();

        assert!(f.engine.wal_appends_since_compact().await > 0);
        f.engine.compact_wal().await.unwrap();
        assert_eq!(f.engine.wal_appends_since_compact().await, 0);
        f
    };

    let engine = Engine::new(path).unwrap();
    let diary = engine.diary(&f.marta).unwrap();
    let guard = diary.read().await;
    assert_eq!(guard.appointments.len(), 2);
    let active = guard
        .appointments
        .iter()
        .filter(|a| a.status == AppointmentStatus::Active)
        .count();
    assert_eq!(active, 1);
}
