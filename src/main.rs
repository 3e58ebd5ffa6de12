/// Demo driver for the clinic engine.
///
/// Loads configuration, sets up a doctor with a weekly schedule, books a
/// few appointments, runs them through the session lifecycle and prints
/// the resulting attendance summary and billing state.
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use log::{error, warn};

use easyclinic::config::EngineConfig;
use easyclinic::models::{PaymentMethod, SessionStatus};
use easyclinic::{logging, ClinicEngine};

const DEFAULT_CONFIG: &str = "easyclinic.json";

fn print_header() {
    println!("\n{}", "=".repeat(60));
    println!("       CLINIC SCHEDULING ENGINE");
    println!("{}", "=".repeat(60));
}

fn next_weekday(from: NaiveDate, day: Weekday) -> NaiveDate {
    let mut date = from + Duration::days(1);
    while date.weekday() != day {
        date = date + Duration::days(1);
    }
    date
}

fn hm(h: u32, m: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, 0).with_context(|| format!("invalid time {h:02}:{m:02}"))
}

fn run_demo(engine: &ClinicEngine) -> Result<()> {
    println!("\n--- Running Demo ---");

    let doctor = engine.register_doctor("Dr. Demo")?;
    engine.add_schedule_window(&doctor, Weekday::Mon, hm(9, 0)?, hm(12, 0)?)?;
    engine.add_schedule_window(&doctor, Weekday::Mon, hm(13, 0)?, hm(17, 0)?)?;
    println!(
        "Doctor {} available Mon 09:00-12:00 and 13:00-17:00, {}",
        doctor,
        engine.doctor_schedule(&doctor)?
    );

    let monday = next_weekday(engine.now().date(), Weekday::Mon);
    let patients = [
        ("John Smith", hm(9, 0)?),
        ("Jane Doe", hm(10, 0)?),
        ("Bob Wilson", hm(14, 0)?),
    ];

    let mut booked = Vec::new();
    for (name, time) in patients {
        let patient = engine.register_patient(name)?;
        let id = engine.book_appointment(&doctor, &patient, monday.and_time(time), None)?;
        println!("  Booked {:12} -> {}", name, monday.and_time(time).format("%a %Y-%m-%d %H:%M"));
        booked.push((name, patient, id));
    }

    let clash = engine.book_appointment(&doctor, &booked[0].1, monday.and_time(hm(10, 15)?), None);
    if let Err(err) = clash {
        println!("  Second booking near 10:00 rejected: {}", err);
    }
    let outside = engine.book_appointment(&doctor, &booked[0].1, monday.and_time(hm(12, 30)?), None);
    if let Err(err) = outside {
        println!("  Booking at lunch rejected: {}", err);
    }

    println!(
        "Open slots on {}: {}",
        monday.format("%Y-%m-%d"),
        engine.available_slots(&doctor, monday)?.len()
    );

    println!("\n--- Sessions ---");
    let outcomes = [
        (true, SessionStatus::Completed),
        (false, SessionStatus::NoShow),
        (true, SessionStatus::Completed),
    ];
    let mut bills = Vec::new();
    for ((name, patient, appointment_id), (present, outcome)) in booked.iter().zip(outcomes) {
        let session_id = engine.start_session(appointment_id)?;
        if present {
            engine.mark_present(&session_id, patient, None)?;
        } else {
            engine.mark_absent(&session_id, patient, Some("did not arrive".into()))?;
        }
        let session = engine.end_session(&session_id, outcome)?;
        let minutes = session.duration().map(|d| d.num_minutes()).unwrap_or(0);
        println!("  {:12} -> {} after {} min", name, session.status.name(), minutes);

        if outcome == SessionStatus::Completed {
            bills.push(engine.create_bill(&session_id, 75.0)?);
        }
    }

    println!("\n--- Billing ---");
    for (i, bill) in bills.iter().enumerate() {
        engine.record_payment(&bill.bill_id, 50.0, PaymentMethod::from_string("card")?)?;
        if i == 0 {
            engine.record_payment(&bill.bill_id, 25.0, PaymentMethod::from_string("cash")?)?;
            engine.mark_bill_as_paid(&bill.bill_id)?;
        }
        let status = engine.payment_status(&bill.bill_id)?;
        println!(
            "  Bill {}...: paid {:.2} of {:.2}, flagged paid: {}",
            &bill.bill_id[..8],
            status.total_paid,
            status.amount,
            status.is_paid
        );
    }
    if let Some(first) = bills.first() {
        if let Err(err) = engine.mark_bill_as_paid(&first.bill_id) {
            println!("  Paying twice rejected: {}", err);
        }
    }

    println!("\n--- Attendance Summary ---");
    let summary = engine.get_daily_attendance_summary(engine.now().date())?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    for (doctor_id, day) in &summary {
        println!("  Doctor {}: {:.0}% attended", doctor_id, day.attendance_rate());
    }

    Ok(())
}

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = match EngineConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err:#}");
            EngineConfig::default()
        }
    };
    logging::init(&config.log_level);

    print_header();

    let engine = match ClinicEngine::in_memory(config) {
        Ok(engine) => engine,
        Err(err) => {
            error!("Failed to start engine: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run_demo(&engine) {
        warn!("Demo stopped: {err:#}");
        std::process::exit(1);
    }
}
