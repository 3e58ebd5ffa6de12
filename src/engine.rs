//! Entry point used by the transport layer. `ClinicEngine` wires the
//! stateless services to one storage collaborator, one clock and one
//! configuration, and exposes the engine operations.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use log::info;

use crate::attendance::{AttendanceRecorder, DailySummary};
use crate::availability::AvailabilityCalculator;
use crate::billing::BillingGate;
use crate::booking::AppointmentBook;
use crate::calendar::{ScheduleWindow, WeeklySchedule};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::deactivation::DeactivationRegistry;
use crate::error::{ClinicError, Result};
use crate::models::{
    Appointment, Attendance, Bill, Payment, PaymentMethod, PaymentStatus, Session,
    SessionStatus, User, UserType,
};
use crate::session::SessionStateMachine;
use crate::storage::{ClinicStore, InMemoryStore};

#[derive(Clone)]
pub struct ClinicEngine {
    store: Arc<dyn ClinicStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    availability: AvailabilityCalculator,
    book: AppointmentBook,
    sessions: SessionStateMachine,
    attendance: AttendanceRecorder,
    billing: BillingGate,
    deactivation: Arc<DeactivationRegistry>,
}

impl ClinicEngine {
    pub fn new(store: Arc<dyn ClinicStore>, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let availability = AvailabilityCalculator::new(store.clone(), config.slot_length());
        let book = AppointmentBook::new(store.clone(), availability.clone(), clock.clone());
        let attendance = AttendanceRecorder::new(store.clone(), clock.clone());
        let sessions = SessionStateMachine::new(
            store.clone(),
            book.clone(),
            attendance.clone(),
            clock.clone(),
        );
        let billing = BillingGate::new(store.clone(), clock.clone());
        let deactivation = Arc::new(DeactivationRegistry::with_defaults(
            store.clone(),
            book.clone(),
        ));

        Ok(Self {
            store,
            clock,
            config,
            availability,
            book,
            sessions,
            attendance,
            billing,
            deactivation,
        })
    }

    /// Engine over a fresh in-memory store and the system clock.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(Arc::new(InMemoryStore::new()), config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    // Users and schedules

    fn register(&self, name: &str, user_type: UserType) -> Result<String> {
        let user = User::new(name.to_string(), user_type)?;
        self.store.insert_user(&user)?;
        info!("Registered {} {} ({})", user_type.name(), user.name, user.user_id);
        Ok(user.user_id)
    }

    pub fn register_doctor(&self, name: &str) -> Result<String> {
        self.register(name, UserType::Doctor)
    }

    pub fn register_patient(&self, name: &str) -> Result<String> {
        self.register(name, UserType::Patient)
    }

    pub fn register_admin(&self, name: &str) -> Result<String> {
        self.register(name, UserType::Admin)
    }

    pub fn user(&self, user_id: &str) -> Result<User> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| ClinicError::not_found("User", user_id))
    }

    pub fn doctor_schedule(&self, doctor_id: &str) -> Result<WeeklySchedule> {
        self.store
            .get_doctor_weekly_schedule(doctor_id)?
            .ok_or_else(|| ClinicError::not_found("Doctor", doctor_id))
    }

    pub fn add_schedule_window(
        &self,
        doctor_id: &str,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<()> {
        let mut schedule = self.doctor_schedule(doctor_id)?;
        schedule.add_window(ScheduleWindow::new(day, start, end)?)?;
        self.store.save_doctor_weekly_schedule(doctor_id, &schedule)?;
        info!(
            "Doctor {} available {} {}-{}",
            doctor_id,
            day,
            start.format("%H:%M"),
            end.format("%H:%M")
        );
        Ok(())
    }

    pub fn remove_schedule_window(&self, doctor_id: &str, day: Weekday, start: NaiveTime) -> Result<bool> {
        let mut schedule = self.doctor_schedule(doctor_id)?;
        let removed = schedule.remove_window(day, start);
        if removed {
            self.store.save_doctor_weekly_schedule(doctor_id, &schedule)?;
        }
        Ok(removed)
    }

    pub fn deactivate_user(&self, user_id: &str) -> Result<()> {
        let user = self.user(user_id)?;
        self.deactivation.deactivate(user.user_type, user_id)
    }

    // Availability and booking

    pub fn check_doctor_availability(&self, doctor_id: &str, at: NaiveDateTime) -> Result<bool> {
        self.availability.is_available(doctor_id, at)
    }

    pub fn available_slots(&self, doctor_id: &str, date: NaiveDate) -> Result<Vec<NaiveDateTime>> {
        self.availability
            .available_slots(doctor_id, date, self.clock.now())
    }

    pub fn book_appointment(
        &self,
        doctor_id: &str,
        patient_id: &str,
        at: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<String> {
        self.book.book(doctor_id, patient_id, at, notes)
    }

    pub fn cancel_appointment(&self, appointment_id: &str) -> Result<()> {
        self.book.cancel(appointment_id)
    }

    pub fn reschedule_appointment(&self, appointment_id: &str, at: NaiveDateTime) -> Result<Appointment> {
        self.book.reschedule(appointment_id, at)
    }

    pub fn appointment(&self, appointment_id: &str) -> Result<Appointment> {
        self.book.get(appointment_id)
    }

    pub fn appointments_for_doctor(&self, doctor_id: &str) -> Result<Vec<Appointment>> {
        self.book.for_doctor(doctor_id)
    }

    // Sessions and attendance

    pub fn start_session(&self, appointment_id: &str) -> Result<String> {
        self.sessions.start_session(appointment_id)
    }

    pub fn end_session(&self, session_id: &str, final_status: SessionStatus) -> Result<Session> {
        self.sessions.end_session(session_id, final_status)
    }

    pub fn mark_present(&self, session_id: &str, patient_id: &str, notes: Option<String>) -> Result<Attendance> {
        self.sessions.mark_present(session_id, patient_id, notes)
    }

    pub fn mark_absent(&self, session_id: &str, patient_id: &str, notes: Option<String>) -> Result<Attendance> {
        self.sessions.mark_absent(session_id, patient_id, notes)
    }

    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions.get(session_id)
    }

    pub fn session_for_appointment(&self, appointment_id: &str) -> Result<Option<Session>> {
        self.sessions.for_appointment(appointment_id)
    }

    pub fn attendance(&self, session_id: &str, patient_id: &str) -> Result<Option<Attendance>> {
        self.attendance.get(session_id, patient_id)
    }

    pub fn get_daily_attendance_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        self.attendance.daily_summary(date)
    }

    // Billing

    pub fn create_bill(&self, session_id: &str, amount: f64) -> Result<Bill> {
        self.billing.create_bill(session_id, amount)
    }

    pub fn mark_bill_as_paid(&self, bill_id: &str) -> Result<bool> {
        self.billing.mark_paid(bill_id)
    }

    pub fn record_payment(&self, bill_id: &str, amount: f64, method: PaymentMethod) -> Result<Payment> {
        self.billing.record_payment(bill_id, amount, method)
    }

    pub fn payment_status(&self, bill_id: &str) -> Result<PaymentStatus> {
        self.billing.payment_status(bill_id)
    }

    pub fn unpaid_bills_for_patient(&self, patient_id: &str) -> Result<Vec<Bill>> {
        self.billing.unpaid_bills_for_patient(patient_id)
    }

    pub fn payments_for_patient(&self, patient_id: &str) -> Result<Vec<Payment>> {
        self.billing.payments_for_patient(patient_id)
    }

    pub fn payments_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> Result<Vec<Payment>> {
        self.billing.payments_between(from, to)
    }
}
