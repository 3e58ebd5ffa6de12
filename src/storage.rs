//! Storage collaborator used by every engine service.
//!
//! Entities are kept arena-style: each table is keyed by the entity's
//! opaque id and cross references are ids, never embedded values. Writes
//! that race in the engine are guarded here, inside one critical section:
//!
//! * an appointment may not start within one slot length of another
//!   non-cancelled appointment for the same doctor;
//! * an appointment gets at most one session, and only while scheduled;
//! * session, appointment and bill updates are compare-and-set on status;
//! * attendance is only written while its session is in progress.
//!
//! A failed guard is reported as `Conflict`.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::warn;

use crate::calendar::WeeklySchedule;
use crate::error::{ClinicError, Result};
use crate::models::{
    Appointment, AppointmentStatus, Attendance, Bill, Payment, PaymentStatus, Session,
    SessionStatus, User, UserType,
};

pub trait ClinicStore: Send + Sync {
    fn insert_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<()>;

    /// `None` when no doctor with this id is registered.
    fn get_doctor_weekly_schedule(&self, doctor_id: &str) -> Result<Option<WeeklySchedule>>;
    fn save_doctor_weekly_schedule(&self, doctor_id: &str, schedule: &WeeklySchedule) -> Result<()>;

    fn get_appointment(&self, appointment_id: &str) -> Result<Option<Appointment>>;
    fn get_appointments_by_doctor(&self, doctor_id: &str) -> Result<Vec<Appointment>>;
    fn get_appointments_by_patient(&self, patient_id: &str) -> Result<Vec<Appointment>>;
    /// Insert, enforcing the per-(doctor, slot) uniqueness constraint.
    fn insert_appointment(&self, appointment: &Appointment, slot_length: Duration) -> Result<()>;
    /// Replace an appointment whose stored status still equals `expected`.
    /// A changed time is re-checked against the uniqueness constraint.
    fn update_appointment(
        &self,
        appointment: &Appointment,
        expected: AppointmentStatus,
        slot_length: Duration,
    ) -> Result<()>;

    fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    fn get_session_by_appointment(&self, appointment_id: &str) -> Result<Option<Session>>;
    fn get_sessions_started_on(&self, date: NaiveDate) -> Result<Vec<Session>>;
    fn insert_session(&self, session: &Session) -> Result<()>;
    fn update_session(&self, session: &Session, expected: SessionStatus) -> Result<()>;

    fn upsert_attendance(&self, attendance: &Attendance) -> Result<()>;
    fn get_attendance(&self, session_id: &str, patient_id: &str) -> Result<Option<Attendance>>;
    fn get_attendance_by_session(&self, session_id: &str) -> Result<Vec<Attendance>>;

    fn insert_bill(&self, bill: &Bill) -> Result<()>;
    fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>>;
    fn update_bill(&self, bill: &Bill, expected_paid: bool) -> Result<()>;
    fn get_unpaid_bills_by_patient(&self, patient_id: &str) -> Result<Vec<Bill>>;

    fn insert_payment(&self, payment: &Payment) -> Result<()>;
    fn get_payment_status_by_bill(&self, bill_id: &str) -> Result<Option<PaymentStatus>>;
    fn get_payments_by_patient(&self, patient_id: &str) -> Result<Vec<Payment>>;
    /// Payments with `from <= date < to`.
    fn get_payments_by_date_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Payment>>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    schedules: HashMap<String, WeeklySchedule>,
    appointments: HashMap<String, Appointment>,
    sessions: HashMap<String, Session>,
    session_by_appointment: HashMap<String, String>,
    attendance: HashMap<(String, String), Attendance>,
    bills: HashMap<String, Bill>,
    bill_by_session: HashMap<String, String>,
    payments: HashMap<String, Payment>,
}

impl Tables {
    fn slot_taken_by(
        &self,
        appointment: &Appointment,
        slot_length: Duration,
    ) -> Option<&Appointment> {
        self.appointments.values().find(|existing| {
            existing.appointment_id != appointment.appointment_id
                && existing.doctor_id == appointment.doctor_id
                && existing.holds_slot()
                && existing.overlaps_with(appointment.scheduled_at, slot_length)
        })
    }

    fn has_live_session(&self, appointment_id: &str) -> bool {
        self.session_by_appointment
            .get(appointment_id)
            .and_then(|session_id| self.sessions.get(session_id))
            .map(|session| session.status == SessionStatus::InProgress)
            .unwrap_or(false)
    }

    fn patient_of_bill(&self, bill: &Bill) -> Option<&str> {
        self.sessions
            .get(&bill.session_id)
            .map(|session| session.patient_id.as_str())
    }

    fn patient_of_payment(&self, payment: &Payment) -> Option<&str> {
        self.bills
            .get(&payment.bill_id)
            .and_then(|bill| self.patient_of_bill(bill))
    }
}

/// Reference store holding every table behind a single mutex.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Store mutex poisoned, continuing with inner state");
                poisoned.into_inner()
            }
        }
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl FnMut(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

impl ClinicStore for InMemoryStore {
    fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = self.lock();
        if tables.users.contains_key(&user.user_id) {
            return Err(ClinicError::Conflict(format!(
                "User {} already exists",
                user.user_id
            )));
        }
        if user.user_type == UserType::Doctor {
            tables
                .schedules
                .insert(user.user_id.clone(), WeeklySchedule::new());
        }
        tables.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<()> {
        let mut tables = self.lock();
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or_else(|| ClinicError::not_found("User", user_id))?;
        user.is_active = is_active;
        Ok(())
    }

    fn get_doctor_weekly_schedule(&self, doctor_id: &str) -> Result<Option<WeeklySchedule>> {
        let tables = self.lock();
        let is_doctor = tables
            .users
            .get(doctor_id)
            .map(|u| u.user_type == UserType::Doctor)
            .unwrap_or(false);
        if !is_doctor {
            return Ok(None);
        }
        Ok(Some(
            tables.schedules.get(doctor_id).cloned().unwrap_or_default(),
        ))
    }

    fn save_doctor_weekly_schedule(&self, doctor_id: &str, schedule: &WeeklySchedule) -> Result<()> {
        let mut tables = self.lock();
        match tables.users.get(doctor_id) {
            Some(user) if user.user_type == UserType::Doctor => {}
            _ => return Err(ClinicError::not_found("Doctor", doctor_id)),
        }
        tables
            .schedules
            .insert(doctor_id.to_string(), schedule.clone());
        Ok(())
    }

    fn get_appointment(&self, appointment_id: &str) -> Result<Option<Appointment>> {
        Ok(self.lock().appointments.get(appointment_id).cloned())
    }

    fn get_appointments_by_doctor(&self, doctor_id: &str) -> Result<Vec<Appointment>> {
        let tables = self.lock();
        let found = tables
            .appointments
            .values()
            .filter(|a| a.doctor_id == doctor_id)
            .cloned()
            .collect();
        Ok(sorted_by(found, |a: &Appointment| a.scheduled_at))
    }

    fn get_appointments_by_patient(&self, patient_id: &str) -> Result<Vec<Appointment>> {
        let tables = self.lock();
        let found = tables
            .appointments
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        Ok(sorted_by(found, |a: &Appointment| a.scheduled_at))
    }

    fn insert_appointment(&self, appointment: &Appointment, slot_length: Duration) -> Result<()> {
        let mut tables = self.lock();
        if tables.appointments.contains_key(&appointment.appointment_id) {
            return Err(ClinicError::Conflict(format!(
                "Appointment {} already exists",
                appointment.appointment_id
            )));
        }
        if appointment.holds_slot() {
            if let Some(existing) = tables.slot_taken_by(appointment, slot_length) {
                return Err(ClinicError::Conflict(format!(
                    "Doctor {} already booked at {}",
                    appointment.doctor_id,
                    existing.scheduled_at.format("%Y-%m-%d %H:%M")
                )));
            }
        }
        tables
            .appointments
            .insert(appointment.appointment_id.clone(), appointment.clone());
        Ok(())
    }

    fn update_appointment(
        &self,
        appointment: &Appointment,
        expected: AppointmentStatus,
        slot_length: Duration,
    ) -> Result<()> {
        let mut tables = self.lock();
        let stored = tables
            .appointments
            .get(&appointment.appointment_id)
            .ok_or_else(|| ClinicError::not_found("Appointment", &appointment.appointment_id))?;
        if stored.status != expected {
            return Err(ClinicError::Conflict(format!(
                "Appointment {} changed concurrently: expected {}, found {}",
                appointment.appointment_id,
                expected.name(),
                stored.status.name()
            )));
        }
        if tables.has_live_session(&appointment.appointment_id) {
            return Err(ClinicError::Conflict(format!(
                "Appointment {} has a session in progress",
                appointment.appointment_id
            )));
        }
        if stored.scheduled_at != appointment.scheduled_at && appointment.holds_slot() {
            if let Some(existing) = tables.slot_taken_by(appointment, slot_length) {
                return Err(ClinicError::Conflict(format!(
                    "Doctor {} already booked at {}",
                    appointment.doctor_id,
                    existing.scheduled_at.format("%Y-%m-%d %H:%M")
                )));
            }
        }
        tables
            .appointments
            .insert(appointment.appointment_id.clone(), appointment.clone());
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.lock().sessions.get(session_id).cloned())
    }

    fn get_session_by_appointment(&self, appointment_id: &str) -> Result<Option<Session>> {
        let tables = self.lock();
        Ok(tables
            .session_by_appointment
            .get(appointment_id)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    fn get_sessions_started_on(&self, date: NaiveDate) -> Result<Vec<Session>> {
        let tables = self.lock();
        let found = tables
            .sessions
            .values()
            .filter(|s| s.actual_start_time.date() == date)
            .cloned()
            .collect();
        Ok(sorted_by(found, |s: &Session| s.actual_start_time))
    }

    fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.lock();
        if tables
            .session_by_appointment
            .contains_key(&session.appointment_id)
        {
            return Err(ClinicError::Conflict(format!(
                "Appointment {} already has a session",
                session.appointment_id
            )));
        }
        match tables.appointments.get(&session.appointment_id) {
            Some(appointment) if appointment.status == AppointmentStatus::Scheduled => {}
            Some(appointment) => {
                return Err(ClinicError::Conflict(format!(
                    "Appointment {} is {}",
                    session.appointment_id,
                    appointment.status.name()
                )))
            }
            None => return Err(ClinicError::not_found("Appointment", &session.appointment_id)),
        }
        tables
            .session_by_appointment
            .insert(session.appointment_id.clone(), session.session_id.clone());
        tables
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn update_session(&self, session: &Session, expected: SessionStatus) -> Result<()> {
        let mut tables = self.lock();
        let stored = tables
            .sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| ClinicError::not_found("Session", &session.session_id))?;
        if stored.status != expected {
            return Err(ClinicError::Conflict(format!(
                "Session {} changed concurrently: expected {}, found {}",
                session.session_id,
                expected.name(),
                stored.status.name()
            )));
        }
        *stored = session.clone();
        Ok(())
    }

    fn upsert_attendance(&self, attendance: &Attendance) -> Result<()> {
        let mut tables = self.lock();
        let session = tables
            .sessions
            .get(&attendance.session_id)
            .ok_or_else(|| ClinicError::not_found("Session", &attendance.session_id))?;
        if session.status != SessionStatus::InProgress {
            return Err(ClinicError::Conflict(format!(
                "Session {} ended before attendance was written",
                attendance.session_id
            )));
        }
        tables.attendance.insert(
            (attendance.session_id.clone(), attendance.patient_id.clone()),
            attendance.clone(),
        );
        Ok(())
    }

    fn get_attendance(&self, session_id: &str, patient_id: &str) -> Result<Option<Attendance>> {
        Ok(self
            .lock()
            .attendance
            .get(&(session_id.to_string(), patient_id.to_string()))
            .cloned())
    }

    fn get_attendance_by_session(&self, session_id: &str) -> Result<Vec<Attendance>> {
        let tables = self.lock();
        let found = tables
            .attendance
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        Ok(sorted_by(found, |a: &Attendance| a.patient_id.clone()))
    }

    fn insert_bill(&self, bill: &Bill) -> Result<()> {
        let mut tables = self.lock();
        if !tables.sessions.contains_key(&bill.session_id) {
            return Err(ClinicError::not_found("Session", &bill.session_id));
        }
        if let Some(existing) = tables.bill_by_session.get(&bill.session_id) {
            return Err(ClinicError::Conflict(format!(
                "Session {} already billed as {}",
                bill.session_id, existing
            )));
        }
        tables
            .bill_by_session
            .insert(bill.session_id.clone(), bill.bill_id.clone());
        tables.bills.insert(bill.bill_id.clone(), bill.clone());
        Ok(())
    }

    fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>> {
        Ok(self.lock().bills.get(bill_id).cloned())
    }

    fn update_bill(&self, bill: &Bill, expected_paid: bool) -> Result<()> {
        let mut tables = self.lock();
        let stored = tables
            .bills
            .get_mut(&bill.bill_id)
            .ok_or_else(|| ClinicError::not_found("Bill", &bill.bill_id))?;
        if stored.is_paid != expected_paid {
            return Err(ClinicError::Conflict(format!(
                "Bill {} changed concurrently",
                bill.bill_id
            )));
        }
        *stored = bill.clone();
        Ok(())
    }

    fn get_unpaid_bills_by_patient(&self, patient_id: &str) -> Result<Vec<Bill>> {
        let tables = self.lock();
        let found = tables
            .bills
            .values()
            .filter(|b| !b.is_paid && tables.patient_of_bill(b) == Some(patient_id))
            .cloned()
            .collect();
        Ok(sorted_by(found, |b: &Bill| b.date))
    }

    fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.lock();
        if !tables.bills.contains_key(&payment.bill_id) {
            return Err(ClinicError::not_found("Bill", &payment.bill_id));
        }
        if tables.payments.contains_key(&payment.payment_id) {
            return Err(ClinicError::Conflict(format!(
                "Payment {} already exists",
                payment.payment_id
            )));
        }
        tables
            .payments
            .insert(payment.payment_id.clone(), payment.clone());
        Ok(())
    }

    fn get_payment_status_by_bill(&self, bill_id: &str) -> Result<Option<PaymentStatus>> {
        let tables = self.lock();
        let Some(bill) = tables.bills.get(bill_id) else {
            return Ok(None);
        };
        let paid: Vec<f64> = tables
            .payments
            .values()
            .filter(|p| p.bill_id == bill_id)
            .map(|p| p.amount)
            .collect();
        let total_paid: f64 = paid.iter().sum();

        Ok(Some(PaymentStatus {
            bill_id: bill.bill_id.clone(),
            amount: bill.amount,
            total_paid,
            outstanding: (bill.amount - total_paid).max(0.0),
            is_paid: bill.is_paid,
            payment_count: paid.len(),
        }))
    }

    fn get_payments_by_patient(&self, patient_id: &str) -> Result<Vec<Payment>> {
        let tables = self.lock();
        let found = tables
            .payments
            .values()
            .filter(|p| tables.patient_of_payment(p) == Some(patient_id))
            .cloned()
            .collect();
        Ok(sorted_by(found, |p: &Payment| p.date))
    }

    fn get_payments_by_date_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Payment>> {
        let tables = self.lock();
        let found = tables
            .payments
            .values()
            .filter(|p| from <= p.date && p.date < to)
            .cloned()
            .collect();
        Ok(sorted_by(found, |p: &Payment| p.date))
    }
}
