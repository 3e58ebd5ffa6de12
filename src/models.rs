/// Data models for the clinic engine.
///
/// This module defines the entities the engine reads and writes through
/// the storage collaborator:
/// - User / UserType: registered doctors, patients and admins
/// - Appointment: a booked slot with a doctor
/// - Session: the clinical encounter started from an appointment
/// - Attendance: presence record for a session
/// - Bill / Payment: billing records attached to a session
/// - AttendanceSummary / PaymentStatus: derived views, never stored
use crate::error::{ClinicError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of registered user, used to route deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserType {
    Doctor,
    Patient,
    Admin,
}

impl UserType {
    pub fn name(&self) -> &str {
        match self {
            UserType::Doctor => "DOCTOR",
            UserType::Patient => "PATIENT",
            UserType::Admin => "ADMIN",
        }
    }
}

/// A registered user. Doctors additionally own a weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub user_type: UserType,
    pub is_active: bool,
}

impl User {
    /// Create a new active user with validation.
    pub fn new(name: String, user_type: UserType) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(ClinicError::ValidationFailed(format!(
                "{} name cannot be empty",
                user_type.name().to_lowercase()
            )));
        }

        Ok(User {
            user_id: new_id(),
            name,
            user_type,
            is_active: true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn name(&self) -> &str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    /// Create a new scheduled appointment. The date must be strictly after `now`.
    pub fn new(
        doctor_id: String,
        patient_id: String,
        scheduled_at: NaiveDateTime,
        notes: Option<String>,
        now: NaiveDateTime,
    ) -> Result<Self> {
        if doctor_id.is_empty() {
            return Err(ClinicError::ValidationFailed(
                "Doctor ID cannot be empty".to_string(),
            ));
        }
        if patient_id.is_empty() {
            return Err(ClinicError::ValidationFailed(
                "Patient ID cannot be empty".to_string(),
            ));
        }
        ensure_future(scheduled_at, now)?;

        Ok(Appointment {
            appointment_id: new_id(),
            doctor_id,
            patient_id,
            scheduled_at,
            status: AppointmentStatus::Scheduled,
            notes: notes.filter(|n| !n.trim().is_empty()),
            created_at: now,
        })
    }

    /// Whether this appointment still occupies its slot.
    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    /// Check if a candidate start falls within one slot length of this appointment.
    pub fn overlaps_with(&self, candidate: NaiveDateTime, slot_length: Duration) -> bool {
        let gap = if candidate >= self.scheduled_at {
            candidate - self.scheduled_at
        } else {
            self.scheduled_at - candidate
        };
        gap < slot_length
    }
}

pub fn ensure_future(at: NaiveDateTime, now: NaiveDateTime) -> Result<()> {
    if at <= now {
        return Err(ClinicError::ValidationFailed(format!(
            "Appointment time {} must be in the future",
            at.format("%Y-%m-%d %H:%M")
        )));
    }
    Ok(())
}

/// Status of a clinical session.
///
/// The `Scheduled` state of the lifecycle is carried by the appointment
/// itself: a session only exists once it has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn name(&self) -> &str {
        match self {
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }

    /// Appointment status mirrored when a session ends with this status.
    pub fn as_appointment_status(&self) -> Option<AppointmentStatus> {
        match self {
            SessionStatus::InProgress => None,
            SessionStatus::Completed => Some(AppointmentStatus::Completed),
            SessionStatus::Cancelled => Some(AppointmentStatus::Cancelled),
            SessionStatus::NoShow => Some(AppointmentStatus::NoShow),
        }
    }
}

/// A clinical encounter created from exactly one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub appointment_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub status: SessionStatus,
    pub actual_start_time: NaiveDateTime,
    pub actual_end_time: Option<NaiveDateTime>,
}

impl Session {
    /// Start a session for a scheduled appointment.
    pub fn start(appointment: &Appointment, now: NaiveDateTime) -> Result<Self> {
        if appointment.status != AppointmentStatus::Scheduled {
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} is {}, only scheduled appointments can start a session",
                appointment.appointment_id,
                appointment.status.name()
            )));
        }

        Ok(Session {
            session_id: new_id(),
            appointment_id: appointment.appointment_id.clone(),
            doctor_id: appointment.doctor_id.clone(),
            patient_id: appointment.patient_id.clone(),
            status: SessionStatus::InProgress,
            actual_start_time: now,
            actual_end_time: None,
        })
    }

    pub fn ensure_in_progress(&self) -> Result<()> {
        if self.status != SessionStatus::InProgress {
            return Err(ClinicError::InvalidState(format!(
                "Session {} is {}, expected IN_PROGRESS",
                self.session_id,
                self.status.name()
            )));
        }
        Ok(())
    }

    /// Move the session to a terminal status.
    ///
    /// The end time never precedes the start time.
    pub fn finish(&mut self, final_status: SessionStatus, now: NaiveDateTime) -> Result<()> {
        self.ensure_in_progress()?;
        if !final_status.is_terminal() {
            return Err(ClinicError::ValidationFailed(format!(
                "{} is not a final session status",
                final_status.name()
            )));
        }

        self.status = final_status;
        self.actual_end_time = Some(now.max(self.actual_start_time));
        Ok(())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.actual_end_time.map(|end| end - self.actual_start_time)
    }
}

/// Presence record for one patient in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub session_id: String,
    pub patient_id: String,
    pub is_present: bool,
    pub notes: Option<String>,
    pub recorded_at: NaiveDateTime,
}

/// Per-doctor, per-day attendance counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub total_patients: u32,
    pub present_count: u32,
    pub absent_count: u32,
}

impl AttendanceSummary {
    pub fn new(doctor_id: String, date: NaiveDate) -> Self {
        AttendanceSummary {
            doctor_id,
            date,
            total_patients: 0,
            present_count: 0,
            absent_count: 0,
        }
    }

    pub fn record(&mut self, is_present: bool) {
        if is_present {
            self.present_count += 1;
        } else {
            self.absent_count += 1;
        }
        self.total_patients = self.present_count + self.absent_count;
    }

    /// Attendance rate as a percentage.
    pub fn attendance_rate(&self) -> f64 {
        if self.total_patients == 0 {
            return 0.0;
        }
        (self.present_count as f64 / self.total_patients as f64) * 100.0
    }
}

/// A bill raised against a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub bill_id: String,
    pub session_id: String,
    pub amount: f64,
    pub is_paid: bool,
    pub date: NaiveDate,
}

impl Bill {
    pub fn new(session_id: String, amount: f64, date: NaiveDate) -> Result<Self> {
        validate_amount(amount)?;

        Ok(Bill {
            bill_id: new_id(),
            session_id,
            amount,
            is_paid: false,
            date,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Insurance,
    BankTransfer,
}

impl PaymentMethod {
    /// Convert a string to a PaymentMethod value.
    pub fn from_string(value: &str) -> Result<Self> {
        match value.to_lowercase().trim() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "insurance" => Ok(PaymentMethod::Insurance),
            "bank_transfer" | "bank transfer" => Ok(PaymentMethod::BankTransfer),
            _ => Err(ClinicError::ValidationFailed(format!(
                "Invalid payment method: '{}'. Must be one of: cash, card, insurance, bank_transfer",
                value
            ))),
        }
    }
}

/// One installment paid against a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub bill_id: String,
    pub amount: f64,
    pub date: NaiveDateTime,
    pub method: PaymentMethod,
}

impl Payment {
    pub fn new(bill_id: String, amount: f64, method: PaymentMethod, date: NaiveDateTime) -> Result<Self> {
        validate_amount(amount)?;

        Ok(Payment {
            payment_id: new_id(),
            bill_id,
            amount,
            date,
            method,
        })
    }
}

/// Payment position of a bill. `is_paid` is the bill's explicit flag and is
/// not derived from `total_paid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    pub bill_id: String,
    pub amount: f64,
    pub total_paid: f64,
    pub outstanding: f64,
    pub is_paid: bool,
    pub payment_count: usize,
}

pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ClinicError::ValidationFailed(format!(
            "Amount must be a positive number, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn appointment() -> Appointment {
        Appointment::new("doc".into(), "pat".into(), at(10, 0), None, at(8, 0)).unwrap()
    }

    #[test]
    fn appointment_must_be_in_the_future() {
        let err = Appointment::new("doc".into(), "pat".into(), at(8, 0), None, at(8, 0)).unwrap_err();
        assert!(matches!(err, ClinicError::ValidationFailed(_)));
        assert_eq!(appointment().status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn overlap_uses_slot_length_on_both_sides() {
        let apt = appointment();
        let slot = Duration::minutes(30);
        assert!(apt.overlaps_with(at(10, 15), slot));
        assert!(apt.overlaps_with(at(9, 45), slot));
        assert!(!apt.overlaps_with(at(10, 30), slot));
        assert!(!apt.overlaps_with(at(9, 30), slot));
    }

    #[test]
    fn session_finish_rejects_non_terminal_and_second_finish() {
        let mut session = Session::start(&appointment(), at(10, 0)).unwrap();
        assert!(matches!(
            session.finish(SessionStatus::InProgress, at(10, 30)),
            Err(ClinicError::ValidationFailed(_))
        ));

        session.finish(SessionStatus::Completed, at(10, 30)).unwrap();
        assert_eq!(session.duration(), Some(Duration::minutes(30)));
        assert!(matches!(
            session.finish(SessionStatus::Cancelled, at(10, 40)),
            Err(ClinicError::InvalidState(_))
        ));
    }

    #[test]
    fn session_end_never_precedes_start() {
        let mut session = Session::start(&appointment(), at(10, 0)).unwrap();
        session.finish(SessionStatus::NoShow, at(9, 0)).unwrap();
        assert_eq!(session.actual_end_time, Some(at(10, 0)));
    }

    #[test]
    fn summary_totals_stay_consistent() {
        let mut summary = AttendanceSummary::new("doc".into(), at(0, 0).date());
        summary.record(true);
        summary.record(false);
        summary.record(true);
        assert_eq!(summary.total_patients, 3);
        assert_eq!(summary.present_count + summary.absent_count, summary.total_patients);
    }

    #[test]
    fn amounts_must_be_positive() {
        assert!(Bill::new("s".into(), 0.0, at(0, 0).date()).is_err());
        assert!(Payment::new("b".into(), f64::NAN, PaymentMethod::Cash, at(0, 0)).is_err());
        assert!(Bill::new("s".into(), 40.0, at(0, 0).date()).is_ok());
    }

    #[test]
    fn parses_payment_methods() {
        assert_eq!(
            PaymentMethod::from_string("bank_transfer").unwrap(),
            PaymentMethod::BankTransfer
        );
    }
}
