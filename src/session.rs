/// Clinical session lifecycle.
///
/// States: a scheduled appointment becomes an `InProgress` session, which
/// ends as `Completed`, `Cancelled` or `NoShow`. The three end states are
/// terminal. Attendance can be marked while the session is in progress
/// and never ends the session by itself.
use std::sync::Arc;

use log::{info, warn};

use crate::attendance::AttendanceRecorder;
use crate::booking::AppointmentBook;
use crate::clock::Clock;
use crate::error::{ClinicError, Result};
use crate::models::{Attendance, Session, SessionStatus};
use crate::storage::ClinicStore;

#[derive(Clone)]
pub struct SessionStateMachine {
    store: Arc<dyn ClinicStore>,
    book: AppointmentBook,
    attendance: AttendanceRecorder,
    clock: Arc<dyn Clock>,
}

impl SessionStateMachine {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        book: AppointmentBook,
        attendance: AttendanceRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SessionStateMachine {
            store,
            book,
            attendance,
            clock,
        }
    }

    /// Start the session for a scheduled appointment and return its id.
    pub fn start_session(&self, appointment_id: &str) -> Result<String> {
        let appointment = self.book.get(appointment_id)?;

        if let Some(existing) = self.store.get_session_by_appointment(appointment_id)? {
            warn!(
                "Appointment {} already has session {}",
                appointment_id, existing.session_id
            );
            return Err(ClinicError::InvalidState(format!(
                "Appointment {} already has session {}",
                appointment_id, existing.session_id
            )));
        }

        let session = Session::start(&appointment, self.clock.now())?;
        self.store.insert_session(&session)?;

        info!(
            "Session {} started for appointment {} (doctor {})",
            session.session_id, appointment_id, session.doctor_id
        );
        Ok(session.session_id)
    }

    /// End an in-progress session with a terminal status.
    pub fn end_session(&self, session_id: &str, final_status: SessionStatus) -> Result<Session> {
        let mut session = self.get(session_id)?;

        if let Err(err) = session.finish(final_status, self.clock.now()) {
            warn!("Rejected end of session {session_id}: {err}");
            return Err(err);
        }
        self.store
            .update_session(&session, SessionStatus::InProgress)?;

        if let Some(outcome) = final_status.as_appointment_status() {
            self.book.close(&session.appointment_id, outcome)?;
        }

        info!(
            "Session {} ended as {}",
            session_id,
            session.status.name()
        );
        Ok(session)
    }

    pub fn mark_present(
        &self,
        session_id: &str,
        patient_id: &str,
        notes: Option<String>,
    ) -> Result<Attendance> {
        self.attendance.record(session_id, patient_id, true, notes)
    }

    /// Mark the patient absent. The session stays in progress until it is
    /// explicitly ended.
    pub fn mark_absent(
        &self,
        session_id: &str,
        patient_id: &str,
        notes: Option<String>,
    ) -> Result<Attendance> {
        self.attendance.record(session_id, patient_id, false, notes)
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| ClinicError::not_found("Session", session_id))
    }

    pub fn for_appointment(&self, appointment_id: &str) -> Result<Option<Session>> {
        self.store.get_session_by_appointment(appointment_id)
    }
}
